// Copyright 2024. The Umbra Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! The emission curve. The base reward halves geometrically with the emitted supply and is
//! penalised quadratically when a block grows past the median of the reward window.

use thiserror::Error;

use super::ConsensusConstants;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RewardError {
    #[error("Cumulative block size exceeds twice the effective median")]
    BlockTooBig,
}

/// The miner reward and emission change for a block of `current_block_size` bytes given the
/// median of the reward window and the coins generated so far.
pub fn calculate_block_reward(
    constants: &ConsensusConstants,
    median_block_size: u64,
    current_block_size: u64,
    already_generated_coins: u64,
    fee: u64,
) -> Result<(u64, u64), RewardError> {
    let base_reward = (constants.money_supply - already_generated_coins) >> constants.emission_speed_factor;

    let median = median_block_size.max(constants.block_granted_full_reward_zone);
    if current_block_size > 2 * median {
        return Err(RewardError::BlockTooBig);
    }

    let penalized = if current_block_size <= median {
        base_reward
    } else {
        // base * (2*median*size - median^2 - size^2) / median^2
        let size = u128::from(current_block_size);
        let median = u128::from(median);
        let base = u128::from(base_reward);
        let numerator = 2 * median * size - median * median - size * size;
        (base * numerator / (median * median)) as u64
    };

    Ok((penalized.saturating_add(fee), penalized))
}

/// The median of a value set; the mean of the two middle values for even counts.
pub fn median(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn constants() -> ConsensusConstants {
        ConsensusConstants::mainnet()
    }

    #[test]
    fn small_blocks_receive_the_full_reward() {
        let constants = constants();
        let (reward, emission) = calculate_block_reward(&constants, 0, 1_000, 0, 0).unwrap();
        assert_eq!(reward, constants.money_supply >> constants.emission_speed_factor);
        assert_eq!(reward, emission);
    }

    #[test]
    fn fee_is_added_on_top_of_the_emission() {
        let constants = constants();
        let (reward, emission) = calculate_block_reward(&constants, 0, 1_000, 0, 77).unwrap();
        assert_eq!(reward, emission + 77);
    }

    #[test]
    fn reward_shrinks_as_supply_is_emitted() {
        let constants = constants();
        let (early, _) = calculate_block_reward(&constants, 0, 1_000, 0, 0).unwrap();
        let (late, _) = calculate_block_reward(&constants, 0, 1_000, constants.money_supply / 2, 0).unwrap();
        assert!(late < early);
    }

    #[test]
    fn oversize_blocks_are_penalized_then_rejected() {
        let constants = constants();
        let median = constants.block_granted_full_reward_zone;
        let (full, _) = calculate_block_reward(&constants, median, median, 0, 0).unwrap();
        let (penalized, _) = calculate_block_reward(&constants, median, median + median / 2, 0, 0).unwrap();
        assert!(penalized < full);
        assert_eq!(
            calculate_block_reward(&constants, median, 2 * median + 1, 0, 0).unwrap_err(),
            RewardError::BlockTooBig
        );
    }

    #[test]
    fn median_of_even_and_odd_sets() {
        assert_eq!(median(&[]), 0);
        assert_eq!(median(&[5]), 5);
        assert_eq!(median(&[1, 9]), 5);
        assert_eq!(median(&[3, 1, 2]), 2);
        assert_eq!(median(&[4, 1, 3, 2]), 2);
    }

    quickcheck::quickcheck! {
        fn median_is_order_insensitive(values: Vec<u64>) -> bool {
            let mut reversed = values.clone();
            reversed.reverse();
            median(&values) == median(&reversed)
        }

        fn reward_never_exceeds_base_plus_fee(size: u64, fee: u32) -> bool {
            let constants = ConsensusConstants::mainnet();
            let median = constants.block_granted_full_reward_zone;
            let base = constants.money_supply >> constants.emission_speed_factor;
            match calculate_block_reward(&constants, median, size % (3 * median), 0, u64::from(fee)) {
                Ok((reward, emission)) => emission <= base && reward == emission + u64::from(fee),
                Err(RewardError::BlockTooBig) => true,
            }
        }
    }
}
