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

//! Proof of work: the iterated slow hash over the block hashing blob and the classic
//! difficulty retarget over a trimmed timestamp window.

use umbra_crypto::{hashing::sha3_slow_hash, Hash};

use crate::consensus::ConsensusConstants;

/// The work target for a block; summed into the cumulative difficulty that drives fork
/// choice.
pub type Difficulty = u64;

/// The slow hash of the hashing blob, compared against the difficulty target.
pub fn pow_hash(hashing_blob: &[u8], constants: &ConsensusConstants) -> Hash {
    sha3_slow_hash(hashing_blob, constants.pow_slow_hash_iterations)
}

/// True when `hash`, read as a 256-bit little-endian integer, satisfies
/// `hash * difficulty < 2^256`.
pub fn check_hash(hash: &Hash, difficulty: Difficulty) -> bool {
    if difficulty == 0 {
        return false;
    }
    let bytes = hash.as_bytes();
    let mut carry: u128 = 0;
    for limb_index in 0..4 {
        let limb = u64::from_le_bytes(bytes[limb_index * 8..(limb_index + 1) * 8].try_into().expect("8-byte slice"));
        let product = u128::from(limb) * u128::from(difficulty) + carry;
        carry = product >> 64;
    }
    carry == 0
}

/// Verify the proof of work on a hashing blob against a difficulty.
pub fn check_proof_of_work(hashing_blob: &[u8], difficulty: Difficulty, constants: &ConsensusConstants) -> bool {
    check_hash(&pow_hash(hashing_blob, constants), difficulty)
}

/// The next block's difficulty from the trailing window of timestamps and cumulative
/// difficulties (oldest first, equal lengths).
///
/// The classic retarget: sort the window, trim `cut` outliers from each end once the window
/// is large enough, and scale accumulated work by the observed timespan.
pub fn next_difficulty(
    timestamps: &[u64],
    cumulative_difficulties: &[u128],
    constants: &ConsensusConstants,
) -> Difficulty {
    debug_assert_eq!(timestamps.len(), cumulative_difficulties.len());
    let window = constants.difficulty_window.min(timestamps.len());
    if window < 2 {
        return 1;
    }

    let mut timestamps = timestamps[timestamps.len() - window..].to_vec();
    let cumulative = &cumulative_difficulties[cumulative_difficulties.len() - window..];
    timestamps.sort_unstable();

    let (first, last) = if window > constants.difficulty_window - 2 * constants.difficulty_cut
        && window > 2 * constants.difficulty_cut
    {
        (constants.difficulty_cut, window - constants.difficulty_cut - 1)
    } else {
        (0, window - 1)
    };

    let timespan = (timestamps[last] - timestamps[first]).max(1);
    let total_work = cumulative[last] - cumulative[first];

    let difficulty =
        (total_work * u128::from(constants.difficulty_target) + u128::from(timespan) - 1) / u128::from(timespan);
    u64::try_from(difficulty).unwrap_or(u64::MAX).max(1)
}
