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

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConstantsError {
    #[error("Failed to read the constants file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse the constants file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The consensus parameter table. One instance describes one network; heights and versions
/// that gate behaviour live in the [`super::UpgradeManager`] built from `upgrade_heights`.
///
/// Serializable so operators can pin a network definition in a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConstants {
    /// Coinbase outputs unlock exactly this many blocks after the block that mints them.
    pub mined_money_unlock_window: u64,
    /// Total atomic units ever emitted.
    pub money_supply: u64,
    /// Right-shift applied to the remaining supply to obtain the base reward.
    pub emission_speed_factor: u32,
    /// Target seconds between blocks.
    pub difficulty_target: u64,
    /// Blocks examined by the difficulty algorithm.
    pub difficulty_window: usize,
    /// Outliers trimmed from each end of the difficulty window.
    pub difficulty_cut: usize,
    /// Unlock-time values below this are block heights, above it unix timestamps.
    pub unlock_time_block_threshold: u64,
    /// Base cumulative block size limit at height zero.
    pub max_block_size_initial: u64,
    /// Cumulative size limit growth, numerator in bytes per `max_block_size_growth_denominator` blocks.
    pub max_block_size_growth_numerator: u64,
    pub max_block_size_growth_denominator: u64,
    /// Blocks whose sizes feed the reward median.
    pub reward_blocks_window: usize,
    /// Median floor: blocks up to this size never suffer a reward penalty.
    pub block_granted_full_reward_zone: u64,
    /// Bytes reserved in the size budget for the coinbase transaction.
    pub coinbase_blob_reserved_size: u64,
    /// Blocks with timestamps further than this past the median window check are rejected.
    pub block_future_time_limit: u64,
    /// Timestamp median window before and after the window-switch fork.
    pub timestamp_check_window_v1: usize,
    pub timestamp_check_window_v2: usize,
    /// Ring size bounds, as mixin counts (ring size minus one).
    pub minimum_mixin_v1: usize,
    pub minimum_mixin_rct: usize,
    pub maximum_mixin: usize,
    /// Smallest fee a non-fusion transaction may pay.
    pub minimum_fee: u64,
    /// Fee-free fusion transaction policy.
    pub fusion_tx_max_size: u64,
    pub fusion_tx_min_input_count: usize,
    pub fusion_tx_min_in_out_ratio: usize,
    pub max_fusion_transactions_per_pool: usize,
    /// Seconds a transaction may sit in the pool before the cleaner drops it.
    pub max_pool_transaction_live_time: u64,
    /// Hard cap on how deep `rewind` may strip the active chain.
    pub max_rewind_depth: u32,
    /// Iterations of the slow hash used as proof of work.
    pub pow_slow_hash_iterations: u64,
    /// Template packing: pool transactions fill up to this percentage of the median size.
    pub template_median_percent: u64,
    /// (major_version, activation_height) pairs, ascending.
    pub upgrade_heights: Vec<(u8, u32)>,
    /// Major version from which transactions must carry RingCT signatures (CLSAG, pseudo
    /// commitments and range proofs).
    pub ring_ct_fork_version: u8,
    /// Major version from which the successor range proof system replaces the original.
    pub bulletproofs_plus_fork_version: u8,
    /// Major version from which the coinbase must carry no signature rows at all.
    pub coinbase_no_signatures_version: u8,
    /// Major version from which the template transaction-hash list is cross-checked against
    /// the block body.
    pub shuffle_check_version: u8,
    /// Major version at which the timestamp median window switches to the v2 width.
    pub timestamp_window_v2_version: u8,
}

impl ConsensusConstants {
    pub fn mainnet() -> Self {
        ConsensusConstants {
            mined_money_unlock_window: 60,
            money_supply: u64::MAX,
            emission_speed_factor: 25,
            difficulty_target: 30,
            difficulty_window: 720,
            difficulty_cut: 60,
            unlock_time_block_threshold: 500_000_000,
            max_block_size_initial: 100_000,
            max_block_size_growth_numerator: 102_400,
            max_block_size_growth_denominator: 365 * 24 * 60 * 60 / 30,
            reward_blocks_window: 100,
            block_granted_full_reward_zone: 100_000,
            coinbase_blob_reserved_size: 600,
            block_future_time_limit: 2 * 60 * 60,
            timestamp_check_window_v1: 60,
            timestamp_check_window_v2: 11,
            minimum_mixin_v1: 0,
            minimum_mixin_rct: 1,
            maximum_mixin: 7,
            minimum_fee: 10,
            fusion_tx_max_size: 30_000,
            fusion_tx_min_input_count: 12,
            fusion_tx_min_in_out_ratio: 4,
            max_fusion_transactions_per_pool: 20,
            max_pool_transaction_live_time: 24 * 60 * 60,
            max_rewind_depth: 1_000,
            pow_slow_hash_iterations: 4_096,
            template_median_percent: 125,
            upgrade_heights: vec![(1, 0), (2, 40_000), (3, 250_000), (4, 600_000)],
            ring_ct_fork_version: 3,
            bulletproofs_plus_fork_version: 4,
            coinbase_no_signatures_version: 2,
            shuffle_check_version: 2,
            timestamp_window_v2_version: 2,
        }
    }

    /// Low fork heights and permissive mixins so every consensus branch is reachable from a
    /// short test chain.
    pub fn for_tests() -> Self {
        ConsensusConstants {
            mined_money_unlock_window: 2,
            difficulty_window: 30,
            difficulty_cut: 5,
            minimum_mixin_v1: 0,
            minimum_mixin_rct: 0,
            minimum_fee: 1,
            pow_slow_hash_iterations: 8,
            upgrade_heights: vec![(1, 0), (2, 4), (3, 8), (4, 12)],
            ..Self::mainnet()
        }
    }

    /// Load a network definition from a JSON file written by [`ConsensusConstants::save`].
    pub fn load(path: &Path) -> Result<Self, ConstantsError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConstantsError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// The cumulative block size bound grows linearly with height.
    pub fn max_block_cumulative_size(&self, height: u64) -> u64 {
        let growth = height
            .saturating_mul(self.max_block_size_growth_numerator)
            .checked_div(self.max_block_size_growth_denominator)
            .unwrap_or(0);
        self.max_block_size_initial.saturating_add(growth)
    }

    /// Transactions may use at most twice the median block size, less the coinbase reserve.
    pub fn max_transaction_size(&self, median_block_size: u64) -> u64 {
        let median = median_block_size.max(self.block_granted_full_reward_zone);
        (2 * median).saturating_sub(self.coinbase_blob_reserved_size)
    }

    pub fn minimum_mixin(&self, major_version: u8) -> usize {
        if major_version >= self.ring_ct_fork_version {
            self.minimum_mixin_rct
        } else {
            self.minimum_mixin_v1
        }
    }

    pub fn timestamp_check_window(&self, major_version: u8) -> usize {
        if major_version >= self.timestamp_window_v2_version {
            self.timestamp_check_window_v2
        } else {
            self.timestamp_check_window_v1
        }
    }

    /// True when outputs locked until `unlock_time` may be spent in a block at `height` with
    /// the given timestamp.
    pub fn is_unlocked(&self, unlock_time: u64, height: u64, timestamp: u64) -> bool {
        if unlock_time < self.unlock_time_block_threshold {
            unlock_time <= height
        } else {
            unlock_time <= timestamp
        }
    }
}
