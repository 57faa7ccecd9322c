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

//! A read view over one branch of the segment tree: the segments from the root to a chosen
//! segment, truncated at a top block index. Validators and the template builder see the
//! chain exclusively through this view, so alternative branches get exactly the same
//! treatment as the main chain.

use rand::{seq::index::sample, Rng};
use umbra_crypto::{Hash, KeyImage, PublicKey};

use super::segment::{BlockchainCache, BlockInfo, OutputEntry};
use crate::{
    consensus::{median, ConsensusConstants},
    proof_of_work::{next_difficulty, Difficulty},
    validation::{BlockchainQuery, KeyOutputInfo},
};

pub struct ChainView<'a> {
    segments: Vec<&'a BlockchainCache>,
    top_index: u32,
    constants: &'a ConsensusConstants,
}

impl<'a> ChainView<'a> {
    /// `segments` must run root-first; `top_index` bounds which blocks the view exposes.
    pub fn new(segments: Vec<&'a BlockchainCache>, top_index: u32, constants: &'a ConsensusConstants) -> Self {
        debug_assert!(!segments.is_empty());
        ChainView {
            segments,
            top_index,
            constants,
        }
    }

    pub fn top_index(&self) -> u32 {
        self.top_index
    }

    fn segment_containing(&self, block_index: u32) -> Option<&'a BlockchainCache> {
        if block_index > self.top_index {
            return None;
        }
        self.segments
            .iter()
            .find(|segment| segment.contains_index(block_index))
            .copied()
    }

    pub fn block_info(&self, block_index: u32) -> Option<&'a BlockInfo> {
        self.segment_containing(block_index)?.block_info(block_index)
    }

    pub fn block_hash(&self, block_index: u32) -> Option<Hash> {
        self.block_info(block_index).map(|info| info.hash)
    }

    pub fn block_index(&self, hash: &Hash) -> Option<u32> {
        self.segments
            .iter()
            .find_map(|segment| segment.block_index(hash))
            .filter(|index| *index <= self.top_index)
    }

    pub fn top_block_info(&self) -> &'a BlockInfo {
        self.block_info(self.top_index).expect("view top is always stored")
    }

    /// Timestamps of the trailing `count` blocks, oldest first.
    pub fn last_timestamps(&self, count: usize) -> Vec<u64> {
        self.trailing(count, |info| info.timestamp)
    }

    pub fn last_block_sizes(&self, count: usize) -> Vec<u64> {
        self.trailing(count, |info| info.block_size)
    }

    pub fn last_cumulative_difficulties(&self, count: usize) -> Vec<u128> {
        self.trailing(count, |info| info.cumulative_difficulty)
    }

    fn trailing<T>(&self, count: usize, project: impl Fn(&BlockInfo) -> T) -> Vec<T> {
        let take = count.min(self.top_index as usize + 1);
        let first = self.top_index + 1 - take as u32;
        (first..=self.top_index)
            .filter_map(|index| self.block_info(index))
            .map(|info| project(info))
            .collect()
    }

    pub fn already_generated_coins(&self, block_index: u32) -> u64 {
        self.block_info(block_index)
            .map(|info| info.already_generated_coins)
            .unwrap_or(0)
    }

    pub fn cumulative_difficulty(&self, block_index: u32) -> u128 {
        self.block_info(block_index)
            .map(|info| info.cumulative_difficulty)
            .unwrap_or(0)
    }

    /// The difficulty the next block on this branch must satisfy.
    pub fn next_block_difficulty(&self) -> Difficulty {
        let window = self.constants.difficulty_window;
        let timestamps = self.last_timestamps(window);
        let cumulative = self.last_cumulative_difficulties(window);
        next_difficulty(&timestamps, &cumulative, self.constants)
    }

    /// The timestamp median new blocks must not undercut.
    pub fn median_timestamp(&self, window: usize) -> u64 {
        median(&self.last_timestamps(window))
    }

    pub fn median_block_size(&self, window: usize) -> u64 {
        median(&self.last_block_sizes(window))
    }

    /// Total outputs recorded for an amount along this branch.
    pub fn output_count_for_amount(&self, amount: u64) -> u32 {
        self.segments
            .iter()
            .flat_map(|segment| segment.outputs_for_amount(amount))
            .filter(|entry| entry.block_index <= self.top_index)
            .count() as u32
    }

    fn output_entry(&self, amount: u64, global_index: u32) -> Option<&'a OutputEntry> {
        self.segments
            .iter()
            .rev()
            .find_map(|segment| segment.output_by_global_index(amount, global_index))
            .filter(|entry| entry.block_index <= self.top_index)
    }

    /// Sample `count` distinct unlocked outputs below `upper_bound` for ring building.
    pub fn random_outputs_for_amount(
        &self,
        amount: u64,
        count: usize,
        upper_bound: u32,
        unlock_height: u64,
        unlock_timestamp: u64,
    ) -> Vec<(u32, PublicKey)> {
        let available = self.output_count_for_amount(amount).min(upper_bound) as usize;
        if available == 0 {
            return Vec::new();
        }
        let draw = count.min(available);
        let mut rng = rand::thread_rng();
        let mut picked: Vec<(u32, PublicKey)> = sample(&mut rng, available, draw)
            .into_iter()
            .filter_map(|index| self.output_entry(amount, index as u32))
            .filter(|entry| self.constants.is_unlocked(entry.unlock_time, unlock_height, unlock_timestamp))
            .map(|entry| (entry.global_index, entry.key))
            .collect();
        // top up for candidates lost to lock checks
        while picked.len() < draw {
            let index = rng.gen_range(0..available as u32);
            if picked.iter().any(|(existing, _)| *existing == index) {
                break;
            }
            match self.output_entry(amount, index) {
                Some(entry)
                    if self
                        .constants
                        .is_unlocked(entry.unlock_time, unlock_height, unlock_timestamp) =>
                {
                    picked.push((entry.global_index, entry.key));
                },
                _ => break,
            }
        }
        picked
    }

    pub fn has_transaction(&self, hash: &Hash) -> bool {
        self.segments.iter().any(|segment| {
            segment
                .transaction_info(hash)
                .map(|info| info.block_index <= self.top_index)
                .unwrap_or(false)
        })
    }

    /// Where a main-chain transaction lives: its block index and position within the block
    /// (zero is the coinbase).
    pub fn transaction_location(&self, hash: &Hash) -> Option<(u32, u16)> {
        self.segments
            .iter()
            .find_map(|segment| segment.transaction_info(hash))
            .filter(|info| info.block_index <= self.top_index)
            .map(|info| (info.block_index, info.transaction_index))
    }

    pub fn transaction_global_indexes(&self, hash: &Hash) -> Option<Vec<u32>> {
        self.segments
            .iter()
            .find_map(|segment| segment.transaction_info(hash))
            .filter(|info| info.block_index <= self.top_index)
            .map(|info| info.global_indexes.clone())
    }

    /// The height of the first block at or past the timestamp, if the chain reaches it.
    pub fn block_index_for_timestamp(&self, timestamp: u64) -> Option<u32> {
        self.segments
            .iter()
            .filter_map(|segment| segment.lowest_block_index_at_timestamp(timestamp))
            .filter(|index| *index <= self.top_index)
            .min()
    }

    pub fn block_hashes_by_timestamps(&self, timestamp: u64, seconds: u64) -> Vec<Hash> {
        let to = timestamp.saturating_add(seconds);
        let mut hashes: Vec<Hash> = self
            .segments
            .iter()
            .flat_map(|segment| segment.block_hashes_by_timestamps(timestamp, to))
            .filter(|hash| self.block_index(hash).is_some())
            .collect();
        hashes.sort();
        hashes.dedup();
        hashes
    }

    pub fn transaction_hashes_by_payment_id(&self, payment_id: &Hash) -> Vec<Hash> {
        self.segments
            .iter()
            .flat_map(|segment| segment.transaction_hashes_by_payment_id(payment_id))
            .collect()
    }
}

impl BlockchainQuery for ChainView<'_> {
    fn is_spent_key_image(&self, image: &KeyImage) -> bool {
        self.segments.iter().any(|segment| {
            segment
                .spent_block_index(image)
                .map(|spent_at| spent_at <= self.top_index)
                .unwrap_or(false)
        })
    }

    fn key_outputs(&self, amount: u64, global_indexes: &[u32]) -> Option<Vec<KeyOutputInfo>> {
        let mut outputs = Vec::with_capacity(global_indexes.len());
        for global_index in global_indexes {
            let entry = self.output_entry(amount, *global_index)?;
            let commitment = match entry.commitment {
                Some(commitment) => commitment,
                // legacy outputs commit to their public amount under a zero blinding factor
                None => umbra_crypto::ringct::generate_pedersen_commitment(
                    &curve25519_dalek::scalar::Scalar::ZERO,
                    amount,
                )
                .ok()?,
            };
            outputs.push(KeyOutputInfo {
                key: entry.key,
                commitment,
                unlock_time: entry.unlock_time,
            });
        }
        Some(outputs)
    }
}
