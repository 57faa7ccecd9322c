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

//! One chain segment: a contiguous block range sharing a parent segment, with every index a
//! validator or wallet query needs. Reorganisations manipulate whole segments; a segment is
//! append-only between the splits and merges the chain manager performs under its write
//! lock.

use std::collections::{BTreeMap, HashMap};

use umbra_crypto::{Commitment, Hash, KeyImage, PublicKey};

use crate::{
    blocks::{CachedBlock, RawBlock},
    transactions::{CachedTransaction, TransactionSignatures},
};

/// One key output as the chain remembers it, addressable by (amount, global index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputEntry {
    pub global_index: u32,
    pub key: PublicKey,
    /// Present for outputs created with confidential signatures; legacy outputs get a
    /// zero-blinding commitment synthesised on read.
    pub commitment: Option<Commitment>,
    pub unlock_time: u64,
    pub tx_hash: Hash,
    pub output_index: u16,
    pub block_index: u32,
}

/// Where a stored transaction sits and which global indexes its outputs received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTransactionInfo {
    pub block_index: u32,
    pub transaction_index: u16,
    pub global_indexes: Vec<u32>,
    pub unlock_time: u64,
    pub is_coinbase: bool,
}

/// Per-block bookkeeping kept alongside the raw bytes.
#[derive(Debug, Clone)]
pub struct BlockInfo {
    pub hash: Hash,
    pub timestamp: u64,
    pub block_size: u64,
    pub cumulative_difficulty: u128,
    pub already_generated_coins: u64,
    pub tx_hashes: Vec<Hash>,
    pub raw: RawBlock,
}

/// Chain-global numbering context for a push: the next global output index per amount, as
/// computed by the chain manager across the ancestor segments.
#[derive(Debug, Clone, Default)]
pub struct PushContext {
    pub next_global_index: HashMap<u64, u32>,
}

#[derive(Debug, Clone, Default)]
pub struct BlockchainCache {
    start_index: u32,
    blocks: Vec<BlockInfo>,
    block_index_by_hash: HashMap<Hash, u32>,
    spent_key_images: HashMap<KeyImage, u32>,
    transactions: HashMap<Hash, CachedTransactionInfo>,
    outputs: BTreeMap<u64, Vec<OutputEntry>>,
    // (block index, tx hash) pairs per payment id, so splits can partition them
    payment_ids: HashMap<Hash, Vec<(u32, Hash)>>,
    timestamps: BTreeMap<u64, Vec<Hash>>,
}

impl BlockchainCache {
    pub fn new(start_index: u32) -> Self {
        BlockchainCache {
            start_index,
            ..Default::default()
        }
    }

    pub fn start_index(&self) -> u32 {
        self.start_index
    }

    pub fn block_count(&self) -> u32 {
        self.blocks.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Index of the highest stored block. Only meaningful on a non-empty segment.
    pub fn top_block_index(&self) -> u32 {
        debug_assert!(!self.blocks.is_empty());
        self.start_index + self.blocks.len() as u32 - 1
    }

    pub fn contains_index(&self, block_index: u32) -> bool {
        block_index >= self.start_index && block_index < self.start_index + self.blocks.len() as u32
    }

    pub fn block_info(&self, block_index: u32) -> Option<&BlockInfo> {
        self.blocks.get(block_index.checked_sub(self.start_index)? as usize)
    }

    pub fn block_hash(&self, block_index: u32) -> Option<Hash> {
        self.block_info(block_index).map(|info| info.hash)
    }

    pub fn block_index(&self, hash: &Hash) -> Option<u32> {
        self.block_index_by_hash.get(hash).copied()
    }

    pub fn has_block(&self, hash: &Hash) -> bool {
        self.block_index_by_hash.contains_key(hash)
    }

    pub fn has_transaction(&self, hash: &Hash) -> bool {
        self.transactions.contains_key(hash)
    }

    pub fn transaction_info(&self, hash: &Hash) -> Option<&CachedTransactionInfo> {
        self.transactions.get(hash)
    }

    pub fn top_cumulative_difficulty(&self) -> u128 {
        self.blocks.last().map(|info| info.cumulative_difficulty).unwrap_or(0)
    }

    pub fn outputs_for_amount(&self, amount: u64) -> &[OutputEntry] {
        self.outputs.get(&amount).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn output_count_for_amount(&self, amount: u64) -> u32 {
        self.outputs_for_amount(amount).len() as u32
    }

    /// Look up one of this segment's outputs by its chain-global index.
    pub fn output_by_global_index(&self, amount: u64, global_index: u32) -> Option<&OutputEntry> {
        let entries = self.outputs_for_amount(amount);
        let position = entries
            .binary_search_by_key(&global_index, |entry| entry.global_index)
            .ok()?;
        entries.get(position)
    }

    pub fn is_spent_in_segment(&self, image: &KeyImage) -> bool {
        self.spent_key_images.contains_key(image)
    }

    /// The block index an image was spent at in this segment, if it was.
    pub fn spent_block_index(&self, image: &KeyImage) -> Option<u32> {
        self.spent_key_images.get(image).copied()
    }

    pub fn spent_key_images(&self) -> impl Iterator<Item = (&KeyImage, &u32)> {
        self.spent_key_images.iter()
    }

    pub fn transaction_entries(&self) -> impl Iterator<Item = (&Hash, &CachedTransactionInfo)> {
        self.transactions.iter()
    }

    pub fn payment_id_entries(&self) -> impl Iterator<Item = (&Hash, &Vec<(u32, Hash)>)> {
        self.payment_ids.iter()
    }

    pub fn timestamp_entries(&self) -> impl Iterator<Item = (u64, &Vec<Hash>)> {
        self.timestamps.iter().map(|(timestamp, hashes)| (*timestamp, hashes))
    }

    pub fn output_entries(&self) -> impl Iterator<Item = (u64, &Vec<OutputEntry>)> {
        self.outputs.iter().map(|(amount, entries)| (*amount, entries))
    }

    pub fn transaction_hashes_by_payment_id(&self, payment_id: &Hash) -> Vec<Hash> {
        self.payment_ids
            .get(payment_id)
            .map(|entries| entries.iter().map(|(_, hash)| *hash).collect())
            .unwrap_or_default()
    }

    /// Block hashes whose timestamps fall inside `[from, to]`.
    pub fn block_hashes_by_timestamps(&self, from: u64, to: u64) -> Vec<Hash> {
        self.timestamps
            .range(from..=to)
            .flat_map(|(_, hashes)| hashes.iter().copied())
            .collect()
    }

    /// The lowest stored block whose timestamp is at or past `timestamp`.
    pub fn lowest_block_index_at_timestamp(&self, timestamp: u64) -> Option<u32> {
        self.timestamps
            .range(timestamp..)
            .flat_map(|(_, hashes)| hashes.iter())
            .filter_map(|hash| self.block_index(hash))
            .min()
    }

    /// Append a validated block. All indexes update together; the push either happens as a
    /// whole or, on a malformed transaction set, not at all (the caller validated already).
    #[allow(clippy::too_many_arguments)]
    pub fn push_block(
        &mut self,
        block: &CachedBlock,
        transactions: &[CachedTransaction],
        raw: RawBlock,
        block_size: u64,
        cumulative_difficulty: u128,
        already_generated_coins: u64,
        context: &mut PushContext,
    ) {
        let block_index = self.start_index + self.blocks.len() as u32;
        let coinbase = CachedTransaction::from_transaction(block.template().base_transaction.clone());

        let mut tx_hashes = Vec::with_capacity(1 + transactions.len());
        for (position, tx) in std::iter::once(&coinbase).chain(transactions.iter()).enumerate() {
            let tx_hash = *tx.hash();
            tx_hashes.push(tx_hash);
            let confidential = matches!(tx.transaction().signatures, TransactionSignatures::RingCt(_));
            let output_commitments: &[Commitment] = match &tx.transaction().signatures {
                TransactionSignatures::RingCt(rct) => &rct.output_commitments,
                TransactionSignatures::Legacy(_) => &[],
            };

            let mut global_indexes = Vec::with_capacity(tx.transaction().prefix.outputs.len());
            for (output_index, output) in tx.transaction().prefix.outputs.iter().enumerate() {
                let next = context.next_global_index.entry(output.amount).or_insert_with(|| {
                    // the manager seeds bases for every amount it knows about; an absent
                    // entry means this amount has never been seen on this chain
                    self.output_count_for_amount(output.amount)
                });
                let global_index = *next;
                *next += 1;
                global_indexes.push(global_index);
                self.outputs.entry(output.amount).or_default().push(OutputEntry {
                    global_index,
                    key: *output.key(),
                    commitment: if confidential {
                        output_commitments.get(output_index).copied()
                    } else {
                        None
                    },
                    unlock_time: tx.transaction().prefix.unlock_time,
                    tx_hash,
                    output_index: output_index as u16,
                    block_index,
                });
            }

            for image in tx.key_images() {
                self.spent_key_images.insert(*image, block_index);
            }

            if let Some(payment_id) = tx.payment_id() {
                self.payment_ids
                    .entry(*payment_id)
                    .or_default()
                    .push((block_index, tx_hash));
            }

            self.transactions.insert(tx_hash, CachedTransactionInfo {
                block_index,
                transaction_index: position as u16,
                global_indexes,
                unlock_time: tx.transaction().prefix.unlock_time,
                is_coinbase: position == 0,
            });
        }

        let timestamp = block.template().header.timestamp;
        self.timestamps.entry(timestamp).or_default().push(*block.hash());
        self.block_index_by_hash.insert(*block.hash(), block_index);
        self.blocks.push(BlockInfo {
            hash: *block.hash(),
            timestamp,
            block_size,
            cumulative_difficulty,
            already_generated_coins,
            tx_hashes,
            raw,
        });
    }

    /// Remove the top block, unwinding outputs and spent images in reverse push order.
    /// Returns the removed block's info.
    pub fn pop_block(&mut self) -> Option<BlockInfo> {
        let info = self.blocks.pop()?;
        let block_index = self.start_index + self.blocks.len() as u32;

        self.block_index_by_hash.remove(&info.hash);
        if let Some(hashes) = self.timestamps.get_mut(&info.timestamp) {
            hashes.retain(|hash| *hash != info.hash);
            if hashes.is_empty() {
                self.timestamps.remove(&info.timestamp);
            }
        }

        for tx_hash in info.tx_hashes.iter().rev() {
            if let Some(tx_info) = self.transactions.remove(tx_hash) {
                debug_assert_eq!(tx_info.block_index, block_index);
            }
        }
        self.spent_key_images.retain(|_, spent_at| *spent_at != block_index);
        for entries in self.outputs.values_mut() {
            entries.retain(|entry| entry.block_index != block_index);
        }
        self.outputs.retain(|_, entries| !entries.is_empty());
        for entries in self.payment_ids.values_mut() {
            entries.retain(|(index, _)| *index != block_index);
        }
        self.payment_ids.retain(|_, entries| !entries.is_empty());

        Some(info)
    }

    /// Absorb a confirmed child segment that directly continues this one. The inverse of
    /// [`BlockchainCache::split`]; global indexes and block indexes are already disjoint, so
    /// the maps merge without rebuilding.
    pub fn merge_from(&mut self, upper: BlockchainCache) {
        assert_eq!(
            upper.start_index,
            self.start_index + self.blocks.len() as u32,
            "merged segment must continue this one"
        );
        for (hash, index) in upper.block_index_by_hash {
            self.block_index_by_hash.insert(hash, index);
        }
        self.blocks.extend(upper.blocks);
        self.spent_key_images.extend(upper.spent_key_images);
        self.transactions.extend(upper.transactions);
        for (amount, entries) in upper.outputs {
            self.outputs.entry(amount).or_default().extend(entries);
        }
        for (payment_id, entries) in upper.payment_ids {
            self.payment_ids.entry(payment_id).or_default().extend(entries);
        }
        for (timestamp, hashes) in upper.timestamps {
            self.timestamps.entry(timestamp).or_default().extend(hashes);
        }
    }

    /// Detach blocks `[at_index, top]` into a new segment whose parent is `self`. Indexes
    /// that span the split point are partitioned by block index.
    pub fn split(&mut self, at_index: u32) -> BlockchainCache {
        assert!(at_index > self.start_index, "cannot split a segment at or below its start");
        assert!(self.contains_index(at_index), "split point must be inside the segment");

        let keep = (at_index - self.start_index) as usize;
        let moved_blocks = self.blocks.split_off(keep);

        let mut upper = BlockchainCache::new(at_index);
        for info in moved_blocks {
            self.block_index_by_hash.remove(&info.hash);
            if let Some(hashes) = self.timestamps.get_mut(&info.timestamp) {
                hashes.retain(|hash| *hash != info.hash);
                if hashes.is_empty() {
                    self.timestamps.remove(&info.timestamp);
                }
            }
            upper.timestamps.entry(info.timestamp).or_default().push(info.hash);
            let moved_index = upper.start_index + upper.blocks.len() as u32;
            upper.block_index_by_hash.insert(info.hash, moved_index);
            upper.blocks.push(info);
        }

        // partition the secondary indexes on the split point
        let moved_tx_hashes: Vec<Hash> = self
            .transactions
            .iter()
            .filter(|(_, info)| info.block_index >= at_index)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in moved_tx_hashes {
            if let Some(info) = self.transactions.remove(&hash) {
                upper.transactions.insert(hash, info);
            }
        }

        let moved_images: Vec<KeyImage> = self
            .spent_key_images
            .iter()
            .filter(|(_, spent_at)| **spent_at >= at_index)
            .map(|(image, _)| *image)
            .collect();
        for image in moved_images {
            if let Some(spent_at) = self.spent_key_images.remove(&image) {
                upper.spent_key_images.insert(image, spent_at);
            }
        }

        for (amount, entries) in self.outputs.iter_mut() {
            let split_point = entries.partition_point(|entry| entry.block_index < at_index);
            if split_point < entries.len() {
                upper.outputs.insert(*amount, entries.split_off(split_point));
            }
        }
        self.outputs.retain(|_, entries| !entries.is_empty());

        for (payment_id, entries) in self.payment_ids.iter_mut() {
            let moved: Vec<(u32, Hash)> = entries.iter().filter(|(index, _)| *index >= at_index).copied().collect();
            if !moved.is_empty() {
                entries.retain(|(index, _)| *index < at_index);
                upper.payment_ids.insert(*payment_id, moved);
            }
        }
        self.payment_ids.retain(|_, entries| !entries.is_empty());

        upper
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        blocks::{genesis_block, BlockHeader, BlockTemplate},
        consensus::ConsensusConstants,
        transactions::{
            BaseInput, KeyOutput, Transaction, TransactionInput, TransactionOutput, TransactionOutputTarget,
            TransactionPrefix,
        },
    };
    use umbra_crypto::stealth::generate_keys;

    fn coinbase(height: u32, amount: u64) -> Transaction {
        Transaction {
            prefix: TransactionPrefix {
                version: 1,
                unlock_time: u64::from(height) + 2,
                inputs: vec![TransactionInput::Base(BaseInput { block_index: height })],
                outputs: vec![TransactionOutput {
                    amount,
                    target: TransactionOutputTarget::Key(KeyOutput { key: generate_keys().0 }),
                }],
                extra: vec![],
            },
            signatures: TransactionSignatures::Legacy(vec![]),
        }
    }

    fn block_at(height: u32, prev: Hash, amount: u64) -> CachedBlock {
        CachedBlock::from_template(BlockTemplate {
            header: BlockHeader {
                major_version: 1,
                minor_version: 0,
                timestamp: u64::from(height) * 30,
                previous_block_hash: prev,
                nonce: height,
            },
            parent_block: None,
            base_transaction: coinbase(height, amount),
            transaction_hashes: vec![],
        })
    }

    fn push_chain(cache: &mut BlockchainCache, count: u32, amount: u64) -> Vec<CachedBlock> {
        let mut prev = Hash::default();
        let mut blocks = Vec::new();
        let mut context = PushContext::default();
        for height in 0..count {
            let block = block_at(height, prev, amount);
            prev = *block.hash();
            cache.push_block(
                &block,
                &[],
                RawBlock::default(),
                100,
                u128::from(height) + 1,
                (u64::from(height) + 1) * 50,
                &mut context,
            );
            blocks.push(block);
        }
        blocks
    }

    #[test]
    fn hash_and_index_stay_consistent_after_push() {
        let mut cache = BlockchainCache::new(0);
        push_chain(&mut cache, 10, 500);
        for height in 0..10 {
            let hash = cache.block_hash(height).unwrap();
            assert_eq!(cache.block_index(&hash), Some(height));
        }
        assert_eq!(cache.top_block_index(), 9);
    }

    #[test]
    fn outputs_receive_dense_global_indexes() {
        let mut cache = BlockchainCache::new(0);
        push_chain(&mut cache, 5, 500);
        let entries = cache.outputs_for_amount(500);
        assert_eq!(entries.len(), 5);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.global_index, i as u32);
        }
        assert_eq!(cache.output_by_global_index(500, 3).unwrap().block_index, 3);
    }

    #[test]
    fn split_partitions_every_index() {
        let mut cache = BlockchainCache::new(0);
        let blocks = push_chain(&mut cache, 10, 500);
        let upper = cache.split(6);

        assert_eq!(cache.block_count(), 6);
        assert_eq!(upper.start_index(), 6);
        assert_eq!(upper.block_count(), 4);
        assert_eq!(upper.top_block_index(), 9);

        // hash lookups stay correct on both sides
        assert_eq!(cache.block_index(blocks[2].hash()), Some(2));
        assert_eq!(cache.block_index(blocks[7].hash()), None);
        assert_eq!(upper.block_index(blocks[7].hash()), Some(7));

        // outputs moved with their blocks, global indexes intact
        assert_eq!(cache.outputs_for_amount(500).len(), 6);
        assert_eq!(upper.outputs_for_amount(500).len(), 4);
        assert_eq!(upper.output_by_global_index(500, 8).unwrap().block_index, 8);
        assert!(cache.output_by_global_index(500, 8).is_none());

        // coinbase transactions are findable on the right side only
        let upper_tx = upper.blocks.last().unwrap().tx_hashes[0];
        assert!(upper.has_transaction(&upper_tx));
        assert!(!cache.has_transaction(&upper_tx));
    }

    #[test]
    fn pop_block_unwinds_all_indexes() {
        let mut cache = BlockchainCache::new(0);
        push_chain(&mut cache, 3, 500);
        let top_hash = cache.block_hash(2).unwrap();
        let info = cache.pop_block().unwrap();
        assert_eq!(info.hash, top_hash);
        assert_eq!(cache.block_count(), 2);
        assert!(cache.block_index(&top_hash).is_none());
        assert_eq!(cache.outputs_for_amount(500).len(), 2);
        assert!(!cache.has_transaction(&info.tx_hashes[0]));
    }

    #[test]
    fn timestamp_queries_cover_the_stored_range() {
        let mut cache = BlockchainCache::new(0);
        push_chain(&mut cache, 5, 500);
        // timestamps are height * 30
        assert_eq!(cache.block_hashes_by_timestamps(30, 60).len(), 2);
        assert_eq!(cache.lowest_block_index_at_timestamp(61), Some(3));
        assert_eq!(cache.lowest_block_index_at_timestamp(1_000), None);
    }

    #[test]
    fn genesis_template_pushes_cleanly() {
        let constants = ConsensusConstants::for_tests();
        let genesis = CachedBlock::from_template(genesis_block(&constants));
        let mut cache = BlockchainCache::new(0);
        let mut context = PushContext::default();
        cache.push_block(&genesis, &[], RawBlock::default(), genesis.size(), 1, 50, &mut context);
        assert_eq!(cache.block_index(genesis.hash()), Some(0));
        assert!(cache.has_transaction(&genesis.template().base_transaction.hash()));
    }
}
