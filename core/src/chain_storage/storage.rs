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

//! The abstract persistence boundary. The on-disk engine lives outside this crate; a segment
//! serializes itself through a write batch of domain-prefixed key-value records and loads
//! back through point reads, so any ordered KV store can back the chain.

use std::collections::HashMap;

use umbra_crypto::{io, Hash, KeyImage};

use super::{
    error::StorageError,
    segment::{BlockchainCache, BlockInfo, CachedTransactionInfo, OutputEntry, PushContext},
};
use crate::{
    blocks::{CachedBlock, RawBlock},
    transactions::CachedTransaction,
};

/// Key domains. Every persisted key starts with one of these bytes.
mod prefix {
    pub const SPENT_KEY_IMAGE: u8 = 0x01;
    pub const CACHED_TRANSACTION: u8 = 0x02;
    pub const PAYMENT_ID: u8 = 0x03;
    pub const CACHED_BLOCK: u8 = 0x04;
    pub const KEY_OUTPUT: u8 = 0x05;
    pub const RAW_BLOCK: u8 = 0x06;
    pub const TIMESTAMP_BLOCK_HASHES: u8 = 0x07;
    pub const OUTPUT_COUNT: u8 = 0x08;
}

/// A batch of writes the storage engine applies atomically.
pub trait StorageBatch {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StorageError>;
    fn delete(&mut self, key: Vec<u8>) -> Result<(), StorageError>;
}

/// Point reads against the storage engine.
pub trait StorageReader {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;
}

/// A reference backend over a map. Tests and tooling use it; production wires a real engine.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: HashMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl StorageBatch for MemoryStorage {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StorageError> {
        self.records.insert(key, value);
        Ok(())
    }

    fn delete(&mut self, key: Vec<u8>) -> Result<(), StorageError> {
        self.records.remove(&key);
        Ok(())
    }
}

impl StorageReader for MemoryStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.records.get(key).cloned())
    }
}

fn key_spent_image(image: &KeyImage) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(prefix::SPENT_KEY_IMAGE);
    key.extend_from_slice(image.as_bytes());
    key
}

fn key_cached_transaction(hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(prefix::CACHED_TRANSACTION);
    key.extend_from_slice(hash.as_bytes());
    key
}

fn key_payment_id(payment_id: &Hash, tx_hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(65);
    key.push(prefix::PAYMENT_ID);
    key.extend_from_slice(payment_id.as_bytes());
    key.extend_from_slice(tx_hash.as_bytes());
    key
}

fn key_cached_block(block_index: u32) -> Vec<u8> {
    let mut key = vec![prefix::CACHED_BLOCK];
    key.extend_from_slice(&block_index.to_be_bytes());
    key
}

fn key_key_output(amount: u64, global_index: u32) -> Vec<u8> {
    let mut key = vec![prefix::KEY_OUTPUT];
    key.extend_from_slice(&amount.to_be_bytes());
    key.extend_from_slice(&global_index.to_be_bytes());
    key
}

fn key_raw_block(block_index: u32) -> Vec<u8> {
    let mut key = vec![prefix::RAW_BLOCK];
    key.extend_from_slice(&block_index.to_be_bytes());
    key
}

fn key_timestamp(timestamp: u64) -> Vec<u8> {
    let mut key = vec![prefix::TIMESTAMP_BLOCK_HASHES];
    key.extend_from_slice(&timestamp.to_be_bytes());
    key
}

fn key_output_count(amount: u64) -> Vec<u8> {
    let mut key = vec![prefix::OUTPUT_COUNT];
    key.extend_from_slice(&amount.to_be_bytes());
    key
}

fn encode_block_info(info: &BlockInfo) -> Vec<u8> {
    let mut buf = Vec::new();
    io::write_hash(&mut buf, &info.hash).expect("write to Vec cannot fail");
    io::write_varint(&mut buf, info.timestamp).expect("write to Vec cannot fail");
    io::write_varint(&mut buf, info.block_size).expect("write to Vec cannot fail");
    buf.extend_from_slice(&info.cumulative_difficulty.to_be_bytes());
    io::write_varint(&mut buf, info.already_generated_coins).expect("write to Vec cannot fail");
    io::write_varint(&mut buf, info.tx_hashes.len() as u64).expect("write to Vec cannot fail");
    for hash in &info.tx_hashes {
        io::write_hash(&mut buf, hash).expect("write to Vec cannot fail");
    }
    buf
}

fn decode_block_info(bytes: &[u8], raw: RawBlock) -> Result<BlockInfo, StorageError> {
    let corrupt = |_| StorageError::Corrupt("cached block record");
    let r = &mut &bytes[..];
    let hash = io::read_hash(r).map_err(corrupt)?;
    let timestamp = io::read_varint(r).map_err(corrupt)?;
    let block_size = io::read_varint(r).map_err(corrupt)?;
    if r.len() < 16 {
        return Err(StorageError::Corrupt("cached block record"));
    }
    let cumulative_difficulty = u128::from_be_bytes(r[..16].try_into().expect("16-byte slice"));
    *r = &r[16..];
    let already_generated_coins = io::read_varint(r).map_err(corrupt)?;
    let count = io::read_length(r).map_err(corrupt)?;
    let mut tx_hashes = Vec::with_capacity(count);
    for _ in 0..count {
        tx_hashes.push(io::read_hash(r).map_err(corrupt)?);
    }
    Ok(BlockInfo {
        hash,
        timestamp,
        block_size,
        cumulative_difficulty,
        already_generated_coins,
        tx_hashes,
        raw,
    })
}

fn encode_transaction_info(info: &CachedTransactionInfo) -> Vec<u8> {
    let mut buf = Vec::new();
    io::write_varint(&mut buf, u64::from(info.block_index)).expect("write to Vec cannot fail");
    io::write_varint(&mut buf, u64::from(info.transaction_index)).expect("write to Vec cannot fail");
    io::write_varint(&mut buf, info.unlock_time).expect("write to Vec cannot fail");
    io::write_bool(&mut buf, info.is_coinbase).expect("write to Vec cannot fail");
    io::write_varint(&mut buf, info.global_indexes.len() as u64).expect("write to Vec cannot fail");
    for index in &info.global_indexes {
        io::write_varint(&mut buf, u64::from(*index)).expect("write to Vec cannot fail");
    }
    buf
}

fn decode_transaction_info(bytes: &[u8]) -> Result<CachedTransactionInfo, StorageError> {
    let corrupt = |_| StorageError::Corrupt("cached transaction record");
    let r = &mut &bytes[..];
    let block_index = io::read_varint(r).map_err(corrupt)? as u32;
    let transaction_index = io::read_varint(r).map_err(corrupt)? as u16;
    let unlock_time = io::read_varint(r).map_err(corrupt)?;
    let is_coinbase = io::read_bool(r).map_err(corrupt)?;
    let count = io::read_length(r).map_err(corrupt)?;
    let mut global_indexes = Vec::with_capacity(count);
    for _ in 0..count {
        global_indexes.push(io::read_varint(r).map_err(corrupt)? as u32);
    }
    Ok(CachedTransactionInfo {
        block_index,
        transaction_index,
        global_indexes,
        unlock_time,
        is_coinbase,
    })
}

fn encode_output_entry(entry: &OutputEntry) -> Vec<u8> {
    let mut buf = Vec::new();
    io::write_point(&mut buf, &entry.key).expect("write to Vec cannot fail");
    io::write_bool(&mut buf, entry.commitment.is_some()).expect("write to Vec cannot fail");
    if let Some(commitment) = &entry.commitment {
        io::write_point(&mut buf, commitment).expect("write to Vec cannot fail");
    }
    io::write_varint(&mut buf, entry.unlock_time).expect("write to Vec cannot fail");
    io::write_hash(&mut buf, &entry.tx_hash).expect("write to Vec cannot fail");
    io::write_varint(&mut buf, u64::from(entry.output_index)).expect("write to Vec cannot fail");
    io::write_varint(&mut buf, u64::from(entry.block_index)).expect("write to Vec cannot fail");
    buf
}

/// Typed wrapper over a [`StorageBatch`]: one method per record family the chain persists.
pub struct BlockchainWriteBatch<'a> {
    batch: &'a mut dyn StorageBatch,
}

impl<'a> BlockchainWriteBatch<'a> {
    pub fn new(batch: &'a mut dyn StorageBatch) -> Self {
        BlockchainWriteBatch { batch }
    }

    pub fn insert_spent_key_image(&mut self, image: &KeyImage, block_index: u32) -> Result<(), StorageError> {
        self.batch.put(key_spent_image(image), block_index.to_be_bytes().to_vec())
    }

    pub fn remove_spent_key_image(&mut self, image: &KeyImage) -> Result<(), StorageError> {
        self.batch.delete(key_spent_image(image))
    }

    pub fn insert_cached_transaction(
        &mut self,
        hash: &Hash,
        info: &CachedTransactionInfo,
    ) -> Result<(), StorageError> {
        self.batch.put(key_cached_transaction(hash), encode_transaction_info(info))
    }

    pub fn remove_cached_transaction(&mut self, hash: &Hash) -> Result<(), StorageError> {
        self.batch.delete(key_cached_transaction(hash))
    }

    pub fn insert_payment_id(&mut self, payment_id: &Hash, tx_hash: &Hash, block_index: u32) -> Result<(), StorageError> {
        self.batch
            .put(key_payment_id(payment_id, tx_hash), block_index.to_be_bytes().to_vec())
    }

    pub fn remove_payment_id(&mut self, payment_id: &Hash, tx_hash: &Hash) -> Result<(), StorageError> {
        self.batch.delete(key_payment_id(payment_id, tx_hash))
    }

    pub fn insert_cached_block(&mut self, block_index: u32, info: &BlockInfo) -> Result<(), StorageError> {
        self.batch.put(key_cached_block(block_index), encode_block_info(info))
    }

    pub fn remove_cached_block(&mut self, block_index: u32) -> Result<(), StorageError> {
        self.batch.delete(key_cached_block(block_index))
    }

    pub fn insert_key_output(&mut self, amount: u64, entry: &OutputEntry) -> Result<(), StorageError> {
        self.batch
            .put(key_key_output(amount, entry.global_index), encode_output_entry(entry))
    }

    pub fn remove_key_output(&mut self, amount: u64, global_index: u32) -> Result<(), StorageError> {
        self.batch.delete(key_key_output(amount, global_index))
    }

    pub fn insert_raw_block(&mut self, block_index: u32, raw: &RawBlock) -> Result<(), StorageError> {
        self.batch.put(key_raw_block(block_index), raw.serialized())
    }

    pub fn remove_raw_block(&mut self, block_index: u32) -> Result<(), StorageError> {
        self.batch.delete(key_raw_block(block_index))
    }

    pub fn insert_timestamp_block_hashes(&mut self, timestamp: u64, hashes: &[Hash]) -> Result<(), StorageError> {
        let mut buf = Vec::with_capacity(hashes.len() * 32);
        for hash in hashes {
            buf.extend_from_slice(hash.as_bytes());
        }
        self.batch.put(key_timestamp(timestamp), buf)
    }

    pub fn remove_timestamp_block_hashes(&mut self, timestamp: u64) -> Result<(), StorageError> {
        self.batch.delete(key_timestamp(timestamp))
    }

    pub fn insert_key_output_count(&mut self, amount: u64, count: u32) -> Result<(), StorageError> {
        self.batch.put(key_output_count(amount), count.to_be_bytes().to_vec())
    }
}

impl BlockchainCache {
    /// Write every record of this segment into the batch.
    pub fn save(&self, batch: &mut dyn StorageBatch) -> Result<(), StorageError> {
        let mut batch = BlockchainWriteBatch::new(batch);
        for block_index in self.start_index()..self.start_index() + self.block_count() {
            let info = self.block_info(block_index).expect("index inside the stored range");
            batch.insert_cached_block(block_index, info)?;
            batch.insert_raw_block(block_index, &info.raw)?;
        }
        for (timestamp, hashes) in self.timestamp_entries() {
            batch.insert_timestamp_block_hashes(timestamp, hashes)?;
        }
        for (image, block_index) in self.spent_key_images() {
            batch.insert_spent_key_image(image, *block_index)?;
        }
        for (hash, info) in self.transaction_entries() {
            batch.insert_cached_transaction(hash, info)?;
        }
        for (payment_id, entries) in self.payment_id_entries() {
            for (block_index, tx_hash) in entries {
                batch.insert_payment_id(payment_id, tx_hash, *block_index)?;
            }
        }
        for (amount, entries) in self.output_entries() {
            batch.insert_key_output_count(amount, entries.len() as u32)?;
            for entry in entries {
                batch.insert_key_output(amount, entry)?;
            }
        }
        Ok(())
    }

    /// Rebuild a segment from storage: block records and raw bodies drive a replayed push,
    /// with the stored transaction records seeding the original chain-global numbering.
    pub fn load(reader: &dyn StorageReader, start_index: u32) -> Result<Self, StorageError> {
        let mut stored = Vec::new();
        let mut block_index = start_index;
        loop {
            let Some(info_bytes) = reader.get(&key_cached_block(block_index))? else {
                break;
            };
            let raw_bytes = reader
                .get(&key_raw_block(block_index))?
                .ok_or(StorageError::Corrupt("missing raw block"))?;
            let raw =
                RawBlock::read(&mut raw_bytes.as_slice()).map_err(|_| StorageError::Corrupt("raw block record"))?;
            let info = decode_block_info(&info_bytes, raw.clone())?;

            let block =
                CachedBlock::from_raw(raw.block.clone()).map_err(|_| StorageError::Corrupt("raw block template"))?;
            let mut transactions = Vec::with_capacity(raw.transactions.len());
            for tx_bytes in &raw.transactions {
                transactions.push(
                    CachedTransaction::from_raw(tx_bytes.clone())
                        .map_err(|_| StorageError::Corrupt("raw transaction body"))?,
                );
            }
            stored.push((block, transactions, info, raw));
            block_index += 1;
        }

        // A segment's outputs for an amount occupy a contiguous global index range, so the
        // first stored index per amount, in push order, reseeds the numbering exactly.
        let mut context = PushContext::default();
        for (block, transactions, info, _) in &stored {
            let coinbase = CachedTransaction::from_transaction(block.template().base_transaction.clone());
            for (tx_hash, tx) in info
                .tx_hashes
                .iter()
                .zip(std::iter::once(&coinbase).chain(transactions.iter()))
            {
                let record = reader
                    .get(&key_cached_transaction(tx_hash))?
                    .ok_or(StorageError::Corrupt("missing cached transaction"))?;
                let tx_info = decode_transaction_info(&record)?;
                if tx_info.global_indexes.len() != tx.transaction().prefix.outputs.len() {
                    return Err(StorageError::Corrupt("cached transaction record"));
                }
                for (output, global_index) in tx.transaction().prefix.outputs.iter().zip(&tx_info.global_indexes) {
                    context.next_global_index.entry(output.amount).or_insert(*global_index);
                }
            }
        }

        let mut cache = BlockchainCache::new(start_index);
        for (block, transactions, info, raw) in stored {
            cache.push_block(
                &block,
                &transactions,
                raw,
                info.block_size,
                info.cumulative_difficulty,
                info.already_generated_coins,
                &mut context,
            );
        }
        Ok(cache)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        blocks::{genesis_block, BlockTemplate},
        consensus::ConsensusConstants,
    };

    fn genesis_cache() -> (BlockchainCache, CachedBlock) {
        let constants = ConsensusConstants::for_tests();
        let template: BlockTemplate = genesis_block(&constants);
        let block = CachedBlock::from_template(template);
        let raw = RawBlock {
            block: block.raw().to_vec(),
            transactions: vec![],
        };
        let mut cache = BlockchainCache::new(0);
        let mut context = PushContext::default();
        cache.push_block(&block, &[], raw, block.size(), 1, 50, &mut context);
        (cache, block)
    }

    #[test]
    fn save_then_load_round_trips_the_segment() {
        let (cache, block) = genesis_cache();
        let mut storage = MemoryStorage::new();
        cache.save(&mut storage).unwrap();
        assert!(!storage.is_empty());

        let loaded = BlockchainCache::load(&storage, 0).unwrap();
        assert_eq!(loaded.block_count(), 1);
        assert_eq!(loaded.block_index(block.hash()), Some(0));
        assert!(loaded.has_transaction(&block.template().base_transaction.hash()));
        assert_eq!(loaded.block_info(0).unwrap().already_generated_coins, 50);
        assert_eq!(loaded.block_info(0).unwrap().cumulative_difficulty, 1);
    }

    #[test]
    fn load_of_an_absent_range_is_empty() {
        let storage = MemoryStorage::new();
        let loaded = BlockchainCache::load(&storage, 0).unwrap();
        assert!(loaded.is_empty());
    }
}
