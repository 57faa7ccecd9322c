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

//! Block structures: the header, the template carrying the coinbase and the ordered
//! transaction hash list, the raw wire bundle, and a hash-caching wrapper.
//!
//! The block hash commits to the header and to the merkle root over the coinbase hash
//! followed by the listed transaction hashes, so neither the body nor its order can be
//! reshuffled without changing the proof of work.

use std::io::{Read, Write};

use umbra_crypto::{
    hashing::{sha3, tree_hash},
    io, Hash,
};

use crate::transactions::Transaction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub major_version: u8,
    pub minor_version: u8,
    pub timestamp: u64,
    pub previous_block_hash: Hash,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        io::write_varint(w, u64::from(self.major_version))?;
        io::write_varint(w, u64::from(self.minor_version))?;
        io::write_varint(w, self.timestamp)?;
        io::write_hash(w, &self.previous_block_hash)?;
        w.write_all(&self.nonce.to_le_bytes())
    }

    pub fn read<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let major_version = u8::try_from(io::read_varint(r)?).map_err(|_| io::invalid_data("major version overflow"))?;
        let minor_version = u8::try_from(io::read_varint(r)?).map_err(|_| io::invalid_data("minor version overflow"))?;
        let timestamp = io::read_varint(r)?;
        let previous_block_hash = io::read_hash(r)?;
        let mut nonce = [0u8; 4];
        r.read_exact(&mut nonce)?;
        Ok(BlockHeader {
            major_version,
            minor_version,
            timestamp,
            previous_block_hash,
            nonce: u32::from_le_bytes(nonce),
        })
    }
}

/// The parent-chain header carried by merge-mined blocks. Only its serialized form matters
/// to this crate; validation of the parent chain happens elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentBlock {
    pub major_version: u8,
    pub minor_version: u8,
    pub previous_block_hash: Hash,
    pub transaction_count: u16,
    pub base_transaction_branch: Vec<Hash>,
    pub base_transaction: Vec<u8>,
    pub blockchain_branch: Vec<Hash>,
}

impl ParentBlock {
    pub fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        io::write_varint(w, u64::from(self.major_version))?;
        io::write_varint(w, u64::from(self.minor_version))?;
        io::write_hash(w, &self.previous_block_hash)?;
        io::write_varint(w, u64::from(self.transaction_count))?;
        io::write_varint(w, self.base_transaction_branch.len() as u64)?;
        for hash in &self.base_transaction_branch {
            io::write_hash(w, hash)?;
        }
        io::write_varint(w, self.base_transaction.len() as u64)?;
        w.write_all(&self.base_transaction)?;
        io::write_varint(w, self.blockchain_branch.len() as u64)?;
        for hash in &self.blockchain_branch {
            io::write_hash(w, hash)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let major_version = u8::try_from(io::read_varint(r)?).map_err(|_| io::invalid_data("major version overflow"))?;
        let minor_version = u8::try_from(io::read_varint(r)?).map_err(|_| io::invalid_data("minor version overflow"))?;
        let previous_block_hash = io::read_hash(r)?;
        let transaction_count =
            u16::try_from(io::read_varint(r)?).map_err(|_| io::invalid_data("transaction count overflow"))?;
        let branch_len = io::read_length(r)?;
        let mut base_transaction_branch = Vec::with_capacity(branch_len);
        for _ in 0..branch_len {
            base_transaction_branch.push(io::read_hash(r)?);
        }
        let base_len = io::read_length(r)?;
        let mut base_transaction = vec![0u8; base_len];
        r.read_exact(&mut base_transaction)?;
        let chain_len = io::read_length(r)?;
        let mut blockchain_branch = Vec::with_capacity(chain_len);
        for _ in 0..chain_len {
            blockchain_branch.push(io::read_hash(r)?);
        }
        Ok(ParentBlock {
            major_version,
            minor_version,
            previous_block_hash,
            transaction_count,
            base_transaction_branch,
            base_transaction,
            blockchain_branch,
        })
    }
}

/// A full block: header, optional merge-mining parent, the coinbase transaction and the
/// ordered hashes of every other transaction in the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTemplate {
    pub header: BlockHeader,
    pub parent_block: Option<ParentBlock>,
    pub base_transaction: Transaction,
    pub transaction_hashes: Vec<Hash>,
}

impl BlockTemplate {
    pub fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        self.header.write(w)?;
        io::write_bool(w, self.parent_block.is_some())?;
        if let Some(parent) = &self.parent_block {
            parent.write(w)?;
        }
        let base_bytes = self.base_transaction.serialized();
        io::write_varint(w, base_bytes.len() as u64)?;
        w.write_all(&base_bytes)?;
        io::write_varint(w, self.transaction_hashes.len() as u64)?;
        for hash in &self.transaction_hashes {
            io::write_hash(w, hash)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let header = BlockHeader::read(r)?;
        let parent_block = if io::read_bool(r)? {
            Some(ParentBlock::read(r)?)
        } else {
            None
        };
        let base_len = io::read_length(r)?;
        let mut base_bytes = vec![0u8; base_len];
        r.read_exact(&mut base_bytes)?;
        let base_transaction = Transaction::read(&mut base_bytes.as_slice())?;
        let count = io::read_length(r)?;
        let mut transaction_hashes = Vec::with_capacity(count);
        for _ in 0..count {
            transaction_hashes.push(io::read_hash(r)?);
        }
        Ok(BlockTemplate {
            header,
            parent_block,
            base_transaction,
            transaction_hashes,
        })
    }

    pub fn serialized(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write(&mut buf).expect("write to Vec cannot fail");
        buf
    }

    /// Merkle root over the coinbase hash followed by the listed transaction hashes.
    pub fn merkle_root(&self) -> Hash {
        let mut leaves = Vec::with_capacity(1 + self.transaction_hashes.len());
        leaves.push(self.base_transaction.hash());
        leaves.extend_from_slice(&self.transaction_hashes);
        tree_hash(&leaves)
    }

    /// The bytes the block hash and the proof of work are computed over.
    pub fn hashing_blob(&self) -> Vec<u8> {
        let mut blob = Vec::new();
        self.header.write(&mut blob).expect("write to Vec cannot fail");
        blob.extend_from_slice(self.merkle_root().as_bytes());
        io::write_varint(&mut blob, 1 + self.transaction_hashes.len() as u64).expect("write to Vec cannot fail");
        blob
    }

    pub fn block_hash(&self) -> Hash {
        sha3(&self.hashing_blob())
    }
}

/// A block and the serialized bodies of its non-coinbase transactions, as gossiped and as
/// persisted per height.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawBlock {
    pub block: Vec<u8>,
    pub transactions: Vec<Vec<u8>>,
}

impl RawBlock {
    pub fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        io::write_varint(w, self.block.len() as u64)?;
        w.write_all(&self.block)?;
        io::write_varint(w, self.transactions.len() as u64)?;
        for tx in &self.transactions {
            io::write_varint(w, tx.len() as u64)?;
            w.write_all(tx)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let block_len = io::read_varint(r)?;
        if block_len > 4_000_000 {
            return Err(io::invalid_data("block blob exceeds wire limit"));
        }
        let mut block = vec![0u8; block_len as usize];
        r.read_exact(&mut block)?;
        let count = io::read_length(r)?;
        let mut transactions = Vec::with_capacity(count);
        for _ in 0..count {
            let len = io::read_varint(r)?;
            if len > 4_000_000 {
                return Err(io::invalid_data("transaction blob exceeds wire limit"));
            }
            let mut tx = vec![0u8; len as usize];
            r.read_exact(&mut tx)?;
            transactions.push(tx);
        }
        Ok(RawBlock { block, transactions })
    }

    pub fn serialized(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write(&mut buf).expect("write to Vec cannot fail");
        buf
    }
}

/// A deserialized block with its hash computed once.
#[derive(Debug, Clone)]
pub struct CachedBlock {
    template: BlockTemplate,
    raw: Vec<u8>,
    hash: Hash,
}

impl CachedBlock {
    pub fn from_template(template: BlockTemplate) -> Self {
        let raw = template.serialized();
        let hash = template.block_hash();
        CachedBlock { template, raw, hash }
    }

    pub fn from_raw(raw: Vec<u8>) -> std::io::Result<Self> {
        let template = BlockTemplate::read(&mut raw.as_slice())?;
        let hash = template.block_hash();
        Ok(CachedBlock { template, raw, hash })
    }

    pub fn template(&self) -> &BlockTemplate {
        &self.template
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn size(&self) -> u64 {
        self.raw.len() as u64
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }
}
