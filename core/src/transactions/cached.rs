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

use umbra_crypto::{hashing::sha3, Hash, KeyImage};

use super::{extra, Transaction};

/// A transaction alongside its serialized form and the digests and sums everything
/// downstream keeps asking for, computed once.
#[derive(Debug, Clone)]
pub struct CachedTransaction {
    transaction: Transaction,
    raw: Vec<u8>,
    hash: Hash,
    prefix_hash: Hash,
    fee: Option<u64>,
    key_images: Vec<KeyImage>,
    payment_id: Option<Hash>,
}

impl CachedTransaction {
    pub fn from_transaction(transaction: Transaction) -> Self {
        let raw = transaction.serialized();
        Self::build(transaction, raw)
    }

    pub fn from_raw(raw: Vec<u8>) -> std::io::Result<Self> {
        let transaction = Transaction::read(&mut raw.as_slice())?;
        // reject trailing garbage so the cached size is honest
        if transaction.serialized().len() != raw.len() {
            return Err(umbra_crypto::io::invalid_data("trailing bytes after transaction"));
        }
        Ok(Self::build(transaction, raw))
    }

    fn build(transaction: Transaction, raw: Vec<u8>) -> Self {
        let hash = sha3(&raw);
        let prefix_hash = transaction.prefix.hash();
        let fee = transaction.fee();
        let key_images = transaction.key_images();
        let payment_id = extra::payment_id(&transaction.prefix.extra);
        CachedTransaction {
            transaction,
            raw,
            hash,
            prefix_hash,
            fee,
            key_images,
            payment_id,
        }
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
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

    pub fn prefix_hash(&self) -> &Hash {
        &self.prefix_hash
    }

    pub fn fee(&self) -> Option<u64> {
        self.fee
    }

    pub fn key_images(&self) -> &[KeyImage] {
        &self.key_images
    }

    pub fn payment_id(&self) -> Option<&Hash> {
        self.payment_id.as_ref()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transactions::{
        BaseInput, TransactionInput, TransactionPrefix, TransactionSignatures, TX_VERSION_LEGACY,
    };

    fn coinbase() -> Transaction {
        Transaction {
            prefix: TransactionPrefix {
                version: TX_VERSION_LEGACY,
                unlock_time: 60,
                inputs: vec![TransactionInput::Base(BaseInput { block_index: 0 })],
                outputs: vec![],
                extra: vec![],
            },
            signatures: TransactionSignatures::Legacy(vec![]),
        }
    }

    #[test]
    fn raw_and_structured_constructions_agree() {
        let tx = coinbase();
        let from_tx = CachedTransaction::from_transaction(tx.clone());
        let from_raw = CachedTransaction::from_raw(tx.serialized()).unwrap();
        assert_eq!(from_tx.hash(), from_raw.hash());
        assert_eq!(from_tx.size(), from_raw.size());
        assert_eq!(from_tx.fee(), Some(0));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut raw = coinbase().serialized();
        raw.push(0);
        assert!(CachedTransaction::from_raw(raw).is_err());
    }
}
