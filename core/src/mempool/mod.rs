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

//! The transaction pool: validated transactions waiting for a block, with their spent-image
//! projection. Admission policy (validation against the tip, key image exclusivity, the
//! fusion quota) is enforced by the chain manager, which owns the only path into the pool;
//! this module keeps the entries and the orderings the block template wants.

mod cleaner;

pub use cleaner::spawn_pool_cleaner;

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use log::debug;
use thiserror::Error;
use umbra_crypto::{Hash, KeyImage};

use crate::transactions::CachedTransaction;

const LOG_TARGET: &str = "c::mempool";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MempoolError {
    #[error("Transaction is already in the pool")]
    AlreadyInPool,
    #[error("Transaction spends a key image already spent by a pool entry")]
    KeyImageInPool,
    #[error("Pool already holds the maximum number of fusion transactions")]
    FusionQuotaExceeded,
}

/// One pool entry: the transaction, its projection of spent images, and admission metadata.
#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub transaction: CachedTransaction,
    pub received_at: u64,
    pub fee: u64,
    pub is_fusion: bool,
}

#[derive(Debug, Default)]
struct PoolInner {
    entries: HashMap<Hash, PoolEntry>,
    by_key_image: HashMap<KeyImage, Hash>,
    fusion_count: usize,
}

#[derive(Debug, Default)]
pub struct TransactionPool {
    inner: Mutex<PoolInner>,
}

pub fn unix_time_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.lock().expect("pool lock poisoned").entries.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<CachedTransaction> {
        self.inner
            .lock()
            .expect("pool lock poisoned")
            .entries
            .get(hash)
            .map(|entry| entry.transaction.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("pool lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fusion_transaction_count(&self) -> usize {
        self.inner.lock().expect("pool lock poisoned").fusion_count
    }

    pub fn has_key_image(&self, image: &KeyImage) -> bool {
        self.inner
            .lock()
            .expect("pool lock poisoned")
            .by_key_image
            .contains_key(image)
    }

    pub fn transaction_hashes(&self) -> Vec<Hash> {
        self.inner.lock().expect("pool lock poisoned").entries.keys().copied().collect()
    }

    pub fn entries(&self) -> Vec<(Hash, PoolEntry)> {
        self.inner
            .lock()
            .expect("pool lock poisoned")
            .entries
            .iter()
            .map(|(hash, entry)| (*hash, entry.clone()))
            .collect()
    }

    /// Insert a transaction the chain manager has already validated. Enforces the pool's own
    /// structural invariants: hash and key image exclusivity and the fusion quota.
    pub fn insert(
        &self,
        transaction: CachedTransaction,
        fee: u64,
        is_fusion: bool,
        fusion_quota: usize,
    ) -> Result<(), MempoolError> {
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        let hash = *transaction.hash();
        if inner.entries.contains_key(&hash) {
            return Err(MempoolError::AlreadyInPool);
        }
        for image in transaction.key_images() {
            if inner.by_key_image.contains_key(image) {
                return Err(MempoolError::KeyImageInPool);
            }
        }
        if is_fusion && inner.fusion_count >= fusion_quota {
            return Err(MempoolError::FusionQuotaExceeded);
        }

        for image in transaction.key_images() {
            inner.by_key_image.insert(*image, hash);
        }
        if is_fusion {
            inner.fusion_count += 1;
        }
        debug!(target: LOG_TARGET, "Pool accepted transaction {hash} (fee {fee})");
        inner.entries.insert(hash, PoolEntry {
            transaction,
            received_at: unix_time_now(),
            fee,
            is_fusion,
        });
        Ok(())
    }

    pub fn remove(&self, hash: &Hash) -> Option<PoolEntry> {
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        let entry = inner.entries.remove(hash)?;
        for image in entry.transaction.key_images() {
            inner.by_key_image.remove(image);
        }
        if entry.is_fusion {
            inner.fusion_count -= 1;
        }
        Some(entry)
    }

    /// Drop every entry whose spent-image projection intersects the given set. Used after a
    /// block lands so conflicting pool entries disappear with it.
    pub fn remove_conflicting(&self, spent_images: &HashSet<KeyImage>) -> Vec<Hash> {
        let conflicting: Vec<Hash> = {
            let inner = self.inner.lock().expect("pool lock poisoned");
            inner
                .by_key_image
                .iter()
                .filter(|(image, _)| spent_images.contains(*image))
                .map(|(_, hash)| *hash)
                .collect()
        };
        let mut removed = Vec::new();
        for hash in conflicting {
            if self.remove(&hash).is_some() {
                removed.push(hash);
            }
        }
        removed
    }

    /// Entries past their live time at `now`. The periodic cleaner evicts these.
    pub fn outdated(&self, now: u64, max_live_seconds: u64) -> Vec<Hash> {
        self.inner
            .lock()
            .expect("pool lock poisoned")
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_sub(entry.received_at) > max_live_seconds)
            .map(|(hash, _)| *hash)
            .collect()
    }

    /// Fee-paying entries, highest fee per byte first, for template packing.
    pub fn fee_sorted(&self) -> Vec<PoolEntry> {
        let mut entries: Vec<PoolEntry> = self
            .inner
            .lock()
            .expect("pool lock poisoned")
            .entries
            .values()
            .filter(|entry| !entry.is_fusion)
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            let a_rate = u128::from(a.fee) * u128::from(b.transaction.size().max(1));
            let b_rate = u128::from(b.fee) * u128::from(a.transaction.size().max(1));
            b_rate.cmp(&a_rate).then_with(|| a.transaction.hash().cmp(b.transaction.hash()))
        });
        entries
    }

    /// Fusion entries, largest first so the template compacts the most dust per byte.
    pub fn fusion_sorted(&self) -> Vec<PoolEntry> {
        let mut entries: Vec<PoolEntry> = self
            .inner
            .lock()
            .expect("pool lock poisoned")
            .entries
            .values()
            .filter(|entry| entry.is_fusion)
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            b.transaction
                .size()
                .cmp(&a.transaction.size())
                .then_with(|| a.transaction.hash().cmp(b.transaction.hash()))
        });
        entries
    }
}
