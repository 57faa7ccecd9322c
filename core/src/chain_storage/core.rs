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

//! The chain manager: the segment tree, block admission with reorganisation, the mining
//! template, the pool's gateway, and rewind.
//!
//! Exactly one writer mutates the tree at a time; everything observable happens-after the
//! state transition because observer notification is deferred until the write lock drops.

use std::{
    collections::HashSet,
    sync::{Mutex, RwLock},
};

use log::{debug, info, warn};
use thiserror::Error;
use umbra_crypto::{stealth, Hash, PublicKey};

use super::{
    error::{AddBlockError, BlockAddResult, ChainStorageError},
    segment::{BlockchainCache, PushContext},
    storage::{StorageBatch, StorageReader},
    view::ChainView,
};
use crate::{
    blocks::{genesis_block, BlockHeader, BlockTemplate, CachedBlock, RawBlock},
    consensus::{calculate_block_reward, Checkpoints, ConsensusConstants, RewardError, UpgradeManager},
    mempool::{unix_time_now, MempoolError, TransactionPool},
    messaging::{notify_observers, BlockchainMessage, BlockchainObserver, DeleteTransactionReason},
    proof_of_work::{check_proof_of_work, Difficulty},
    transactions::{
        extra, CachedTransaction, KeyOutput, Transaction, TransactionInput, TransactionOutput,
        TransactionOutputTarget, TransactionPrefix, TransactionSignatures, TX_VERSION_LEGACY,
    },
    validation::{
        is_fusion_transaction, revalidate_pool_transaction, validate_coinbase, validate_transaction,
        BlockchainQuery, TransactionValidatorState, ValidatorContext,
    },
};

const LOG_TARGET: &str = "c::chain_storage::core";

/// Why the pool refused an incoming transaction.
#[derive(Debug, Error)]
pub enum AddTransactionError {
    #[error("Transaction failed to deserialize")]
    DeserializationFailed,
    #[error("Transaction spends an already spent key image")]
    KeyImageAlreadySpent,
    #[error("Transaction fee is below the minimum and it does not qualify as fusion")]
    FeeTooSmall,
    #[error("Pool rejected the transaction: {0}")]
    Pool(#[from] MempoolError),
    #[error("Transaction is invalid: {0}")]
    Validation(#[from] crate::validation::TransactionValidationError),
}

#[derive(Debug, Error)]
pub enum BlockTemplateError {
    #[error("Miner address key is not a valid curve point")]
    InvalidMinerKey,
    #[error("Reward calculation failed for the template size")]
    RewardOverflow,
}

struct SegmentNode {
    cache: BlockchainCache,
    parent: Option<usize>,
    children: Vec<usize>,
}

struct ChainState {
    nodes: Vec<Option<SegmentNode>>,
    /// Leaf segment indexes; position zero is the active tip.
    leaves: Vec<usize>,
}

impl ChainState {
    fn node(&self, index: usize) -> &SegmentNode {
        self.nodes[index].as_ref().expect("segment index is live")
    }

    fn node_mut(&mut self, index: usize) -> &mut SegmentNode {
        self.nodes[index].as_mut().expect("segment index is live")
    }

    fn add_node(&mut self, node: SegmentNode) -> usize {
        if let Some(slot) = self.nodes.iter().position(Option::is_none) {
            self.nodes[slot] = Some(node);
            slot
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    /// Segment indexes from the root down to `index`, inclusive.
    fn path_root_first(&self, index: usize) -> Vec<usize> {
        let mut path = vec![index];
        let mut current = index;
        while let Some(parent) = self.node(current).parent {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }

    fn view<'a>(&'a self, segment: usize, top_index: u32, constants: &'a ConsensusConstants) -> ChainView<'a> {
        let caches = self
            .path_root_first(segment)
            .into_iter()
            .map(|index| &self.node(index).cache)
            .collect();
        ChainView::new(caches, top_index, constants)
    }

    fn active_leaf(&self) -> usize {
        self.leaves[0]
    }

    fn active_top_index(&self) -> u32 {
        self.node(self.active_leaf()).cache.top_block_index()
    }

    fn find_block(&self, hash: &Hash) -> Option<(usize, u32)> {
        self.nodes.iter().enumerate().find_map(|(index, node)| {
            node.as_ref()
                .and_then(|node| node.cache.block_index(hash).map(|height| (index, height)))
        })
    }
}

pub struct Core {
    constants: ConsensusConstants,
    upgrades: UpgradeManager,
    checkpoints: Checkpoints,
    chain: RwLock<ChainState>,
    pool: TransactionPool,
    observers: RwLock<Vec<Box<dyn BlockchainObserver>>>,
    submit_block_mutex: Mutex<()>,
}

impl Core {
    /// A chain holding only the genesis block.
    pub fn new(constants: ConsensusConstants, checkpoints: Checkpoints) -> Self {
        let upgrades = UpgradeManager::new(constants.upgrade_heights.clone());
        let genesis = CachedBlock::from_template(genesis_block(&constants));
        let generated = genesis.template().base_transaction.output_amount().unwrap_or(0);
        let raw = RawBlock {
            block: genesis.raw().to_vec(),
            transactions: Vec::new(),
        };

        let mut root = BlockchainCache::new(0);
        let mut context = PushContext::default();
        root.push_block(&genesis, &[], raw, genesis.size(), 1, generated, &mut context);

        let state = ChainState {
            nodes: vec![Some(SegmentNode {
                cache: root,
                parent: None,
                children: Vec::new(),
            })],
            leaves: vec![0],
        };

        Core {
            constants,
            upgrades,
            checkpoints,
            chain: RwLock::new(state),
            pool: TransactionPool::new(),
            observers: RwLock::new(Vec::new()),
            submit_block_mutex: Mutex::new(()),
        }
    }

    pub fn constants(&self) -> &ConsensusConstants {
        &self.constants
    }

    pub fn upgrades(&self) -> &UpgradeManager {
        &self.upgrades
    }

    pub fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    pub fn add_observer(&self, observer: Box<dyn BlockchainObserver>) {
        self.observers.write().expect("observer lock poisoned").push(observer);
    }

    fn notify(&self, messages: Vec<BlockchainMessage>) {
        if messages.is_empty() {
            return;
        }
        let observers = self.observers.read().expect("observer lock poisoned");
        for message in &messages {
            notify_observers(&observers, message);
        }
    }

    pub fn top_block(&self) -> (u32, Hash) {
        let state = self.chain.read().expect("chain lock poisoned");
        let top = state.active_top_index();
        let hash = state
            .view(state.active_leaf(), top, &self.constants)
            .block_hash(top)
            .expect("active top is stored");
        (top, hash)
    }

    pub fn block_hash_at(&self, height: u32) -> Option<Hash> {
        let state = self.chain.read().expect("chain lock poisoned");
        state
            .view(state.active_leaf(), state.active_top_index(), &self.constants)
            .block_hash(height)
            .filter(|_| height <= state.active_top_index())
    }

    pub fn block_index_of(&self, hash: &Hash) -> Option<u32> {
        let state = self.chain.read().expect("chain lock poisoned");
        state
            .view(state.active_leaf(), state.active_top_index(), &self.constants)
            .block_index(hash)
    }

    pub fn has_block(&self, hash: &Hash) -> bool {
        self.chain
            .read()
            .expect("chain lock poisoned")
            .find_block(hash)
            .is_some()
    }

    /// Main-chain raw block at a height.
    pub fn raw_block_at(&self, height: u32) -> Option<RawBlock> {
        let state = self.chain.read().expect("chain lock poisoned");
        state
            .view(state.active_leaf(), state.active_top_index(), &self.constants)
            .block_info(height)
            .map(|info| info.raw.clone())
    }

    pub fn has_transaction(&self, hash: &Hash) -> bool {
        let state = self.chain.read().expect("chain lock poisoned");
        state
            .view(state.active_leaf(), state.active_top_index(), &self.constants)
            .has_transaction(hash)
    }

    pub fn transaction_global_indexes(&self, hash: &Hash) -> Option<Vec<u32>> {
        let state = self.chain.read().expect("chain lock poisoned");
        state
            .view(state.active_leaf(), state.active_top_index(), &self.constants)
            .transaction_global_indexes(hash)
    }

    pub fn transaction_hashes_by_payment_id(&self, payment_id: &Hash) -> Vec<Hash> {
        let state = self.chain.read().expect("chain lock poisoned");
        state
            .view(state.active_leaf(), state.active_top_index(), &self.constants)
            .transaction_hashes_by_payment_id(payment_id)
    }

    pub fn block_hashes_by_timestamps(&self, timestamp: u64, seconds: u64) -> Vec<Hash> {
        let state = self.chain.read().expect("chain lock poisoned");
        state
            .view(state.active_leaf(), state.active_top_index(), &self.constants)
            .block_hashes_by_timestamps(timestamp, seconds)
    }

    pub fn block_index_for_timestamp(&self, timestamp: u64) -> Option<u32> {
        let state = self.chain.read().expect("chain lock poisoned");
        state
            .view(state.active_leaf(), state.active_top_index(), &self.constants)
            .block_index_for_timestamp(timestamp)
    }

    pub fn random_outputs_for_amount(&self, amount: u64, count: usize, upper_bound: u32) -> Vec<(u32, PublicKey)> {
        let state = self.chain.read().expect("chain lock poisoned");
        let top = state.active_top_index();
        state
            .view(state.active_leaf(), top, &self.constants)
            .random_outputs_for_amount(amount, count, upper_bound, u64::from(top) + 1, unix_time_now())
    }

    /// Admit one block, wherever it lands in the tree.
    pub fn add_block(&self, raw_block: RawBlock) -> Result<BlockAddResult, AddBlockError> {
        let mut messages = Vec::new();
        let result = self.add_block_inner(raw_block, true, &mut messages);
        self.notify(messages);
        result
    }

    /// Trusted-source fast path for bulk import: PoW, signature and proof checks are
    /// skipped; structure, linkage and bookkeeping still run.
    pub fn add_block_unchecked(&self, raw_block: RawBlock) -> Result<BlockAddResult, AddBlockError> {
        let mut messages = Vec::new();
        let result = self.add_block_inner(raw_block, false, &mut messages);
        self.notify(messages);
        result
    }

    fn add_block_inner(
        &self,
        raw_block: RawBlock,
        perform_expensive_validation: bool,
        messages: &mut Vec<BlockchainMessage>,
    ) -> Result<BlockAddResult, AddBlockError> {
        let block = CachedBlock::from_raw(raw_block.block.clone()).map_err(|_| AddBlockError::DeserializationFailed)?;
        let block_hash = *block.hash();

        let mut state = self.chain.write().expect("chain lock poisoned");

        if state.find_block(&block_hash).is_some() {
            debug!(target: LOG_TARGET, "Block {block_hash} already exists");
            return Ok(BlockAddResult::AlreadyExists);
        }

        let previous_hash = block.template().header.previous_block_hash;
        let (parent_segment, previous_index) = state
            .find_block(&previous_hash)
            .ok_or(AddBlockError::RejectedAsOrphaned)?;
        let block_index = previous_index + 1;

        // transaction bodies
        if raw_block.transactions.len() != block.template().transaction_hashes.len() {
            return Err(AddBlockError::DeserializationFailed);
        }
        let mut transactions = Vec::with_capacity(raw_block.transactions.len());
        let mut transactions_size = 0u64;
        for bytes in &raw_block.transactions {
            let tx = CachedTransaction::from_raw(bytes.clone()).map_err(|_| AddBlockError::DeserializationFailed)?;
            transactions_size += tx.size();
            transactions.push(tx);
        }
        let coinbase_size = block.template().base_transaction.serialized().len() as u64;
        let cumulative_size = coinbase_size + transactions_size;

        if cumulative_size > self.constants.max_block_cumulative_size(u64::from(block_index)) {
            return Err(AddBlockError::CumulativeBlockSizeTooBig);
        }

        let expected_major = self.upgrades.block_major_for(block_index);
        if block.template().header.major_version != expected_major {
            return Err(AddBlockError::WrongMajorVersion {
                got: block.template().header.major_version,
                expected: expected_major,
            });
        }

        let view = state.view(parent_segment, previous_index, &self.constants);
        let timestamp = block.template().header.timestamp;

        let timestamp_window = self.constants.timestamp_check_window(expected_major);
        if u64::from(block_index) > timestamp_window as u64 {
            let median_timestamp = view.median_timestamp(timestamp_window);
            if timestamp < median_timestamp {
                return Err(AddBlockError::TimestampTooSmall);
            }
        }
        if timestamp > unix_time_now() + self.constants.block_future_time_limit {
            return Err(AddBlockError::TimestampTooFarInFuture);
        }

        // the template hash list must be duplicate free and equal the bodies, elementwise
        if expected_major >= self.constants.shuffle_check_version {
            let mut seen = HashSet::new();
            for hash in &block.template().transaction_hashes {
                if !seen.insert(*hash) {
                    return Err(AddBlockError::TransactionDuplicates);
                }
            }
            for (tx, expected_hash) in transactions.iter().zip(&block.template().transaction_hashes) {
                if tx.hash() != expected_hash {
                    return Err(AddBlockError::TransactionInconsistency);
                }
            }
        }

        let miner_reward = validate_coinbase(
            &block.template().base_transaction,
            block_index,
            expected_major,
            &self.constants,
        )
        .map_err(AddBlockError::CoinbaseValidation)?;

        let block_size_median = view.median_block_size(self.constants.reward_blocks_window);
        let mut validator_state = TransactionValidatorState::new();
        let mut cumulative_fee = 0u64;
        if perform_expensive_validation {
            let ctx = ValidatorContext {
                constants: &self.constants,
                upgrades: &self.upgrades,
                chain: &view,
                block_index,
                block_timestamp: timestamp,
                block_size_median,
            };
            for tx in &transactions {
                match validate_transaction(tx, &mut validator_state, &ctx) {
                    Ok(fee) => cumulative_fee += fee,
                    Err(error) => {
                        let hash = *tx.hash();
                        debug!(target: LOG_TARGET, "Transaction {hash} in block {block_hash} is invalid: {error}");
                        if self.pool.remove(&hash).is_some() {
                            messages.push(BlockchainMessage::DeleteTransaction {
                                hashes: vec![hash],
                                reason: DeleteTransactionReason::NotActual,
                            });
                        }
                        return Err(AddBlockError::TransactionValidation { hash, error });
                    },
                }
            }
        } else {
            for tx in &transactions {
                cumulative_fee += tx.fee().unwrap_or(0);
                validator_state.spent_key_images.extend(tx.key_images().iter().copied());
            }
        }

        let already_generated = view.already_generated_coins(previous_index);
        let (expected_reward, emission_change) = calculate_block_reward(
            &self.constants,
            block_size_median,
            cumulative_size,
            already_generated,
            cumulative_fee,
        )
        .map_err(|RewardError::BlockTooBig| AddBlockError::CumulativeBlockSizeTooBig)?;
        if perform_expensive_validation && miner_reward != expected_reward {
            debug!(
                target: LOG_TARGET,
                "Block {block_hash} reward mismatch: expected {expected_reward}, got {miner_reward}"
            );
            return Err(AddBlockError::BlockRewardMismatch);
        }

        let difficulty = view.next_block_difficulty();
        if self.checkpoints.is_in_checkpoint_zone(block_index) {
            if !self.checkpoints.check_block(block_index, &block_hash) {
                warn!(target: LOG_TARGET, "Checkpoint mismatch at height {block_index} for {block_hash}");
                return Err(AddBlockError::CheckpointMismatch);
            }
        } else if perform_expensive_validation
            && !check_proof_of_work(&block.template().hashing_blob(), difficulty, &self.constants)
        {
            return Err(AddBlockError::ProofOfWorkTooWeak);
        }

        let cumulative_difficulty = view.cumulative_difficulty(previous_index) + u128::from(difficulty);
        let generated_coins = already_generated.saturating_add(emission_change);

        // seed the chain-global output numbering for every amount this block creates
        let mut push_context = PushContext::default();
        let amounts: HashSet<u64> = std::iter::once(&block.template().base_transaction)
            .chain(transactions.iter().map(|tx| tx.transaction()))
            .flat_map(|tx| tx.prefix.outputs.iter().map(|output| output.amount))
            .collect();
        for amount in amounts {
            push_context
                .next_global_index
                .insert(amount, view.output_count_for_amount(amount));
        }
        drop(view);

        let included_hashes: Vec<Hash> = transactions.iter().map(|tx| *tx.hash()).collect();
        let parent_is_top = state.node(parent_segment).cache.top_block_index() == previous_index;
        let parent_has_children = !state.node(parent_segment).children.is_empty();

        let result = if parent_is_top && !parent_has_children {
            state.node_mut(parent_segment).cache.push_block(
                &block,
                &transactions,
                raw_block,
                cumulative_size,
                cumulative_difficulty,
                generated_coins,
                &mut push_context,
            );

            if parent_segment == state.active_leaf() {
                // straight extension of the main chain
                for message in self.pool_sweep_after_block(&validator_state, &included_hashes) {
                    messages.push(message);
                }
                self.revalidate_pool(&state, messages);
                messages.push(BlockchainMessage::NewBlock {
                    height: block_index,
                    hash: block_hash,
                });
                debug!(target: LOG_TARGET, "Block {block_index} ({block_hash}) added to main chain");
                BlockAddResult::AddedToMain
            } else {
                let active = state.active_leaf();
                let active_difficulty = state.node(active).cache.top_cumulative_difficulty();
                if cumulative_difficulty > active_difficulty {
                    let old_active = active;
                    let position = state
                        .leaves
                        .iter()
                        .position(|leaf| *leaf == parent_segment)
                        .expect("extended segment is a leaf");
                    state.leaves.swap(0, position);

                    let switch_message = self.chain_switch_message(&state, old_active);
                    self.copy_branch_transactions_to_pool(&state, old_active);
                    for message in self.pool_sweep_after_block(&validator_state, &included_hashes) {
                        messages.push(message);
                    }
                    self.revalidate_pool(&state, messages);
                    messages.push(switch_message);
                    info!(
                        target: LOG_TARGET,
                        "Chain switched to alternative tip {block_index} ({block_hash})"
                    );
                    BlockAddResult::AddedToAlternativeAndSwitched
                } else {
                    messages.push(BlockchainMessage::NewAlternativeBlock {
                        height: block_index,
                        hash: block_hash,
                    });
                    debug!(target: LOG_TARGET, "Block {block_index} ({block_hash}) added to alternative chain");
                    BlockAddResult::AddedToAlternative
                }
            }
        } else {
            // fork off an interior block, or extend a segment that already has children
            let lower_segment = if parent_is_top {
                parent_segment
            } else {
                self.split_segment(&mut state, parent_segment, previous_index + 1);
                parent_segment
            };

            let mut fork = BlockchainCache::new(block_index);
            fork.push_block(
                &block,
                &transactions,
                raw_block,
                cumulative_size,
                cumulative_difficulty,
                generated_coins,
                &mut push_context,
            );
            let fork_index = state.add_node(SegmentNode {
                cache: fork,
                parent: Some(lower_segment),
                children: Vec::new(),
            });
            state.node_mut(lower_segment).children.push(fork_index);
            state.leaves.push(fork_index);

            messages.push(BlockchainMessage::NewAlternativeBlock {
                height: block_index,
                hash: block_hash,
            });
            debug!(target: LOG_TARGET, "Block {block_index} ({block_hash}) opened an alternative chain");
            BlockAddResult::AddedToAlternative
        };

        Ok(result)
    }

    /// Split `segment` at `at_index`; the upper part becomes a child carrying the original
    /// children and leaf identity.
    fn split_segment(&self, state: &mut ChainState, segment: usize, at_index: u32) {
        let upper_cache = state.node_mut(segment).cache.split(at_index);
        let old_children = std::mem::take(&mut state.node_mut(segment).children);
        let upper_index = state.add_node(SegmentNode {
            cache: upper_cache,
            parent: Some(segment),
            children: old_children.clone(),
        });
        for child in old_children {
            state.node_mut(child).parent = Some(upper_index);
        }
        state.node_mut(segment).children.push(upper_index);
        for leaf in state.leaves.iter_mut() {
            if *leaf == segment {
                *leaf = upper_index;
            }
        }
    }

    /// Remove pool entries included in or conflicting with a freshly accepted block.
    fn pool_sweep_after_block(
        &self,
        validator_state: &TransactionValidatorState,
        included_hashes: &[Hash],
    ) -> Vec<BlockchainMessage> {
        let mut messages = Vec::new();
        let mut included = Vec::new();
        for hash in included_hashes {
            if self.pool.remove(hash).is_some() {
                included.push(*hash);
            }
        }
        if !included.is_empty() {
            messages.push(BlockchainMessage::DeleteTransaction {
                hashes: included,
                reason: DeleteTransactionReason::InBlock,
            });
        }
        let conflicting = self.pool.remove_conflicting(&validator_state.spent_key_images);
        if !conflicting.is_empty() {
            messages.push(BlockchainMessage::DeleteTransaction {
                hashes: conflicting,
                reason: DeleteTransactionReason::NotActual,
            });
        }
        messages
    }

    /// Re-run the light validation pass over the whole pool against the active tip.
    fn revalidate_pool(&self, state: &ChainState, messages: &mut Vec<BlockchainMessage>) {
        let top = state.active_top_index();
        let view = state.view(state.active_leaf(), top, &self.constants);
        let ctx = ValidatorContext {
            constants: &self.constants,
            upgrades: &self.upgrades,
            chain: &view,
            block_index: top + 1,
            block_timestamp: unix_time_now(),
            block_size_median: view.median_block_size(self.constants.reward_blocks_window),
        };

        let mut evicted = Vec::new();
        for (hash, entry) in self.pool.entries() {
            if let Err(error) = revalidate_pool_transaction(&entry.transaction, &ctx) {
                debug!(target: LOG_TARGET, "Pool transaction {hash} no longer valid: {error}");
                self.pool.remove(&hash);
                evicted.push(hash);
            }
        }
        if !evicted.is_empty() {
            messages.push(BlockchainMessage::DeleteTransaction {
                hashes: evicted,
                reason: DeleteTransactionReason::NotActual,
            });
        }
    }

    /// Return the transactions of branch segments that fell out of the main chain to the
    /// pool. Each candidate passes the full admission validation against the new tip; those
    /// that no longer validate are simply dropped.
    fn copy_branch_transactions_to_pool(&self, state: &ChainState, old_leaf: usize) {
        let top = state.active_top_index();
        let view = state.view(state.active_leaf(), top, &self.constants);
        let ctx = ValidatorContext {
            constants: &self.constants,
            upgrades: &self.upgrades,
            chain: &view,
            block_index: top + 1,
            block_timestamp: unix_time_now(),
            block_size_median: view.median_block_size(self.constants.reward_blocks_window),
        };

        let new_path: HashSet<usize> = state.path_root_first(state.active_leaf()).into_iter().collect();
        for segment_index in state.path_root_first(old_leaf) {
            if new_path.contains(&segment_index) {
                continue;
            }
            let cache = &state.node(segment_index).cache;
            for block_index in cache.start_index()..cache.start_index() + cache.block_count() {
                let info = cache.block_info(block_index).expect("index inside the stored range");
                for bytes in &info.raw.transactions {
                    let Ok(tx) = CachedTransaction::from_raw(bytes.clone()) else {
                        continue;
                    };
                    if tx.key_images().iter().any(|image| self.pool.has_key_image(image)) {
                        continue;
                    }
                    let mut validator_state = TransactionValidatorState::new();
                    let Ok(fee) = validate_transaction(&tx, &mut validator_state, &ctx) else {
                        debug!(
                            target: LOG_TARGET,
                            "Dropping branch transaction {} during chain switch",
                            tx.hash()
                        );
                        continue;
                    };
                    let is_fusion = is_fusion_transaction(&tx, &self.constants);
                    let _ = self
                        .pool
                        .insert(tx, fee, is_fusion, self.constants.max_fusion_transactions_per_pool);
                }
            }
        }
    }

    fn chain_switch_message(&self, state: &ChainState, old_leaf: usize) -> BlockchainMessage {
        let new_path = state.path_root_first(state.active_leaf());
        let old_path: HashSet<usize> = state.path_root_first(old_leaf).into_iter().collect();
        // the first new-path segment that the old path does not share marks the fork point
        let fork_start = new_path
            .iter()
            .find(|segment| !old_path.contains(segment))
            .map(|segment| state.node(*segment).cache.start_index())
            .unwrap_or(0);
        let common_ancestor_height = fork_start.saturating_sub(1);

        let top = state.active_top_index();
        let view = state.view(state.active_leaf(), top, &self.constants);
        let new_hashes = (fork_start..=top).filter_map(|height| view.block_hash(height)).collect();
        BlockchainMessage::ChainSwitch {
            common_ancestor_height,
            new_hashes,
        }
    }

    /// Pool admission: deserialize, gate on spent images and the fusion quota, validate
    /// against the current tip, store, publish.
    pub fn handle_incoming_transaction(&self, raw: Vec<u8>) -> Result<Hash, AddTransactionError> {
        let tx = CachedTransaction::from_raw(raw).map_err(|_| AddTransactionError::DeserializationFailed)?;
        let hash = *tx.hash();

        let state = self.chain.read().expect("chain lock poisoned");
        let top = state.active_top_index();
        let view = state.view(state.active_leaf(), top, &self.constants);

        for image in tx.key_images() {
            if self.pool.has_key_image(image) || BlockchainQuery::is_spent_key_image(&view, image) {
                return Err(AddTransactionError::KeyImageAlreadySpent);
            }
        }

        let is_fusion = is_fusion_transaction(&tx, &self.constants);
        let fee = tx.fee().unwrap_or(0);
        if !is_fusion && fee < self.constants.minimum_fee {
            return Err(AddTransactionError::FeeTooSmall);
        }

        let ctx = ValidatorContext {
            constants: &self.constants,
            upgrades: &self.upgrades,
            chain: &view,
            block_index: top + 1,
            block_timestamp: unix_time_now(),
            block_size_median: view.median_block_size(self.constants.reward_blocks_window),
        };
        let mut validator_state = TransactionValidatorState::new();
        let fee = validate_transaction(&tx, &mut validator_state, &ctx)?;

        self.pool
            .insert(tx, fee, is_fusion, self.constants.max_fusion_transactions_per_pool)?;
        drop(state);

        self.notify(vec![BlockchainMessage::AddTransaction { hashes: vec![hash] }]);
        Ok(hash)
    }

    /// Evict pool entries past their live time. Run from the cooperative cleaner task.
    pub fn clean_pool(&self) -> Vec<Hash> {
        let outdated = self
            .pool
            .outdated(unix_time_now(), self.constants.max_pool_transaction_live_time);
        let mut removed = Vec::new();
        for hash in outdated {
            if self.pool.remove(&hash).is_some() {
                removed.push(hash);
            }
        }
        if !removed.is_empty() {
            self.notify(vec![BlockchainMessage::DeleteTransaction {
                hashes: removed.clone(),
                reason: DeleteTransactionReason::Outdated,
            }]);
        }
        removed
    }

    /// Deserialize a mined template, materialize its transactions from the pool, and admit
    /// the block. One mutex serializes concurrent miners so they cannot race the pool.
    pub fn submit_block(&self, raw_template: Vec<u8>) -> Result<BlockAddResult, AddBlockError> {
        let _guard = self.submit_block_mutex.lock().expect("submit lock poisoned");
        let template =
            BlockTemplate::read(&mut raw_template.as_slice()).map_err(|_| AddBlockError::DeserializationFailed)?;
        let mut transactions = Vec::with_capacity(template.transaction_hashes.len());
        for hash in &template.transaction_hashes {
            let tx = self.pool.get(hash).ok_or(AddBlockError::DeserializationFailed)?;
            transactions.push(tx.raw().to_vec());
        }
        self.add_block(RawBlock {
            block: raw_template,
            transactions,
        })
    }

    /// Strip main-chain blocks above `target_height`, bounded by the rewind depth cap and by
    /// live forks hanging off the stripped range.
    pub fn rewind(&self, target_height: u32) -> Result<u32, ChainStorageError> {
        let mut state = self.chain.write().expect("chain lock poisoned");
        let top = state.active_top_index();
        if target_height >= top {
            return Ok(top);
        }
        if top - target_height > self.constants.max_rewind_depth {
            return Err(ChainStorageError::InvalidRewindTarget);
        }

        let mut current = state.active_leaf();
        while state.node(current).cache.top_block_index() > target_height {
            let node_top = state.node(current).cache.top_block_index();
            let node_start = state.node(current).cache.start_index();
            let pops_here = node_top - node_start.max(target_height + 1) + 1;
            if !state.node(current).children.is_empty() {
                return Err(ChainStorageError::InvalidRewindTarget);
            }
            for _ in 0..pops_here {
                state.node_mut(current).cache.pop_block();
            }
            if state.node(current).cache.is_empty() {
                let parent = state.node(current).parent.ok_or(ChainStorageError::InvalidRewindTarget)?;
                state.node_mut(parent).children.retain(|child| *child != current);
                state.nodes[current] = None;
                for leaf in state.leaves.iter_mut() {
                    if *leaf == current {
                        *leaf = parent;
                    }
                }
                current = parent;
            } else {
                break;
            }
        }
        info!(target: LOG_TARGET, "Rewound active chain to height {}", state.active_top_index());
        Ok(state.active_top_index())
    }

    /// Assemble a mining template on top of the active chain.
    pub fn get_block_template(
        &self,
        miner_spend_key: &PublicKey,
        miner_view_key: &PublicKey,
        extra_nonce: &[u8],
    ) -> Result<(BlockTemplate, Difficulty), BlockTemplateError> {
        let mut eviction_messages = Vec::new();
        let result = {
            let state = self.chain.read().expect("chain lock poisoned");
            let top = state.active_top_index();
            let view = state.view(state.active_leaf(), top, &self.constants);
            let height = top + 1;
            let major_version = self.upgrades.block_major_for(height);

            let mut timestamp = unix_time_now();
            let median_timestamp = view.median_timestamp(self.constants.timestamp_check_window(major_version));
            if timestamp < median_timestamp {
                timestamp = median_timestamp;
            }

            let difficulty = view.next_block_difficulty();
            let block_size_median = view.median_block_size(self.constants.reward_blocks_window);
            let size_budget = (block_size_median.max(self.constants.block_granted_full_reward_zone)
                * self.constants.template_median_percent
                / 100)
                .min(self.constants.max_block_cumulative_size(u64::from(height)))
                .saturating_sub(self.constants.coinbase_blob_reserved_size);

            let ctx = ValidatorContext {
                constants: &self.constants,
                upgrades: &self.upgrades,
                chain: &view,
                block_index: height,
                block_timestamp: timestamp,
                block_size_median,
            };

            let mut selected = Vec::new();
            let mut selected_size = 0u64;
            let mut selected_fee = 0u64;
            let mut spent_in_block: HashSet<umbra_crypto::KeyImage> = HashSet::new();
            let candidates = self.pool.fee_sorted().into_iter().chain(self.pool.fusion_sorted());
            for entry in candidates {
                let tx = &entry.transaction;
                if selected_size + tx.size() > size_budget {
                    continue;
                }
                if tx.key_images().iter().any(|image| spent_in_block.contains(image)) {
                    continue;
                }
                if revalidate_pool_transaction(tx, &ctx).is_err() {
                    let hash = *tx.hash();
                    self.pool.remove(&hash);
                    eviction_messages.push(hash);
                    continue;
                }
                selected_size += tx.size();
                selected_fee += entry.fee;
                spent_in_block.extend(tx.key_images().iter().copied());
                selected.push(tx.clone());
            }

            let already_generated = view.already_generated_coins(top);
            let previous_block_hash = view.block_hash(top).expect("active top is stored");

            // the coinbase size feeds the reward penalty, so iterate until it stabilises
            let mut coinbase_size_estimate = self.constants.coinbase_blob_reserved_size;
            let mut base_transaction = None;
            for _ in 0..10 {
                let cumulative_size = selected_size + coinbase_size_estimate;
                let (reward, _emission) = calculate_block_reward(
                    &self.constants,
                    block_size_median,
                    cumulative_size,
                    already_generated,
                    selected_fee,
                )
                .map_err(|_| BlockTemplateError::RewardOverflow)?;
                let candidate =
                    self.build_coinbase(height, reward, miner_spend_key, miner_view_key, extra_nonce)?;
                let candidate_size = candidate.serialized().len() as u64;
                let stable = candidate_size == coinbase_size_estimate;
                coinbase_size_estimate = candidate_size;
                base_transaction = Some(candidate);
                if stable {
                    break;
                }
            }
            let base_transaction = base_transaction.expect("coinbase loop always produces a candidate");

            let template = BlockTemplate {
                header: BlockHeader {
                    major_version,
                    minor_version: 0,
                    timestamp,
                    previous_block_hash,
                    nonce: 0,
                },
                parent_block: None,
                base_transaction,
                transaction_hashes: selected.iter().map(|tx| *tx.hash()).collect(),
            };
            Ok((template, difficulty))
        };

        if !eviction_messages.is_empty() {
            self.notify(vec![BlockchainMessage::DeleteTransaction {
                hashes: eviction_messages,
                reason: DeleteTransactionReason::NotActual,
            }]);
        }
        result
    }

    fn build_coinbase(
        &self,
        height: u32,
        reward: u64,
        miner_spend_key: &PublicKey,
        miner_view_key: &PublicKey,
        extra_nonce: &[u8],
    ) -> Result<Transaction, BlockTemplateError> {
        let (tx_public, tx_secret) = stealth::generate_keys();
        let derivation = stealth::generate_key_derivation(miner_view_key, &tx_secret)
            .map_err(|_| BlockTemplateError::InvalidMinerKey)?;
        let derivation_scalar = stealth::derivation_to_scalar(&derivation, 0);
        let one_time_key = stealth::derive_public_key(&derivation_scalar, miner_spend_key)
            .map_err(|_| BlockTemplateError::InvalidMinerKey)?;

        let mut extra_blob = Vec::new();
        extra::write_public_key(&mut extra_blob, &tx_public);
        extra_blob.extend_from_slice(extra_nonce);

        Ok(Transaction {
            prefix: TransactionPrefix {
                version: TX_VERSION_LEGACY,
                unlock_time: u64::from(height) + self.constants.mined_money_unlock_window,
                inputs: vec![TransactionInput::Base(crate::transactions::BaseInput { block_index: height })],
                outputs: vec![TransactionOutput {
                    amount: reward,
                    target: TransactionOutputTarget::Key(KeyOutput { key: one_time_key }),
                }],
                extra: extra_blob,
            },
            signatures: TransactionSignatures::Legacy(Vec::new()),
        })
    }

    /// Drop alternative branches whose tips have fallen more than `depth_threshold` blocks
    /// behind the active tip, then merge confirmed main-chain segments back into their
    /// parents so the tree stays shallow.
    pub fn prune_losing_forks(&self, depth_threshold: u32) -> usize {
        let mut state = self.chain.write().expect("chain lock poisoned");
        let active_top = state.active_top_index();
        let mut pruned = 0usize;

        // stale alternative leaves first, walking each dead branch up to the fork point
        let stale: Vec<usize> = state
            .leaves
            .iter()
            .skip(1)
            .copied()
            .filter(|leaf| {
                let top = state.node(*leaf).cache.top_block_index();
                active_top.saturating_sub(top) > depth_threshold
            })
            .collect();
        for leaf in stale {
            let mut current = leaf;
            loop {
                if !state.node(current).children.is_empty() {
                    break;
                }
                let parent = state.node(current).parent;
                state.nodes[current] = None;
                state.leaves.retain(|candidate| *candidate != current);
                pruned += 1;
                match parent {
                    Some(parent) => {
                        state.node_mut(parent).children.retain(|child| *child != current);
                        // keep walking only while the branch stays exclusive and off-path
                        if !state.node(parent).children.is_empty() || state.leaves.contains(&parent) || parent == state.active_leaf() {
                            break;
                        }
                        if state.path_root_first(state.active_leaf()).contains(&parent) {
                            break;
                        }
                        current = parent;
                    },
                    None => break,
                }
            }
        }

        // confirmed single-child segments on the main path collapse into their parents
        loop {
            let path = state.path_root_first(state.active_leaf());
            let Some((&parent, &child)) = path
                .iter()
                .zip(path.iter().skip(1))
                .find(|(parent, child)| state.node(**parent).children == vec![**child])
            else {
                break;
            };
            let child_node = state.nodes[child].take().expect("child segment is live");
            state.node_mut(parent).cache.merge_from(child_node.cache);
            state.node_mut(parent).children = child_node.children.clone();
            for grandchild in child_node.children {
                state.node_mut(grandchild).parent = Some(parent);
            }
            for leaf in state.leaves.iter_mut() {
                if *leaf == child {
                    *leaf = parent;
                }
            }
        }

        if pruned > 0 {
            info!(target: LOG_TARGET, "Pruned {pruned} losing fork segments");
        }
        pruned
    }

    /// Raw transaction bodies for the given hashes, plus the hashes that are not on the main
    /// chain.
    pub fn raw_transactions(&self, hashes: &[Hash]) -> (Vec<Vec<u8>>, Vec<Hash>) {
        let state = self.chain.read().expect("chain lock poisoned");
        let view = state.view(state.active_leaf(), state.active_top_index(), &self.constants);
        let mut found = Vec::new();
        let mut missed = Vec::new();
        for hash in hashes {
            let located = view.transaction_location(hash).and_then(|(block_index, tx_index)| {
                let info = view.block_info(block_index)?;
                if tx_index == 0 {
                    let block = CachedBlock::from_raw(info.raw.block.clone()).ok()?;
                    Some(block.template().base_transaction.serialized())
                } else {
                    info.raw.transactions.get(tx_index as usize - 1).cloned()
                }
            });
            match located {
                Some(bytes) => found.push(bytes),
                None => missed.push(*hash),
            }
        }
        (found, missed)
    }

    /// Main-chain heights in `[start, start + count)` whose blocks carry transactions beyond
    /// the coinbase.
    pub fn non_empty_block_indexes(&self, start: u32, count: u32) -> Vec<u32> {
        let state = self.chain.read().expect("chain lock poisoned");
        let top = state.active_top_index();
        let view = state.view(state.active_leaf(), top, &self.constants);
        (start..start.saturating_add(count))
            .take_while(|height| *height <= top)
            .filter(|height| {
                view.block_info(*height)
                    .map(|info| !info.raw.transactions.is_empty())
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Persist the main chain through the write-batch interface.
    pub fn save(&self, batch: &mut dyn StorageBatch) -> Result<(), ChainStorageError> {
        let state = self.chain.read().expect("chain lock poisoned");
        for segment_index in state.path_root_first(state.active_leaf()) {
            state.node(segment_index).cache.save(batch)?;
        }
        Ok(())
    }

    /// Restore a chain persisted by [`Core::save`]. Yields a fresh chain when storage holds
    /// nothing.
    pub fn load(
        reader: &dyn StorageReader,
        constants: ConsensusConstants,
        checkpoints: Checkpoints,
    ) -> Result<Self, ChainStorageError> {
        let cache = BlockchainCache::load(reader, 0)?;
        let core = Core::new(constants, checkpoints);
        if cache.block_count() > 1 {
            let mut state = core.chain.write().expect("chain lock poisoned");
            let loaded_genesis = cache.block_hash(0);
            let fresh_genesis = state.node(0).cache.block_hash(0);
            if loaded_genesis != fresh_genesis {
                return Err(ChainStorageError::NotInitialized);
            }
            state.nodes[0] = Some(SegmentNode {
                cache,
                parent: None,
                children: Vec::new(),
            });
            state.leaves = vec![0];
        }
        Ok(core)
    }

    /// Main-chain summary data for a height range, as consumed by the RPC layer.
    pub fn main_chain_hashes(&self, start: u32, end_inclusive: u32) -> Vec<Hash> {
        let state = self.chain.read().expect("chain lock poisoned");
        let top = state.active_top_index();
        let view = state.view(state.active_leaf(), top, &self.constants);
        (start..=end_inclusive.min(top))
            .filter_map(|height| view.block_hash(height))
            .collect()
    }

    /// Run `f` with a read view of the active chain.
    pub fn with_main_chain<T>(&self, f: impl FnOnce(&ChainView<'_>) -> T) -> T {
        let state = self.chain.read().expect("chain lock poisoned");
        let view = state.view(state.active_leaf(), state.active_top_index(), &self.constants);
        f(&view)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn a_fresh_chain_holds_genesis_only() {
        let core = Core::new(ConsensusConstants::for_tests(), Checkpoints::new());
        let (top, hash) = core.top_block();
        assert_eq!(top, 0);
        assert_eq!(core.block_hash_at(0), Some(hash));
        assert_eq!(core.block_hash_at(1), None);
    }

    #[test]
    fn unknown_parents_are_orphaned() {
        let core = Core::new(ConsensusConstants::for_tests(), Checkpoints::new());
        let template = BlockTemplate {
            header: BlockHeader {
                major_version: 1,
                minor_version: 0,
                timestamp: 1,
                previous_block_hash: umbra_crypto::hashing::sha3(b"nowhere"),
                nonce: 0,
            },
            parent_block: None,
            base_transaction: genesis_block(core.constants()).base_transaction,
            transaction_hashes: vec![],
        };
        let raw = RawBlock {
            block: template.serialized(),
            transactions: vec![],
        };
        assert!(matches!(core.add_block(raw), Err(AddBlockError::RejectedAsOrphaned)));
    }
}
