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

//! The read-only summaries the RPC layer serves: block and transaction details for the
//! explorer, and the per-block batches a syncing wallet scans. Schema only; transport and
//! pagination live outside this crate.

use serde::{Deserialize, Serialize};
use umbra_crypto::{Hash, KeyImage, PublicKey};

use crate::{
    chain_storage::Core,
    transactions::{extra, CachedTransaction, Transaction, TransactionInput},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub height: u32,
    pub hash: Hash,
    pub timestamp: u64,
    pub cumulative_size: u64,
    pub difficulty: u64,
    pub transaction_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInputSummary {
    pub amount: u64,
    pub key_offsets: Vec<u32>,
    pub key_image: KeyImage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutputSummary {
    pub amount: u64,
    pub key: PublicKey,
    pub global_index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub hash: Hash,
    pub fee: u64,
    pub mixin: usize,
    pub payment_id: Option<Hash>,
    pub unlock_time: u64,
    pub inputs: Vec<TransactionInputSummary>,
    pub outputs: Vec<TransactionOutputSummary>,
}

/// One block of a wallet-sync batch: the coinbase plus the regular transactions, with the
/// data a scanning wallet needs and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSyncBlock {
    pub height: u32,
    pub hash: Hash,
    pub timestamp: u64,
    pub coinbase: TransactionSummary,
    pub transactions: Vec<TransactionSummary>,
}

fn summarize_transaction(transaction: &Transaction, hash: Hash, global_indexes: Option<&[u32]>) -> TransactionSummary {
    let mut inputs = Vec::new();
    let mut mixin = 0usize;
    for input in &transaction.prefix.inputs {
        if let TransactionInput::Key(key_input) = input {
            mixin = mixin.max(key_input.output_indexes.len().saturating_sub(1));
            inputs.push(TransactionInputSummary {
                amount: key_input.amount,
                key_offsets: key_input.output_indexes.clone(),
                key_image: key_input.key_image,
            });
        }
    }
    let outputs = transaction
        .prefix
        .outputs
        .iter()
        .enumerate()
        .map(|(index, output)| TransactionOutputSummary {
            amount: output.amount,
            key: *output.key(),
            global_index: global_indexes.and_then(|indexes| indexes.get(index).copied()),
        })
        .collect();

    TransactionSummary {
        hash,
        fee: transaction.fee().unwrap_or(0),
        mixin,
        payment_id: extra::payment_id(&transaction.prefix.extra),
        unlock_time: transaction.prefix.unlock_time,
        inputs,
        outputs,
    }
}

/// Block summaries for an inclusive main-chain height range.
pub fn block_summaries(core: &Core, start: u32, end_inclusive: u32) -> Vec<BlockSummary> {
    core.with_main_chain(|view| {
        (start..=end_inclusive.min(view.top_index()))
            .filter_map(|height| {
                let info = view.block_info(height)?;
                let previous_difficulty = height
                    .checked_sub(1)
                    .map(|prev| view.cumulative_difficulty(prev))
                    .unwrap_or(0);
                Some(BlockSummary {
                    height,
                    hash: info.hash,
                    timestamp: info.timestamp,
                    cumulative_size: info.block_size,
                    difficulty: (info.cumulative_difficulty - previous_difficulty) as u64,
                    transaction_count: info.tx_hashes.len(),
                })
            })
            .collect()
    })
}

/// Wallet-sync batches for an inclusive main-chain height range.
pub fn wallet_sync_blocks(core: &Core, start: u32, end_inclusive: u32) -> Vec<WalletSyncBlock> {
    core.with_main_chain(|view| {
        (start..=end_inclusive.min(view.top_index()))
            .filter_map(|height| {
                let info = view.block_info(height)?;
                let block = crate::blocks::CachedBlock::from_raw(info.raw.block.clone()).ok()?;
                let coinbase_tx = &block.template().base_transaction;
                let coinbase_hash = coinbase_tx.hash();
                let coinbase = summarize_transaction(
                    coinbase_tx,
                    coinbase_hash,
                    view.transaction_global_indexes(&coinbase_hash).as_deref(),
                );

                let mut transactions = Vec::with_capacity(info.raw.transactions.len());
                for bytes in &info.raw.transactions {
                    let tx = CachedTransaction::from_raw(bytes.clone()).ok()?;
                    let summary = summarize_transaction(
                        tx.transaction(),
                        *tx.hash(),
                        view.transaction_global_indexes(tx.hash()).as_deref(),
                    );
                    transactions.push(summary);
                }

                Some(WalletSyncBlock {
                    height,
                    hash: info.hash,
                    timestamp: info.timestamp,
                    coinbase,
                    transactions,
                })
            })
            .collect()
    })
}
