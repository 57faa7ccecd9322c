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

mod helpers;

use helpers::{build_legacy_spend, coinbase_output, fresh_core, mine_blocks, mine_next_block, CollectingObserver, MinerWallet, ObserverHandle};
use umbra_core::{
    chain_storage::AddTransactionError,
    messaging::{BlockchainMessage, DeleteTransactionReason},
};
use umbra_crypto::hashing::sha3;

#[test]
fn valid_spend_enters_the_pool_and_lands_in_a_block() {
    let core = fresh_core();
    let wallet = MinerWallet::random();
    let observer = CollectingObserver::shared();
    core.add_observer(Box::new(ObserverHandle(observer.clone())));

    // unlock window is two blocks in the test constants
    mine_blocks(&core, &wallet, 4);
    let source = coinbase_output(&core, &wallet, 1);
    let tx = build_legacy_spend(&source, 5, Some(sha3(b"invoice 1")));
    let tx_hash = *tx.hash();

    core.handle_incoming_transaction(tx.raw().to_vec()).unwrap();
    assert!(core.pool().contains(&tx_hash));

    mine_next_block(&core, &wallet);
    assert!(!core.pool().contains(&tx_hash));
    assert!(core.has_transaction(&tx_hash));

    // the payment id reverse index sees it
    assert_eq!(core.transaction_hashes_by_payment_id(&sha3(b"invoice 1")), vec![tx_hash]);

    let messages = observer.snapshot();
    assert!(messages
        .iter()
        .any(|message| matches!(message, BlockchainMessage::AddTransaction { hashes } if hashes == &vec![tx_hash])));
    assert!(messages.iter().any(|message| matches!(
        message,
        BlockchainMessage::DeleteTransaction { hashes, reason: DeleteTransactionReason::InBlock } if hashes == &vec![tx_hash]
    )));
}

#[test]
fn double_spends_are_refused_at_admission() {
    let core = fresh_core();
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 4);
    let source = coinbase_output(&core, &wallet, 1);

    let first = build_legacy_spend(&source, 5, None);
    let second = build_legacy_spend(&source, 6, None);
    core.handle_incoming_transaction(first.raw().to_vec()).unwrap();

    // same key image, still in the pool
    assert!(matches!(
        core.handle_incoming_transaction(second.raw().to_vec()),
        Err(AddTransactionError::KeyImageAlreadySpent)
    ));

    // and after the first lands on chain, the image is spent for good
    mine_next_block(&core, &wallet);
    assert!(matches!(
        core.handle_incoming_transaction(second.raw().to_vec()),
        Err(AddTransactionError::KeyImageAlreadySpent)
    ));
}

#[test]
fn locked_outputs_cannot_be_spent_yet() {
    let core = fresh_core();
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 2);
    // the coinbase at height 2 unlocks at height 4; the next block is 3
    let source = coinbase_output(&core, &wallet, 2);
    let tx = build_legacy_spend(&source, 5, None);
    assert!(matches!(
        core.handle_incoming_transaction(tx.raw().to_vec()),
        Err(AddTransactionError::Validation(
            umbra_core::validation::TransactionValidationError::InputSpendLockedOut
        ))
    ));
}

#[test]
fn underfunded_fees_are_refused() {
    let core = fresh_core();
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 4);
    let source = coinbase_output(&core, &wallet, 1);
    let tx = build_legacy_spend(&source, 0, None);
    assert!(matches!(
        core.handle_incoming_transaction(tx.raw().to_vec()),
        Err(AddTransactionError::FeeTooSmall)
    ));
}

#[test]
fn fusion_transactions_bypass_the_fee_floor_under_a_quota() {
    // relax the fusion shape rules so a simple one-in-one-out zero-fee spend qualifies
    let constants = umbra_core::consensus::ConsensusConstants {
        fusion_tx_min_input_count: 1,
        fusion_tx_min_in_out_ratio: 1,
        max_fusion_transactions_per_pool: 1,
        ..helpers::legacy_constants()
    };
    let core = helpers::fresh_core_with(constants);
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 5);

    let first = build_legacy_spend(&coinbase_output(&core, &wallet, 1), 0, None);
    core.handle_incoming_transaction(first.raw().to_vec()).unwrap();
    assert_eq!(core.pool().fusion_transaction_count(), 1);

    // quota of one: the second fusion transaction is turned away
    let second = build_legacy_spend(&coinbase_output(&core, &wallet, 2), 0, None);
    assert!(matches!(
        core.handle_incoming_transaction(second.raw().to_vec()),
        Err(AddTransactionError::Pool(umbra_core::mempool::MempoolError::FusionQuotaExceeded))
    ));
}

#[test]
fn malformed_bytes_are_refused() {
    let core = fresh_core();
    assert!(matches!(
        core.handle_incoming_transaction(vec![0xde, 0xad, 0xbe, 0xef]),
        Err(AddTransactionError::DeserializationFailed)
    ));
}
