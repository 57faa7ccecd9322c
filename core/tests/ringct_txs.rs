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

//! End-to-end coverage of the fork-gated signature regimes: legacy transactions before the
//! RingCT fork, commitment-aware CLSAG with the original range proof system after it, and
//! the successor system after its own fork.

mod helpers;

use helpers::{
    build_legacy_spend, build_rct_spend, coinbase_output, fresh_core_with, mine_blocks, mine_next_block, MinerWallet,
};
use umbra_core::{
    chain_storage::AddTransactionError,
    consensus::ConsensusConstants,
    validation::TransactionValidationError,
};

/// The standard test schedule: v2 at 4, RingCT (v3) at 8, the successor proofs (v4) at 12.
fn forked_constants() -> ConsensusConstants {
    ConsensusConstants::for_tests()
}

#[test]
fn ring_ct_spends_are_accepted_after_the_fork() {
    let core = fresh_core_with(forked_constants());
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 9); // next block is height 10, major version 3

    let source = coinbase_output(&core, &wallet, 3);
    let tx = build_rct_spend(&source, 5, false);
    let tx_hash = *tx.hash();

    core.handle_incoming_transaction(tx.raw().to_vec()).unwrap();
    mine_next_block(&core, &wallet);
    assert!(core.has_transaction(&tx_hash));
    assert!(!core.pool().contains(&tx_hash));
}

#[test]
fn legacy_transactions_are_refused_after_the_fork() {
    let core = fresh_core_with(forked_constants());
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 9);

    let source = coinbase_output(&core, &wallet, 3);
    let tx = build_legacy_spend(&source, 5, None);
    assert!(matches!(
        core.handle_incoming_transaction(tx.raw().to_vec()),
        Err(AddTransactionError::Validation(TransactionValidationError::WrongTransactionVersion))
    ));
}

#[test]
fn ring_ct_transactions_are_refused_before_the_fork() {
    let core = fresh_core_with(forked_constants());
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 5); // next block is height 6, major version 2

    let source = coinbase_output(&core, &wallet, 1);
    let tx = build_rct_spend(&source, 5, false);
    assert!(matches!(
        core.handle_incoming_transaction(tx.raw().to_vec()),
        Err(AddTransactionError::Validation(TransactionValidationError::WrongTransactionVersion))
    ));
}

#[test]
fn the_successor_proof_system_is_mandatory_after_its_fork() {
    let core = fresh_core_with(forked_constants());
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 13); // next block is height 14, major version 4

    let source = coinbase_output(&core, &wallet, 5);
    // the old proof system is no longer accepted
    let stale = build_rct_spend(&source, 5, false);
    assert!(matches!(
        core.handle_incoming_transaction(stale.raw().to_vec()),
        Err(AddTransactionError::Validation(TransactionValidationError::ProofVerificationFailed))
    ));

    // the successor system passes
    let fresh = build_rct_spend(&source, 5, true);
    let fresh_hash = *fresh.hash();
    core.handle_incoming_transaction(fresh.raw().to_vec()).unwrap();
    mine_next_block(&core, &wallet);
    assert!(core.has_transaction(&fresh_hash));
}

#[test]
fn swapped_output_commitments_are_refused() {
    let core = fresh_core_with(forked_constants());
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 9);

    let source = coinbase_output(&core, &wallet, 3);
    let tx = build_rct_spend(&source, 5, false);
    // replace the output commitment with one under a different blinding factor; the prefix
    // is untouched, so only the proof layer can catch it
    let mut transaction = tx.transaction().clone();
    if let umbra_core::transactions::TransactionSignatures::RingCt(rct) = &mut transaction.signatures {
        rct.output_commitments[0] = umbra_crypto::ringct::generate_pedersen_commitment(
            &umbra_crypto::ed25519::random_scalar(),
            transaction.prefix.outputs[0].amount,
        )
        .unwrap();
    }
    let tampered = umbra_core::transactions::CachedTransaction::from_transaction(transaction);
    assert!(matches!(
        core.handle_incoming_transaction(tampered.raw().to_vec()),
        Err(AddTransactionError::Validation(TransactionValidationError::ProofVerificationFailed))
    ));
}
