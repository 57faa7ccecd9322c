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

//! Shared helpers for the integration tests: a miner wallet, deterministic block mining on
//! top of a [`Core`], and construction of valid spend transactions in both signature
//! flavours.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use curve25519_dalek::scalar::Scalar;
use umbra_core::{
    blocks::CachedBlock,
    chain_storage::{BlockAddResult, Core},
    consensus::{Checkpoints, ConsensusConstants},
    messaging::{BlockchainMessage, BlockchainObserver, ObserverError},
    proof_of_work::check_proof_of_work,
    transactions::{
        extra, CachedTransaction, KeyInput, KeyOutput, RangeProof, RingCtSignatures, Transaction, TransactionInput,
        TransactionOutput, TransactionOutputTarget, TransactionPrefix, TransactionSignatures, TX_VERSION_LEGACY,
        TX_VERSION_RING_CT,
    },
};
use umbra_crypto::{
    borromean, bulletproofs, bulletproofs_plus, clsag,
    ed25519::{random_scalar, Commitment, PublicKey},
    ringct, stealth, Hash,
};

pub struct MinerWallet {
    pub spend_secret: Scalar,
    pub view_secret: Scalar,
    pub spend_public: PublicKey,
    pub view_public: PublicKey,
}

impl MinerWallet {
    pub fn random() -> Self {
        let (spend_public, spend_secret) = stealth::generate_keys();
        let view_secret = stealth::generate_view_from_spend(&spend_secret);
        MinerWallet {
            spend_public,
            view_public: stealth::secret_key_to_public_key(&view_secret),
            spend_secret,
            view_secret,
        }
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Consensus constants whose RingCT fork never activates, for tests of the legacy regime.
pub fn legacy_constants() -> ConsensusConstants {
    ConsensusConstants {
        upgrade_heights: vec![(1, 0), (2, 4)],
        ..ConsensusConstants::for_tests()
    }
}

pub fn fresh_core() -> Arc<Core> {
    fresh_core_with(legacy_constants())
}

pub fn fresh_core_with(constants: ConsensusConstants) -> Arc<Core> {
    init_logging();
    Arc::new(Core::new(constants, Checkpoints::new()))
}

/// Mine the next block on the active chain: take a template, pin a deterministic timestamp,
/// grind the nonce, submit. Pool transactions ride along automatically.
pub fn mine_next_block(core: &Core, wallet: &MinerWallet) -> BlockAddResult {
    let (mut template, difficulty) = core
        .get_block_template(&wallet.spend_public, &wallet.view_public, &[])
        .expect("template");
    let (top, _) = core.top_block();
    // deterministic spacing keeps the difficulty flat across the whole test chain
    template.header.timestamp = (u64::from(top) + 1) * core.constants().difficulty_target;
    while !check_proof_of_work(&template.hashing_blob(), difficulty, core.constants()) {
        template.header.nonce = template.header.nonce.wrapping_add(1);
    }
    core.submit_block(template.serialized()).expect("submit mined block")
}

pub fn mine_blocks(core: &Core, wallet: &MinerWallet, count: u32) {
    for _ in 0..count {
        let result = mine_next_block(core, wallet);
        assert!(
            matches!(result, BlockAddResult::AddedToMain),
            "mined block landed as {result:?}"
        );
    }
}

/// The miner's own coinbase output at `height`: its one-time keys, amount and global index.
pub struct OwnedOutput {
    pub ephemeral_public: PublicKey,
    pub ephemeral_secret: Scalar,
    pub amount: u64,
    pub global_index: u32,
}

pub fn coinbase_output(core: &Core, wallet: &MinerWallet, height: u32) -> OwnedOutput {
    let raw = core.raw_block_at(height).expect("height is on the main chain");
    let block = CachedBlock::from_raw(raw.block).expect("stored blocks parse");
    let coinbase = &block.template().base_transaction;
    let tx_public = extra::public_key(&coinbase.prefix.extra).expect("coinbase carries its tx key");

    let derivation = stealth::generate_key_derivation(&tx_public, &wallet.view_secret).expect("valid tx key");
    let derivation_scalar = stealth::derivation_to_scalar(&derivation, 0);
    let ephemeral_public = stealth::derive_public_key(&derivation_scalar, &wallet.spend_public).expect("derive");
    let ephemeral_secret = stealth::derive_secret_key(&derivation_scalar, &wallet.spend_secret);
    assert_eq!(
        stealth::secret_key_to_public_key(&ephemeral_secret),
        ephemeral_public,
        "wallet cannot spend this output"
    );

    let output = &coinbase.prefix.outputs[0];
    assert_eq!(output.key(), &ephemeral_public, "coinbase was not paid to this wallet");
    let global_index = core
        .transaction_global_indexes(&coinbase.hash())
        .expect("coinbase is indexed")[0];

    OwnedOutput {
        ephemeral_public,
        ephemeral_secret,
        amount: output.amount,
        global_index,
    }
}

/// A legacy (version one) transaction spending one owned output to a fresh key.
pub fn build_legacy_spend(source: &OwnedOutput, fee: u64, payment_id: Option<Hash>) -> CachedTransaction {
    let key_image = stealth::generate_key_image(&source.ephemeral_public, &source.ephemeral_secret).expect("image");
    let ring = vec![source.ephemeral_public];

    let mut extra_blob = Vec::new();
    if let Some(id) = payment_id {
        extra::write_payment_id(&mut extra_blob, &id);
    }

    let prefix = TransactionPrefix {
        version: TX_VERSION_LEGACY,
        unlock_time: 0,
        inputs: vec![TransactionInput::Key(KeyInput {
            amount: source.amount,
            output_indexes: vec![source.global_index],
            key_image,
        })],
        outputs: vec![TransactionOutput {
            amount: source.amount - fee,
            target: TransactionOutputTarget::Key(KeyOutput { key: stealth::generate_keys().0 }),
        }],
        extra: extra_blob,
    };
    let prefix_hash = prefix.hash();

    let (_image, signature) =
        borromean::generate_ring_signature(&prefix_hash, &source.ephemeral_secret, &ring).expect("sign");
    CachedTransaction::from_transaction(Transaction {
        prefix,
        signatures: TransactionSignatures::Legacy(vec![signature]),
    })
}

/// A RingCT (version two) transaction spending one owned output: commitment-aware CLSAG,
/// pseudo-output balancing, and a range proof in the system the fork mandates.
pub fn build_rct_spend(source: &OwnedOutput, fee: u64, use_bulletproofs_plus: bool) -> CachedTransaction {
    let key_image = stealth::generate_key_image(&source.ephemeral_public, &source.ephemeral_secret).expect("image");
    let ring = vec![source.ephemeral_public];
    // the ring member is a legacy output, committed with a zero blinding factor
    let ring_commitments: Vec<Commitment> =
        vec![ringct::generate_pedersen_commitment(&Scalar::ZERO, source.amount).expect("commit")];

    let output_amount = source.amount - fee;
    let output_blinding = random_scalar();

    let (range_proof, output_commitments) = if use_bulletproofs_plus {
        let (proof, commitments) = bulletproofs_plus::prove(&[output_amount], &[output_blinding], 64).expect("prove");
        (RangeProof::BulletproofPlus(proof), commitments)
    } else {
        let (proof, commitments) = bulletproofs::prove(&[output_amount], &[output_blinding], 64).expect("prove");
        (RangeProof::Bulletproof(proof), commitments)
    };
    let output_commitments = vec![output_commitments[0]];

    let (pseudo_blindings, pseudo_commitments) =
        ringct::generate_pseudo_commitments(&[source.amount], &[output_blinding]).expect("pseudo");
    assert!(ringct::check_commitments_parity(
        &pseudo_commitments,
        &output_commitments,
        fee
    ));

    let prefix = TransactionPrefix {
        version: TX_VERSION_RING_CT,
        unlock_time: 0,
        inputs: vec![TransactionInput::Key(KeyInput {
            amount: source.amount,
            output_indexes: vec![source.global_index],
            key_image,
        })],
        outputs: vec![TransactionOutput {
            amount: output_amount,
            target: TransactionOutputTarget::Key(KeyOutput { key: stealth::generate_keys().0 }),
        }],
        extra: Vec::new(),
    };
    let prefix_hash = prefix.hash();

    let (_image, signature) = clsag::generate_ring_signature(
        &prefix_hash,
        &source.ephemeral_secret,
        &ring,
        Some(&Scalar::ZERO),
        &ring_commitments,
        Some(&pseudo_blindings[0]),
        Some(&pseudo_commitments[0]),
    )
    .expect("clsag");

    CachedTransaction::from_transaction(Transaction {
        prefix,
        signatures: TransactionSignatures::RingCt(RingCtSignatures {
            signatures: vec![signature],
            pseudo_commitments,
            output_commitments,
            range_proof,
        }),
    })
}

/// An observer that records every message it sees.
#[derive(Default)]
pub struct CollectingObserver {
    pub messages: Mutex<Vec<BlockchainMessage>>,
}

impl CollectingObserver {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> Vec<BlockchainMessage> {
        self.messages.lock().unwrap().clone()
    }
}

/// A `Box`-friendly handle around a shared `CollectingObserver`, needed because the
/// orphan rules don't let this test crate implement `BlockchainObserver` directly
/// for `Arc<CollectingObserver>` (`Arc` isn't a fundamental type).
pub struct ObserverHandle(pub Arc<CollectingObserver>);

impl BlockchainObserver for ObserverHandle {
    fn on_message(&self, message: &BlockchainMessage) -> Result<(), ObserverError> {
        self.0.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}
