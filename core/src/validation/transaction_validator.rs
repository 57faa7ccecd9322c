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

//! The transaction validator. `validate_transaction` runs the full rule set against a
//! candidate block position; `revalidate_pool_transaction` is the lighter pass the pool runs
//! whenever the tip moves.
//!
//! Ring signature and range proof checks fan out over a worker pool with no partial-result
//! semantics: either every proof in the transaction verifies or the transaction fails as a
//! whole.

use std::collections::HashSet;

use rayon::prelude::*;
use umbra_crypto::{borromean, clsag, bulletproofs, bulletproofs_plus, ringct, Commitment, KeyImage, PublicKey};

use super::TransactionValidationError;
use crate::{
    consensus::{ConsensusConstants, UpgradeManager},
    transactions::{
        CachedTransaction, RangeProof, Transaction, TransactionInput, TransactionSignatures, TX_VERSION_LEGACY,
        TX_VERSION_RING_CT,
    },
};

/// Range proofs bound every committed amount to 64 bits.
const RANGE_PROOF_BITS: usize = 64;

/// A resolved ring member: its one-time key, its Pedersen commitment (synthesised with a
/// zero blinding factor for outputs that predate confidential amounts), and its unlock time.
#[derive(Debug, Clone, Copy)]
pub struct KeyOutputInfo {
    pub key: PublicKey,
    pub commitment: Commitment,
    pub unlock_time: u64,
}

/// Read access to the chain state a transaction is validated against. Implemented by the
/// chain manager over the segment that would contain the enclosing block.
pub trait BlockchainQuery: Sync {
    /// True when the key image is spent anywhere in the queried chain.
    fn is_spent_key_image(&self, image: &KeyImage) -> bool;

    /// Resolve absolute global output indexes within an amount bucket. None when any index
    /// is unknown to the chain.
    fn key_outputs(&self, amount: u64, global_indexes: &[u32]) -> Option<Vec<KeyOutputInfo>>;
}

/// The spent-key-image projection threaded through block validation: every transaction adds
/// its images so intra-block double spends surface immediately, and the pool reuses the same
/// set to evict conflicting entries after the block lands.
#[derive(Debug, Clone, Default)]
pub struct TransactionValidatorState {
    pub spent_key_images: HashSet<KeyImage>,
}

impl TransactionValidatorState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Everything the validator needs to know about the position a transaction is validated at.
pub struct ValidatorContext<'a> {
    pub constants: &'a ConsensusConstants,
    pub upgrades: &'a UpgradeManager,
    pub chain: &'a dyn BlockchainQuery,
    /// Height of the enclosing candidate block.
    pub block_index: u32,
    pub block_timestamp: u64,
    pub block_size_median: u64,
}

impl ValidatorContext<'_> {
    fn major_version(&self) -> u8 {
        self.upgrades.block_major_for(self.block_index)
    }

    fn ring_ct_required(&self) -> bool {
        self.major_version() >= self.constants.ring_ct_fork_version
    }
}

/// Full validation of a non-coinbase transaction at the context position. Returns the fee.
///
/// The caller's `state` receives the transaction's key images on success; a failure leaves
/// the state untouched.
pub fn validate_transaction(
    tx: &CachedTransaction,
    state: &mut TransactionValidatorState,
    ctx: &ValidatorContext<'_>,
) -> Result<u64, TransactionValidationError> {
    let transaction = tx.transaction();

    check_version(transaction, ctx)?;

    if transaction.prefix.inputs.is_empty() {
        return Err(TransactionValidationError::InputWrongCount);
    }

    // intra-transaction duplicates
    let mut seen_images = HashSet::with_capacity(tx.key_images().len());
    for image in tx.key_images() {
        if !seen_images.insert(*image) {
            return Err(TransactionValidationError::DuplicateKeyImage);
        }
    }

    let major_version = ctx.major_version();
    let minimum_mixin = ctx.constants.minimum_mixin(major_version);

    for input in &transaction.prefix.inputs {
        let key_input = match input {
            TransactionInput::Key(key_input) => key_input,
            TransactionInput::Base(_) => return Err(TransactionValidationError::InputUnexpectedType),
        };
        if key_input.amount == 0 {
            return Err(TransactionValidationError::InputZeroAmount);
        }
        if key_input.absolute_indexes().is_none() {
            return Err(TransactionValidationError::InputInvalidGlobalIndex);
        }
        let mixin = key_input.output_indexes.len().saturating_sub(1);
        if key_input.output_indexes.is_empty()
            || mixin < minimum_mixin
            || mixin > ctx.constants.maximum_mixin
        {
            return Err(TransactionValidationError::MixinTooFewOrTooMany);
        }
        if key_input.key_image.decompress_subgroup().is_err() {
            return Err(TransactionValidationError::InputKeyImageInvalid);
        }
        if state.spent_key_images.contains(&key_input.key_image)
            || ctx.chain.is_spent_key_image(&key_input.key_image)
        {
            return Err(TransactionValidationError::InputKeyImageAlreadySpent);
        }
    }

    if tx.size() > ctx.constants.max_transaction_size(ctx.block_size_median) {
        return Err(TransactionValidationError::CumulativeBlockSizeTooBig);
    }

    let fee = tx.fee().ok_or(TransactionValidationError::OutputsAmountOverflow)?;

    for output in &transaction.prefix.outputs {
        if output.amount == 0 {
            return Err(TransactionValidationError::OutputZeroAmount);
        }
        if !output.key().is_valid() {
            return Err(TransactionValidationError::OutputInvalidKey);
        }
    }

    let rings = expand_rings(transaction, ctx)?;
    check_signatures(tx, &rings, fee, ctx)?;

    state.spent_key_images.extend(tx.key_images().iter().copied());
    Ok(fee)
}

/// The lighter pass the pool runs when the tip moves: ring sizes against the current rules,
/// size against the current median, and the spent-image set against the new chain state.
pub fn revalidate_pool_transaction(
    tx: &CachedTransaction,
    ctx: &ValidatorContext<'_>,
) -> Result<(), TransactionValidationError> {
    let transaction = tx.transaction();
    check_version(transaction, ctx)?;

    let minimum_mixin = ctx.constants.minimum_mixin(ctx.major_version());
    for input in &transaction.prefix.inputs {
        if let TransactionInput::Key(key_input) = input {
            let mixin = key_input.output_indexes.len().saturating_sub(1);
            if key_input.output_indexes.is_empty()
                || mixin < minimum_mixin
                || mixin > ctx.constants.maximum_mixin
            {
                return Err(TransactionValidationError::MixinTooFewOrTooMany);
            }
        }
    }

    if tx.size() > ctx.constants.max_transaction_size(ctx.block_size_median) {
        return Err(TransactionValidationError::CumulativeBlockSizeTooBig);
    }

    for image in tx.key_images() {
        if ctx.chain.is_spent_key_image(image) {
            return Err(TransactionValidationError::InputKeyImageAlreadySpent);
        }
    }
    Ok(())
}

/// Shape, position and reward checks for a block's coinbase. Returns the sum of its outputs,
/// which the chain manager compares against the computed reward.
pub fn validate_coinbase(
    transaction: &Transaction,
    block_index: u32,
    major_version: u8,
    constants: &ConsensusConstants,
) -> Result<u64, TransactionValidationError> {
    if transaction.prefix.version != TX_VERSION_LEGACY {
        return Err(TransactionValidationError::WrongTransactionVersion);
    }
    if transaction.prefix.inputs.len() != 1 {
        return Err(TransactionValidationError::InputWrongCount);
    }
    let base = match &transaction.prefix.inputs[0] {
        TransactionInput::Base(base) => base,
        TransactionInput::Key(_) => return Err(TransactionValidationError::InputUnexpectedType),
    };
    if base.block_index != block_index {
        return Err(TransactionValidationError::BaseInputWrongBlockIndex);
    }
    if transaction.prefix.unlock_time != u64::from(block_index) + constants.mined_money_unlock_window {
        return Err(TransactionValidationError::WrongTransactionUnlockTime);
    }

    match &transaction.signatures {
        TransactionSignatures::Legacy(rows) => {
            let empty = rows.is_empty();
            let legacy_shape = rows.len() == 1 && rows[0].is_empty();
            if major_version >= constants.coinbase_no_signatures_version {
                if !empty {
                    return Err(TransactionValidationError::BaseInvalidSignaturesCount);
                }
            } else if !empty && !legacy_shape {
                return Err(TransactionValidationError::BaseInvalidSignaturesCount);
            }
        },
        TransactionSignatures::RingCt(_) => return Err(TransactionValidationError::BaseInvalidSignaturesCount),
    }

    let mut total = 0u64;
    for output in &transaction.prefix.outputs {
        if output.amount == 0 {
            return Err(TransactionValidationError::OutputZeroAmount);
        }
        if !output.key().is_valid() {
            return Err(TransactionValidationError::OutputInvalidKey);
        }
        total = total
            .checked_add(output.amount)
            .ok_or(TransactionValidationError::OutputsAmountOverflow)?;
    }
    Ok(total)
}

/// True when the transaction qualifies for the fee-free fusion lane.
pub fn is_fusion_transaction(tx: &CachedTransaction, constants: &ConsensusConstants) -> bool {
    let transaction = tx.transaction();
    let input_count = transaction.prefix.inputs.len();
    let output_count = transaction.prefix.outputs.len().max(1);
    tx.fee() == Some(0)
        && tx.size() <= constants.fusion_tx_max_size
        && input_count >= constants.fusion_tx_min_input_count
        && input_count / output_count >= constants.fusion_tx_min_in_out_ratio
}

fn check_version(transaction: &Transaction, ctx: &ValidatorContext<'_>) -> Result<(), TransactionValidationError> {
    let expected = if ctx.ring_ct_required() {
        TX_VERSION_RING_CT
    } else {
        TX_VERSION_LEGACY
    };
    if transaction.prefix.version != expected {
        return Err(TransactionValidationError::WrongTransactionVersion);
    }
    Ok(())
}

struct ResolvedRing {
    key_image: KeyImage,
    keys: Vec<PublicKey>,
    commitments: Vec<Commitment>,
}

/// Relative offsets to absolute indexes to ring member keys and commitments, enforcing
/// unlock rules at the validation position.
fn expand_rings(
    transaction: &Transaction,
    ctx: &ValidatorContext<'_>,
) -> Result<Vec<ResolvedRing>, TransactionValidationError> {
    let mut rings = Vec::with_capacity(transaction.prefix.inputs.len());
    for input in &transaction.prefix.inputs {
        let key_input = match input {
            TransactionInput::Key(key_input) => key_input,
            TransactionInput::Base(_) => return Err(TransactionValidationError::InputUnexpectedType),
        };
        let absolute = key_input
            .absolute_indexes()
            .ok_or(TransactionValidationError::InputInvalidGlobalIndex)?;
        let outputs = ctx
            .chain
            .key_outputs(key_input.amount, &absolute)
            .ok_or(TransactionValidationError::InputInvalidGlobalIndex)?;

        let mut keys = Vec::with_capacity(outputs.len());
        let mut commitments = Vec::with_capacity(outputs.len());
        for info in outputs {
            if !ctx
                .constants
                .is_unlocked(info.unlock_time, u64::from(ctx.block_index), ctx.block_timestamp)
            {
                return Err(TransactionValidationError::InputSpendLockedOut);
            }
            keys.push(info.key);
            commitments.push(info.commitment);
        }
        rings.push(ResolvedRing {
            key_image: key_input.key_image,
            keys,
            commitments,
        });
    }
    Ok(rings)
}

/// Verify the signature section against the resolved rings: all-or-nothing over the worker
/// pool.
fn check_signatures(
    tx: &CachedTransaction,
    rings: &[ResolvedRing],
    fee: u64,
    ctx: &ValidatorContext<'_>,
) -> Result<(), TransactionValidationError> {
    let prefix_hash = *tx.prefix_hash();
    match &tx.transaction().signatures {
        TransactionSignatures::Legacy(rows) => {
            if ctx.ring_ct_required() {
                return Err(TransactionValidationError::WrongTransactionVersion);
            }
            if rows.len() != rings.len() {
                return Err(TransactionValidationError::InputInvalidSignatures);
            }
            let all_valid = rings
                .par_iter()
                .zip(rows.par_iter())
                .all(|(ring, row)| {
                    row.len() == ring.keys.len()
                        && borromean::check_ring_signature(&prefix_hash, &ring.key_image, &ring.keys, row)
                });
            if !all_valid {
                return Err(TransactionValidationError::InputInvalidSignatures);
            }
            Ok(())
        },
        TransactionSignatures::RingCt(rct) => {
            if !ctx.ring_ct_required() {
                return Err(TransactionValidationError::WrongTransactionVersion);
            }
            if rct.signatures.len() != rings.len() || rct.pseudo_commitments.len() != rings.len() {
                return Err(TransactionValidationError::InputInvalidSignatures);
            }
            if rct.output_commitments.len() != tx.transaction().prefix.outputs.len() {
                return Err(TransactionValidationError::ProofVerificationFailed);
            }

            let all_valid = rings
                .par_iter()
                .zip(rct.signatures.par_iter().zip(rct.pseudo_commitments.par_iter()))
                .all(|(ring, (signature, pseudo))| {
                    clsag::check_ring_signature(
                        &prefix_hash,
                        &ring.key_image,
                        &ring.keys,
                        signature,
                        &ring.commitments,
                        Some(pseudo),
                    )
                });
            if !all_valid {
                return Err(TransactionValidationError::InputInvalidSignatures);
            }

            let plus_required = ctx.major_version() >= ctx.constants.bulletproofs_plus_fork_version;
            let proof_valid = match (&rct.range_proof, plus_required) {
                (RangeProof::Bulletproof(proof), false) => {
                    bulletproofs::verify(proof, &rct.output_commitments, RANGE_PROOF_BITS)
                        .map_err(|_| TransactionValidationError::ProofVerificationFailed)?
                },
                (RangeProof::BulletproofPlus(proof), true) => {
                    bulletproofs_plus::verify(proof, &rct.output_commitments, RANGE_PROOF_BITS)
                        .map_err(|_| TransactionValidationError::ProofVerificationFailed)?
                },
                // the wrong proof system for the fork in force
                _ => false,
            };
            if !proof_valid {
                return Err(TransactionValidationError::ProofVerificationFailed);
            }

            if !ringct::check_commitments_parity(&rct.pseudo_commitments, &rct.output_commitments, fee) {
                return Err(TransactionValidationError::ProofVerificationFailed);
            }
            Ok(())
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        consensus::UpgradeManager,
        transactions::{BaseInput, TransactionPrefix},
    };

    struct EmptyChain;

    impl BlockchainQuery for EmptyChain {
        fn is_spent_key_image(&self, _image: &KeyImage) -> bool {
            false
        }

        fn key_outputs(&self, _amount: u64, _global_indexes: &[u32]) -> Option<Vec<KeyOutputInfo>> {
            None
        }
    }

    fn coinbase(height: u32, constants: &ConsensusConstants) -> Transaction {
        Transaction {
            prefix: TransactionPrefix {
                version: TX_VERSION_LEGACY,
                unlock_time: u64::from(height) + constants.mined_money_unlock_window,
                inputs: vec![TransactionInput::Base(BaseInput { block_index: height })],
                outputs: vec![],
                extra: vec![],
            },
            signatures: TransactionSignatures::Legacy(vec![]),
        }
    }

    #[test]
    fn coinbase_shape_is_enforced() {
        let constants = ConsensusConstants::mainnet();
        let tx = coinbase(5, &constants);
        assert!(validate_coinbase(&tx, 5, 2, &constants).is_ok());

        // wrong height
        assert_eq!(
            validate_coinbase(&tx, 6, 2, &constants).unwrap_err(),
            TransactionValidationError::BaseInputWrongBlockIndex
        );

        // wrong unlock time
        let mut wrong_unlock = coinbase(5, &constants);
        wrong_unlock.prefix.unlock_time += 1;
        assert_eq!(
            validate_coinbase(&wrong_unlock, 5, 2, &constants).unwrap_err(),
            TransactionValidationError::WrongTransactionUnlockTime
        );
    }

    #[test]
    fn coinbase_signature_rows_are_gated_by_version() {
        let constants = ConsensusConstants::mainnet();
        let mut tx = coinbase(5, &constants);
        tx.signatures = TransactionSignatures::Legacy(vec![vec![]]);
        // a single empty row is tolerated before the fork, rejected after
        assert!(validate_coinbase(&tx, 5, 1, &constants).is_ok());
        assert_eq!(
            validate_coinbase(&tx, 5, constants.coinbase_no_signatures_version, &constants).unwrap_err(),
            TransactionValidationError::BaseInvalidSignaturesCount
        );
    }

    #[test]
    fn transactions_with_no_inputs_are_rejected() {
        let constants = ConsensusConstants::for_tests();
        let upgrades = UpgradeManager::new(constants.upgrade_heights.clone());
        let chain = EmptyChain;
        let ctx = ValidatorContext {
            constants: &constants,
            upgrades: &upgrades,
            chain: &chain,
            block_index: 1,
            block_timestamp: 0,
            block_size_median: 0,
        };
        let tx = CachedTransaction::from_transaction(Transaction {
            prefix: TransactionPrefix {
                version: TX_VERSION_LEGACY,
                unlock_time: 0,
                inputs: vec![],
                outputs: vec![],
                extra: vec![],
            },
            signatures: TransactionSignatures::Legacy(vec![]),
        });
        let mut state = TransactionValidatorState::new();
        assert_eq!(
            validate_transaction(&tx, &mut state, &ctx).unwrap_err(),
            TransactionValidationError::InputWrongCount
        );
    }
}
