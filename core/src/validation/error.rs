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

use thiserror::Error;

/// Everything that can disqualify a transaction. The variants are stable identifiers: the
/// pool and the peer layer key eviction and ban decisions off them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransactionValidationError {
    #[error("Transaction has no inputs or an impossible input count")]
    InputWrongCount,
    #[error("Transaction input is of an unexpected type for its position")]
    InputUnexpectedType,
    #[error("Transaction input has a zero amount")]
    InputZeroAmount,
    #[error("Transaction input ring signatures do not verify")]
    InputInvalidSignatures,
    #[error("Transaction input global output index does not resolve")]
    InputInvalidGlobalIndex,
    #[error("Transaction input spends an output that is still locked")]
    InputSpendLockedOut,
    #[error("Transaction input key image has already been spent")]
    InputKeyImageAlreadySpent,
    #[error("Transaction input key image is not in the prime-order subgroup")]
    InputKeyImageInvalid,
    #[error("Transaction output has a zero amount")]
    OutputZeroAmount,
    #[error("Transaction output key is not a valid curve point")]
    OutputInvalidKey,
    #[error("Transaction output amounts overflow")]
    OutputsAmountOverflow,
    #[error("Transaction unlock time is wrong")]
    WrongTransactionUnlockTime,
    #[error("Transaction version is not accepted at this height")]
    WrongTransactionVersion,
    #[error("Transaction size exceeds the cumulative block size budget")]
    CumulativeBlockSizeTooBig,
    #[error("Range proof or commitment verification failed")]
    ProofVerificationFailed,
    #[error("Transaction ring size is below the minimum or above the maximum mixin")]
    MixinTooFewOrTooMany,
    #[error("Coinbase input carries the wrong block index")]
    BaseInputWrongBlockIndex,
    #[error("Coinbase carries an invalid number of signatures")]
    BaseInvalidSignaturesCount,
    #[error("Transaction spends the same key image twice")]
    DuplicateKeyImage,
}
