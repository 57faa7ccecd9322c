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

use strum_macros::Display;
use thiserror::Error;
use umbra_crypto::Hash;

use crate::validation::TransactionValidationError;

/// Where an accepted block landed. `AlreadyExists` is an outcome, not an error: the caller
/// usually treats a duplicate as success it can ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BlockAddResult {
    AddedToMain,
    AddedToAlternative,
    AddedToAlternativeAndSwitched,
    AlreadyExists,
}

/// Why a block was refused. The peer layer distinguishes "request the parent" (orphaned)
/// from "drop the peer" (everything else) on these variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddBlockError {
    #[error("Block parent is unknown, rejected as orphaned")]
    RejectedAsOrphaned,
    #[error("Block or transaction bodies failed to deserialize")]
    DeserializationFailed,
    #[error("Cumulative block size exceeds the limit for its height")]
    CumulativeBlockSizeTooBig,
    #[error("Block major version {got} does not match the mandated version {expected}")]
    WrongMajorVersion { got: u8, expected: u8 },
    #[error("Block timestamp is below the median of the recent window")]
    TimestampTooSmall,
    #[error("Block timestamp is too far in the future")]
    TimestampTooFarInFuture,
    #[error("Block template transaction hash list carries duplicates")]
    TransactionDuplicates,
    #[error("Block template transaction hash list does not match the block body")]
    TransactionInconsistency,
    #[error("Coinbase transaction is invalid: {0}")]
    CoinbaseValidation(TransactionValidationError),
    #[error("Transaction {hash} is invalid: {error}")]
    TransactionValidation {
        hash: Hash,
        error: TransactionValidationError,
    },
    #[error("Coinbase reward does not match the expected emission")]
    BlockRewardMismatch,
    #[error("Block hash does not match the pinned checkpoint")]
    CheckpointMismatch,
    #[error("Proof of work does not satisfy the required difficulty")]
    ProofOfWorkTooWeak,
}

#[derive(Debug, Error)]
pub enum ChainStorageError {
    #[error("Block index {0} is outside the stored range")]
    BlockIndexOutOfRange(u32),
    #[error("Block {0} is not stored")]
    BlockNotFound(Hash),
    #[error("Transaction {0} is not stored")]
    TransactionNotFound(Hash),
    #[error("Rewind would exceed the depth cap or cross a live fork")]
    InvalidRewindTarget,
    #[error("Storage backend failure: {0}")]
    Storage(#[from] StorageError),
    #[error("Chain is not initialized")]
    NotInitialized,
}

/// Failures of the external key-value engine behind the write-batch interface. These are
/// internal errors: callers shut down rather than retry.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Backend I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("Stored record is corrupt: {0}")]
    Corrupt(&'static str),
}
