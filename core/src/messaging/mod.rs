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

//! Internal publish of chain and pool events. Fan-out is best effort: observers are notified
//! after the state transition commits, a failing observer is logged and skipped, and
//! delivery never throws back into the writer.

use log::warn;
use strum_macros::Display;
use thiserror::Error;
use umbra_crypto::Hash;

const LOG_TARGET: &str = "c::messaging";

/// Why a transaction left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DeleteTransactionReason {
    /// Included in an accepted block.
    InBlock,
    /// Invalidated by the new chain state.
    NotActual,
    /// Exceeded its pool live time.
    Outdated,
}

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum BlockchainMessage {
    NewBlock {
        height: u32,
        hash: Hash,
    },
    NewAlternativeBlock {
        height: u32,
        hash: Hash,
    },
    ChainSwitch {
        common_ancestor_height: u32,
        /// New-tip hashes in order from the block after the common ancestor to the tip.
        new_hashes: Vec<Hash>,
    },
    AddTransaction {
        hashes: Vec<Hash>,
    },
    DeleteTransaction {
        hashes: Vec<Hash>,
        reason: DeleteTransactionReason,
    },
}

#[derive(Debug, Error)]
#[error("Observer rejected the message: {0}")]
pub struct ObserverError(pub String);

/// A consumer of chain events (the RPC and peer layers subscribe through this).
pub trait BlockchainObserver: Send + Sync {
    fn on_message(&self, message: &BlockchainMessage) -> Result<(), ObserverError>;
}

/// Deliver a message to every observer, logging and skipping failures.
pub fn notify_observers(observers: &[Box<dyn BlockchainObserver>], message: &BlockchainMessage) {
    for observer in observers {
        if let Err(error) = observer.on_message(message) {
            warn!(target: LOG_TARGET, "Observer failed on {message}: {error}");
        }
    }
}
