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

use umbra_crypto::{ed25519::hash_to_point, Hash, PublicKey};

use super::{BlockHeader, BlockTemplate};
use crate::{
    consensus::ConsensusConstants,
    transactions::{
        BaseInput, KeyOutput, Transaction, TransactionInput, TransactionOutput, TransactionOutputTarget,
        TransactionPrefix, TransactionSignatures, TX_VERSION_LEGACY,
    },
};

/// The destination of the genesis emission. A nothing-up-my-sleeve point: nobody knows its
/// discrete log, so the premine is provably unspendable.
fn genesis_output_key() -> PublicKey {
    hash_to_point(b"umbra genesis output destination").into()
}

/// The deterministic first block of the chain.
pub fn genesis_block(constants: &ConsensusConstants) -> BlockTemplate {
    let reward = constants.money_supply >> constants.emission_speed_factor;
    let base_transaction = Transaction {
        prefix: TransactionPrefix {
            version: TX_VERSION_LEGACY,
            unlock_time: constants.mined_money_unlock_window,
            inputs: vec![TransactionInput::Base(BaseInput { block_index: 0 })],
            outputs: vec![TransactionOutput {
                amount: reward,
                target: TransactionOutputTarget::Key(KeyOutput {
                    key: genesis_output_key(),
                }),
            }],
            extra: Vec::new(),
        },
        signatures: TransactionSignatures::Legacy(Vec::new()),
    };

    BlockTemplate {
        header: BlockHeader {
            major_version: 1,
            minor_version: 0,
            timestamp: 0,
            previous_block_hash: Hash::default(),
            nonce: 70,
        },
        parent_block: None,
        base_transaction,
        transaction_hashes: Vec::new(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn genesis_is_deterministic() {
        let constants = ConsensusConstants::mainnet();
        assert_eq!(
            genesis_block(&constants).block_hash(),
            genesis_block(&constants).block_hash()
        );
    }

    #[test]
    fn genesis_mints_the_initial_reward() {
        let constants = ConsensusConstants::mainnet();
        let genesis = genesis_block(&constants);
        assert!(genesis.base_transaction.is_coinbase());
        assert_eq!(
            genesis.base_transaction.output_amount(),
            Some(constants.money_supply >> constants.emission_speed_factor)
        );
        assert!(genesis.transaction_hashes.is_empty());
        assert!(genesis.header.previous_block_hash.is_zero());
    }
}
