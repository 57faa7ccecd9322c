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

use helpers::{build_legacy_spend, coinbase_output, fresh_core, mine_blocks, MinerWallet};
use umbra_core::transactions::{extra, TransactionInput};

#[test]
fn template_extends_the_tip_with_a_valid_coinbase() {
    let core = fresh_core();
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 3);
    let (top, tip_hash) = core.top_block();

    let (template, difficulty) = core
        .get_block_template(&wallet.spend_public, &wallet.view_public, b"pool tag")
        .unwrap();
    assert!(difficulty >= 1);
    assert_eq!(template.header.previous_block_hash, tip_hash);
    assert_eq!(
        template.header.major_version,
        core.upgrades().block_major_for(top + 1)
    );

    let coinbase = &template.base_transaction;
    assert!(matches!(
        coinbase.prefix.inputs[0],
        TransactionInput::Base(ref base) if base.block_index == top + 1
    ));
    assert_eq!(
        coinbase.prefix.unlock_time,
        u64::from(top + 1) + core.constants().mined_money_unlock_window
    );
    // the template advertises its transaction key so the miner wallet can scan the reward
    assert!(extra::public_key(&coinbase.prefix.extra).is_some());
}

#[test]
fn template_packs_pool_transactions_by_fee() {
    let core = fresh_core();
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 5);

    let cheap = build_legacy_spend(&coinbase_output(&core, &wallet, 1), 2, None);
    let generous = build_legacy_spend(&coinbase_output(&core, &wallet, 2), 500, None);
    core.handle_incoming_transaction(cheap.raw().to_vec()).unwrap();
    core.handle_incoming_transaction(generous.raw().to_vec()).unwrap();

    let (template, _) = core
        .get_block_template(&wallet.spend_public, &wallet.view_public, &[])
        .unwrap();
    assert_eq!(template.transaction_hashes.len(), 2);
    // the higher fee per byte rides first
    assert_eq!(template.transaction_hashes[0], *generous.hash());

    // and the coinbase collects both fees on top of the emission
    let reward = template.base_transaction.prefix.outputs[0].amount;
    let (empty_template, _) = {
        let other = fresh_core();
        let other_wallet = MinerWallet::random();
        mine_blocks(&other, &other_wallet, 5);
        other
            .get_block_template(&other_wallet.spend_public, &other_wallet.view_public, &[])
            .unwrap()
    };
    let base_reward = empty_template.base_transaction.prefix.outputs[0].amount;
    assert_eq!(reward, base_reward + 502);
}

#[test]
fn template_hash_list_is_duplicate_free() {
    let core = fresh_core();
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 5);

    let tx = build_legacy_spend(&coinbase_output(&core, &wallet, 1), 5, None);
    core.handle_incoming_transaction(tx.raw().to_vec()).unwrap();
    let (template, _) = core
        .get_block_template(&wallet.spend_public, &wallet.view_public, &[])
        .unwrap();
    let included = template
        .transaction_hashes
        .iter()
        .filter(|hash| *hash == tx.hash())
        .count();
    assert_eq!(included, 1);
    assert_eq!(template.transaction_hashes.len(), 1);
}
