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

use helpers::{fresh_core, mine_blocks, mine_next_block, MinerWallet};
use umbra_core::{
    blocks::genesis_block,
    chain_storage::{BlockAddResult, Core, MemoryStorage},
    consensus::{Checkpoints, ConsensusConstants},
};
use umbra_crypto::hashing::sha3;

#[test]
fn chain_linearity_holds_over_many_blocks() {
    let core = fresh_core();
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 20);

    let (top, _) = core.top_block();
    assert_eq!(top, 20);
    // for every height, index(hash(h)) == h
    for height in 0..=top {
        let hash = core.block_hash_at(height).expect("height is stored");
        assert_eq!(core.block_index_of(&hash), Some(height));
    }
}

#[test]
fn duplicate_blocks_are_reported_as_existing() {
    let core = fresh_core();
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 3);

    let raw = core.raw_block_at(2).unwrap();
    assert!(matches!(core.add_block(raw), Ok(BlockAddResult::AlreadyExists)));
}

#[test]
fn generated_coins_grow_with_every_block() {
    let core = fresh_core();
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 5);

    core.with_main_chain(|view| {
        let mut previous = 0;
        for height in 0..=5 {
            let generated = view.already_generated_coins(height);
            assert!(generated > previous, "emission stalled at height {height}");
            previous = generated;
        }
    });
}

#[test]
fn wrong_major_version_is_rejected() {
    let core = fresh_core();
    let wallet = MinerWallet::random();
    // the test table switches to major version 2 at height 4
    mine_blocks(&core, &wallet, 5);

    let (mut template, difficulty) = core
        .get_block_template(&wallet.spend_public, &wallet.view_public, &[])
        .unwrap();
    template.header.major_version = 1;
    template.header.timestamp = 6 * core.constants().difficulty_target;
    while !umbra_core::proof_of_work::check_proof_of_work(&template.hashing_blob(), difficulty, core.constants()) {
        template.header.nonce = template.header.nonce.wrapping_add(1);
    }
    let result = core.submit_block(template.serialized());
    assert!(matches!(
        result,
        Err(umbra_core::chain_storage::AddBlockError::WrongMajorVersion { got: 1, expected: 2 })
    ));
}

#[test]
fn tampered_reward_is_rejected() {
    let core = fresh_core();
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 2);

    let (mut template, difficulty) = core
        .get_block_template(&wallet.spend_public, &wallet.view_public, &[])
        .unwrap();
    template.header.timestamp = 3 * core.constants().difficulty_target;
    template.base_transaction.prefix.outputs[0].amount += 1;
    while !umbra_core::proof_of_work::check_proof_of_work(&template.hashing_blob(), difficulty, core.constants()) {
        template.header.nonce = template.header.nonce.wrapping_add(1);
    }
    assert!(matches!(
        core.submit_block(template.serialized()),
        Err(umbra_core::chain_storage::AddBlockError::BlockRewardMismatch)
    ));
}

#[test]
fn rewind_strips_blocks_above_the_target() {
    let core = fresh_core();
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 10);
    let hash_at_5 = core.block_hash_at(5).unwrap();
    let hash_at_9 = core.block_hash_at(9).unwrap();

    let new_top = core.rewind(5).unwrap();
    assert_eq!(new_top, 5);
    assert_eq!(core.block_hash_at(5), Some(hash_at_5));
    assert_eq!(core.block_hash_at(9), None);
    assert!(!core.has_block(&hash_at_9));

    // mining continues cleanly from the rewound tip
    assert!(matches!(mine_next_block(&core, &wallet), BlockAddResult::AddedToMain));
    let (top, _) = core.top_block();
    assert_eq!(top, 6);
}

#[test]
fn rewind_depth_is_capped() {
    let constants = umbra_core::consensus::ConsensusConstants {
        max_rewind_depth: 3,
        ..helpers::legacy_constants()
    };
    let core = helpers::fresh_core_with(constants);
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 6);
    assert!(core.rewind(1).is_err());
    assert_eq!(core.rewind(4).unwrap(), 4);
}

#[test]
fn checkpoints_pin_hashes_and_bypass_pow() {
    // first find out which hash height one will have
    let probe = fresh_core();
    let wallet = MinerWallet::random();
    mine_blocks(&probe, &wallet, 1);
    let good_hash = probe.block_hash_at(1).unwrap();
    let raw = probe.raw_block_at(1).unwrap();

    // a core pinning the right hash accepts the block
    let accepting = Core::new(helpers::legacy_constants(), Checkpoints::from_entries([(1, good_hash)]));
    assert!(matches!(accepting.add_block(raw.clone()), Ok(BlockAddResult::AddedToMain)));

    // a core pinning a different hash rejects it outright
    let rejecting = Core::new(
        helpers::legacy_constants(),
        Checkpoints::from_entries([(1, sha3(b"not this block"))]),
    );
    assert!(matches!(
        rejecting.add_block(raw),
        Err(umbra_core::chain_storage::AddBlockError::CheckpointMismatch)
    ));
}

#[test]
fn save_and_load_round_trip_the_main_chain() {
    let core = fresh_core();
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 8);
    let (top, tip_hash) = core.top_block();

    let mut storage = MemoryStorage::new();
    core.save(&mut storage).unwrap();

    let restored = Core::load(&storage, helpers::legacy_constants(), Checkpoints::new()).unwrap();
    let (restored_top, restored_hash) = restored.top_block();
    assert_eq!(restored_top, top);
    assert_eq!(restored_hash, tip_hash);

    // the restored chain keeps mining
    assert!(matches!(mine_next_block(&restored, &wallet), BlockAddResult::AddedToMain));
}

#[test]
fn genesis_differs_per_consensus_table() {
    let mainnet = genesis_block(&ConsensusConstants::mainnet());
    let test = genesis_block(&ConsensusConstants::for_tests());
    // the unlock window feeds the coinbase, so the hashes must differ
    assert_ne!(mainnet.block_hash(), test.block_hash());
}
