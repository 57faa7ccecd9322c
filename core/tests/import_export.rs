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

use helpers::{build_legacy_spend, coinbase_output, fresh_core, mine_blocks, mine_next_block, MinerWallet};
use umbra_core::chain_storage::{export_blocks, import_blocks, ImportExportError};

#[test]
fn export_then_import_reproduces_the_chain() {
    let core = fresh_core();
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 6);

    // include a real transaction so bodies travel through the file too
    let source = coinbase_output(&core, &wallet, 1);
    let tx = build_legacy_spend(&source, 5, None);
    let tx_hash = *tx.hash();
    core.handle_incoming_transaction(tx.raw().to_vec()).unwrap();
    mine_next_block(&core, &wallet);
    let (top, tip_hash) = core.top_block();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blocks.dat");
    let exported = export_blocks(&core, &path, 4).unwrap();
    assert_eq!(exported, u64::from(top));

    // full validation replay
    let restored = fresh_core();
    let imported = import_blocks(&restored, &path, true).unwrap();
    assert_eq!(imported, u64::from(top));
    assert_eq!(restored.top_block(), (top, tip_hash));
    assert!(restored.has_transaction(&tx_hash));

    // trusted fast path replay skips the expensive checks but lands on the same tip
    let fast = fresh_core();
    let imported = import_blocks(&fast, &path, false).unwrap();
    assert_eq!(imported, u64::from(top));
    assert_eq!(fast.top_block(), (top, tip_hash));
}

#[test]
fn empty_chain_exports_nothing() {
    let core = fresh_core();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blocks.dat");
    assert_eq!(export_blocks(&core, &path, 2).unwrap(), 0);
    assert_eq!(import_blocks(&fresh_core(), &path, true).unwrap(), 0);
}

#[test]
fn non_monotonic_records_are_rejected() {
    let core = fresh_core();
    let wallet = MinerWallet::random();
    mine_blocks(&core, &wallet, 3);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blocks.dat");
    export_blocks(&core, &path, 1).unwrap();

    // duplicate the file contents: heights restart at 1 on the second copy
    let mut contents = std::fs::read(&path).unwrap();
    let copy = contents.clone();
    contents.extend_from_slice(&copy);
    std::fs::write(&path, contents).unwrap();

    let restored = fresh_core();
    assert!(matches!(
        import_blocks(&restored, &path, true),
        Err(ImportExportError::NonMonotonicHeight(1))
    ));
}

#[test]
fn garbage_files_fail_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blocks.dat");
    std::fs::write(&path, b"not a block file").unwrap();
    assert!(import_blocks(&fresh_core(), &path, true).is_err());
}
