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

//! Fixed-height hash gates. Blocks inside the checkpoint range bypass proof of work but not
//! shape validation; a hash mismatch is fatal for the block.

use std::{collections::BTreeMap, fs, path::Path};

use log::info;
use thiserror::Error;
use umbra_crypto::Hash;

const LOG_TARGET: &str = "c::consensus::checkpoints";

#[derive(Debug, Error)]
pub enum CheckpointsError {
    #[error("Failed to read the checkpoint file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse the checkpoint file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Checkpoint at height {height} is not a valid hash")]
    InvalidHash { height: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct Checkpoints {
    points: BTreeMap<u32, Hash>,
}

impl Checkpoints {
    pub fn new() -> Self {
        Checkpoints::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (u32, Hash)>) -> Self {
        Checkpoints {
            points: entries.into_iter().collect(),
        }
    }

    /// Load a `{"height": "hash-hex"}` table produced by the release tooling.
    pub fn load(path: &Path) -> Result<Self, CheckpointsError> {
        let raw = fs::read_to_string(path)?;
        let table: BTreeMap<u32, String> = serde_json::from_str(&raw)?;
        let mut points = BTreeMap::new();
        for (height, hex) in table {
            let hash = Hash::from_hex(&hex).map_err(|_| CheckpointsError::InvalidHash { height })?;
            points.insert(height, hash);
        }
        info!(target: LOG_TARGET, "Loaded {} checkpoints", points.len());
        Ok(Checkpoints { points })
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The highest pinned height, if any.
    pub fn last_checkpoint_height(&self) -> Option<u32> {
        self.points.keys().next_back().copied()
    }

    pub fn is_in_checkpoint_zone(&self, height: u32) -> bool {
        self.last_checkpoint_height().map(|last| height <= last).unwrap_or(false)
    }

    /// True when the height is outside the table or the stored hash matches.
    pub fn check_block(&self, height: u32, hash: &Hash) -> bool {
        match self.points.get(&height) {
            Some(pinned) => pinned == hash,
            None => true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use umbra_crypto::hashing::sha3;

    #[test]
    fn hashes_inside_the_table_are_enforced() {
        let pinned = sha3(b"pinned");
        let checkpoints = Checkpoints::from_entries([(10, pinned)]);
        assert!(checkpoints.check_block(10, &pinned));
        assert!(!checkpoints.check_block(10, &sha3(b"other")));
        // heights without a pin always pass
        assert!(checkpoints.check_block(11, &sha3(b"other")));
    }

    #[test]
    fn checkpoint_zone_covers_up_to_the_last_pin() {
        let checkpoints = Checkpoints::from_entries([(5, sha3(b"a")), (20, sha3(b"b"))]);
        assert!(checkpoints.is_in_checkpoint_zone(0));
        assert!(checkpoints.is_in_checkpoint_zone(20));
        assert!(!checkpoints.is_in_checkpoint_zone(21));
        assert!(!Checkpoints::new().is_in_checkpoint_zone(0));
    }

    #[test]
    fn load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");
        let hash = sha3(b"block");
        std::fs::write(&path, format!("{{\"42\": \"{}\"}}", hash.to_hex())).unwrap();
        let checkpoints = Checkpoints::load(&path).unwrap();
        assert!(checkpoints.check_block(42, &hash));
        assert_eq!(checkpoints.last_checkpoint_height(), Some(42));
    }
}
