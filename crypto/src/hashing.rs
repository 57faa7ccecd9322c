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

//! SHA3-256 digests, the iterated slow hash used for proof of work, and the merkle tree routines
//! block hashing commits to.

use std::{
    fmt,
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Sha3_256};

/// A 32-byte SHA3-256 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const SIZE: usize = 32;

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Hash(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash::from_hex(s)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(de::Error::custom)
    }
}

/// SHA3-256 of the input.
pub fn sha3(data: &[u8]) -> Hash {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    Hash(hasher.finalize().into())
}

/// SHA3-256 over a sequence of byte slices, hashed as one message.
pub fn sha3_chain(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha3_256::new();
    for part in parts {
        hasher.update(part);
    }
    Hash(hasher.finalize().into())
}

/// Iterated SHA3 key stretching. Each round re-hashes the running digest together with the
/// little-endian round counter so the rounds cannot be collapsed or precomputed.
pub fn sha3_slow_hash(data: &[u8], iterations: u64) -> Hash {
    let mut result = sha3(data);
    let mut buffer = [0u8; 40];
    for i in 0..iterations {
        buffer[..32].copy_from_slice(&result.0);
        buffer[32..].copy_from_slice(&i.to_le_bytes());
        result = sha3(&buffer);
    }
    result
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    sha3_chain(&[&left.0, &right.0])
}

/// Depth of the merkle tree over `count` leaves: the largest d with 2^d <= count.
pub fn tree_depth(count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    (usize::BITS - 1 - count.leading_zeros()) as usize
}

/// Merkle root over the given leaf digests.
///
/// Trees over a non-power-of-two leaf count keep a perfect left portion and pair the excess
/// leaves on the right first, matching the layout `tree_branch` produces.
pub fn tree_hash(hashes: &[Hash]) -> Hash {
    match hashes.len() {
        0 => Hash::default(),
        1 => hashes[0],
        2 => hash_pair(&hashes[0], &hashes[1]),
        count => {
            // cnt = largest power of two <= count
            let cnt = 1usize << tree_depth(count);
            let rounds = 2 * cnt - count;

            let mut temp: Vec<Hash> = hashes[..cnt].to_vec();
            let mut j = rounds;
            let mut i = rounds;
            while j < cnt {
                temp[j] = hash_pair(&hashes[i], &hashes[i + 1]);
                i += 2;
                j += 1;
            }

            let mut cnt = cnt;
            while cnt > 2 {
                cnt /= 2;
                for j in 0..cnt {
                    temp[j] = hash_pair(&temp[2 * j], &temp[2 * j + 1]);
                }
            }
            hash_pair(&temp[0], &temp[1])
        },
    }
}

/// The per-level sibling digests proving the first leaf's membership, root-most first.
pub fn tree_branch(hashes: &[Hash]) -> Vec<Hash> {
    let count = hashes.len();
    if count < 2 {
        return Vec::new();
    }

    let depth = tree_depth(count);
    let cnt = 1usize << depth;
    let rounds = 2 * cnt - count;

    let mut row: Vec<Hash> = hashes[..cnt].to_vec();
    let mut j = rounds;
    let mut i = rounds;
    while j < cnt {
        row[j] = hash_pair(&hashes[i], &hashes[i + 1]);
        i += 2;
        j += 1;
    }

    // branches[0] is the root-most sibling, branches[depth - 1] the leaf-most
    let mut branches = vec![Hash::default(); depth];
    let mut level = depth;
    while row.len() > 1 {
        level -= 1;
        branches[level] = row[1];
        let mut next = Vec::with_capacity(row.len() / 2);
        for k in 0..row.len() / 2 {
            next.push(hash_pair(&row[2 * k], &row[2 * k + 1]));
        }
        row = next;
    }
    branches
}

/// Recompute a merkle root from the first leaf and its branch, as produced by [`tree_branch`].
pub fn tree_hash_from_branch(branch: &[Hash], leaf: &Hash) -> Hash {
    let mut current = *leaf;
    for sibling in branch.iter().rev() {
        current = hash_pair(&current, sibling);
    }
    current
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_input_digest_is_fixed() {
        // the SHA3-256 digest of the empty string
        assert_eq!(
            sha3(b"").to_hex(),
            "a7ffc6f8bf1ed76651c14756a061d662f580ff4de43b49fa82d80a4b80f8434a"
        );
    }

    #[test]
    fn slow_hash_vectors() {
        let input = Hash::from_hex("cfc765d905c65e2b61816dc1f0fd69f6f6779f36ed6239ac7e21ff51ef2c891e").unwrap();
        assert_eq!(
            sha3_slow_hash(&input.0, 0).to_hex(),
            sha3(&input.0).to_hex(),
            "zero iterations must reduce to a plain digest"
        );
        assert_eq!(
            sha3_slow_hash(&input.0, 4096).to_hex(),
            "c031be420e429992443c33c2a453287e2678e70b8bce95dfe7357bcbf36ca86c"
        );
    }

    #[test]
    fn slow_hash_differs_per_iteration_count() {
        assert_ne!(sha3_slow_hash(b"umbra", 1), sha3_slow_hash(b"umbra", 2));
    }

    #[test]
    fn tree_hash_small_cases() {
        let leaves: Vec<Hash> = (0u8..8).map(|i| sha3(&[i])).collect();
        assert_eq!(tree_hash(&leaves[..1]), leaves[0]);
        assert_eq!(tree_hash(&leaves[..2]), hash_pair(&leaves[0], &leaves[1]));

        let left = hash_pair(&leaves[0], &leaves[1]);
        let right = hash_pair(&leaves[2], &leaves[3]);
        assert_eq!(tree_hash(&leaves[..4]), hash_pair(&left, &right));
    }

    #[test]
    fn tree_hash_odd_count_pairs_the_tail() {
        // with 3 leaves only the right pair collapses first
        let leaves: Vec<Hash> = (0u8..3).map(|i| sha3(&[i])).collect();
        let right = hash_pair(&leaves[1], &leaves[2]);
        assert_eq!(tree_hash(&leaves), hash_pair(&leaves[0], &right));
    }

    #[test]
    fn tree_branch_recovers_root() {
        for count in [2usize, 4, 8, 16] {
            let leaves: Vec<Hash> = (0..count as u8).map(|i| sha3(&[i])).collect();
            let branch = tree_branch(&leaves);
            assert_eq!(branch.len(), tree_depth(count));
            assert_eq!(tree_hash_from_branch(&branch, &leaves[0]), tree_hash(&leaves));
        }
    }
}
