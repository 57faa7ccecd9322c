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

//! Process-wide generator vector caches for the range proof systems.
//!
//! Each system owns two domain-separated vectors produced by hashing its base point together
//! with the index. The caches only ever grow, under a single writer; proving and batched
//! verification share one cache so the expensive hashing happens once per process.

use std::sync::RwLock;

use curve25519_dalek::edwards::EdwardsPoint;

use crate::ed25519::hash_to_point;

pub(crate) struct GeneratorCache {
    domain_g: [u8; 32],
    domain_h: [u8; 32],
    gi: Vec<EdwardsPoint>,
    hi: Vec<EdwardsPoint>,
}

impl GeneratorCache {
    pub(crate) const fn new(domain_g: [u8; 32], domain_h: [u8; 32]) -> Self {
        GeneratorCache {
            domain_g,
            domain_h,
            gi: Vec::new(),
            hi: Vec::new(),
        }
    }
}

fn derive_generator(domain: &[u8; 32], index: u64) -> EdwardsPoint {
    let mut buf = [0u8; 40];
    buf[..32].copy_from_slice(domain);
    buf[32..].copy_from_slice(&index.to_le_bytes());
    hash_to_point(&buf)
}

/// The first `count` generators of each vector, extending the cache on demand.
pub(crate) fn generators(cache: &RwLock<GeneratorCache>, count: usize) -> (Vec<EdwardsPoint>, Vec<EdwardsPoint>) {
    {
        let cache = cache.read().expect("generator cache lock poisoned");
        if cache.gi.len() >= count {
            return (cache.gi[..count].to_vec(), cache.hi[..count].to_vec());
        }
    }

    let mut cache = cache.write().expect("generator cache lock poisoned");
    while cache.gi.len() < count {
        let index = cache.gi.len() as u64;
        let g = derive_generator(&cache.domain_g, index);
        let h = derive_generator(&cache.domain_h, index);
        cache.gi.push(g);
        cache.hi.push(h);
    }
    (cache.gi[..count].to_vec(), cache.hi[..count].to_vec())
}
