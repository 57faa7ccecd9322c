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

//! A deterministic scalar accumulator for Fiat-Shamir challenges.
//!
//! The state is a single 32-byte value seeded with a fixed domain tag. Every update folds one
//! 32-byte item through hash-to-scalar; the same update sequence always yields the same
//! challenge. Callers that consume a challenge as a divisor or exponent must reject ZERO and
//! restart with fresh randomness.

use curve25519_dalek::{edwards::EdwardsPoint, scalar::Scalar};

use crate::{
    ed25519::{hash_to_scalar, CompressedPoint},
    hashing::Hash,
};

const TRANSCRIPT_BASE: [u8; 32] = *b"    umbra scalar transcript     ";

/// Anything that folds into a transcript as a 32-byte item.
pub trait TranscriptItem {
    fn transcript_bytes(&self) -> [u8; 32];
}

impl TranscriptItem for Scalar {
    fn transcript_bytes(&self) -> [u8; 32] {
        self.to_bytes()
    }
}

impl TranscriptItem for EdwardsPoint {
    fn transcript_bytes(&self) -> [u8; 32] {
        self.compress().to_bytes()
    }
}

impl TranscriptItem for CompressedPoint {
    fn transcript_bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl TranscriptItem for Hash {
    fn transcript_bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl TranscriptItem for [u8; 32] {
    fn transcript_bytes(&self) -> [u8; 32] {
        *self
    }
}

#[derive(Clone)]
pub struct ScalarTranscript {
    state: [u8; 32],
}

impl Default for ScalarTranscript {
    fn default() -> Self {
        ScalarTranscript { state: TRANSCRIPT_BASE }
    }
}

impl ScalarTranscript {
    /// A transcript seeded with a 32-byte domain separator.
    pub fn new(domain: impl TranscriptItem) -> Self {
        let mut tr = ScalarTranscript::default();
        tr.update(domain);
        tr
    }

    /// Fold one item into the state.
    pub fn update(&mut self, item: impl TranscriptItem) -> &mut Self {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&self.state);
        buf[32..].copy_from_slice(&item.transcript_bytes());
        self.state = hash_to_scalar(&buf).to_bytes();
        self
    }

    /// Fold a homogeneous sequence, element by element.
    pub fn update_each<T: TranscriptItem>(&mut self, items: &[T]) -> &mut Self {
        for item in items {
            self.update(item.transcript_bytes());
        }
        self
    }

    /// The accumulated state as a scalar.
    pub fn challenge(&self) -> Scalar {
        Scalar::from_bytes_mod_order(self.state)
    }

    pub fn reset(&mut self) {
        self.state = TRANSCRIPT_BASE;
    }
}

#[cfg(test)]
mod test {
    use curve25519_dalek::scalar::Scalar;

    use super::*;
    use crate::ed25519::random_scalar;

    #[test]
    fn identical_sequences_yield_identical_challenges() {
        let items = [random_scalar(), random_scalar(), random_scalar()];
        let mut a = ScalarTranscript::default();
        let mut b = ScalarTranscript::default();
        a.update_each(&items);
        b.update_each(&items);
        assert_eq!(a.challenge(), b.challenge());
    }

    #[test]
    fn order_matters() {
        let (x, y) = (random_scalar(), random_scalar());
        let mut a = ScalarTranscript::default();
        a.update(x).update(y);
        let mut b = ScalarTranscript::default();
        b.update(y).update(x);
        assert_ne!(a.challenge(), b.challenge());
    }

    #[test]
    fn clone_forks_the_state() {
        let mut tr = ScalarTranscript::new(random_scalar());
        let mut fork = tr.clone();
        assert_eq!(tr.challenge(), fork.challenge());
        fork.update(Scalar::ONE);
        assert_ne!(tr.challenge(), fork.challenge());
        tr.update(Scalar::ONE);
        assert_eq!(tr.challenge(), fork.challenge());
    }

    #[test]
    fn reset_restores_the_base_state() {
        let mut tr = ScalarTranscript::default();
        let base = tr.challenge();
        tr.update(random_scalar());
        tr.reset();
        assert_eq!(tr.challenge(), base);
    }
}
