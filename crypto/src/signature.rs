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

//! Single Schnorr-like signatures over a message digest, with a prepare/complete split so
//! multisig participants can contribute partial signing scalars.

use std::io::{Read, Write};

use curve25519_dalek::scalar::Scalar;

use crate::{
    ed25519::{base_mul, random_scalar, PublicKey},
    error::CryptoError,
    hashing::Hash,
    io,
    transcript::ScalarTranscript,
};

const SIGNATURE_DOMAIN: [u8; 32] = *b"  I ATTEST THAT I HAVE THE KEY  ";

/// A two-scalar signature, 64 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub l: Scalar,
    pub r: Scalar,
}

impl Signature {
    pub const SIZE: usize = 64;

    pub fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        io::write_scalar(w, &self.l)?;
        io::write_scalar(w, &self.r)
    }

    pub fn read<R: Read>(r: &mut R) -> std::io::Result<Self> {
        Ok(Signature {
            l: io::read_scalar(r)?,
            r: io::read_scalar(r)?,
        })
    }
}

fn challenge(message_digest: &Hash, public_key: &PublicKey, point: &curve25519_dalek::edwards::EdwardsPoint) -> Scalar {
    let mut tr = ScalarTranscript::new(SIGNATURE_DOMAIN);
    tr.update(*message_digest).update(*public_key).update(*point);
    tr.challenge()
}

/// First phase: commit to a random nonce. The returned signature carries the challenge in `l`
/// and the nonce in `r`; [`complete_signature`] turns it into a verifiable signature.
pub fn prepare_signature(message_digest: &Hash, public_key: &PublicKey) -> Result<Signature, CryptoError> {
    public_key.decompress()?;

    // fold extra entropy through a transcript so a weak RNG still yields an unpredictable nonce
    let mut alpha_transcript = ScalarTranscript::new(*message_digest);
    alpha_transcript.update(*public_key).update(random_scalar());
    let alpha = alpha_transcript.challenge();

    let point = base_mul(&alpha);
    Ok(Signature {
        l: challenge(message_digest, public_key, &point),
        r: alpha,
    })
}

/// Second phase: fold the signing scalar (or the aggregated multisig partials) into the
/// prepared signature.
pub fn complete_signature(
    signing_scalar: Option<&Scalar>,
    signature: Signature,
    partial_signing_scalars: &[Scalar],
) -> Result<Signature, CryptoError> {
    let mut finalized = signature;
    match (signing_scalar, partial_signing_scalars.is_empty()) {
        (Some(secret), true) => {
            finalized.r -= signature.l * secret;
        },
        (_, false) => {
            let mut scalars = partial_signing_scalars.to_vec();
            if let Some(secret) = signing_scalar {
                scalars.push(generate_partial_signing_scalar(&signature, secret));
            }
            scalars.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
            scalars.dedup();
            let derived: Scalar = scalars.iter().sum();
            finalized.r -= derived;
        },
        (None, true) => return Err(CryptoError::EmptyInput),
    }
    Ok(finalized)
}

/// A participant's contribution: s.L * spend_secret.
pub fn generate_partial_signing_scalar(signature: &Signature, spend_secret_key: &Scalar) -> Scalar {
    signature.l * spend_secret_key
}

/// One-shot signing with a full secret key.
pub fn generate_signature(message_digest: &Hash, secret_key: &Scalar) -> Result<Signature, CryptoError> {
    let public_key = crate::stealth::secret_key_to_public_key(secret_key);
    let prepared = prepare_signature(message_digest, &public_key)?;
    complete_signature(Some(secret_key), prepared, &[])
}

/// Recompute the challenge from `sig.L * A + sig.R * G` and compare.
pub fn check_signature(message_digest: &Hash, public_key: &PublicKey, signature: &Signature) -> bool {
    let point = match public_key.decompress() {
        Ok(p) => signature.l * p + base_mul(&signature.r),
        Err(_) => return false,
    };
    challenge(message_digest, public_key, &point) == signature.l
}
