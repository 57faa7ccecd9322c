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

//! The legacy ring signature over one-time output keys. Proves knowledge of the secret for
//! exactly one ring member without revealing which, with the key image binding the spend.

use curve25519_dalek::scalar::Scalar;

use crate::{
    ed25519::{base_mul, hash_to_point, random_scalar, KeyImage, PublicKey},
    error::CryptoError,
    hashing::Hash,
    signature::Signature,
    stealth::{generate_key_image, secret_key_to_public_key},
    transcript::ScalarTranscript,
};

const BORROMEAN_DOMAIN: [u8; 32] = *b"within is the spend of a friend ";

/// Attempts at drawing a usable (non-zero) nonce before giving up.
const MAX_PREPARE_ATTEMPTS: usize = 32;

/// Verify a ring signature: reconstruct every (L, R) pair from the published scalars and
/// accept when the transcript challenge equals the sum of the L scalars.
pub fn check_ring_signature(
    message_digest: &Hash,
    key_image: &KeyImage,
    public_keys: &[PublicKey],
    signature: &[Signature],
) -> bool {
    if signature.len() != public_keys.len() || public_keys.is_empty() {
        return false;
    }
    let image = match key_image.decompress_subgroup() {
        Ok(image) => image,
        Err(_) => return false,
    };

    let mut sum = Scalar::ZERO;
    let mut transcript = ScalarTranscript::new(BORROMEAN_DOMAIN);
    transcript.update(*message_digest);

    for (key, sig) in public_keys.iter().zip(signature.iter()) {
        let point = match key.decompress() {
            Ok(point) => point,
            Err(_) => return false,
        };
        let hp = hash_to_point(key.as_bytes());

        let l = sig.l * point + base_mul(&sig.r);
        let r = sig.r * hp + sig.l * image;

        sum += sig.l;
        transcript.update(l).update(r);
    }

    transcript.challenge() == sum
}

/// Build the ring with random scalars everywhere except the real index, whose L slot absorbs
/// the challenge and whose R slot carries the nonce until [`complete_ring_signature`].
pub fn prepare_ring_signature(
    message_digest: &Hash,
    key_image: &KeyImage,
    public_keys: &[PublicKey],
    real_output_index: usize,
) -> Result<Vec<Signature>, CryptoError> {
    let ring_size = public_keys.len();
    if real_output_index >= ring_size {
        return Err(CryptoError::IndexOutOfRange);
    }
    let image = key_image.decompress_subgroup()?;

    for _ in 0..MAX_PREPARE_ATTEMPTS {
        // extra entropy folded through a transcript hardens the nonce against a weak RNG
        let mut alpha_transcript = ScalarTranscript::new(*message_digest);
        alpha_transcript.update(*key_image).update(random_scalar());
        alpha_transcript.update_each(public_keys);
        let alpha = alpha_transcript.challenge();

        // a zero nonce would leak the real signing key
        if alpha == Scalar::ZERO {
            continue;
        }

        let mut signature = vec![
            Signature {
                l: Scalar::ZERO,
                r: Scalar::ZERO
            };
            ring_size
        ];
        let mut sum = Scalar::ZERO;
        let mut transcript = ScalarTranscript::new(BORROMEAN_DOMAIN);
        transcript.update(*message_digest);

        for (i, key) in public_keys.iter().enumerate() {
            let point = key.decompress()?;
            let hp = hash_to_point(key.as_bytes());

            let (l, r) = if i == real_output_index {
                (base_mul(&alpha), alpha * hp)
            } else {
                signature[i] = Signature {
                    l: random_scalar(),
                    r: random_scalar(),
                };
                sum += signature[i].l;
                (
                    signature[i].l * point + base_mul(&signature[i].r),
                    signature[i].r * hp + signature[i].l * image,
                )
            };
            transcript.update(l).update(r);
        }

        signature[real_output_index].l = transcript.challenge() - sum;
        signature[real_output_index].r = alpha;
        return Ok(signature);
    }
    Err(CryptoError::RandomnessExhausted)
}

/// Fold the signing scalar, or the aggregated multisig partials, into the prepared ring.
pub fn complete_ring_signature(
    signing_scalar: Option<&Scalar>,
    real_output_index: usize,
    signature: &[Signature],
    partial_signing_scalars: &[Scalar],
) -> Result<Vec<Signature>, CryptoError> {
    if signature.is_empty() || real_output_index >= signature.len() {
        return Err(CryptoError::IndexOutOfRange);
    }

    let mut finalized = signature.to_vec();
    match (signing_scalar, partial_signing_scalars.is_empty()) {
        (Some(secret), true) => {
            finalized[real_output_index].r -= secret * signature[real_output_index].l;
        },
        (_, false) => {
            let mut scalars = partial_signing_scalars.to_vec();
            if let Some(secret) = signing_scalar {
                scalars.push(generate_partial_signing_scalar(real_output_index, signature, secret)?);
            }
            scalars.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
            scalars.dedup();
            let derived: Scalar = scalars.iter().sum();
            finalized[real_output_index].r -= derived;
        },
        (None, true) => return Err(CryptoError::EmptyInput),
    }
    Ok(finalized)
}

/// A participant's contribution: s[real].L * spend_secret.
pub fn generate_partial_signing_scalar(
    real_output_index: usize,
    signature: &[Signature],
    spend_secret_key: &Scalar,
) -> Result<Scalar, CryptoError> {
    if signature.is_empty() || real_output_index >= signature.len() {
        return Err(CryptoError::IndexOutOfRange);
    }
    Ok(signature[real_output_index].l * spend_secret_key)
}

/// One-shot signing: locate the real key in the ring, derive the key image, prepare and
/// complete.
pub fn generate_ring_signature(
    message_digest: &Hash,
    secret_ephemeral: &Scalar,
    public_keys: &[PublicKey],
) -> Result<(KeyImage, Vec<Signature>), CryptoError> {
    let public_ephemeral = secret_key_to_public_key(secret_ephemeral);
    let real_output_index = public_keys
        .iter()
        .position(|key| *key == public_ephemeral)
        .ok_or(CryptoError::KeyNotInRing)?;

    let key_image = generate_key_image(&public_ephemeral, secret_ephemeral)?;
    let prepared = prepare_ring_signature(message_digest, &key_image, public_keys, real_output_index)?;
    let signature = complete_ring_signature(Some(secret_ephemeral), real_output_index, &prepared, &[])?;
    Ok((key_image, signature))
}
