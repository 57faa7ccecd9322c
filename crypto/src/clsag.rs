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

//! Compact linkable spontaneous anonymous group signatures.
//!
//! Spends a one-time output inside a ring and, when commitments are supplied, jointly proves
//! that the input's Pedersen commitment and the freshly generated pseudo-output commitment
//! hide the same amount: the signer knows z, the delta between the two blinding scalars, and
//! signs for the auxiliary point `C[i] - C_pseudo` under a second mixing scalar.

use std::io::{Read, Write};

use curve25519_dalek::{edwards::EdwardsPoint, scalar::Scalar};
use once_cell::sync::Lazy;

use crate::{
    ed25519::{base_mul, hash_to_point, hash_to_scalar, random_scalar, random_scalars, Commitment, KeyImage, PublicKey},
    error::CryptoError,
    hashing::Hash,
    io,
    stealth::{generate_key_image, secret_key_to_public_key},
    transcript::ScalarTranscript,
};

// Separate hash domains keep the mixing scalars and the round challenges from colliding.
const CLSAG_DOMAIN_0: [u8; 32] = *b"          Don't Panic.          ";

static CLSAG_DOMAIN_1: Lazy<[u8; 32]> = Lazy::new(|| hash_to_scalar(&CLSAG_DOMAIN_0).to_bytes());

static CLSAG_DOMAIN_2: Lazy<[u8; 32]> = Lazy::new(|| hash_to_scalar(&*CLSAG_DOMAIN_1).to_bytes());

const MAX_PREPARE_ATTEMPTS: usize = 32;

/// A CLSAG signature: one scalar per ring member, the closing challenge, and the commitment
/// key image when the signature is commitment-aware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClsagSignature {
    pub scalars: Vec<Scalar>,
    pub challenge: Scalar,
    pub commitment_image: Option<KeyImage>,
}

impl ClsagSignature {
    pub fn ring_size(&self) -> usize {
        self.scalars.len()
    }

    pub fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        io::write_varint(w, self.scalars.len() as u64)?;
        for scalar in &self.scalars {
            io::write_scalar(w, scalar)?;
        }
        io::write_scalar(w, &self.challenge)?;
        io::write_bool(w, self.commitment_image.is_some())?;
        if let Some(image) = &self.commitment_image {
            io::write_point(w, image)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let count = io::read_length(r)?;
        let mut scalars = Vec::with_capacity(count);
        for _ in 0..count {
            scalars.push(io::read_scalar(r)?);
        }
        let challenge = io::read_scalar(r)?;
        let commitment_image = if io::read_bool(r)? {
            Some(io::read_point(r)?)
        } else {
            None
        };
        Ok(ClsagSignature {
            scalars,
            challenge,
            commitment_image,
        })
    }
}

/// The output of [`prepare_ring_signature`], waiting for the signing scalar.
#[derive(Debug, Clone)]
pub struct PreparedClsag {
    pub signature: ClsagSignature,
    pub h: Vec<Scalar>,
    pub mu_p: Scalar,
    pub real_output_index: usize,
}

struct RingContext {
    keys: Vec<EdwardsPoint>,
    key_points: Vec<EdwardsPoint>,
    image: EdwardsPoint,
    // present only for commitment-aware signatures
    offsets: Option<Vec<EdwardsPoint>>,
    commitment_image: Option<EdwardsPoint>,
}

impl RingContext {
    fn build(
        key_image: &KeyImage,
        public_keys: &[PublicKey],
        commitments: &[Commitment],
        pseudo_commitment: Option<&Commitment>,
        commitment_image: Option<&KeyImage>,
    ) -> Result<Self, CryptoError> {
        let image = key_image.decompress_subgroup()?;

        let keys = public_keys
            .iter()
            .map(|key| key.decompress())
            .collect::<Result<Vec<_>, _>>()?;
        let key_points = public_keys
            .iter()
            .map(|key| hash_to_point(key.as_bytes()))
            .collect();

        let (offsets, commitment_image) = match (pseudo_commitment, commitment_image) {
            (Some(pseudo), Some(commitment_image)) if commitments.len() == public_keys.len() => {
                let pseudo = pseudo.decompress()?;
                let offsets = commitments
                    .iter()
                    .map(|c| c.decompress().map(|point| point - pseudo))
                    .collect::<Result<Vec<_>, _>>()?;
                (Some(offsets), Some(commitment_image.decompress_subgroup()?))
            },
            _ => (None, None),
        };

        Ok(RingContext {
            keys,
            key_points,
            image,
            offsets,
            commitment_image,
        })
    }

    fn use_commitments(&self) -> bool {
        self.offsets.is_some()
    }

    fn round(&self, i: usize, h_i: &Scalar, s_i: &Scalar, mu_p: &Scalar, mu_c: &Scalar) -> (EdwardsPoint, EdwardsPoint) {
        let r = h_i * mu_p;
        let mut l = r * self.keys[i] + base_mul(s_i);
        let mut right = s_i * self.key_points[i] + r * self.image;
        if let (Some(offsets), Some(commitment_image)) = (&self.offsets, &self.commitment_image) {
            let r2 = h_i * mu_c;
            l += r2 * offsets[i];
            right += r2 * commitment_image;
        }
        (l, right)
    }
}

fn mixing_scalar(
    domain: [u8; 32],
    key_image: &KeyImage,
    public_keys: &[PublicKey],
    commitment_image: Option<&KeyImage>,
    commitments: &[Commitment],
    pseudo_commitment: Option<&Commitment>,
) -> Scalar {
    let mut tr = ScalarTranscript::new(domain);
    tr.update(*key_image);
    tr.update_each(public_keys);
    if let (Some(commitment_image), Some(pseudo)) = (commitment_image, pseudo_commitment) {
        tr.update(*commitment_image);
        tr.update_each(commitments);
        tr.update(*pseudo);
    }
    tr.challenge()
}

fn round_transcript(
    message_digest: &Hash,
    public_keys: &[PublicKey],
    use_commitments: bool,
    commitments: &[Commitment],
    pseudo_commitment: Option<&Commitment>,
) -> ScalarTranscript {
    let mut tr = ScalarTranscript::new(*CLSAG_DOMAIN_1);
    tr.update(*message_digest);
    tr.update_each(public_keys);
    if use_commitments {
        tr.update_each(commitments);
        if let Some(pseudo) = pseudo_commitment {
            tr.update(*pseudo);
        }
    }
    tr
}

/// Verify a CLSAG: rebuild the h chain from the stored challenge and accept when it closes.
pub fn check_ring_signature(
    message_digest: &Hash,
    key_image: &KeyImage,
    public_keys: &[PublicKey],
    signature: &ClsagSignature,
    commitments: &[Commitment],
    pseudo_commitment: Option<&Commitment>,
) -> bool {
    let ring_size = public_keys.len();
    if ring_size == 0 || signature.scalars.len() < ring_size {
        return false;
    }

    let ctx = match RingContext::build(
        key_image,
        public_keys,
        commitments,
        pseudo_commitment,
        signature.commitment_image.as_ref(),
    ) {
        Ok(ctx) => ctx,
        Err(_) => return false,
    };

    let mu_p = mixing_scalar(
        CLSAG_DOMAIN_0,
        key_image,
        public_keys,
        if ctx.use_commitments() { signature.commitment_image.as_ref() } else { None },
        commitments,
        if ctx.use_commitments() { pseudo_commitment } else { None },
    );
    let mu_c = if ctx.use_commitments() {
        mixing_scalar(
            *CLSAG_DOMAIN_2,
            key_image,
            public_keys,
            signature.commitment_image.as_ref(),
            commitments,
            pseudo_commitment,
        )
    } else {
        Scalar::ZERO
    };

    let base = round_transcript(
        message_digest,
        public_keys,
        ctx.use_commitments(),
        commitments,
        pseudo_commitment,
    );

    let h0 = signature.challenge;
    let mut h = vec![Scalar::ZERO; ring_size];
    for i in 0..ring_size {
        let h_i = if i == 0 { h0 } else { h[i] };
        let (l, r) = ctx.round(i, &h_i, &signature.scalars[i], &mu_p, &mu_c);
        let mut sub = base.clone();
        sub.update(l).update(r);
        h[(i + 1) % ring_size] = sub.challenge();
    }

    h[0] == h0
}

/// Build the h chain around the real index with a committed nonce; the real scalar slot holds
/// the nonce (minus the commitment term when commitment-aware) until
/// [`complete_ring_signature`] folds in the signing scalar.
pub fn prepare_ring_signature(
    message_digest: &Hash,
    key_image: &KeyImage,
    public_keys: &[PublicKey],
    real_output_index: usize,
    input_blinding_factor: Option<&Scalar>,
    commitments: &[Commitment],
    pseudo_blinding_factor: Option<&Scalar>,
    pseudo_commitment: Option<&Commitment>,
) -> Result<PreparedClsag, CryptoError> {
    let ring_size = public_keys.len();
    if real_output_index >= ring_size {
        return Err(CryptoError::IndexOutOfRange);
    }
    key_image.decompress_subgroup()?;

    let use_commitments = matches!(
        (input_blinding_factor, pseudo_blinding_factor, pseudo_commitment),
        (Some(_), Some(_), Some(_))
    ) && commitments.len() == ring_size;

    // z is the delta between the input blinding scalar and the pseudo blinding scalar; it is
    // the secret for the offset point C[real] - C_pseudo
    let (z, commitment_image) = if use_commitments {
        let z = input_blinding_factor.unwrap_or(&Scalar::ZERO) - pseudo_blinding_factor.unwrap_or(&Scalar::ZERO);
        let offset = commitments[real_output_index].decompress()?
            - pseudo_commitment.ok_or(CryptoError::EmptyInput)?.decompress()?;
        if offset != base_mul(&z) {
            return Err(CryptoError::CommitmentMismatch);
        }
        let commitment_image = generate_key_image(&public_keys[real_output_index], &z)?;
        (z, Some(commitment_image))
    } else {
        (Scalar::ZERO, None)
    };

    let ctx = RingContext::build(
        key_image,
        public_keys,
        commitments,
        if use_commitments { pseudo_commitment } else { None },
        commitment_image.as_ref(),
    )?;

    let mu_p = mixing_scalar(
        CLSAG_DOMAIN_0,
        key_image,
        public_keys,
        commitment_image.as_ref(),
        commitments,
        if use_commitments { pseudo_commitment } else { None },
    );
    let mu_c = if use_commitments {
        mixing_scalar(
            *CLSAG_DOMAIN_2,
            key_image,
            public_keys,
            commitment_image.as_ref(),
            commitments,
            pseudo_commitment,
        )
    } else {
        Scalar::ZERO
    };

    let base = round_transcript(
        message_digest,
        public_keys,
        use_commitments,
        commitments,
        if use_commitments { pseudo_commitment } else { None },
    );

    for _ in 0..MAX_PREPARE_ATTEMPTS {
        let mut alpha_transcript = ScalarTranscript::new(*message_digest);
        alpha_transcript.update(*key_image).update(random_scalar());
        if let (Some(input), Some(pseudo_b), Some(pseudo_c)) =
            (input_blinding_factor, pseudo_blinding_factor, pseudo_commitment)
        {
            alpha_transcript.update(*input).update(*pseudo_b).update(*pseudo_c);
        }
        alpha_transcript.update_each(commitments);
        let alpha = alpha_transcript.challenge();
        if alpha == Scalar::ZERO {
            continue;
        }

        let mut scalars = random_scalars(ring_size);
        let mut h = vec![Scalar::ZERO; ring_size];

        // the real round commits to the nonce only
        {
            let l = base_mul(&alpha);
            let r = alpha * ctx.key_points[real_output_index];
            let mut sub = base.clone();
            sub.update(l).update(r);
            h[(real_output_index + 1) % ring_size] = sub.challenge();
        }

        for i in (real_output_index + 1)..(real_output_index + ring_size) {
            let idx = i % ring_size;
            let (l, r) = ctx.round(idx, &h[idx], &scalars[idx], &mu_p, &mu_c);
            let mut sub = base.clone();
            sub.update(l).update(r);
            h[(idx + 1) % ring_size] = sub.challenge();
        }

        scalars[real_output_index] = alpha;
        if use_commitments {
            scalars[real_output_index] -= h[real_output_index] * z * mu_c;
        }

        let signature = ClsagSignature {
            scalars,
            challenge: h[0],
            commitment_image,
        };
        return Ok(PreparedClsag {
            signature,
            h,
            mu_p,
            real_output_index,
        });
    }
    Err(CryptoError::RandomnessExhausted)
}

/// s_real = alpha - h_real * (p * mu_P [+ z * mu_C]); the commitment term was already folded
/// in by prepare, so completion only subtracts the key term.
pub fn complete_ring_signature(
    signing_scalar: &Scalar,
    prepared: &PreparedClsag,
    partial_signing_scalars: &[Scalar],
) -> Result<ClsagSignature, CryptoError> {
    let real = prepared.real_output_index;
    if prepared.signature.scalars.is_empty()
        || real >= prepared.signature.scalars.len()
        || prepared.h.len() != prepared.signature.scalars.len()
    {
        return Err(CryptoError::SizeMismatch);
    }

    let mut finalized = prepared.signature.clone();
    if partial_signing_scalars.is_empty() {
        finalized.scalars[real] -= prepared.h[real] * signing_scalar * prepared.mu_p;
    } else {
        let mut scalars = partial_signing_scalars.to_vec();
        scalars.push(generate_partial_signing_scalar(&prepared.mu_p, signing_scalar));
        scalars.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
        scalars.dedup();
        let derived: Scalar = scalars.iter().sum();
        finalized.scalars[real] -= prepared.h[real] * derived;
    }
    Ok(finalized)
}

/// A participant's contribution: mu_P * spend_secret.
pub fn generate_partial_signing_scalar(mu_p: &Scalar, spend_secret_key: &Scalar) -> Scalar {
    mu_p * spend_secret_key
}

/// One-shot signing. Locates the real index, requiring the commitment offset to match when
/// commitment-aware, and returns the key image alongside the signature.
pub fn generate_ring_signature(
    message_digest: &Hash,
    secret_ephemeral: &Scalar,
    public_keys: &[PublicKey],
    input_blinding_factor: Option<&Scalar>,
    commitments: &[Commitment],
    pseudo_blinding_factor: Option<&Scalar>,
    pseudo_commitment: Option<&Commitment>,
) -> Result<(KeyImage, ClsagSignature), CryptoError> {
    let public_ephemeral = secret_key_to_public_key(secret_ephemeral);

    let use_commitments = matches!(
        (input_blinding_factor, pseudo_blinding_factor, pseudo_commitment),
        (Some(_), Some(_), Some(_))
    ) && commitments.len() == public_keys.len();

    let real_output_index = if use_commitments {
        let z = input_blinding_factor.unwrap_or(&Scalar::ZERO) - pseudo_blinding_factor.unwrap_or(&Scalar::ZERO);
        let expected_offset = base_mul(&z);
        let pseudo = pseudo_commitment.ok_or(CryptoError::EmptyInput)?.decompress()?;
        public_keys
            .iter()
            .zip(commitments.iter())
            .position(|(key, commitment)| {
                *key == public_ephemeral
                    && commitment
                        .decompress()
                        .map(|point| point - pseudo == expected_offset)
                        .unwrap_or(false)
            })
            .ok_or(CryptoError::KeyNotInRing)?
    } else {
        public_keys
            .iter()
            .position(|key| *key == public_ephemeral)
            .ok_or(CryptoError::KeyNotInRing)?
    };

    let key_image = generate_key_image(&public_ephemeral, secret_ephemeral)?;
    let prepared = prepare_ring_signature(
        message_digest,
        &key_image,
        public_keys,
        real_output_index,
        input_blinding_factor,
        commitments,
        pseudo_blinding_factor,
        pseudo_commitment,
    )?;
    let signature = complete_ring_signature(secret_ephemeral, &prepared, &[])?;
    Ok((key_image, signature))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        hashing::sha3,
        ringct::{generate_pedersen_commitment, generate_pseudo_commitments},
        stealth::generate_keys,
    };

    fn plain_ring(size: usize, real_index: usize) -> (Vec<PublicKey>, Scalar) {
        let (real_pub, real_sec) = generate_keys();
        let mut ring: Vec<PublicKey> = (0..size).map(|_| generate_keys().0).collect();
        ring[real_index] = real_pub;
        (ring, real_sec)
    }

    #[test]
    fn sign_and_verify_plain() {
        let digest = sha3(b"clsag spend");
        let (ring, secret) = plain_ring(2, 1);
        let (image, signature) = generate_ring_signature(&digest, &secret, &ring, None, &[], None, None).unwrap();
        assert!(check_ring_signature(&digest, &image, &ring, &signature, &[], None));
    }

    #[test]
    fn flipped_challenge_fails() {
        let digest = sha3(b"clsag spend");
        let (ring, secret) = plain_ring(2, 1);
        let (image, mut signature) = generate_ring_signature(&digest, &secret, &ring, None, &[], None, None).unwrap();
        let mut bytes = signature.challenge.to_bytes();
        bytes[0] ^= 0x01;
        signature.challenge = Scalar::from_bytes_mod_order(bytes);
        assert!(!check_ring_signature(&digest, &image, &ring, &signature, &[], None));
    }

    #[test]
    fn tampered_scalar_fails() {
        let digest = sha3(b"clsag spend");
        let (ring, secret) = plain_ring(4, 2);
        let (image, mut signature) = generate_ring_signature(&digest, &secret, &ring, None, &[], None, None).unwrap();
        signature.scalars[0] += Scalar::ONE;
        assert!(!check_ring_signature(&digest, &image, &ring, &signature, &[], None));
    }

    #[test]
    fn commitment_aware_sign_and_verify() {
        let digest = sha3(b"confidential spend");
        let ring_size = 4;
        let real_index = 2;
        let amount = 5000u64;

        let (ring, secret) = plain_ring(ring_size, real_index);

        let input_blinding = random_scalar();
        let mut commitments: Vec<Commitment> = (0..ring_size)
            .map(|_| generate_pedersen_commitment(&random_scalar(), 1).unwrap())
            .collect();
        commitments[real_index] = generate_pedersen_commitment(&input_blinding, amount).unwrap();

        // a pseudo commitment to the same amount under fresh blinding
        let (pseudo_blindings, pseudo_commitments) =
            generate_pseudo_commitments(&[amount], &[random_scalar()]).unwrap();

        let (image, signature) = generate_ring_signature(
            &digest,
            &secret,
            &ring,
            Some(&input_blinding),
            &commitments,
            Some(&pseudo_blindings[0]),
            Some(&pseudo_commitments[0]),
        )
        .unwrap();
        assert!(signature.commitment_image.is_some());
        assert!(check_ring_signature(
            &digest,
            &image,
            &ring,
            &signature,
            &commitments,
            Some(&pseudo_commitments[0])
        ));

        // swapping in a different pseudo commitment must fail
        let other = generate_pedersen_commitment(&random_scalar(), amount).unwrap();
        assert!(!check_ring_signature(&digest, &image, &ring, &signature, &commitments, Some(&other)));
    }

    #[test]
    fn short_scalar_vector_fails() {
        let digest = sha3(b"clsag spend");
        let (ring, secret) = plain_ring(3, 0);
        let (image, mut signature) = generate_ring_signature(&digest, &secret, &ring, None, &[], None, None).unwrap();
        signature.scalars.pop();
        assert!(!check_ring_signature(&digest, &image, &ring, &signature, &[], None));
    }

    #[test]
    fn multisig_completion_verifies() {
        let digest = sha3(b"shared clsag");
        let (_a_pub, a_sec) = generate_keys();
        let (_b_pub, b_sec) = generate_keys();
        let shared_secret = crate::multisig::generate_shared_secret_key(&[a_sec, b_sec]);
        let shared_public = secret_key_to_public_key(&shared_secret);

        let mut ring: Vec<PublicKey> = (0..3).map(|_| generate_keys().0).collect();
        ring.push(shared_public);
        let image = generate_key_image(&shared_public, &shared_secret).unwrap();

        let prepared = prepare_ring_signature(&digest, &image, &ring, 3, None, &[], None, None).unwrap();
        let partial_a = generate_partial_signing_scalar(&prepared.mu_p, &a_sec);
        let partial_b = generate_partial_signing_scalar(&prepared.mu_p, &b_sec);
        // a completing participant passes its own secret plus the others' partials
        let signature = complete_ring_signature(&Scalar::ZERO, &prepared, &[partial_a, partial_b]).unwrap();
        assert!(check_ring_signature(&digest, &image, &ring, &signature, &[], None));
    }

    #[test]
    fn wire_round_trip() {
        let digest = sha3(b"clsag wire");
        let (ring, secret) = plain_ring(3, 1);
        let (_image, signature) = generate_ring_signature(&digest, &secret, &ring, None, &[], None, None).unwrap();
        let mut buf = Vec::new();
        signature.write(&mut buf).unwrap();
        assert_eq!(ClsagSignature::read(&mut buf.as_slice()).unwrap(), signature);
    }
}
