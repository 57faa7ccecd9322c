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

//! Multisig wallet primitives: pairwise shared secrets, aggregated keys, and key images
//! restored from participant partials. Aggregation always dedupes and sorts the inputs so
//! every participant arrives at the same result regardless of exchange order.

use curve25519_dalek::{edwards::EdwardsPoint, scalar::Scalar, traits::Identity};

use crate::{
    ed25519::{hash_to_point, hash_to_scalar, CompressedPoint, KeyImage, PublicKey},
    error::CryptoError,
};

/// ms(A, b) = Hs(8 * (b * A)), the shared secret between our secret key and their public key.
pub fn generate_multisig_secret_key(their_public_key: &PublicKey, our_secret_key: &Scalar) -> Result<Scalar, CryptoError> {
    let point = their_public_key.decompress()?;
    let shared = (our_secret_key * point).mul_by_cofactor();
    Ok(hash_to_scalar(shared.compress().as_bytes()))
}

/// Pairwise shared secrets against every unique counterparty key, in sorted key order.
pub fn generate_multisig_secret_keys(
    their_public_keys: &[PublicKey],
    our_secret_key: &Scalar,
) -> Result<Vec<Scalar>, CryptoError> {
    dedupe_sort_points(their_public_keys)
        .iter()
        .map(|key| generate_multisig_secret_key(key, our_secret_key))
        .collect()
}

/// The wallet's shared public key: the sum of the deduplicated, sorted participant keys.
pub fn generate_shared_public_key(public_keys: &[PublicKey]) -> Result<PublicKey, CryptoError> {
    let mut sum = EdwardsPoint::identity();
    for key in dedupe_sort_points(public_keys) {
        sum += key.decompress()?;
    }
    Ok(sum.into())
}

/// The wallet's shared secret key: the sum of the deduplicated, sorted participant secrets.
pub fn generate_shared_secret_key(secret_keys: &[Scalar]) -> Scalar {
    dedupe_sort_scalars(secret_keys).iter().sum()
}

/// Key exchange rounds needed to establish an M-of-N wallet.
pub fn rounds_required(participants: usize, threshold: usize) -> usize {
    participants - threshold + 1
}

/// I = Hp(P) * Ds + sum of partial key images.
pub fn restore_key_image(
    public_ephemeral: &PublicKey,
    derivation_scalar: &Scalar,
    partial_key_images: &[KeyImage],
) -> Result<KeyImage, CryptoError> {
    let mut image = derivation_scalar * hash_to_point(public_ephemeral.as_bytes());
    for partial in dedupe_sort_points(partial_key_images) {
        image += partial.decompress_subgroup()?;
    }
    Ok(image.into())
}

fn dedupe_sort_points(keys: &[CompressedPoint]) -> Vec<CompressedPoint> {
    let mut keys = keys.to_vec();
    keys.sort();
    keys.dedup();
    keys
}

fn dedupe_sort_scalars(scalars: &[Scalar]) -> Vec<Scalar> {
    let mut scalars = scalars.to_vec();
    scalars.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
    scalars.dedup();
    scalars
}
