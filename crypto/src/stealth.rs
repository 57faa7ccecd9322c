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

//! Stealth address output derivation and key image construction.
//!
//! Every output on chain is paid to a one-time key `P = Hs(D || i) * G + B` derived from a
//! shared-secret derivation `D = 8 * (a * B)`. Spending reveals the key image `I = p * Hp(P)`,
//! the linkability tag that makes double-spends detectable without linking the output itself.

use curve25519_dalek::scalar::Scalar;
use zeroize::Zeroize;

use crate::{
    ed25519::{base_mul, hash_to_point, hash_to_scalar, random_scalar, CompressedPoint, Derivation, KeyImage, PublicKey},
    error::CryptoError,
    hashing::sha3,
    io,
};

/// Rounds of salted stretching applied when deriving subwallet spend keys.
const SUBWALLET_STRETCH_ROUNDS: usize = 32;

/// D = 8 * (a * B)
pub fn generate_key_derivation(public_key: &PublicKey, secret_key: &Scalar) -> Result<Derivation, CryptoError> {
    let point = public_key.decompress()?;
    Ok((secret_key * point).mul_by_cofactor().into())
}

/// Ds = Hs(D || varint(i))
pub fn derivation_to_scalar(derivation: &Derivation, output_index: u64) -> Scalar {
    let mut buf = Vec::with_capacity(40);
    buf.extend_from_slice(derivation.as_bytes());
    io::write_varint(&mut buf, output_index).expect("write to Vec cannot fail");
    hash_to_scalar(&buf)
}

/// P = Ds * G + B
pub fn derive_public_key(derivation_scalar: &Scalar, public_key: &PublicKey) -> Result<PublicKey, CryptoError> {
    let base = public_key.decompress()?;
    Ok((base_mul(derivation_scalar) + base).into())
}

/// p = Ds + b
pub fn derive_secret_key(derivation_scalar: &Scalar, secret_key: &Scalar) -> Scalar {
    derivation_scalar + secret_key
}

/// B = P - Ds * G, recovering the destination spend key from a one-time key.
pub fn underive_public_key(
    derivation: &Derivation,
    output_index: u64,
    public_ephemeral: &PublicKey,
) -> Result<PublicKey, CryptoError> {
    let ephemeral = public_ephemeral.decompress()?;
    let ds = derivation_to_scalar(derivation, output_index);
    Ok((ephemeral - base_mul(&ds)).into())
}

/// I = x * Hp(P)
pub fn generate_key_image(public_ephemeral: &PublicKey, secret_ephemeral: &Scalar) -> Result<KeyImage, CryptoError> {
    public_ephemeral.decompress()?;
    Ok((secret_ephemeral * hash_to_point(public_ephemeral.as_bytes())).into())
}

/// A fresh random keypair.
pub fn generate_keys() -> (PublicKey, Scalar) {
    let secret = random_scalar();
    (base_mul(&secret).into(), secret)
}

pub fn secret_key_to_public_key(secret_key: &Scalar) -> PublicKey {
    base_mul(secret_key).into()
}

/// Deterministic subwallet keys from the base spend secret.
///
/// Index zero is the base wallet itself. Other indexes run an iterated stretch that folds the
/// index into every round, so neighbouring subwallets do not share intermediate states.
pub fn generate_subwallet_keys(spend_secret_key: &Scalar, subwallet_index: u64) -> (PublicKey, Scalar) {
    if subwallet_index == 0 {
        return (secret_key_to_public_key(spend_secret_key), *spend_secret_key);
    }

    let mut state = spend_secret_key.to_bytes();
    let mut buf = [0u8; 40];
    for _ in 0..SUBWALLET_STRETCH_ROUNDS {
        buf[..32].copy_from_slice(&state);
        buf[32..].copy_from_slice(&subwallet_index.to_le_bytes());
        state = sha3(&buf).0;
    }
    let secret = hash_to_scalar(&state);
    state.zeroize();
    buf.zeroize();
    (secret_key_to_public_key(&secret), secret)
}

/// The deterministic view secret for a spend secret, so a wallet only has to back up one key.
pub fn generate_view_from_spend(spend_secret_key: &Scalar) -> Scalar {
    hash_to_scalar(&spend_secret_key.to_bytes())
}

/// Validates that a set of wire bytes is a usable public key.
pub fn check_public_key(key: &CompressedPoint) -> Result<(), CryptoError> {
    key.decompress().map(|_| ())
}

/// Parse secret key bytes, rejecting non-reduced encodings. The value is never reduced on
/// the caller's behalf.
pub fn check_secret_key(bytes: &[u8; 32]) -> Result<Scalar, CryptoError> {
    Option::<Scalar>::from(Scalar::from_canonical_bytes(*bytes)).ok_or(CryptoError::InvalidScalar)
}
