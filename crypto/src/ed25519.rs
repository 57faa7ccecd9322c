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

//! Scalar and Ed25519 group arithmetic on top of `curve25519-dalek`, hash-to-scalar and
//! hash-to-point maps, randomness, and the vector operations the range proof verifiers reduce to.

use std::{
    fmt,
    fmt::{Display, Formatter},
    str::FromStr,
};

pub use curve25519_dalek::{edwards::EdwardsPoint, scalar::Scalar};
use curve25519_dalek::{
    constants::{ED25519_BASEPOINT_POINT, ED25519_BASEPOINT_TABLE},
    edwards::CompressedEdwardsY,
    traits::{Identity, IsIdentity, VartimeMultiscalarMul},
};
use once_cell::sync::Lazy;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::{error::CryptoError, hashing::sha3};

/// The Ed25519 basepoint.
pub const G: EdwardsPoint = ED25519_BASEPOINT_POINT;

/// The secondary generator, derived by hashing the basepoint to the curve. Its discrete log
/// with respect to `G` is unknown.
pub static H: Lazy<EdwardsPoint> = Lazy::new(|| hash_to_point(G.compress().as_bytes()));

/// The neutral element of the group.
pub static Z: Lazy<EdwardsPoint> = Lazy::new(EdwardsPoint::identity);

pub static EIGHT: Lazy<Scalar> = Lazy::new(|| Scalar::from(8u8));

pub static INV_EIGHT: Lazy<Scalar> = Lazy::new(|| Scalar::from(8u8).invert());

pub static TWO: Lazy<Scalar> = Lazy::new(|| Scalar::from(2u8));

/// A 32-byte compressed Ed25519 point as it travels on the wire. Decompression, and where
/// required the subgroup check, happens at the boundary where the point enters a verification
/// equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CompressedPoint(pub [u8; 32]);

pub type PublicKey = CompressedPoint;
pub type KeyImage = CompressedPoint;
pub type Commitment = CompressedPoint;
pub type Derivation = CompressedPoint;

impl CompressedPoint {
    pub const SIZE: usize = 32;

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse as a curve point, any torsion component allowed.
    pub fn decompress(&self) -> Result<EdwardsPoint, CryptoError> {
        CompressedEdwardsY(self.0).decompress().ok_or(CryptoError::InvalidPoint)
    }

    /// Parse as a member of the prime-order subgroup, rejecting the identity. Required for
    /// every point that participates in a verification equation relying on prime-order
    /// behaviour, key images above all.
    pub fn decompress_subgroup(&self) -> Result<EdwardsPoint, CryptoError> {
        let point = self.decompress()?;
        if !point.is_torsion_free() || point.is_identity() {
            return Err(CryptoError::NotInSubgroup);
        }
        Ok(point)
    }

    pub fn is_valid(&self) -> bool {
        self.decompress().is_ok()
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(CompressedPoint(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<EdwardsPoint> for CompressedPoint {
    fn from(point: EdwardsPoint) -> Self {
        CompressedPoint(point.compress().to_bytes())
    }
}

impl From<&EdwardsPoint> for CompressedPoint {
    fn from(point: &EdwardsPoint) -> Self {
        CompressedPoint(point.compress().to_bytes())
    }
}

impl Display for CompressedPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for CompressedPoint {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompressedPoint::from_hex(s)
    }
}

impl Serialize for CompressedPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CompressedPoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        CompressedPoint::from_hex(&s).map_err(de::Error::custom)
    }
}

/// True when the bytes are a canonically reduced scalar. The value is inspected, never reduced.
pub fn check_scalar(bytes: &[u8; 32]) -> bool {
    Option::<Scalar>::from(Scalar::from_canonical_bytes(*bytes)).is_some()
}

/// True when the bytes parse as a curve point.
pub fn check_point(bytes: &[u8; 32]) -> bool {
    CompressedEdwardsY(*bytes).decompress().is_some()
}

/// SHA3 the input and reduce the digest mod the group order.
pub fn hash_to_scalar(data: &[u8]) -> Scalar {
    Scalar::from_bytes_mod_order(sha3(data).0)
}

/// Map arbitrary bytes onto the prime-order subgroup.
///
/// Hash-and-check: the digest is re-hashed until it decompresses, then the torsion component
/// is cleared by multiplying by the cofactor. Deterministic for a given input.
pub fn hash_to_point(data: &[u8]) -> EdwardsPoint {
    let mut digest = sha3(data);
    loop {
        if let Some(point) = CompressedEdwardsY(digest.0).decompress() {
            let point = point.mul_by_cofactor();
            if !point.is_identity() {
                return point;
            }
        }
        digest = sha3(&digest.0);
    }
}

/// Scalar times the basepoint, through the precomputed table.
pub fn base_mul(scalar: &Scalar) -> EdwardsPoint {
    ED25519_BASEPOINT_TABLE * scalar
}

pub fn random_scalar() -> Scalar {
    // per-thread generator, reseeded from the OS
    Scalar::random(&mut rand::thread_rng())
}

pub fn random_scalars(count: usize) -> Vec<Scalar> {
    (0..count).map(|_| random_scalar()).collect()
}

pub fn random_point() -> EdwardsPoint {
    base_mul(&random_scalar())
}

/// The little-endian bit expansion of `value` as `n` scalars in {0, 1}.
pub fn scalar_bits(value: u64, n: usize) -> Vec<Scalar> {
    (0..n).map(|i| Scalar::from((value >> i) & 1)).collect()
}

/// Reassemble a u64 from its bit vector. Inverse of [`scalar_bits`] for n = 64.
pub fn scalar_from_bits(bits: &[Scalar]) -> u64 {
    bits.iter()
        .enumerate()
        .take(64)
        .fold(0u64, |acc, (i, bit)| if *bit == Scalar::ONE { acc | (1 << i) } else { acc })
}

/// Round up to the next power of two.
pub fn pow2_round(value: usize) -> usize {
    value.next_power_of_two()
}

/// `[1, x, x^2, .., x^(n-1)]`
pub fn powers(x: &Scalar, n: usize) -> Vec<Scalar> {
    let mut out = Vec::with_capacity(n);
    let mut current = Scalar::ONE;
    for _ in 0..n {
        out.push(current);
        current *= x;
    }
    out
}

/// `x + x^2 + .. + x^n`, the sum of the first n powers starting at exponent one.
pub fn sum_of_powers_shifted(x: &Scalar, n: usize) -> Scalar {
    let mut sum = Scalar::ZERO;
    let mut current = *x;
    for _ in 0..n {
        sum += current;
        current *= x;
    }
    sum
}

/// `1 + x + .. + x^(n-1)`
pub fn sum_of_powers(x: &Scalar, n: usize) -> Scalar {
    powers(x, n).iter().sum()
}

pub fn inner_product(a: &[Scalar], b: &[Scalar]) -> Scalar {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Inner product of a scalar vector against a point vector: one variable-time multiscalar
/// multiplication. Equality of the result with the neutral element is the sole verification
/// equation both range-proof verifiers reduce to.
pub fn multiscalar_mul(scalars: &[Scalar], points: &[EdwardsPoint]) -> EdwardsPoint {
    debug_assert_eq!(scalars.len(), points.len());
    EdwardsPoint::vartime_multiscalar_mul(scalars.iter(), points.iter())
}

pub fn vec_add(a: &[Scalar], b: &[Scalar]) -> Vec<Scalar> {
    a.iter().zip(b.iter()).map(|(x, y)| x + y).collect()
}

pub fn vec_sub(a: &[Scalar], b: &[Scalar]) -> Vec<Scalar> {
    a.iter().zip(b.iter()).map(|(x, y)| x - y).collect()
}

pub fn vec_hadamard(a: &[Scalar], b: &[Scalar]) -> Vec<Scalar> {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).collect()
}

pub fn vec_scale(a: &[Scalar], x: &Scalar) -> Vec<Scalar> {
    a.iter().map(|v| v * x).collect()
}

pub fn vec_add_scalar(a: &[Scalar], x: &Scalar) -> Vec<Scalar> {
    a.iter().map(|v| v + x).collect()
}

pub fn vec_sub_scalar(a: &[Scalar], x: &Scalar) -> Vec<Scalar> {
    a.iter().map(|v| v - x).collect()
}

/// Sum of a set of curve points given in compressed form.
pub fn sum_points(points: &[CompressedPoint]) -> Result<EdwardsPoint, CryptoError> {
    let mut sum = EdwardsPoint::identity();
    for point in points {
        sum += point.decompress()?;
    }
    Ok(sum)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn h_is_not_g_and_has_unknown_relation() {
        assert_ne!(*H, G);
        assert!(!H.is_identity());
        assert!(H.is_torsion_free());
    }

    #[test]
    fn hash_to_point_lands_in_subgroup() {
        for seed in 0u8..16 {
            let point = hash_to_point(&[seed]);
            assert!(point.is_torsion_free());
            assert!(!point.is_identity());
        }
    }

    #[test]
    fn hash_to_point_is_deterministic() {
        assert_eq!(hash_to_point(b"umbra"), hash_to_point(b"umbra"));
        assert_ne!(hash_to_point(b"umbra"), hash_to_point(b"arbmu"));
    }

    #[test]
    fn check_scalar_rejects_unreduced() {
        assert!(check_scalar(&Scalar::ONE.to_bytes()));
        // the group order itself is not a canonical encoding
        let ell = [
            0xed, 0xd3, 0xf5, 0x5c, 0x1a, 0x63, 0x12, 0x58, 0xd6, 0x9c, 0xf7, 0xa2, 0xde, 0xf9, 0xde, 0x14, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10,
        ];
        assert!(!check_scalar(&ell));
    }

    #[test]
    fn scalar_bit_round_trip() {
        for value in [0u64, 1, 2, 1000, u64::MAX, 0xdead_beef_cafe_f00d] {
            assert_eq!(scalar_from_bits(&scalar_bits(value, 64)), value);
        }
    }

    #[test]
    fn multiscalar_matches_naive_sum() {
        let scalars = random_scalars(4);
        let points: Vec<EdwardsPoint> = (0..4).map(|_| random_point()).collect();
        let naive = scalars
            .iter()
            .zip(points.iter())
            .fold(EdwardsPoint::identity(), |acc, (s, p)| acc + s * p);
        assert_eq!(multiscalar_mul(&scalars, &points), naive);
    }

    #[test]
    fn pow2_round_rounds_up() {
        assert_eq!(pow2_round(1), 1);
        assert_eq!(pow2_round(3), 4);
        assert_eq!(pow2_round(8), 8);
        assert_eq!(pow2_round(9), 16);
    }

    #[test]
    fn subgroup_check_rejects_identity() {
        let identity: CompressedPoint = EdwardsPoint::identity().into();
        assert!(identity.decompress().is_ok());
        assert_eq!(identity.decompress_subgroup(), Err(CryptoError::NotInSubgroup));
    }
}
