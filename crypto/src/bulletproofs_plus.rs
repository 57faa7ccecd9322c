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

//! The successor range proof system: the weighted inner product argument replaces the
//! polynomial commitment pair, shrinking the proof to an A/B pair with three final scalars.
//! Structurally analogous to the original system otherwise, including batched verification
//! through one multi-scalar multiplication.

use std::{
    io::{Read, Write},
    sync::RwLock,
};

use curve25519_dalek::{
    edwards::EdwardsPoint,
    scalar::Scalar,
    traits::{Identity, IsIdentity},
};

use crate::{
    ed25519::{
        base_mul, multiscalar_mul, pow2_round, powers, random_scalar, scalar_bits, sum_of_powers_shifted, vec_add,
        vec_add_scalar, vec_hadamard, vec_scale, vec_sub_scalar, Commitment, G, H, INV_EIGHT,
    },
    error::CryptoError,
    generators::{self, GeneratorCache},
    io,
    ringct::generate_pedersen_commitment,
    transcript::ScalarTranscript,
};

const BULLETPROOFS_PLUS_DOMAIN_0: [u8; 32] = *b"<-- proving amounts, but faster>";

const BULLETPROOFS_PLUS_DOMAIN_G: [u8; 32] = *b" umbra bp-plus generator seed G ";

const BULLETPROOFS_PLUS_DOMAIN_H: [u8; 32] = *b" umbra bp-plus generator seed H ";

static GENERATORS: RwLock<GeneratorCache> =
    RwLock::new(GeneratorCache::new(BULLETPROOFS_PLUS_DOMAIN_G, BULLETPROOFS_PLUS_DOMAIN_H));

const MAX_PROVE_ATTEMPTS: usize = 64;

const MAX_ROUNDS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulletproofPlus {
    pub a: EdwardsPoint,
    pub a1: EdwardsPoint,
    pub b: EdwardsPoint,
    pub r1: Scalar,
    pub s1: Scalar,
    pub d1: Scalar,
    pub l_vec: Vec<EdwardsPoint>,
    pub r_vec: Vec<EdwardsPoint>,
}

impl BulletproofPlus {
    pub fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        for point in [&self.a, &self.a1, &self.b] {
            io::write_bytes32(w, &point.compress().to_bytes())?;
        }
        io::write_scalar(w, &self.r1)?;
        io::write_scalar(w, &self.s1)?;
        io::write_scalar(w, &self.d1)?;
        io::write_varint(w, self.l_vec.len() as u64)?;
        for point in &self.l_vec {
            io::write_bytes32(w, &point.compress().to_bytes())?;
        }
        io::write_varint(w, self.r_vec.len() as u64)?;
        for point in &self.r_vec {
            io::write_bytes32(w, &point.compress().to_bytes())?;
        }
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let read_parsed_point = |r: &mut R| -> std::io::Result<EdwardsPoint> {
            io::read_point(r)?
                .decompress()
                .map_err(|_| io::invalid_data("proof element is not a curve point"))
        };
        let a = read_parsed_point(r)?;
        let a1 = read_parsed_point(r)?;
        let b = read_parsed_point(r)?;
        let r1 = io::read_scalar(r)?;
        let s1 = io::read_scalar(r)?;
        let d1 = io::read_scalar(r)?;
        let l_len = io::read_length(r)?;
        if l_len > MAX_ROUNDS {
            return Err(io::invalid_data("too many inner-product rounds"));
        }
        let mut l_vec = Vec::with_capacity(l_len);
        for _ in 0..l_len {
            l_vec.push(read_parsed_point(r)?);
        }
        let r_len = io::read_length(r)?;
        if r_len > MAX_ROUNDS {
            return Err(io::invalid_data("too many inner-product rounds"));
        }
        let mut r_vec = Vec::with_capacity(r_len);
        for _ in 0..r_len {
            r_vec.push(read_parsed_point(r)?);
        }
        Ok(BulletproofPlus {
            a,
            a1,
            b,
            r1,
            s1,
            d1,
            l_vec,
            r_vec,
        })
    }
}

fn check_bit_size(n: usize) -> Result<usize, CryptoError> {
    if n == 0 || n > 64 {
        return Err(CryptoError::InvalidBitSize);
    }
    Ok(pow2_round(n))
}

fn pad_commitments(commitments: &[Commitment]) -> Vec<Commitment> {
    let mut padded = commitments.to_vec();
    let target = pow2_round(padded.len());
    padded.resize(target, EdwardsPoint::identity().into());
    padded
}

/// The y-weighted inner product: sum of a[i] * y^(i+1) * b[i].
fn weighted_inner_product(a: &[Scalar], b: &[Scalar], y: &Scalar) -> Scalar {
    debug_assert_eq!(a.len(), b.len());
    let mut result = Scalar::ZERO;
    let mut y_pow = *y;
    for (x, z) in a.iter().zip(b.iter()) {
        result += x * y_pow * z;
        y_pow *= y;
    }
    result
}

struct WipRounds {
    a1: EdwardsPoint,
    b: EdwardsPoint,
    r1: Scalar,
    s1: Scalar,
    d1: Scalar,
    l_vec: Vec<EdwardsPoint>,
    r_vec: Vec<EdwardsPoint>,
}

/// Weighted inner product recursion. Returns None on a zero round challenge, restarting the
/// whole prover.
#[allow(clippy::too_many_arguments)]
fn weighted_inner_product_rounds(
    mut g_vec: Vec<EdwardsPoint>,
    mut h_vec: Vec<EdwardsPoint>,
    mut a: Vec<Scalar>,
    mut b: Vec<Scalar>,
    mut alpha: Scalar,
    y: &Scalar,
    tr: &mut ScalarTranscript,
) -> Option<WipRounds> {
    let y_inv = y.invert();

    let mut l_vec = Vec::new();
    let mut r_vec = Vec::new();

    let mut n = g_vec.len();
    while n > 1 {
        n /= 2;

        let (a1, a2) = (a[..n].to_vec(), a[n..].to_vec());
        let (b1, b2) = (b[..n].to_vec(), b[n..].to_vec());
        let (g1, g2) = (g_vec[..n].to_vec(), g_vec[n..].to_vec());
        let (h1, h2) = (h_vec[..n].to_vec(), h_vec[n..].to_vec());

        let d_l = random_scalar();
        let d_r = random_scalar();

        let y_pow = powers(y, n + 1)[n];
        let y_inv_pow = powers(&y_inv, n + 1)[n];

        let c_l = weighted_inner_product(&a1, &b2, y);
        let c_r = weighted_inner_product(&vec_scale(&a2, &y_pow), &b1, y);

        let l = *INV_EIGHT
            * (multiscalar_mul(&vec_scale(&a1, &y_inv_pow), &g2)
                + multiscalar_mul(&b2, &h1)
                + c_l * *H
                + base_mul(&d_l));
        let r = *INV_EIGHT
            * (multiscalar_mul(&vec_scale(&a2, &y_pow), &g1)
                + multiscalar_mul(&b1, &h2)
                + c_r * *H
                + base_mul(&d_r));
        l_vec.push(l);
        r_vec.push(r);

        tr.update(l).update(r);
        let x = tr.challenge();
        if x == Scalar::ZERO {
            return None;
        }
        let x_inv = x.invert();

        g_vec = (0..n).map(|i| x_inv * g1[i] + (x * y_inv_pow) * g2[i]).collect();
        h_vec = (0..n).map(|i| x * h1[i] + x_inv * h2[i]).collect();
        a = vec_add(&vec_scale(&a1, &x), &vec_scale(&a2, &(y_pow * x_inv)));
        b = vec_add(&vec_scale(&b1, &x_inv), &vec_scale(&b2, &x));
        alpha = d_l * x * x + alpha + d_r * x_inv * x_inv;
    }

    for _ in 0..MAX_PROVE_ATTEMPTS {
        let r = random_scalar();
        let s = random_scalar();
        let d = random_scalar();
        let eta = random_scalar();

        let cap_a1 = *INV_EIGHT
            * (r * g_vec[0] + s * h_vec[0] + (r * y * b[0] + s * y * a[0]) * *H + base_mul(&d));
        let cap_b = *INV_EIGHT * ((r * y * s) * *H + base_mul(&eta));

        let mut attempt_tr = tr.clone();
        attempt_tr.update(cap_a1).update(cap_b);
        let x = attempt_tr.challenge();
        if x == Scalar::ZERO {
            continue;
        }
        *tr = attempt_tr;

        return Some(WipRounds {
            a1: cap_a1,
            b: cap_b,
            r1: r + a[0] * x,
            s1: s + b[0] * x,
            d1: eta + d * x + alpha * x * x,
            l_vec,
            r_vec,
        });
    }
    None
}

/// Prove that every amount lies in [0, 2^N). Returns the proof and the covered commitments,
/// padded to a power-of-two batch.
pub fn prove(
    amounts: &[u64],
    blinding_factors: &[Scalar],
    n: usize,
) -> Result<(BulletproofPlus, Vec<Commitment>), CryptoError> {
    let n = check_bit_size(n)?;
    if amounts.is_empty() {
        return Err(CryptoError::EmptyInput);
    }
    if amounts.len() != blinding_factors.len() {
        return Err(CryptoError::SizeMismatch);
    }

    let m = pow2_round(amounts.len());
    let mut amounts = amounts.to_vec();
    let mut blinding_factors = blinding_factors.to_vec();
    amounts.resize(m, 0);
    blinding_factors.resize(m, Scalar::ZERO);

    let mn = m * n;
    let (gi, hi) = generators::generators(&GENERATORS, mn);

    let mut commitments = Vec::with_capacity(m);
    let mut a_l: Vec<Scalar> = Vec::with_capacity(mn);
    for (amount, blinding) in amounts.iter().zip(blinding_factors.iter()) {
        commitments.push(generate_pedersen_commitment(blinding, *amount)?);
        a_l.extend(scalar_bits(*amount, n));
    }
    let a_r = vec_sub_scalar(&a_l, &Scalar::ONE);

    'attempt: for _ in 0..MAX_PROVE_ATTEMPTS {
        let mut tr = ScalarTranscript::new(BULLETPROOFS_PLUS_DOMAIN_0);
        tr.update_each(&commitments);

        let alpha = random_scalar();
        let a = *INV_EIGHT * (multiscalar_mul(&a_l, &gi) + multiscalar_mul(&a_r, &hi) + base_mul(&alpha));

        tr.update(a);
        let y = tr.challenge();
        if y == Scalar::ZERO {
            continue 'attempt;
        }
        tr.update(y);
        let z = tr.challenge();
        if z == Scalar::ZERO {
            continue 'attempt;
        }

        // d[j * N + i] = z^(2(j+1)) * 2^i
        let two_powers = powers(&crate::ed25519::TWO, n);
        let z_sq = z * z;
        let mut d = Vec::with_capacity(mn);
        let mut z_pow = z_sq;
        for _ in 0..m {
            for two_pow in &two_powers {
                d.push(z_pow * two_pow);
            }
            z_pow *= z_sq;
        }

        let a_l1 = vec_sub_scalar(&a_l, &z);

        // descending powers y^MN .. y^1
        let mut y_desc = powers(&y, mn + 1);
        y_desc.remove(0);
        y_desc.reverse();

        let a_r1 = vec_add_scalar(&vec_add(&a_r, &vec_hadamard(&d, &y_desc)), &z);

        let y_mn_plus_1 = powers(&y, mn + 2)[mn + 1];
        let mut alpha1 = alpha;
        let mut z_pow = z_sq;
        for blinding in &blinding_factors {
            alpha1 += z_pow * blinding * y_mn_plus_1;
            z_pow *= z_sq;
        }

        let rounds = match weighted_inner_product_rounds(gi.clone(), hi.clone(), a_l1, a_r1, alpha1, &y, &mut tr) {
            Some(rounds) => rounds,
            None => continue 'attempt,
        };

        let proof = BulletproofPlus {
            a,
            a1: rounds.a1,
            b: rounds.b,
            r1: rounds.r1,
            s1: rounds.s1,
            d1: rounds.d1,
            l_vec: rounds.l_vec,
            r_vec: rounds.r_vec,
        };
        return Ok((proof, commitments));
    }
    Err(CryptoError::RandomnessExhausted)
}

/// Verify a batch of proofs, collapsing into one multi-scalar multiplication over the shared
/// generator cache.
pub fn verify_batch(proofs: &[(&BulletproofPlus, &[Commitment])], n: usize) -> Result<bool, CryptoError> {
    let n = check_bit_size(n)?;
    if proofs.is_empty() {
        return Ok(true);
    }

    let mut max_mn = 0usize;
    for (proof, _) in proofs {
        if proof.l_vec.is_empty() || proof.l_vec.len() != proof.r_vec.len() || proof.l_vec.len() > MAX_ROUNDS {
            return Ok(false);
        }
        max_mn = max_mn.max(1usize << proof.l_vec.len());
    }
    let (gi, hi) = generators::generators(&GENERATORS, max_mn);

    let mut g_scalar = Scalar::ZERO;
    let mut h_scalar = Scalar::ZERO;
    let mut gi_scalars = vec![Scalar::ZERO; max_mn];
    let mut hi_scalars = vec![Scalar::ZERO; max_mn];

    let mut scalars: Vec<Scalar> = Vec::new();
    let mut points: Vec<EdwardsPoint> = Vec::new();

    for (proof, raw_commitments) in proofs {
        if raw_commitments.is_empty() {
            return Ok(false);
        }
        let commitments = pad_commitments(raw_commitments);
        let m = commitments.len();
        let mn = m * n;
        if 1usize << proof.l_vec.len() != mn {
            return Ok(false);
        }

        let commitment_points = commitments
            .iter()
            .map(|c| c.decompress())
            .collect::<Result<Vec<_>, _>>()?;

        let weight = random_scalar();

        let mut tr = ScalarTranscript::new(BULLETPROOFS_PLUS_DOMAIN_0);
        tr.update_each(&commitments);
        tr.update(proof.a);
        let y = tr.challenge();
        if y == Scalar::ZERO {
            return Ok(false);
        }
        let y_inv = y.invert();
        tr.update(y);
        let z = tr.challenge();
        if z == Scalar::ZERO {
            return Ok(false);
        }

        let two_powers = powers(&crate::ed25519::TWO, n);
        let z_sq = z * z;
        let mut d = Vec::with_capacity(mn);
        let mut z_pow = z_sq;
        for _ in 0..m {
            for two_pow in &two_powers {
                d.push(z_pow * two_pow);
            }
            z_pow *= z_sq;
        }

        let mut challenges = Vec::with_capacity(proof.l_vec.len());
        for (l, r) in proof.l_vec.iter().zip(proof.r_vec.iter()) {
            tr.update(*l).update(*r);
            let challenge = tr.challenge();
            if challenge == Scalar::ZERO {
                return Ok(false);
            }
            challenges.push(challenge);
        }
        let challenges_inv: Vec<Scalar> = challenges.iter().map(Scalar::invert).collect();

        tr.update(proof.a1).update(proof.b);
        let x = tr.challenge();
        if x == Scalar::ZERO {
            return Ok(false);
        }
        let x_sq = x * x;

        let y_powers = powers(&y, mn + 2);
        let y_inv_powers = powers(&y_inv, mn);
        let y_mn_plus_1 = y_powers[mn + 1];

        for i in 0..mn {
            let mut index = i;
            let mut g = proof.r1 * x * y_inv_powers[i];
            let mut h = proof.s1 * x;

            for j in (0..proof.l_vec.len()).rev() {
                let round = challenges.len() - j - 1;
                let base_power = 1usize << j;
                if index / base_power == 0 {
                    g *= challenges_inv[round];
                    h *= challenges[round];
                } else {
                    g *= challenges[round];
                    h *= challenges_inv[round];
                    index -= base_power;
                }
            }

            gi_scalars[i] += weight * (g + x_sq * z);
            hi_scalars[i] += weight * (h - x_sq * (d[i] * y_powers[mn - i] + z));
        }

        let mut z_pow = z_sq;
        for commitment in &commitment_points {
            scalars.push(weight * (-x_sq * z_pow * y_mn_plus_1));
            points.push(*commitment);
            z_pow *= z_sq;
        }

        let d_sum: Scalar = d.iter().sum();
        h_scalar += weight
            * ((proof.r1 * y * proof.s1)
                + (x_sq * (y_mn_plus_1 * z * d_sum + (z_sq - z) * sum_of_powers_shifted(&y, mn))));
        g_scalar += weight * proof.d1;

        scalars.push(weight * -x);
        points.push(proof.a1.mul_by_cofactor());
        scalars.push(-weight);
        points.push(proof.b.mul_by_cofactor());
        scalars.push(weight * -x_sq);
        points.push(proof.a.mul_by_cofactor());

        for (j, (l, r)) in proof.l_vec.iter().zip(proof.r_vec.iter()).enumerate() {
            scalars.push(challenges[j] * challenges[j] * weight * -x_sq);
            points.push(l.mul_by_cofactor());
            scalars.push(challenges_inv[j] * challenges_inv[j] * weight * -x_sq);
            points.push(r.mul_by_cofactor());
        }
    }

    scalars.push(g_scalar);
    points.push(G);
    scalars.push(h_scalar);
    points.push(*H);

    for i in 0..max_mn {
        scalars.push(gi_scalars[i]);
        points.push(gi[i]);
        scalars.push(hi_scalars[i]);
        points.push(hi[i]);
    }

    Ok(multiscalar_mul(&scalars, &points).is_identity())
}

/// Single-proof convenience wrapper over [`verify_batch`].
pub fn verify(proof: &BulletproofPlus, commitments: &[Commitment], n: usize) -> Result<bool, CryptoError> {
    verify_batch(&[(proof, commitments)], n)
}
