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

//! Confidential amounts: Pedersen commitments, the masks hiding amounts on the wire, and the
//! pseudo-output commitments that balance a transaction without revealing anything.

use curve25519_dalek::scalar::Scalar;

use crate::{
    ed25519::{base_mul, random_scalars, sum_points, Commitment, H},
    error::CryptoError,
    transcript::ScalarTranscript,
};

const DOMAIN_COMMITMENT_MASK: [u8; 32] = *b"   Umbra Commitment Mask Seed   ";

const DOMAIN_AMOUNT_MASK: [u8; 32] = *b"     Umbra Amount Mask Seed     ";

/// C = y * G + a * H
pub fn generate_pedersen_commitment(blinding_factor: &Scalar, amount: u64) -> Result<Commitment, CryptoError> {
    Ok((base_mul(blinding_factor) + Scalar::from(amount) * *H).into())
}

/// The deterministic blinding factor for an output, bound to the sender/receiver shared
/// derivation scalar.
pub fn generate_commitment_blinding_factor(derivation_scalar: &Scalar) -> Scalar {
    let mut tr = ScalarTranscript::new(DOMAIN_COMMITMENT_MASK);
    tr.update(*derivation_scalar);
    tr.challenge()
}

/// The mask XORed over the amount on the wire, domain separated from the blinding factor.
pub fn generate_amount_mask(derivation_scalar: &Scalar) -> Scalar {
    let mut tr = ScalarTranscript::new(DOMAIN_AMOUNT_MASK);
    tr.update(*derivation_scalar);
    tr.challenge()
}

/// XOR the amount with the first 8 bytes of the mask. Involutive: applying twice restores the
/// input.
pub fn toggle_masked_amount(amount_mask: &Scalar, amount: u64) -> u64 {
    let mask_bytes = amount_mask.to_bytes();
    let mut value = amount.to_le_bytes();
    for (byte, mask) in value.iter_mut().zip(mask_bytes.iter()) {
        *byte ^= mask;
    }
    u64::from_le_bytes(value)
}

/// Pseudo-output commitments for a set of input amounts.
///
/// All blinding factors but the last are random; the last absorbs the difference against the
/// output blinding factors, so the commitments sum to the outputs-plus-fee side without any
/// amount leaking.
pub fn generate_pseudo_commitments(
    input_amounts: &[u64],
    output_blinding_factors: &[Scalar],
) -> Result<(Vec<Scalar>, Vec<Commitment>), CryptoError> {
    if input_amounts.is_empty() {
        return Err(CryptoError::EmptyInput);
    }

    let sum_of_outputs: Scalar = output_blinding_factors.iter().sum();

    let mut pseudo_blinding_factors = random_scalars(input_amounts.len());
    let sum_of_pseudo: Scalar = pseudo_blinding_factors.iter().sum();

    let last = pseudo_blinding_factors.len() - 1;
    pseudo_blinding_factors[last] += sum_of_outputs - sum_of_pseudo;

    let pseudo_commitments = input_amounts
        .iter()
        .zip(pseudo_blinding_factors.iter())
        .map(|(amount, blinding)| generate_pedersen_commitment(blinding, *amount))
        .collect::<Result<Vec<_>, _>>()?;

    Ok((pseudo_blinding_factors, pseudo_commitments))
}

/// Sum of pseudo commitments must equal the sum of output commitments plus a commitment to
/// the fee under a zero blinding factor.
pub fn check_commitments_parity(
    pseudo_commitments: &[Commitment],
    output_commitments: &[Commitment],
    transaction_fee: u64,
) -> bool {
    let pseudo_total = match sum_points(pseudo_commitments) {
        Ok(total) => total,
        Err(_) => return false,
    };
    let output_total = match sum_points(output_commitments) {
        Ok(total) => total,
        Err(_) => return false,
    };
    let fee_commitment = Scalar::from(transaction_fee) * *H;
    pseudo_total == output_total + fee_commitment
}
