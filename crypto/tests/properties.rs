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

use quickcheck::quickcheck;
use umbra_crypto::{
    ed25519::{hash_to_scalar, random_scalar, scalar_bits, scalar_from_bits},
    hashing::sha3,
    ringct::{check_commitments_parity, generate_amount_mask, generate_pedersen_commitment, generate_pseudo_commitments, toggle_masked_amount},
    stealth::{
        derivation_to_scalar, derive_public_key, generate_key_derivation, generate_key_image, secret_key_to_public_key,
        underive_public_key,
    },
};

fn scalar_from_seed(seed: u64) -> curve25519_dalek::scalar::Scalar {
    hash_to_scalar(&seed.to_le_bytes())
}

quickcheck! {
    fn scalar_bit_round_trip(value: u64) -> bool {
        scalar_from_bits(&scalar_bits(value, 64)) == value
    }

    fn key_image_is_stable_and_subgroup_valid(seed: u64) -> bool {
        let secret = scalar_from_seed(seed);
        let public = secret_key_to_public_key(&secret);
        let image1 = generate_key_image(&public, &secret).unwrap();
        let image2 = generate_key_image(&public, &secret).unwrap();
        image1 == image2 && image1.decompress_subgroup().is_ok()
    }

    fn stealth_derive_underive_inverts(seed_a: u64, seed_b: u64, index: u8) -> bool {
        let a = scalar_from_seed(seed_a);
        let b = scalar_from_seed(seed_b);
        let a_pub = secret_key_to_public_key(&a);
        let b_pub = secret_key_to_public_key(&b);

        // both sides agree on the derivation, and underive recovers the destination key
        let sender = generate_key_derivation(&b_pub, &a).unwrap();
        let receiver = generate_key_derivation(&a_pub, &b).unwrap();
        if sender != receiver {
            return false;
        }
        let ds = derivation_to_scalar(&sender, u64::from(index));
        let one_time = derive_public_key(&ds, &a_pub).unwrap();
        underive_public_key(&receiver, u64::from(index), &one_time).unwrap() == a_pub
    }

    fn pseudo_commitment_parity(amounts: Vec<u64>, fee_amount: u64) -> bool {
        if amounts.is_empty() || amounts.len() > 8 {
            return true;
        }
        // cap the values so input-side sums stay meaningful
        let amounts: Vec<u64> = amounts.iter().map(|a| a % 1_000_000).collect();
        let fee = fee_amount % 1_000;
        let total: u64 = amounts.iter().sum();
        if total < fee {
            return true;
        }

        let output_blindings = vec![random_scalar(), random_scalar()];
        let output_amount = total - fee;
        let output_commitments = vec![
            generate_pedersen_commitment(&output_blindings[0], output_amount / 2).unwrap(),
            generate_pedersen_commitment(&output_blindings[1], output_amount - output_amount / 2).unwrap(),
        ];

        let (_blindings, pseudo) = generate_pseudo_commitments(&amounts, &output_blindings).unwrap();
        check_commitments_parity(&pseudo, &output_commitments, fee)
    }

    fn amount_mask_is_involutive(seed: u64, amount: u64) -> bool {
        let mask = generate_amount_mask(&scalar_from_seed(seed));
        let masked = toggle_masked_amount(&mask, amount);
        toggle_masked_amount(&mask, masked) == amount
    }

    fn amount_mask_changes_the_value(seed: u64, amount: u64) -> bool {
        let mask = generate_amount_mask(&scalar_from_seed(seed));
        // the first 8 mask bytes are all-zero with negligible probability
        let mask_low = u64::from_le_bytes(mask.to_bytes()[..8].try_into().unwrap());
        mask_low == 0 || toggle_masked_amount(&mask, amount) != amount
    }

    fn ring_signatures_from_the_real_signer_verify(seed: u64, ring_bits: u8) -> bool {
        let ring_size = 1 + usize::from(ring_bits % 4);
        let secret = scalar_from_seed(seed);
        let real = secret_key_to_public_key(&secret);
        let mut ring: Vec<_> = (0..ring_size)
            .map(|i| secret_key_to_public_key(&scalar_from_seed(seed.wrapping_add(1 + i as u64))))
            .collect();
        ring.push(real);

        let digest = sha3(&seed.to_le_bytes());
        let (image, signature) =
            umbra_crypto::borromean::generate_ring_signature(&digest, &secret, &ring).unwrap();
        umbra_crypto::borromean::check_ring_signature(&digest, &image, &ring, &signature)
    }

    fn clsag_from_the_real_signer_verifies(seed: u64, ring_bits: u8) -> bool {
        let ring_size = 1 + usize::from(ring_bits % 4);
        let secret = scalar_from_seed(seed);
        let real = secret_key_to_public_key(&secret);
        let mut ring: Vec<_> = (0..ring_size)
            .map(|i| secret_key_to_public_key(&scalar_from_seed(seed.wrapping_add(1 + i as u64))))
            .collect();
        ring.push(real);

        let digest = sha3(&seed.to_le_bytes());
        let (image, signature) =
            umbra_crypto::clsag::generate_ring_signature(&digest, &secret, &ring, None, &[], None, None).unwrap();
        umbra_crypto::clsag::check_ring_signature(&digest, &image, &ring, &signature, &[], None)
    }
}
