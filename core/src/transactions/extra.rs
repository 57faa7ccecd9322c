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

//! The transaction extra blob: a tagged, loosely structured field. Only two tags matter to
//! consensus-adjacent code: the transaction public key, and the payment id nonce the
//! blockchain cache reverse-indexes. Unknown tags are skipped, a truncated blob stops the
//! scan.

use umbra_crypto::{CompressedPoint, Hash, PublicKey};

const TAG_PUBLIC_KEY: u8 = 0x01;
const TAG_NONCE: u8 = 0x02;
const NONCE_PAYMENT_ID: u8 = 0x00;

/// Append the transaction public key field.
pub fn write_public_key(extra: &mut Vec<u8>, key: &PublicKey) {
    extra.push(TAG_PUBLIC_KEY);
    extra.extend_from_slice(key.as_bytes());
}

/// Append a payment id nonce field.
pub fn write_payment_id(extra: &mut Vec<u8>, payment_id: &Hash) {
    extra.push(TAG_NONCE);
    extra.push(33);
    extra.push(NONCE_PAYMENT_ID);
    extra.extend_from_slice(payment_id.as_bytes());
}

fn fields(extra: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
    let mut cursor = 0usize;
    std::iter::from_fn(move || {
        if cursor >= extra.len() {
            return None;
        }
        let tag = extra[cursor];
        cursor += 1;
        match tag {
            TAG_PUBLIC_KEY => {
                if cursor + 32 > extra.len() {
                    return None;
                }
                let body = &extra[cursor..cursor + 32];
                cursor += 32;
                Some((tag, body))
            },
            TAG_NONCE => {
                if cursor >= extra.len() {
                    return None;
                }
                let len = extra[cursor] as usize;
                cursor += 1;
                if cursor + len > extra.len() {
                    return None;
                }
                let body = &extra[cursor..cursor + len];
                cursor += len;
                Some((tag, body))
            },
            // unknown tag, no length information: stop scanning
            _ => None,
        }
    })
}

/// The first transaction public key in the blob.
pub fn public_key(extra: &[u8]) -> Option<PublicKey> {
    fields(extra).find_map(|(tag, body)| {
        if tag == TAG_PUBLIC_KEY {
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(body);
            Some(CompressedPoint(bytes))
        } else {
            None
        }
    })
}

/// The first payment id in the blob.
pub fn payment_id(extra: &[u8]) -> Option<Hash> {
    fields(extra).find_map(|(tag, body)| {
        if tag == TAG_NONCE && body.len() == 33 && body[0] == NONCE_PAYMENT_ID {
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(&body[1..]);
            Some(Hash(bytes))
        } else {
            None
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use umbra_crypto::{hashing::sha3, stealth::generate_keys};

    #[test]
    fn public_key_round_trip() {
        let (key, _) = generate_keys();
        let mut extra = Vec::new();
        write_public_key(&mut extra, &key);
        assert_eq!(public_key(&extra), Some(key));
        assert_eq!(payment_id(&extra), None);
    }

    #[test]
    fn payment_id_round_trip() {
        let id = sha3(b"invoice 7");
        let (key, _) = generate_keys();
        let mut extra = Vec::new();
        write_public_key(&mut extra, &key);
        write_payment_id(&mut extra, &id);
        assert_eq!(public_key(&extra), Some(key));
        assert_eq!(payment_id(&extra), Some(id));
    }

    #[test]
    fn truncated_blob_is_tolerated() {
        let (key, _) = generate_keys();
        let mut extra = Vec::new();
        write_public_key(&mut extra, &key);
        extra.truncate(20);
        assert_eq!(public_key(&extra), None);
    }

    #[test]
    fn unknown_tags_stop_the_scan() {
        let id = sha3(b"invoice");
        let mut extra = vec![0x77];
        write_payment_id(&mut extra, &id);
        assert_eq!(payment_id(&extra), None);
    }
}
