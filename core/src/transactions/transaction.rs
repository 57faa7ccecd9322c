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

//! Transaction structures and their tight binary wire form.
//!
//! A prefix (version, unlock time, inputs, outputs, extra) is followed by a signature section
//! whose shape depends on the version: version one carries the legacy jagged signature
//! matrix, version two the RingCT section with one CLSAG per input, pseudo-output and output
//! commitments, and an aggregate range proof.

use std::io::{Read, Write};

use umbra_crypto::{
    bulletproofs::Bulletproof,
    bulletproofs_plus::BulletproofPlus,
    clsag::ClsagSignature,
    hashing::sha3,
    io,
    signature::Signature,
    Commitment, Hash, KeyImage, PublicKey,
};

/// Wire tag for the coinbase input.
pub const TX_INPUT_TAG_BASE: u8 = 0xff;
/// Wire tag for a key input.
pub const TX_INPUT_TAG_KEY: u8 = 0x02;
/// Wire tag for a key output target.
pub const TX_OUTPUT_TAG_KEY: u8 = 0x02;

/// Transaction version carrying the legacy signature matrix.
pub const TX_VERSION_LEGACY: u8 = 1;
/// Transaction version carrying the RingCT signature section.
pub const TX_VERSION_RING_CT: u8 = 2;

const RANGE_PROOF_TAG_BULLETPROOF: u8 = 1;
const RANGE_PROOF_TAG_BULLETPROOF_PLUS: u8 = 2;

/// The input of a coinbase transaction; used exactly once per block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseInput {
    pub block_index: u32,
}

/// A spend of a previous output behind a ring of decoys. Offsets are relative encodings of
/// global output indexes within the input's amount bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInput {
    pub amount: u64,
    pub output_indexes: Vec<u32>,
    pub key_image: KeyImage,
}

impl KeyInput {
    /// Relative offsets to absolute global indexes. Returns None when the encoding is not
    /// strictly increasing past the first element.
    pub fn absolute_indexes(&self) -> Option<Vec<u32>> {
        let mut absolute = Vec::with_capacity(self.output_indexes.len());
        let mut current = 0u32;
        for (i, offset) in self.output_indexes.iter().enumerate() {
            if i > 0 && *offset == 0 {
                return None;
            }
            current = current.checked_add(*offset)?;
            absolute.push(current);
        }
        Some(absolute)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionInput {
    Base(BaseInput),
    Key(KeyInput),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyOutput {
    pub key: PublicKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutputTarget {
    Key(KeyOutput),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOutput {
    pub amount: u64,
    pub target: TransactionOutputTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPrefix {
    pub version: u8,
    pub unlock_time: u64,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub extra: Vec<u8>,
}

/// The aggregate range proof over a transaction's output commitments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeProof {
    Bulletproof(Bulletproof),
    BulletproofPlus(BulletproofPlus),
}

/// The confidential signature section: one CLSAG per input, the balancing pseudo-output
/// commitments, the per-output commitments, and the range proof bounding them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingCtSignatures {
    pub signatures: Vec<ClsagSignature>,
    pub pseudo_commitments: Vec<Commitment>,
    pub output_commitments: Vec<Commitment>,
    pub range_proof: RangeProof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionSignatures {
    /// One row of 64-byte signatures per input, one entry per ring member. Coinbase
    /// transactions carry no rows.
    Legacy(Vec<Vec<Signature>>),
    RingCt(RingCtSignatures),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub prefix: TransactionPrefix,
    pub signatures: TransactionSignatures,
}

impl TransactionInput {
    pub fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        match self {
            TransactionInput::Base(base) => {
                w.write_all(&[TX_INPUT_TAG_BASE])?;
                io::write_varint(w, u64::from(base.block_index))
            },
            TransactionInput::Key(key) => {
                w.write_all(&[TX_INPUT_TAG_KEY])?;
                io::write_varint(w, key.amount)?;
                io::write_varint(w, key.output_indexes.len() as u64)?;
                for offset in &key.output_indexes {
                    io::write_varint(w, u64::from(*offset))?;
                }
                io::write_point(w, &key.key_image)
            },
        }
    }

    pub fn read<R: Read>(r: &mut R) -> std::io::Result<Self> {
        match io::read_byte(r)? {
            TX_INPUT_TAG_BASE => {
                let block_index = io::read_varint(r)?;
                let block_index =
                    u32::try_from(block_index).map_err(|_| io::invalid_data("base input block index overflow"))?;
                Ok(TransactionInput::Base(BaseInput { block_index }))
            },
            TX_INPUT_TAG_KEY => {
                let amount = io::read_varint(r)?;
                let count = io::read_length(r)?;
                let mut output_indexes = Vec::with_capacity(count);
                for _ in 0..count {
                    let offset = io::read_varint(r)?;
                    output_indexes
                        .push(u32::try_from(offset).map_err(|_| io::invalid_data("output offset overflow"))?);
                }
                Ok(TransactionInput::Key(KeyInput {
                    amount,
                    output_indexes,
                    key_image: io::read_point(r)?,
                }))
            },
            _ => Err(io::invalid_data("unknown transaction input tag")),
        }
    }

    /// Ring size implied by the input; the width of its legacy signature row.
    pub fn ring_size(&self) -> usize {
        match self {
            TransactionInput::Base(_) => 0,
            TransactionInput::Key(key) => key.output_indexes.len(),
        }
    }
}

impl TransactionOutput {
    pub fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        io::write_varint(w, self.amount)?;
        match &self.target {
            TransactionOutputTarget::Key(key) => {
                w.write_all(&[TX_OUTPUT_TAG_KEY])?;
                io::write_point(w, &key.key)
            },
        }
    }

    pub fn read<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let amount = io::read_varint(r)?;
        match io::read_byte(r)? {
            TX_OUTPUT_TAG_KEY => Ok(TransactionOutput {
                amount,
                target: TransactionOutputTarget::Key(KeyOutput { key: io::read_point(r)? }),
            }),
            _ => Err(io::invalid_data("unknown transaction output tag")),
        }
    }

    pub fn key(&self) -> &PublicKey {
        match &self.target {
            TransactionOutputTarget::Key(key) => &key.key,
        }
    }
}

impl TransactionPrefix {
    pub fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        io::write_varint(w, u64::from(self.version))?;
        io::write_varint(w, self.unlock_time)?;
        io::write_varint(w, self.inputs.len() as u64)?;
        for input in &self.inputs {
            input.write(w)?;
        }
        io::write_varint(w, self.outputs.len() as u64)?;
        for output in &self.outputs {
            output.write(w)?;
        }
        io::write_varint(w, self.extra.len() as u64)?;
        w.write_all(&self.extra)
    }

    pub fn read<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let version = io::read_varint(r)?;
        let version = u8::try_from(version).map_err(|_| io::invalid_data("transaction version overflow"))?;
        let unlock_time = io::read_varint(r)?;
        let input_count = io::read_length(r)?;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(TransactionInput::read(r)?);
        }
        let output_count = io::read_length(r)?;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            outputs.push(TransactionOutput::read(r)?);
        }
        let extra_len = io::read_length(r)?;
        let mut extra = vec![0u8; extra_len];
        r.read_exact(&mut extra)?;
        Ok(TransactionPrefix {
            version,
            unlock_time,
            inputs,
            outputs,
            extra,
        })
    }

    pub fn serialized(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write(&mut buf).expect("write to Vec cannot fail");
        buf
    }

    /// The digest every input signature commits to.
    pub fn hash(&self) -> Hash {
        sha3(&self.serialized())
    }
}

impl RangeProof {
    fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        match self {
            RangeProof::Bulletproof(proof) => {
                w.write_all(&[RANGE_PROOF_TAG_BULLETPROOF])?;
                proof.write(w)
            },
            RangeProof::BulletproofPlus(proof) => {
                w.write_all(&[RANGE_PROOF_TAG_BULLETPROOF_PLUS])?;
                proof.write(w)
            },
        }
    }

    fn read<R: Read>(r: &mut R) -> std::io::Result<Self> {
        match io::read_byte(r)? {
            RANGE_PROOF_TAG_BULLETPROOF => Ok(RangeProof::Bulletproof(Bulletproof::read(r)?)),
            RANGE_PROOF_TAG_BULLETPROOF_PLUS => Ok(RangeProof::BulletproofPlus(BulletproofPlus::read(r)?)),
            _ => Err(io::invalid_data("unknown range proof tag")),
        }
    }
}

impl Transaction {
    pub fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        self.prefix.write(w)?;
        match &self.signatures {
            TransactionSignatures::Legacy(rows) => {
                // row widths are implied by the inputs; empty rows write nothing
                for row in rows {
                    for signature in row {
                        signature.write(w)?;
                    }
                }
                Ok(())
            },
            TransactionSignatures::RingCt(rct) => {
                for signature in &rct.signatures {
                    signature.write(w)?;
                }
                for commitment in &rct.pseudo_commitments {
                    io::write_point(w, commitment)?;
                }
                io::write_varint(w, rct.output_commitments.len() as u64)?;
                for commitment in &rct.output_commitments {
                    io::write_point(w, commitment)?;
                }
                rct.range_proof.write(w)
            },
        }
    }

    pub fn read<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let prefix = TransactionPrefix::read(r)?;
        let signatures = match prefix.version {
            TX_VERSION_LEGACY => {
                let mut rows = Vec::new();
                for input in &prefix.inputs {
                    let ring_size = input.ring_size();
                    if ring_size == 0 {
                        continue;
                    }
                    let mut row = Vec::with_capacity(ring_size);
                    for _ in 0..ring_size {
                        row.push(Signature::read(r)?);
                    }
                    rows.push(row);
                }
                TransactionSignatures::Legacy(rows)
            },
            TX_VERSION_RING_CT => {
                let mut signatures = Vec::with_capacity(prefix.inputs.len());
                for _ in 0..prefix.inputs.len() {
                    signatures.push(ClsagSignature::read(r)?);
                }
                let mut pseudo_commitments = Vec::with_capacity(prefix.inputs.len());
                for _ in 0..prefix.inputs.len() {
                    pseudo_commitments.push(io::read_point(r)?);
                }
                let commitment_count = io::read_length(r)?;
                let mut output_commitments = Vec::with_capacity(commitment_count);
                for _ in 0..commitment_count {
                    output_commitments.push(io::read_point(r)?);
                }
                TransactionSignatures::RingCt(RingCtSignatures {
                    signatures,
                    pseudo_commitments,
                    output_commitments,
                    range_proof: RangeProof::read(r)?,
                })
            },
            _ => return Err(io::invalid_data("unsupported transaction version")),
        };
        Ok(Transaction { prefix, signatures })
    }

    pub fn serialized(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write(&mut buf).expect("write to Vec cannot fail");
        buf
    }

    pub fn hash(&self) -> Hash {
        sha3(&self.serialized())
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self.prefix.inputs.first(), Some(TransactionInput::Base(_)))
    }

    /// Key images spent by this transaction, in input order.
    pub fn key_images(&self) -> Vec<KeyImage> {
        self.prefix
            .inputs
            .iter()
            .filter_map(|input| match input {
                TransactionInput::Key(key) => Some(key.key_image),
                TransactionInput::Base(_) => None,
            })
            .collect()
    }

    /// Sum of key input amounts; None on overflow.
    pub fn input_amount(&self) -> Option<u64> {
        self.prefix.inputs.iter().try_fold(0u64, |acc, input| match input {
            TransactionInput::Key(key) => acc.checked_add(key.amount),
            TransactionInput::Base(_) => Some(acc),
        })
    }

    /// Sum of output amounts; None on overflow.
    pub fn output_amount(&self) -> Option<u64> {
        self.prefix
            .outputs
            .iter()
            .try_fold(0u64, |acc, output| acc.checked_add(output.amount))
    }

    /// inputs - outputs when both sums are representable; coinbase fee is zero.
    pub fn fee(&self) -> Option<u64> {
        if self.is_coinbase() {
            return Some(0);
        }
        self.input_amount()?.checked_sub(self.output_amount()?)
    }
}
