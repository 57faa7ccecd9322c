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

//! Tight binary wire helpers shared by every serialized structure: varints for lengths and
//! integers, raw 32-byte items, and canonical scalar / point parsing.

use std::io::{self, Read, Write};

use curve25519_dalek::scalar::Scalar;
use integer_encoding::{VarIntReader, VarIntWriter};

use crate::{ed25519::CompressedPoint, hashing::Hash};

/// Guard applied to every length prefix read off the wire before a buffer is reserved.
pub const MAX_WIRE_VEC_LEN: u64 = 100_000;

pub fn write_varint<W: Write>(w: &mut W, value: u64) -> io::Result<()> {
    w.write_varint(value)?;
    Ok(())
}

pub fn read_varint<R: Read>(r: &mut R) -> io::Result<u64> {
    r.read_varint()
}

/// Read a varint length prefix, bounded so malformed input cannot trigger a huge allocation.
pub fn read_length<R: Read>(r: &mut R) -> io::Result<usize> {
    let len = read_varint(r)?;
    if len > MAX_WIRE_VEC_LEN {
        return Err(invalid_data("length prefix exceeds wire limit"));
    }
    Ok(len as usize)
}

pub fn write_bytes32<W: Write>(w: &mut W, bytes: &[u8; 32]) -> io::Result<()> {
    w.write_all(bytes)
}

pub fn read_bytes32<R: Read>(r: &mut R) -> io::Result<[u8; 32]> {
    let mut bytes = [0u8; 32];
    r.read_exact(&mut bytes)?;
    Ok(bytes)
}

pub fn write_point<W: Write>(w: &mut W, point: &CompressedPoint) -> io::Result<()> {
    w.write_all(point.as_bytes())
}

pub fn read_point<R: Read>(r: &mut R) -> io::Result<CompressedPoint> {
    Ok(CompressedPoint(read_bytes32(r)?))
}

pub fn write_hash<W: Write>(w: &mut W, hash: &Hash) -> io::Result<()> {
    w.write_all(hash.as_bytes())
}

pub fn read_hash<R: Read>(r: &mut R) -> io::Result<Hash> {
    Ok(Hash(read_bytes32(r)?))
}

pub fn write_scalar<W: Write>(w: &mut W, scalar: &Scalar) -> io::Result<()> {
    w.write_all(scalar.as_bytes())
}

/// Read a scalar, rejecting non-canonical encodings.
pub fn read_scalar<R: Read>(r: &mut R) -> io::Result<Scalar> {
    let bytes = read_bytes32(r)?;
    Option::<Scalar>::from(Scalar::from_canonical_bytes(bytes))
        .ok_or_else(|| invalid_data("scalar is not canonically reduced"))
}

pub fn write_bool<W: Write>(w: &mut W, value: bool) -> io::Result<()> {
    w.write_all(&[u8::from(value)])
}

pub fn read_bool<R: Read>(r: &mut R) -> io::Result<bool> {
    Ok(read_byte(r)? != 0)
}

pub fn read_byte<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut byte = [0u8; 1];
    r.read_exact(&mut byte)?;
    Ok(byte[0])
}

pub fn invalid_data(message: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn varint_round_trip() {
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value).unwrap();
            assert_eq!(read_varint(&mut buf.as_slice()).unwrap(), value);
        }
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut buf = Vec::new();
        write_varint(&mut buf, MAX_WIRE_VEC_LEN + 1).unwrap();
        assert!(read_length(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn non_canonical_scalar_is_rejected() {
        let mut bytes = [0xffu8; 32];
        bytes[31] = 0x7f;
        assert!(read_scalar(&mut bytes.as_slice()).is_err());
    }
}
