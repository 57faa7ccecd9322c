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

//! Bulk block replay to and from a flat file of `height len raw` records (ASCII numbers,
//! single-space separators, trailing whitespace terminates). Heights are strictly monotonic
//! starting at one; genesis is never exported because every chain derives it.
//!
//! Export fans serialization out over producer threads that hand finished batches to a
//! single writer through a bounded channel, so the file is written strictly in order while
//! the expensive serialization saturates the cores.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
    sync::{
        atomic::{AtomicU32, Ordering},
        mpsc,
    },
};

use log::{debug, info};
use thiserror::Error;

use super::{core::Core, error::AddBlockError};
use crate::blocks::RawBlock;

const LOG_TARGET: &str = "c::chain_storage::import_export";

/// Heights serialized per producer batch.
const EXPORT_BATCH_SIZE: u32 = 64;

/// Batches the writer may buffer before producers block.
const EXPORT_CHANNEL_DEPTH: usize = 8;

#[derive(Debug, Error)]
pub enum ImportExportError {
    #[error("File I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed record near height {0}")]
    MalformedRecord(u32),
    #[error("Record heights must be strictly monotonic starting at 1, found {0}")]
    NonMonotonicHeight(u32),
    #[error("Block at height {height} was rejected: {error}")]
    Rejected { height: u32, error: AddBlockError },
}

/// Export main-chain blocks `1..=top` into `path`. Returns the number of exported blocks.
pub fn export_blocks(core: &Core, path: &Path, producer_threads: usize) -> Result<u64, ImportExportError> {
    let (top, _) = core.top_block();
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    if top == 0 {
        writer.flush()?;
        return Ok(0);
    }

    let producer_threads = producer_threads.max(1);
    let batch_count = (top + EXPORT_BATCH_SIZE - 1) / EXPORT_BATCH_SIZE;
    let next_batch = AtomicU32::new(0);
    let (sender, receiver) = mpsc::sync_channel::<(u32, Vec<u8>)>(EXPORT_CHANNEL_DEPTH);

    std::thread::scope(|scope| -> Result<(), ImportExportError> {
        for _ in 0..producer_threads {
            let sender = sender.clone();
            let next_batch = &next_batch;
            scope.spawn(move || loop {
                let batch = next_batch.fetch_add(1, Ordering::SeqCst);
                if batch >= batch_count {
                    break;
                }
                let first = batch * EXPORT_BATCH_SIZE + 1;
                let last = (first + EXPORT_BATCH_SIZE - 1).min(top);
                let mut buffer = Vec::new();
                for height in first..=last {
                    let Some(raw) = core.raw_block_at(height) else {
                        break;
                    };
                    let bytes = raw.serialized();
                    buffer.extend_from_slice(height.to_string().as_bytes());
                    buffer.push(b' ');
                    buffer.extend_from_slice(bytes.len().to_string().as_bytes());
                    buffer.push(b' ');
                    buffer.extend_from_slice(&bytes);
                    buffer.push(b' ');
                }
                if sender.send((batch, buffer)).is_err() {
                    break;
                }
            });
        }
        drop(sender);

        // single writer reassembles batch order
        let mut pending = std::collections::BTreeMap::new();
        let mut expected = 0u32;
        for (batch, buffer) in receiver {
            pending.insert(batch, buffer);
            while let Some(buffer) = pending.remove(&expected) {
                writer.write_all(&buffer)?;
                expected += 1;
            }
        }
        debug_assert!(pending.is_empty());
        writer.flush()?;
        Ok(())
    })?;

    info!(target: LOG_TARGET, "Exported {top} blocks to {}", path.display());
    Ok(u64::from(top))
}

fn read_ascii_number<R: Read>(reader: &mut R) -> Result<Option<u64>, std::io::Error> {
    let mut value: Option<u64> = None;
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte)? {
            0 => return Ok(value),
            _ => match byte[0] {
                b'0'..=b'9' => {
                    let digit = u64::from(byte[0] - b'0');
                    value = Some(value.unwrap_or(0).saturating_mul(10).saturating_add(digit));
                },
                b' ' | b'\n' | b'\r' | b'\t' => {
                    if value.is_some() {
                        return Ok(value);
                    }
                    // leading whitespace, keep scanning
                },
                _ => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "unexpected byte in record header",
                    ))
                },
            },
        }
    }
}

/// Replay blocks from `path` into the chain. With `perform_expensive_validation` false the
/// proof-of-work and signature checks are skipped, trusting the source. Returns the number
/// of imported blocks.
pub fn import_blocks(core: &Core, path: &Path, perform_expensive_validation: bool) -> Result<u64, ImportExportError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut imported = 0u64;
    let mut last_height = 0u32;

    loop {
        let Some(height) = read_ascii_number(&mut reader).map_err(|_| ImportExportError::MalformedRecord(last_height))?
        else {
            break;
        };
        let height = u32::try_from(height).map_err(|_| ImportExportError::MalformedRecord(last_height))?;
        if height != last_height + 1 {
            return Err(ImportExportError::NonMonotonicHeight(height));
        }

        let length = read_ascii_number(&mut reader)
            .map_err(|_| ImportExportError::MalformedRecord(height))?
            .ok_or(ImportExportError::MalformedRecord(height))?;
        let mut bytes = vec![0u8; length as usize];
        reader
            .read_exact(&mut bytes)
            .map_err(|_| ImportExportError::MalformedRecord(height))?;
        // the record separator
        let mut separator = [0u8; 1];
        let read = reader.read(&mut separator)?;
        if read == 1 && !separator[0].is_ascii_whitespace() {
            return Err(ImportExportError::MalformedRecord(height));
        }

        let raw = RawBlock::read(&mut bytes.as_slice()).map_err(|_| ImportExportError::MalformedRecord(height))?;
        let result = if perform_expensive_validation {
            core.add_block(raw)
        } else {
            core.add_block_unchecked(raw)
        };
        match result {
            Ok(_) => {
                imported += 1;
                last_height = height;
                if height % 1_000 == 0 {
                    debug!(target: LOG_TARGET, "Imported up to height {height}");
                }
            },
            Err(error) => return Err(ImportExportError::Rejected { height, error }),
        }
    }

    info!(target: LOG_TARGET, "Imported {imported} blocks from {}", path.display());
    Ok(imported)
}
