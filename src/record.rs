// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Record framing for segment files.
//!
//! # Format
//! All integers are little-endian.
//! ```text
//! [commit_version: u64][name_len: u32][name: utf-8][payload_len: u32][payload][checksum: 20]
//! ```
//!
//! The checksum is a 160-bit BLAKE3 (extendable output) digest over every
//! preceding byte of the same record. A record whose commit version is zero
//! marks the start of page padding: versions are 1-based, so zero never frames
//! a real record.

use std::fmt;
use std::io::{self, Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Bytes;

/// Length of the trailing digest.
pub const CHECKSUM_LEN: usize = 20;

/// Bytes of framing around the name and payload.
pub const RECORD_OVERHEAD: usize = 8 + 4 + 4 + CHECKSUM_LEN;

/// A committed record as stored in a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub commit_version: u64,
    pub stream: String,
    pub payload: Bytes,
}

/// Outcome of decoding one record.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Record(Record),
    /// Clean end of data: EOF on a record boundary, or page padding.
    End,
    /// Torn or damaged record. Everything from here on is discarded.
    Corrupt(CorruptReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptReason {
    Truncated,
    ZeroChecksum,
    ChecksumMismatch,
    InvalidName,
}

impl fmt::Display for CorruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorruptReason::Truncated => write!(f, "record truncated"),
            CorruptReason::ZeroChecksum => write!(f, "all-zero checksum (torn write)"),
            CorruptReason::ChecksumMismatch => write!(f, "checksum mismatch"),
            CorruptReason::InvalidName => write!(f, "stream name is not valid UTF-8"),
        }
    }
}

pub fn encoded_len(name_len: usize, payload_len: usize) -> usize {
    RECORD_OVERHEAD + name_len + payload_len
}

/// Frames one record, checksum included.
pub fn encode(commit_version: u64, stream: &str, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(stream.len(), payload.len()));
    buf.extend_from_slice(&commit_version.to_le_bytes());
    buf.extend_from_slice(&(stream.len() as u32).to_le_bytes());
    buf.extend_from_slice(stream.as_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);

    let checksum = digest(&buf);
    buf.extend_from_slice(&checksum);
    buf
}

/// 160-bit digest over `bytes`.
pub fn digest(bytes: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(bytes);
    let mut out = [0u8; CHECKSUM_LEN];
    hasher.finalize_xof().fill(&mut out);
    out
}

/// Decodes the next record from `reader`.
///
/// I/O errors other than a short read are returned as `Err`; short reads are
/// reported as [`Decoded::End`] (on a record boundary) or
/// [`CorruptReason::Truncated`].
pub fn decode<R: Read>(reader: &mut R) -> io::Result<Decoded> {
    let mut head = [0u8; 8];
    match read_up_to(reader, &mut head)? {
        0 => return Ok(Decoded::End),
        8 => {}
        _ => return Ok(Decoded::Corrupt(CorruptReason::Truncated)),
    }
    let commit_version = (&head[..]).read_u64::<LittleEndian>()?;
    if commit_version == 0 {
        return Ok(Decoded::End);
    }

    let mut framed = Vec::with_capacity(64);
    framed.extend_from_slice(&head);

    let name_len = match read_len(reader, &mut framed)? {
        Some(len) => len,
        None => return Ok(Decoded::Corrupt(CorruptReason::Truncated)),
    };
    let name_start = framed.len();
    if !read_exact_into(reader, &mut framed, name_len)? {
        return Ok(Decoded::Corrupt(CorruptReason::Truncated));
    }
    let name_end = framed.len();

    let payload_len = match read_len(reader, &mut framed)? {
        Some(len) => len,
        None => return Ok(Decoded::Corrupt(CorruptReason::Truncated)),
    };
    let payload_start = framed.len();
    if !read_exact_into(reader, &mut framed, payload_len)? {
        return Ok(Decoded::Corrupt(CorruptReason::Truncated));
    }

    let mut stored = [0u8; CHECKSUM_LEN];
    if read_up_to(reader, &mut stored)? != CHECKSUM_LEN {
        return Ok(Decoded::Corrupt(CorruptReason::Truncated));
    }
    if stored.iter().all(|b| *b == 0) {
        return Ok(Decoded::Corrupt(CorruptReason::ZeroChecksum));
    }
    if digest(&framed) != stored {
        return Ok(Decoded::Corrupt(CorruptReason::ChecksumMismatch));
    }

    let stream = match std::str::from_utf8(&framed[name_start..name_end]) {
        Ok(name) => name.to_string(),
        Err(_) => return Ok(Decoded::Corrupt(CorruptReason::InvalidName)),
    };
    let payload = Bytes::copy_from_slice(&framed[payload_start..]);

    Ok(Decoded::Record(Record {
        commit_version,
        stream,
        payload,
    }))
}

/// Result of decoding a whole segment image.
#[derive(Debug)]
pub struct SegmentScan {
    pub records: Vec<Record>,
    /// Bytes covered by valid records.
    pub valid_len: usize,
    pub stop: ScanStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStop {
    End,
    Corrupt { offset: usize, reason: CorruptReason },
}

/// Decodes records from a segment image until padding, EOF or damage.
pub fn scan_segment(bytes: &[u8]) -> io::Result<SegmentScan> {
    let mut cursor = Cursor::new(bytes);
    let mut records = Vec::new();

    loop {
        let offset = cursor.position() as usize;
        match decode(&mut cursor)? {
            Decoded::Record(record) => records.push(record),
            Decoded::End => {
                return Ok(SegmentScan {
                    records,
                    valid_len: offset,
                    stop: ScanStop::End,
                })
            }
            Decoded::Corrupt(reason) => {
                return Ok(SegmentScan {
                    records,
                    valid_len: offset,
                    stop: ScanStop::Corrupt { offset, reason },
                })
            }
        }
    }
}

fn read_len<R: Read>(reader: &mut R, framed: &mut Vec<u8>) -> io::Result<Option<usize>> {
    let mut buf = [0u8; 4];
    if read_up_to(reader, &mut buf)? != 4 {
        return Ok(None);
    }
    framed.extend_from_slice(&buf);
    Ok(Some((&buf[..]).read_u32::<LittleEndian>()? as usize))
}

/// Appends exactly `len` bytes to `out`. Returns false on a short read.
/// Reads through `take` so a damaged length cannot force a huge allocation.
fn read_exact_into<R: Read>(reader: &mut R, out: &mut Vec<u8>, len: usize) -> io::Result<bool> {
    let start = out.len();
    let read = reader.take(len as u64).read_to_end(out)?;
    if read != len {
        out.truncate(start);
        return Ok(false);
    }
    Ok(true)
}

/// Fills as much of `buf` as the reader allows, returning the byte count.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
