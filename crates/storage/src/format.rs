//! On-disk entry file format.
//!
//! Each queue entry is one file. The file wraps the already-encoded
//! operation payload in a small frame so a torn or mangled write is
//! detected at read time instead of surfacing as garbage downstream.
//!
//! # Layout
//!
//! ```text
//! ┌───────────┬─────────┬────────────────┬──────────┬─────────┬──────────┐
//! │ Magic (4) │ Ver (1) │ EnqueuedAt (8) │ Len (4)  │ Payload │ CRC32 (4)│
//! └───────────┴─────────┴────────────────┴──────────┴─────────┴──────────┘
//! ```
//!
//! All integers little-endian. The CRC covers everything before it.

use thiserror::Error;

/// Magic bytes identifying an entry file: "SPQE"
pub const ENTRY_MAGIC: [u8; 4] = *b"SPQE";

/// Current entry file format version.
pub const ENTRY_FORMAT_VERSION: u8 = 1;

/// Fixed bytes before the payload.
const ENTRY_HEADER_SIZE: usize = 4 + 1 + 8 + 4;

/// CRC32 trailer size.
const TRAILER_SIZE: usize = 4;

/// An entry file that cannot be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntryFormatError {
    /// File does not start with the entry magic.
    #[error("bad entry file magic")]
    BadMagic,

    /// File was written by an unknown format version.
    #[error("unsupported entry file version {0}")]
    UnsupportedVersion(u8),

    /// File ends before the frame is complete.
    #[error("truncated entry file: expected {expected} bytes, found {found}")]
    Truncated {
        /// Bytes the frame declares.
        expected: usize,
        /// Bytes present.
        found: usize,
    },

    /// CRC trailer does not match the frame.
    #[error("entry file checksum mismatch")]
    ChecksumMismatch,
}

/// Frame a payload into entry file bytes.
pub fn encode_entry(payload: &[u8], enqueued_at_ms: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ENTRY_HEADER_SIZE + payload.len() + TRAILER_SIZE);
    buf.extend_from_slice(&ENTRY_MAGIC);
    buf.push(ENTRY_FORMAT_VERSION);
    buf.extend_from_slice(&enqueued_at_ms.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Decode entry file bytes into `(enqueued_at_ms, payload)`.
///
/// # Errors
///
/// Returns an [`EntryFormatError`] for any frame violation; never
/// returns a partial payload.
pub fn decode_entry(bytes: &[u8]) -> Result<(u64, Vec<u8>), EntryFormatError> {
    if bytes.len() < ENTRY_HEADER_SIZE + TRAILER_SIZE {
        return Err(EntryFormatError::Truncated {
            expected: ENTRY_HEADER_SIZE + TRAILER_SIZE,
            found: bytes.len(),
        });
    }

    let (frame, trailer) = bytes.split_at(bytes.len() - TRAILER_SIZE);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if stored != crc32fast::hash(frame) {
        return Err(EntryFormatError::ChecksumMismatch);
    }

    if frame[0..4] != ENTRY_MAGIC {
        return Err(EntryFormatError::BadMagic);
    }
    let version = frame[4];
    if version != ENTRY_FORMAT_VERSION {
        return Err(EntryFormatError::UnsupportedVersion(version));
    }

    let enqueued_at_ms = u64::from_le_bytes(
        frame[5..13].try_into().map_err(|_| EntryFormatError::Truncated {
            expected: ENTRY_HEADER_SIZE,
            found: frame.len(),
        })?,
    );
    let len = u32::from_le_bytes([frame[13], frame[14], frame[15], frame[16]]) as usize;
    let payload = &frame[ENTRY_HEADER_SIZE..];
    if payload.len() != len {
        return Err(EntryFormatError::Truncated {
            expected: ENTRY_HEADER_SIZE + len + TRAILER_SIZE,
            found: bytes.len(),
        });
    }

    Ok((enqueued_at_ms, payload.to_vec()))
}
