//! Wire format for commit operations at rest.
//!
//! Every operation pushed through a channel is encoded to bytes before it
//! reaches storage, and decoded again by the consumer. The format is fixed
//! and versioned so producer and consumer processes compiled from different
//! builds stay wire-compatible, and the operation tags are explicit
//! integers rather than anything dependent on registration order.
//!
//! # Layout
//!
//! ```text
//! ┌───────────┬─────────┬───────┬─────────┬──────────────────┬──────────┐
//! │ Magic (2) │ Ver (1) │ Tag(1)│ Flags(1)│ Body (variable)  │ CRC32 (4)│
//! └───────────┴─────────┴───────┴─────────┴──────────────────┴──────────┘
//!
//! Body (Add):    reference + metadata + content
//! Body (Delete): reference + metadata
//! ```
//!
//! Strings and byte blobs are length-prefixed (4-byte little-endian length
//! + bytes). Metadata is a count of pairs, each pair a key followed by a
//! count of values. Content larger than [`COMPRESSION_THRESHOLD`] is
//! stored as a zstd frame and flagged; compression is an encoding detail
//! invisible to producers and committers. The CRC covers everything before
//! the trailer.

use crate::types::{AddOperation, CommitOperation, DeleteOperation, Metadata};
use thiserror::Error;

/// Magic bytes identifying an encoded operation: "SP"
pub const CODEC_MAGIC: [u8; 2] = *b"SP";

/// Current wire format version.
pub const CODEC_FORMAT_VERSION: u8 = 1;

/// Type tag for [`CommitOperation::Add`].
pub const TAG_ADD: u8 = 1;

/// Type tag for [`CommitOperation::Delete`].
pub const TAG_DELETE: u8 = 2;

/// Flag bit: content field is a zstd frame.
const FLAG_CONTENT_COMPRESSED: u8 = 0b0000_0001;

/// Content at or above this size is compressed transparently.
pub const COMPRESSION_THRESHOLD: usize = 4096;

/// zstd compression level for large content.
const COMPRESSION_LEVEL: i32 = 3;

/// Fixed bytes before the body: magic + version + tag + flags.
const HEADER_SIZE: usize = 5;

/// CRC32 trailer size.
const TRAILER_SIZE: usize = 4;

/// Errors produced while encoding or decoding an operation.
///
/// A decode error means the payload is un-decodable as a whole; decoding
/// never partially constructs an operation. The consumer quarantines such
/// entries rather than crashing.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload does not start with the codec magic bytes.
    #[error("bad magic bytes in encoded operation")]
    BadMagic,

    /// Payload was written by an unknown format version.
    #[error("unsupported wire format version {0}")]
    UnsupportedVersion(u8),

    /// Payload carries an operation tag this build does not know.
    #[error("unknown operation tag {0}")]
    UnknownTag(u8),

    /// Payload ends before a field is complete.
    #[error("truncated payload: needed {needed} more bytes, had {remaining}")]
    Truncated {
        /// Bytes the next field required.
        needed: usize,
        /// Bytes actually remaining.
        remaining: usize,
    },

    /// Payload parsed but left unconsumed bytes before the trailer.
    #[error("{0} trailing bytes after operation body")]
    TrailingBytes(usize),

    /// CRC trailer does not match the payload.
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// CRC stored in the trailer.
        stored: u32,
        /// CRC computed over the payload.
        computed: u32,
    },

    /// A string field holds invalid UTF-8.
    #[error("invalid UTF-8 in {0} field")]
    InvalidUtf8(&'static str),

    /// Compressing or decompressing the content field failed.
    #[error("content compression error: {0}")]
    Compression(String),
}

/// Encode an operation to its wire form.
///
/// # Errors
///
/// Returns [`CodecError::Compression`] if zstd fails on large content;
/// all other paths are infallible.
pub fn encode(op: &CommitOperation) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + 64);
    buf.extend_from_slice(&CODEC_MAGIC);
    buf.push(CODEC_FORMAT_VERSION);

    match op {
        CommitOperation::Add(add) => {
            let (content, compressed) = maybe_compress(&add.content)?;
            buf.push(TAG_ADD);
            buf.push(if compressed { FLAG_CONTENT_COMPRESSED } else { 0 });
            put_str(&mut buf, &add.reference);
            put_metadata(&mut buf, &add.metadata);
            put_bytes(&mut buf, &content);
        }
        CommitOperation::Delete(del) => {
            buf.push(TAG_DELETE);
            buf.push(0);
            put_str(&mut buf, &del.reference);
            put_metadata(&mut buf, &del.metadata);
        }
    }

    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Decode an operation from its wire form.
///
/// # Errors
///
/// Fails on bad magic, unknown version or tag, truncation, CRC mismatch,
/// invalid UTF-8, or a corrupt zstd frame.
pub fn decode(bytes: &[u8]) -> Result<CommitOperation, CodecError> {
    if bytes.len() < HEADER_SIZE + TRAILER_SIZE {
        return Err(CodecError::Truncated {
            needed: HEADER_SIZE + TRAILER_SIZE,
            remaining: bytes.len(),
        });
    }

    let (body, trailer) = bytes.split_at(bytes.len() - TRAILER_SIZE);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(CodecError::ChecksumMismatch { stored, computed });
    }

    if body[0..2] != CODEC_MAGIC {
        return Err(CodecError::BadMagic);
    }
    let version = body[2];
    if version != CODEC_FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let tag = body[3];
    let flags = body[4];

    let mut rdr = Reader::new(&body[HEADER_SIZE..]);
    let op = match tag {
        TAG_ADD => {
            let reference = get_str(&mut rdr, "reference")?;
            let metadata = get_metadata(&mut rdr)?;
            let raw = get_bytes(&mut rdr)?;
            let content = if flags & FLAG_CONTENT_COMPRESSED != 0 {
                zstd::decode_all(raw).map_err(|e| CodecError::Compression(e.to_string()))?
            } else {
                raw.to_vec()
            };
            CommitOperation::Add(AddOperation {
                reference,
                content,
                metadata,
            })
        }
        TAG_DELETE => {
            let reference = get_str(&mut rdr, "reference")?;
            let metadata = get_metadata(&mut rdr)?;
            CommitOperation::Delete(DeleteOperation {
                reference,
                metadata,
            })
        }
        other => return Err(CodecError::UnknownTag(other)),
    };

    if rdr.remaining() != 0 {
        return Err(CodecError::TrailingBytes(rdr.remaining()));
    }
    Ok(op)
}

fn maybe_compress(content: &[u8]) -> Result<(Vec<u8>, bool), CodecError> {
    if content.len() < COMPRESSION_THRESHOLD {
        return Ok((content.to_vec(), false));
    }
    let frame = zstd::encode_all(content, COMPRESSION_LEVEL)
        .map_err(|e| CodecError::Compression(e.to_string()))?;
    Ok((frame, true))
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_bytes(buf, s.as_bytes());
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn put_metadata(buf: &mut Vec<u8>, metadata: &Metadata) {
    buf.extend_from_slice(&(metadata.len() as u32).to_le_bytes());
    for (key, values) in metadata.iter() {
        put_str(buf, key);
        buf.extend_from_slice(&(values.len() as u32).to_le_bytes());
        for value in values {
            put_str(buf, value);
        }
    }
}

fn get_str(rdr: &mut Reader<'_>, field: &'static str) -> Result<String, CodecError> {
    let bytes = get_bytes(rdr)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8(field))
}

fn get_bytes<'a>(rdr: &mut Reader<'a>) -> Result<&'a [u8], CodecError> {
    let len = rdr.read_u32()? as usize;
    rdr.read_exact(len)
}

fn get_metadata(rdr: &mut Reader<'_>) -> Result<Metadata, CodecError> {
    let pairs = rdr.read_u32()?;
    let mut metadata = Metadata::new();
    for _ in 0..pairs {
        let key = get_str(rdr, "metadata key")?;
        let count = rdr.read_u32()?;
        for _ in 0..count {
            let value = get_str(rdr, "metadata value")?;
            metadata.add(key.clone(), value);
        }
    }
    Ok(metadata)
}

/// Bounds-checked cursor over an encoded body.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.read_exact(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_exact(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}
