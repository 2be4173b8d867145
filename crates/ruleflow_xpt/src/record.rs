//! Checkpoint record framing.
//!
//! Each record is stored as (all integers little-endian):
//!
//! ```text
//! key_len u32 | value_len u32 | flags u8 | sequence u64 | key | value | crc32 u32
//! ```
//!
//! The CRC covers everything before it. Records are self-delimiting, so the
//! log can be replayed front to back without a manifest.

use ruleflow_core::{CoreError, CoreResult, Sequence};
use serde::{Deserialize, Serialize};

use crate::storage::LogStorage;

/// Bytes in the fixed record header
pub const HEADER_LEN: usize = 4 + 4 + 1 + 8;

/// Bytes in the checksum trailer
pub const TRAILER_LEN: usize = 4;

/// Longest key or value a record can hold
pub const MAX_FIELD_LEN: usize = u32::MAX as usize;

const FLAG_PERSIST: u8 = 0b01;
const FLAG_REPLACE: u8 = 0b10;
const KNOWN_FLAGS: u8 = FLAG_PERSIST | FLAG_REPLACE;

/// Durability requested for a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Persistence {
    /// Synced to durable storage before the write is acknowledged
    Persist,
    /// Indexed immediately, durable whenever the flush policy gets to it
    Transient,
}

/// Decoded fixed-size header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Key length in bytes
    pub key_len: u32,
    /// Value length in bytes
    pub value_len: u32,
    /// Raw flag bits
    pub flags: u8,
    /// Sequence number assigned at write time
    pub sequence: Sequence,
}

impl RecordHeader {
    /// Parse a header
    ///
    /// # Errors
    ///
    /// Returns `FrameError::BadFlags` for unknown flag bits
    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Result<Self, FrameError> {
        let key_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let value_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let flags = bytes[8];
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&bytes[9..17]);

        if flags & !KNOWN_FLAGS != 0 {
            return Err(FrameError::BadFlags(flags));
        }

        Ok(Self {
            key_len,
            value_len,
            flags,
            sequence: Sequence::from_raw(u64::from_le_bytes(seq)),
        })
    }

    /// Full frame length including header and trailer
    #[must_use]
    pub const fn frame_len(&self) -> u64 {
        (HEADER_LEN + TRAILER_LEN) as u64 + self.key_len as u64 + self.value_len as u64
    }

    /// Persistence flag of the record
    #[must_use]
    pub const fn persistence(&self) -> Persistence {
        if self.flags & FLAG_PERSIST != 0 {
            Persistence::Persist
        } else {
            Persistence::Transient
        }
    }

    /// Whether the record was written with replacement allowed
    #[must_use]
    pub const fn replace(&self) -> bool {
        self.flags & FLAG_REPLACE != 0
    }
}

/// A complete checkpoint record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Lookup key
    pub key: Vec<u8>,
    /// Stored value
    pub value: Vec<u8>,
    /// Durability flag
    pub persistence: Persistence,
    /// Written with replacement allowed
    pub replace: bool,
    /// Sequence number
    pub sequence: Sequence,
}

impl Record {
    /// Frame length for a key/value pair
    #[must_use]
    pub const fn frame_len(key_len: usize, value_len: usize) -> u64 {
        (HEADER_LEN + TRAILER_LEN) as u64 + key_len as u64 + value_len as u64
    }

    /// Encode into a frame
    ///
    /// # Errors
    ///
    /// Returns `Command` if key or value exceed [`MAX_FIELD_LEN`], and
    /// `OutOfMemory` if the frame buffer cannot be allocated
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        encode_frame(
            &self.key,
            &self.value,
            self.persistence,
            self.replace,
            self.sequence,
        )
    }
}

/// Encode a frame without building a [`Record`] first
///
/// # Errors
///
/// See [`Record::encode`]
pub fn encode_frame(
    key: &[u8],
    value: &[u8],
    persistence: Persistence,
    replace: bool,
    sequence: Sequence,
) -> CoreResult<Vec<u8>> {
    let key_len = u32::try_from(key.len()).map_err(|_| {
        CoreError::command(format!("key of {} bytes exceeds {}", key.len(), MAX_FIELD_LEN))
    })?;
    let value_len = u32::try_from(value.len()).map_err(|_| {
        CoreError::command(format!("value of {} bytes exceeds {}", value.len(), MAX_FIELD_LEN))
    })?;

    let mut flags = 0u8;
    if persistence == Persistence::Persist {
        flags |= FLAG_PERSIST;
    }
    if replace {
        flags |= FLAG_REPLACE;
    }

    let total = HEADER_LEN + key.len() + value.len() + TRAILER_LEN;
    let mut frame = Vec::new();
    frame.try_reserve_exact(total)?;
    frame.extend_from_slice(&key_len.to_le_bytes());
    frame.extend_from_slice(&value_len.to_le_bytes());
    frame.push(flags);
    frame.extend_from_slice(&sequence.as_u64().to_le_bytes());
    frame.extend_from_slice(key);
    frame.extend_from_slice(value);
    let crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Why a frame could not be read
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Storage ends before the frame does
    #[error("frame truncated: need {needed} bytes, {available} available")]
    Torn {
        /// Bytes the frame claims
        needed: u64,
        /// Bytes left in storage
        available: u64,
    },

    /// Checksum does not match the contents
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    Checksum {
        /// Checksum in the trailer
        stored: u32,
        /// Checksum of the bytes read
        computed: u32,
    },

    /// Unknown flag bits set
    #[error("unknown flag bits {0:#04x}")]
    BadFlags(u8),

    /// Frame buffer could not be allocated
    #[error("frame of {0} bytes cannot be allocated")]
    TooLarge(u64),

    /// Storage read failed
    #[error("storage read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the bytes at this position are unusable (as opposed to the
    /// storage being unreadable)
    #[must_use]
    pub const fn is_damage(&self) -> bool {
        !matches!(self, Self::Io(_))
    }

    /// Convert into a core error, tagging the record offset
    #[must_use]
    pub fn at(self, offset: u64) -> CoreError {
        match self {
            Self::Io(source) => CoreError::io(format!("read record at offset {}", offset), source),
            Self::TooLarge(len) => CoreError::OutOfMemory {
                resource: format!("record buffer of {} bytes", len),
            },
            other => CoreError::Corrupt {
                offset,
                reason: other.to_string(),
            },
        }
    }
}

/// Read and verify the header at `offset`
///
/// # Errors
///
/// Returns `Torn` if fewer than [`HEADER_LEN`] bytes remain before `end`
pub fn read_header<S: LogStorage + ?Sized>(
    storage: &S,
    offset: u64,
    end: u64,
) -> Result<RecordHeader, FrameError> {
    let available = end.saturating_sub(offset);
    if available < HEADER_LEN as u64 {
        return Err(FrameError::Torn {
            needed: HEADER_LEN as u64,
            available,
        });
    }
    let mut bytes = [0u8; HEADER_LEN];
    storage.read_at(offset, &mut bytes)?;
    RecordHeader::parse(&bytes)
}

/// Read a whole frame at `offset` and check its CRC
///
/// Returns the header and the raw frame bytes.
///
/// # Errors
///
/// Returns a [`FrameError`] describing what is wrong with the frame
pub fn read_frame<S: LogStorage + ?Sized>(
    storage: &S,
    offset: u64,
    end: u64,
) -> Result<(RecordHeader, Vec<u8>), FrameError> {
    let header = read_header(storage, offset, end)?;
    let frame_len = header.frame_len();
    let available = end.saturating_sub(offset);
    if available < frame_len {
        return Err(FrameError::Torn {
            needed: frame_len,
            available,
        });
    }

    let len = usize::try_from(frame_len).map_err(|_| FrameError::TooLarge(frame_len))?;
    let mut frame = Vec::new();
    frame
        .try_reserve_exact(len)
        .map_err(|_| FrameError::TooLarge(frame_len))?;
    frame.resize(len, 0);
    storage.read_at(offset, &mut frame)?;

    let body_len = len - TRAILER_LEN;
    let mut trailer = [0u8; TRAILER_LEN];
    trailer.copy_from_slice(&frame[body_len..]);
    let stored = u32::from_le_bytes(trailer);
    let computed = crc32fast::hash(&frame[..body_len]);
    if stored != computed {
        return Err(FrameError::Checksum { stored, computed });
    }

    Ok((header, frame))
}

/// Key bytes inside a verified frame
#[must_use]
pub fn frame_key<'a>(header: &RecordHeader, frame: &'a [u8]) -> &'a [u8] {
    &frame[HEADER_LEN..HEADER_LEN + header.key_len as usize]
}

/// Turn a verified frame into its value bytes, reusing the allocation
#[must_use]
pub fn frame_into_value(header: &RecordHeader, mut frame: Vec<u8>) -> Vec<u8> {
    let value_start = HEADER_LEN + header.key_len as usize;
    frame.truncate(value_start + header.value_len as usize);
    frame.drain(..value_start);
    frame
}

/// Turn a verified frame into a full [`Record`]
#[must_use]
pub fn frame_into_record(header: &RecordHeader, frame: Vec<u8>) -> Record {
    let key = frame_key(header, &frame).to_vec();
    Record {
        key,
        value: frame_into_value(header, frame),
        persistence: header.persistence(),
        replace: header.replace(),
        sequence: header.sequence,
    }
}
