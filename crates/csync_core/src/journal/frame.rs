//! Journal log framing.
//!
//! Every frame is self-checking:
//!
//! ```text
//! magic "CSJR" (4) | version u16 LE (2) | kind u8 (1) | len u32 LE (4) | payload | crc32 LE (4)
//! ```
//!
//! The CRC covers every byte before it.

use super::record::JournalRecord;
use crate::error::{CoreError, CoreResult};
use crate::path;

/// Magic bytes identifying a journal frame.
pub const JOURNAL_MAGIC: [u8; 4] = *b"CSJR";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + kind (1) + length (4)
const HEADER_SIZE: usize = 11;

const CRC_SIZE: usize = 4;

/// Kind byte of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Start of a generation.
    Generation = 1,
    /// Insert or replace a record.
    Upsert = 2,
    /// Drop a record.
    Remove = 3,
}

impl FrameKind {
    /// Converts a byte to a frame kind.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Generation),
            2 => Some(Self::Upsert),
            3 => Some(Self::Remove),
            _ => None,
        }
    }
}

/// A decoded journal frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Generation header.
    Generation(u64),
    /// Record insert or replace.
    Upsert(JournalRecord),
    /// Record removal by path.
    Remove(String),
}

impl Frame {
    /// Returns the frame kind.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Generation(_) => FrameKind::Generation,
            Frame::Upsert(_) => FrameKind::Upsert,
            Frame::Remove(_) => FrameKind::Remove,
        }
    }

    /// Encodes the frame with its envelope.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the record cannot be serialized or the
    /// payload exceeds 4 GiB.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = match self {
            Frame::Generation(generation) => generation.to_le_bytes().to_vec(),
            Frame::Upsert(record) => {
                let mut buf = Vec::new();
                ciborium::into_writer(record, &mut buf)
                    .map_err(|e| CoreError::codec(e.to_string()))?;
                buf
            }
            Frame::Remove(path) => path.as_bytes().to_vec(),
        };

        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::codec("journal frame payload too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&JOURNAL_MAGIC);
        data.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        data.push(self.kind() as u8);
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        Ok(data)
    }

    fn decode_payload(kind: FrameKind, payload: &[u8], offset: u64) -> CoreResult<Self> {
        match kind {
            FrameKind::Generation => {
                let bytes: [u8; 8] = payload.try_into().map_err(|_| {
                    CoreError::journal_corruption(offset, "generation payload must be 8 bytes")
                })?;
                Ok(Frame::Generation(u64::from_le_bytes(bytes)))
            }
            FrameKind::Upsert => {
                let record: JournalRecord = ciborium::from_reader(payload)
                    .map_err(|e| CoreError::journal_corruption(offset, e.to_string()))?;
                check_path(&record.path, offset)?;
                Ok(Frame::Upsert(record))
            }
            FrameKind::Remove => {
                let path = std::str::from_utf8(payload)
                    .map_err(|_| CoreError::journal_corruption(offset, "path is not UTF-8"))?;
                check_path(path, offset)?;
                Ok(Frame::Remove(path.to_string()))
            }
        }
    }
}

fn check_path(raw: &str, offset: u64) -> CoreResult<()> {
    match path::normalize(raw) {
        Ok(normalized) if normalized == raw => Ok(()),
        _ => Err(CoreError::journal_corruption(
            offset,
            format!("record path {raw:?} is not normalized"),
        )),
    }
}

/// Result of scanning a journal log.
#[derive(Debug, Default)]
pub struct Replay {
    /// Frames in log order.
    pub frames: Vec<Frame>,
    /// Length of the prefix made of complete, valid frames.
    pub valid_len: u64,
    /// Bytes after `valid_len` that form an incomplete frame.
    pub torn_tail: u64,
}

/// Scans `bytes` into frames.
///
/// An incomplete frame at the very end (a crash during append) ends the
/// scan and is reported in [`Replay::torn_tail`].
///
/// # Errors
///
/// Returns [`CoreError::JournalCorruption`] for bad magic, an unknown
/// version or kind, a CRC mismatch, or an undecodable payload.
pub fn replay(bytes: &[u8]) -> CoreResult<Replay> {
    let mut replay = Replay::default();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let offset = pos as u64;
        let rest = &bytes[pos..];

        if rest.len() < HEADER_SIZE {
            replay.torn_tail = rest.len() as u64;
            break;
        }

        if rest[0..4] != JOURNAL_MAGIC {
            return Err(CoreError::journal_corruption(offset, "bad frame magic"));
        }

        let version = u16::from_le_bytes([rest[4], rest[5]]);
        if version != JOURNAL_VERSION {
            return Err(CoreError::journal_corruption(
                offset,
                format!("unsupported journal version {version}"),
            ));
        }

        let kind = FrameKind::from_byte(rest[6]).ok_or_else(|| {
            CoreError::journal_corruption(offset, format!("unknown frame kind {}", rest[6]))
        })?;

        let len = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]) as usize;
        let frame_len = HEADER_SIZE + len + CRC_SIZE;
        if rest.len() < frame_len {
            replay.torn_tail = rest.len() as u64;
            break;
        }

        let body = &rest[..HEADER_SIZE + len];
        let stored = u32::from_le_bytes([
            rest[HEADER_SIZE + len],
            rest[HEADER_SIZE + len + 1],
            rest[HEADER_SIZE + len + 2],
            rest[HEADER_SIZE + len + 3],
        ]);
        let computed = compute_crc32(body);
        if stored != computed {
            return Err(CoreError::journal_corruption(
                offset,
                format!("crc mismatch: stored {stored:08x}, computed {computed:08x}"),
            ));
        }

        let frame = Frame::decode_payload(kind, &body[HEADER_SIZE..], offset)?;
        replay.frames.push(frame);
        pos += frame_len;
        replay.valid_len = pos as u64;
    }

    Ok(replay)
}

/// Computes the IEEE CRC-32 of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileEntry;

    fn record(path: &str) -> JournalRecord {
        let entry = FileEntry::file(path, 4, 1_700_000_000).with_identity(3, 1);
        JournalRecord::from_entries(&entry, &entry, None)
    }

    fn encode_all(frames: &[Frame]) -> Vec<u8> {
        frames.iter().flat_map(|f| f.encode().unwrap()).collect()
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn replay_reads_back_frames() {
        let frames = vec![
            Frame::Generation(3),
            Frame::Upsert(record("docs/a.txt")),
            Frame::Remove("docs/old.txt".into()),
        ];
        let bytes = encode_all(&frames);

        let replay = replay(&bytes).unwrap();
        assert_eq!(replay.frames, frames);
        assert_eq!(replay.valid_len, bytes.len() as u64);
        assert_eq!(replay.torn_tail, 0);
    }

    #[test]
    fn torn_tail_is_not_corruption() {
        let mut bytes = encode_all(&[Frame::Generation(1), Frame::Upsert(record("a"))]);
        let good_len = bytes.len();
        let partial = Frame::Upsert(record("b")).encode().unwrap();
        bytes.extend_from_slice(&partial[..partial.len() - 3]);

        let replay = replay(&bytes).unwrap();
        assert_eq!(replay.frames.len(), 2);
        assert_eq!(replay.valid_len, good_len as u64);
        assert_eq!(replay.torn_tail, (partial.len() - 3) as u64);
    }

    #[test]
    fn crc_mismatch_is_corruption() {
        let mut bytes = encode_all(&[Frame::Generation(1), Frame::Upsert(record("a"))]);
        let last = bytes.len() - 6;
        bytes[last] ^= 0x55;

        let err = replay(&bytes).unwrap_err();
        assert!(matches!(err, CoreError::JournalCorruption { offset: 23, .. }));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut bytes = encode_all(&[Frame::Generation(1)]);
        bytes[0] = b'X';
        assert!(replay(&bytes).unwrap_err().is_corruption());
    }

    #[test]
    fn unnormalized_path_is_corruption() {
        let bytes = encode_all(&[Frame::Remove("../escape".into())]);
        assert!(replay(&bytes).unwrap_err().is_corruption());
    }
}
