//! Append-only commit log.
//!
//! Every committed transaction is appended as one frame. Opening a store
//! replays the frames in order.
//!
//! # Frame Format
//!
//! ```text
//! +----------+------------------------------------------+
//! | 0-3      | payload_length (4 bytes, little-endian)  |
//! | 4-7      | CRC32 of payload (4 bytes)               |
//! | 8-N      | payload: protobuf `CommitRecord`         |
//! +----------+------------------------------------------+
//! ```
//!
//! A frame that is short or fails its checksum marks the end of the log.
//! Everything from that frame onward is truncated on open.

// payload_length fits in u32, offsets use u64
#![allow(clippy::cast_possible_truncation)]

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use prost::Message;

use crate::kv::KvError;

/// Frame header size: length (4) + checksum (4).
const FRAME_HEADER_SIZE: usize = 8;

/// One key mutation inside a commit.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct MutationRecord {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    /// `None` clears the key.
    #[prost(bytes = "vec", optional, tag = "2")]
    pub value: Option<Vec<u8>>,
}

/// All mutations of one committed transaction.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct CommitRecord {
    #[prost(uint64, tag = "1")]
    pub version: u64,
    #[prost(message, repeated, tag = "2")]
    pub mutations: Vec<MutationRecord>,
}

/// An open commit log file positioned for appending.
#[derive(Debug)]
pub struct CommitLog {
    file: File,
    sync_on_commit: bool,
}

impl CommitLog {
    /// Open (or create) the log at `path`, returning it together with every
    /// intact record already in it.
    pub fn open(path: &Path, sync_on_commit: bool) -> Result<(Self, Vec<CommitRecord>), KvError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let (records, valid_len) = decode_frames(&bytes);
        if valid_len < bytes.len() {
            tracing::warn!(
                "commit log {} has a torn tail at offset {valid_len}; discarding {} bytes",
                path.display(),
                bytes.len() - valid_len
            );
            file.set_len(valid_len as u64)?;
        }
        file.seek(SeekFrom::Start(valid_len as u64))?;

        Ok((
            Self {
                file,
                sync_on_commit,
            },
            records,
        ))
    }

    /// Append one commit and, if configured, fsync it.
    pub fn append(&mut self, record: &CommitRecord) -> Result<(), KvError> {
        self.file.write_all(&encode_frame(record))?;
        if self.sync_on_commit {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

/// Serialize a record into a framed byte string.
#[must_use]
pub fn encode_frame(record: &CommitRecord) -> Vec<u8> {
    let payload = record.encode_to_vec();
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    frame
}

/// Decode consecutive frames, stopping at the first damaged one.
///
/// Returns the intact records and the byte length they occupy.
#[must_use]
pub fn decode_frames(bytes: &[u8]) -> (Vec<CommitRecord>, usize) {
    let mut records = Vec::new();
    let mut offset = 0;

    while bytes.len() - offset >= FRAME_HEADER_SIZE {
        let header = &bytes[offset..offset + FRAME_HEADER_SIZE];
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let checksum = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let start = offset + FRAME_HEADER_SIZE;
        let Some(payload) = bytes.get(start..start + len) else {
            break;
        };
        if crc32fast::hash(payload) != checksum {
            break;
        }
        let Ok(record) = CommitRecord::decode(payload) else {
            break;
        };

        records.push(record);
        offset = start + len;
    }

    (records, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(version: u64, key: &[u8], value: Option<&[u8]>) -> CommitRecord {
        CommitRecord {
            version,
            mutations: vec![MutationRecord {
                key: key.to_vec(),
                value: value.map(<[u8]>::to_vec),
            }],
        }
    }

    #[test]
    fn test_frames_decode_in_order() {
        let mut bytes = encode_frame(&record(1, b"a", Some(b"1")));
        bytes.extend(encode_frame(&record(2, b"a", None)));

        let (records, len) = decode_frames(&bytes);
        assert_eq!(len, bytes.len());
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].mutations[0].value, None);
    }

    #[test]
    fn test_checksum_mismatch_stops_decoding() {
        let first = encode_frame(&record(1, b"a", Some(b"1")));
        let mut bytes = first.clone();
        let mut second = encode_frame(&record(2, b"b", Some(b"2")));
        let last = second.len() - 1;
        second[last] ^= 0xFF;
        bytes.extend(second);

        let (records, len) = decode_frames(&bytes);
        assert_eq!(records.len(), 1);
        assert_eq!(len, first.len());
    }

    #[test]
    fn test_open_truncates_torn_tail() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("commits.log");

        let mut bytes = encode_frame(&record(1, b"k", Some(b"v")));
        let intact = bytes.len();
        let torn = encode_frame(&record(2, b"k", Some(b"w")));
        bytes.extend_from_slice(&torn[..torn.len() / 2]);
        std::fs::write(&path, &bytes).expect("write log");

        let (mut log, records) = CommitLog::open(&path, true).expect("open log");
        assert_eq!(records.len(), 1);
        assert_eq!(
            std::fs::metadata(&path).expect("metadata").len(),
            intact as u64
        );

        log.append(&record(2, b"k", Some(b"w"))).expect("append");
        drop(log);

        let (_log, records) = CommitLog::open(&path, true).expect("reopen log");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].version, 2);
    }
}
