//! Log record and its on-disk framing.
//!
//! Each record is persisted as a length-prefixed frame:
//! `[len: i32 little-endian][payload: len bytes]`, where the payload is the
//! protobuf encoding of [`Record`]. The encoding is deterministic, so
//! re-encoding a decoded record reproduces the original bytes.

use bytes::{BufMut, BytesMut};
use prost::Message;

use crate::error::{Result, WalError};

/// Width of the little-endian length prefix in front of every record.
pub const FRAME_PREFIX_BYTES: usize = 4;

#[derive(Clone, PartialEq, Message)]
pub struct Record {
    /// Strictly increasing across the whole log; the first record has 1.
    #[prost(uint64, tag = "1")]
    pub seq: u64,

    /// Opaque caller payload, possibly empty.
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,

    /// IEEE CRC-32 over `data` alone.
    #[prost(uint32, tag = "3")]
    pub crc: u32,

    /// Present and true only on checkpoint markers.
    #[prost(bool, optional, tag = "4")]
    pub checkpoint_flag: Option<bool>,
}

impl Record {
    pub fn new(seq: u64, data: Vec<u8>) -> Record {
        let crc = crc32fast::hash(&data);
        Record {
            seq,
            data,
            crc,
            checkpoint_flag: None,
        }
    }

    pub fn checkpoint(seq: u64, data: Vec<u8>) -> Record {
        let mut record = Record::new(seq, data);
        record.checkpoint_flag = Some(true);
        record
    }

    pub fn is_checkpoint(&self) -> bool {
        self.checkpoint_flag.unwrap_or(false)
    }

    /// Recomputes the CRC-32 of `data` and compares it to the stored value.
    pub fn verify_crc(&self) -> bool {
        crc32fast::hash(&self.data) == self.crc
    }

    /// Serializes the record and prepends the length prefix.
    pub fn encode_framed(&self) -> BytesMut {
        let body_len = self.encoded_len();
        let mut frame = BytesMut::with_capacity(FRAME_PREFIX_BYTES + body_len);
        frame.put_i32_le(body_len as i32);
        self.encode(&mut frame)
            .expect("record encoding into a sized buffer cannot fail");
        frame
    }

    /// Parses a frame payload and verifies its CRC.
    pub fn decode_verified(body: &[u8]) -> Result<Record> {
        let record =
            Record::decode(body).map_err(|e| WalError::Corrupt(format!("undecodable record: {e}")))?;

        if !record.verify_crc() {
            return Err(WalError::Corrupt(format!(
                "crc mismatch on record {}",
                record.seq
            )));
        }

        Ok(record)
    }
}
