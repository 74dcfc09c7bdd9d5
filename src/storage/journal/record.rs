//! Journal file records and their framing.
//!
//! A journal file is a sequence of frames, each a little-endian `u32` length
//! followed by a bincode payload: one [`JournalHeader`] then
//! `record_count` [`JournalRecord`]s.

use crate::error::Result;
use crate::storage::page::PageId;
use crate::transaction::TransactionId;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

pub const JOURNAL_MAGIC: [u8; 8] = *b"cohjrnl1";

/// Upper bound on a frame, well above one page plus bookkeeping.
const MAX_FRAME_SIZE: u32 = 1 << 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalHeader {
    pub magic: [u8; 8],
    pub transaction_id: TransactionId,
    /// Page count of the database before the transaction; playback truncates
    /// the file back to it.
    pub original_page_count: u32,
    pub record_count: u32,
    pub checksum: u32,
}

impl JournalHeader {
    pub fn new(transaction_id: TransactionId, original_page_count: u32, record_count: u32) -> Self {
        let mut header = Self {
            magic: JOURNAL_MAGIC,
            transaction_id,
            original_page_count,
            record_count,
            checksum: 0,
        };
        header.checksum = header.compute_checksum();
        header
    }

    pub fn is_valid(&self) -> bool {
        self.magic == JOURNAL_MAGIC && self.checksum == self.compute_checksum()
    }

    fn compute_checksum(&self) -> u32 {
        let mut crc = crc32c::crc32c(&self.magic);
        crc = crc32c::crc32c_append(crc, &self.transaction_id.value().to_le_bytes());
        crc = crc32c::crc32c_append(crc, &self.original_page_count.to_le_bytes());
        crc32c::crc32c_append(crc, &self.record_count.to_le_bytes())
    }
}

/// Prior on-disk image of one page, exactly as it was stored (encoded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub transaction_id: TransactionId,
    pub page_id: PageId,
    pub image: Vec<u8>,
    pub checksum: u32,
}

impl JournalRecord {
    pub fn new(transaction_id: TransactionId, page_id: PageId, image: Vec<u8>) -> Self {
        let checksum = Self::compute_checksum(page_id, &image);
        Self {
            transaction_id,
            page_id,
            image,
            checksum,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.checksum == Self::compute_checksum(self.page_id, &self.image)
    }

    fn compute_checksum(page_id: PageId, image: &[u8]) -> u32 {
        crc32c::crc32c_append(crc32c::crc32c(&page_id.0.to_le_bytes()), image)
    }
}

pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    let payload = bincode::serialize(value)?;
    writer.write_u32::<LittleEndian>(payload.len() as u32)?;
    writer.write_all(&payload)?;
    Ok(())
}

/// Reads the next frame. A missing, truncated or undecodable frame (the tail
/// of an interrupted journal write) yields `None`.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    let len = match reader.read_u32::<LittleEndian>() {
        Ok(len) => len,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_SIZE {
        return Ok(None);
    }

    let mut payload = vec![0u8; len as usize];
    match reader.read_exact(&mut payload) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    Ok(bincode::deserialize(&payload).ok())
}
