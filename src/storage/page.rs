//! Page identifiers, the on-disk page envelope and page formats.
//!
//! Every page is `PAGE_SIZE` bytes. The last `CHECKSUM_SIZE` bytes hold a
//! CRC-32C of everything before them, so page formats only ever see the first
//! `USABLE_SIZE` bytes.

pub mod header;
pub mod heap_page;

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const PAGE_SIZE: usize = 8192;
pub const CHECKSUM_SIZE: usize = 4;
pub const USABLE_SIZE: usize = PAGE_SIZE - CHECKSUM_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u32);

/// Page holding the database header.
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Root page of the schema catalog heap.
pub const CATALOG_PAGE_ID: PageId = PageId(1);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Writes the checksum trailer of a page image.
pub fn seal_page(data: &mut [u8]) {
    debug_assert_eq!(data.len(), PAGE_SIZE);
    let checksum = crc32c::crc32c(&data[..USABLE_SIZE]);
    LittleEndian::write_u32(&mut data[USABLE_SIZE..], checksum);
}

/// Checks the checksum trailer of a decoded page image.
pub fn verify_page(page_id: PageId, data: &[u8]) -> Result<()> {
    if data.len() != PAGE_SIZE {
        return Err(Error::corrupt(
            page_id,
            format!("expected {} bytes, got {}", PAGE_SIZE, data.len()),
        ));
    }
    let stored = LittleEndian::read_u32(&data[USABLE_SIZE..]);
    let actual = crc32c::crc32c(&data[..USABLE_SIZE]);
    if stored != actual {
        return Err(Error::corrupt(
            page_id,
            format!("checksum mismatch (stored {stored:#010x}, computed {actual:#010x})"),
        ));
    }
    Ok(())
}

pub use header::DatabaseHeader;
pub use heap_page::HeapPage;
