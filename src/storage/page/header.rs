use crate::error::{Error, Result};
use crate::storage::page::{seal_page, HEADER_PAGE_ID, PAGE_SIZE};
use byteorder::{ByteOrder, LittleEndian};

// Header layout (page 0)
const MAGIC: &[u8; 16] = b"coherdb format1\0";
const MAGIC_OFFSET: usize = 0;
const PAGE_SIZE_OFFSET: usize = 16;
const PAGE_COUNT_OFFSET: usize = 20;
const CHANGE_COUNTER_OFFSET: usize = 24;

/// Decoded contents of the header page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseHeader {
    /// Number of pages in the file, header page included.
    pub page_count: u32,
    /// Bumped exactly once by every committed write transaction.
    pub change_counter: u64,
}

impl DatabaseHeader {
    pub fn new(page_count: u32) -> Self {
        Self {
            page_count,
            change_counter: 0,
        }
    }

    /// Parses a verified header page image.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if &data[MAGIC_OFFSET..MAGIC_OFFSET + MAGIC.len()] != MAGIC {
            return Err(Error::corrupt(HEADER_PAGE_ID, "not a coherdb database"));
        }

        let page_size = LittleEndian::read_u32(&data[PAGE_SIZE_OFFSET..]) as usize;
        if page_size != PAGE_SIZE {
            return Err(Error::corrupt(
                HEADER_PAGE_ID,
                format!("unsupported page size {page_size}"),
            ));
        }

        let page_count = LittleEndian::read_u32(&data[PAGE_COUNT_OFFSET..]);
        if page_count == 0 {
            return Err(Error::corrupt(HEADER_PAGE_ID, "page count is zero"));
        }

        Ok(Self {
            page_count,
            change_counter: LittleEndian::read_u64(&data[CHANGE_COUNTER_OFFSET..]),
        })
    }

    /// Produces a sealed header page image.
    pub fn encode(&self) -> Vec<u8> {
        let mut data = vec![0u8; PAGE_SIZE];
        data[MAGIC_OFFSET..MAGIC_OFFSET + MAGIC.len()].copy_from_slice(MAGIC);
        LittleEndian::write_u32(&mut data[PAGE_SIZE_OFFSET..], PAGE_SIZE as u32);
        LittleEndian::write_u32(&mut data[PAGE_COUNT_OFFSET..], self.page_count);
        LittleEndian::write_u64(&mut data[CHANGE_COUNTER_OFFSET..], self.change_counter);
        seal_page(&mut data);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::verify_page;

    #[test]
    fn test_encode_decode() -> Result<()> {
        let header = DatabaseHeader {
            page_count: 12,
            change_counter: 99,
        };
        let data = header.encode();
        verify_page(HEADER_PAGE_ID, &data)?;
        assert_eq!(DatabaseHeader::decode(&data)?, header);
        Ok(())
    }

    #[test]
    fn test_bad_magic() {
        let mut data = DatabaseHeader::new(2).encode();
        data[0] = b'x';
        assert!(matches!(
            DatabaseHeader::decode(&data),
            Err(Error::Corrupt { .. })
        ));
    }

    #[test]
    fn test_page_size_mismatch() {
        let mut data = DatabaseHeader::new(2).encode();
        LittleEndian::write_u32(&mut data[PAGE_SIZE_OFFSET..], 4096);
        assert!(DatabaseHeader::decode(&data).is_err());
    }
}
