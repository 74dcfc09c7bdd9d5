use crate::error::{Error, Result};
use crate::storage::page::{PageId, PAGE_SIZE, USABLE_SIZE};
use byteorder::{ByteOrder, LittleEndian};

// Header structure (16 bytes)
const HEADER_SIZE: usize = 16;
const PAGE_ID_OFFSET: usize = 0;
const NEXT_PAGE_OFFSET: usize = 4;
const FREE_SPACE_POINTER_OFFSET: usize = 12;
const TUPLE_COUNT_OFFSET: usize = 14;

// Slot size (4 bytes: 2 for offset, 2 for length)
const SLOT_SIZE: usize = 4;

/// Largest record a single heap page can hold.
pub const MAX_TUPLE_SIZE: usize = USABLE_SIZE - HEADER_SIZE - SLOT_SIZE;

/// Slotted page view. Tuples grow up from the header, slots grow down from
/// the end of the usable area. Pages of one table are chained through
/// `next_page_id`; page 0 is never a heap page so 0 marks the end of a chain.
pub struct HeapPage<T> {
    data: T,
}

impl<T: AsRef<[u8]>> HeapPage<T> {
    pub fn from_data(data: T) -> Self {
        debug_assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }

    pub fn page_id(&self) -> PageId {
        PageId(LittleEndian::read_u32(&self.bytes()[PAGE_ID_OFFSET..]))
    }

    pub fn next_page_id(&self) -> Option<PageId> {
        match LittleEndian::read_u32(&self.bytes()[NEXT_PAGE_OFFSET..]) {
            0 => None,
            id => Some(PageId(id)),
        }
    }

    pub fn tuple_count(&self) -> u16 {
        LittleEndian::read_u16(&self.bytes()[TUPLE_COUNT_OFFSET..])
    }

    pub fn get_tuple(&self, slot_id: u16) -> Result<&[u8]> {
        let tuple_count = self.tuple_count();
        if slot_id >= tuple_count {
            return Err(Error::corrupt(
                self.page_id(),
                format!("slot {slot_id} out of range ({tuple_count} tuples)"),
            ));
        }

        let slot_offset = Self::slot_offset(slot_id);
        let data = self.bytes();
        let tuple_offset = LittleEndian::read_u16(&data[slot_offset..]) as usize;
        let tuple_length = LittleEndian::read_u16(&data[slot_offset + 2..]) as usize;

        if tuple_offset < HEADER_SIZE || tuple_offset + tuple_length > self.slot_array_start() {
            return Err(Error::corrupt(
                self.page_id(),
                format!("slot {slot_id} points outside the tuple area"),
            ));
        }

        Ok(&data[tuple_offset..tuple_offset + tuple_length])
    }

    /// Returns every tuple on the page in slot order.
    pub fn tuples(&self) -> Result<Vec<&[u8]>> {
        (0..self.tuple_count()).map(|slot| self.get_tuple(slot)).collect()
    }

    pub fn free_space(&self) -> usize {
        self.slot_array_start()
            .saturating_sub(self.free_space_pointer() as usize)
    }

    pub fn fits(&self, tuple_size: usize) -> bool {
        self.free_space() >= tuple_size + SLOT_SIZE
    }

    pub fn into_inner(self) -> T {
        self.data
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn free_space_pointer(&self) -> u16 {
        LittleEndian::read_u16(&self.bytes()[FREE_SPACE_POINTER_OFFSET..])
    }

    fn slot_array_start(&self) -> usize {
        USABLE_SIZE - self.tuple_count() as usize * SLOT_SIZE
    }

    fn slot_offset(slot_id: u16) -> usize {
        USABLE_SIZE - (slot_id as usize + 1) * SLOT_SIZE
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> HeapPage<T> {
    /// Formats `data` as an empty heap page.
    pub fn init(mut data: T, page_id: PageId) -> Self {
        let buf = data.as_mut();
        buf[..USABLE_SIZE].fill(0);
        LittleEndian::write_u32(&mut buf[PAGE_ID_OFFSET..], page_id.0);
        LittleEndian::write_u16(&mut buf[FREE_SPACE_POINTER_OFFSET..], HEADER_SIZE as u16);
        LittleEndian::write_u16(&mut buf[TUPLE_COUNT_OFFSET..], 0);
        Self { data }
    }

    pub fn set_next_page_id(&mut self, next: Option<PageId>) {
        let raw = next.map_or(0, |id| id.0);
        LittleEndian::write_u32(&mut self.data.as_mut()[NEXT_PAGE_OFFSET..], raw);
    }

    /// Appends a tuple, returning its slot or `None` when the page is full.
    pub fn insert_tuple(&mut self, tuple_data: &[u8]) -> Option<u16> {
        if !self.fits(tuple_data.len()) {
            return None;
        }

        let tuple_count = self.tuple_count();
        let tuple_offset = self.free_space_pointer() as usize;
        let tuple_size = tuple_data.len();
        let slot_offset = Self::slot_offset(tuple_count);

        let buf = self.data.as_mut();
        buf[tuple_offset..tuple_offset + tuple_size].copy_from_slice(tuple_data);
        LittleEndian::write_u16(
            &mut buf[FREE_SPACE_POINTER_OFFSET..],
            (tuple_offset + tuple_size) as u16,
        );
        LittleEndian::write_u16(&mut buf[slot_offset..], tuple_offset as u16);
        LittleEndian::write_u16(&mut buf[slot_offset + 2..], tuple_size as u16);
        LittleEndian::write_u16(&mut buf[TUPLE_COUNT_OFFSET..], tuple_count + 1);

        Some(tuple_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    #[test]
    fn test_heap_page_initialization() {
        let page = HeapPage::init(blank(), PageId(42));

        assert_eq!(page.page_id(), PageId(42));
        assert_eq!(page.tuple_count(), 0);
        assert_eq!(page.next_page_id(), None);
        assert_eq!(page.free_space(), USABLE_SIZE - HEADER_SIZE);
    }

    #[test]
    fn test_insert_and_get_tuple() -> Result<()> {
        let mut page = HeapPage::init(blank(), PageId(1));

        let slot1 = page.insert_tuple(b"Hello, World!");
        assert_eq!(slot1, Some(0));
        let slot2 = page.insert_tuple(b"Second tuple");
        assert_eq!(slot2, Some(1));

        assert_eq!(page.get_tuple(0)?, b"Hello, World!");
        assert_eq!(page.get_tuple(1)?, b"Second tuple");
        assert_eq!(page.tuples()?.len(), 2);

        Ok(())
    }

    #[test]
    fn test_page_full() {
        let mut page = HeapPage::init(blank(), PageId(1));

        let large_tuple = vec![0xAA; 1000];
        let mut count = 0;
        while page.insert_tuple(&large_tuple).is_some() {
            count += 1;
        }

        assert_eq!(count, (USABLE_SIZE - HEADER_SIZE) / (1000 + SLOT_SIZE));
        assert!(!page.fits(large_tuple.len()));
    }

    #[test]
    fn test_max_tuple_fits_empty_page() {
        let mut page = HeapPage::init(blank(), PageId(3));
        assert!(page.insert_tuple(&vec![1u8; MAX_TUPLE_SIZE]).is_some());
        assert_eq!(page.free_space(), 0);
    }

    #[test]
    fn test_invalid_slot_id() {
        let page = HeapPage::init(blank(), PageId(1));
        assert!(page.get_tuple(0).is_err());
        assert!(page.get_tuple(100).is_err());
    }

    #[test]
    fn test_chain_link() {
        let mut page = HeapPage::init(blank(), PageId(4));
        page.set_next_page_id(Some(PageId(9)));
        assert_eq!(page.next_page_id(), Some(PageId(9)));
        page.set_next_page_id(None);
        assert_eq!(page.next_page_id(), None);
    }

    #[test]
    fn test_read_only_view() -> Result<()> {
        let mut page = HeapPage::init(blank(), PageId(123));
        page.insert_tuple(b"Persistent data");
        let data = bytes::Bytes::from(page.into_inner());

        let view = HeapPage::from_data(&data);
        assert_eq!(view.page_id(), PageId(123));
        assert_eq!(view.get_tuple(0)?, b"Persistent data");

        Ok(())
    }
}
