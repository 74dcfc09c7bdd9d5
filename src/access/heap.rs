use crate::error::{Error, Result};
use crate::storage::page::heap_page::MAX_TUPLE_SIZE;
use crate::storage::page::{HeapPage, PageId, PAGE_SIZE};
use crate::transaction::{PageRead, PageWrite};
use bytes::Bytes;
use std::collections::HashSet;

/// A table's records, stored in a chain of heap pages starting at
/// `first_page`. All access goes through a transaction so reads observe one
/// consistent change counter and writes are staged in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableHeap {
    first_page: PageId,
}

impl TableHeap {
    pub fn new(first_page: PageId) -> Self {
        Self { first_page }
    }

    /// Allocates and stages an empty first page.
    pub fn create(tx: &mut impl PageWrite) -> Result<Self> {
        let page_id = tx.allocate_page()?;
        Self::format_page(tx, page_id)?;
        Ok(Self::new(page_id))
    }

    /// Stages an empty heap page at an already allocated `page_id`.
    pub fn format_page(tx: &mut impl PageWrite, page_id: PageId) -> Result<()> {
        let page = HeapPage::init(vec![0u8; PAGE_SIZE], page_id);
        tx.write_page(page_id, Bytes::from(page.into_inner()))
    }

    pub fn first_page(&self) -> PageId {
        self.first_page
    }

    /// Visits every record in insertion order.
    pub fn scan(
        &self,
        tx: &mut impl PageRead,
        mut visit: impl FnMut(PageId, &[u8]) -> Result<()>,
    ) -> Result<()> {
        let mut visited = HashSet::new();
        let mut current = Some(self.first_page);

        while let Some(page_id) = current {
            if !visited.insert(page_id) {
                return Err(Error::corrupt(page_id, "heap page chain loops"));
            }
            let data = tx.read_page(page_id)?;
            let page = HeapPage::from_data(&data);
            if page.page_id() != page_id {
                return Err(Error::corrupt(
                    page_id,
                    format!("expected a heap page, found id {}", page.page_id()),
                ));
            }
            for tuple in page.tuples()? {
                visit(page_id, tuple)?;
            }
            current = page.next_page_id();
        }
        Ok(())
    }

    /// Appends a record to the tail page, extending the chain when the tail
    /// is full. Earlier pages are never refilled, so scans return records in
    /// insertion order.
    pub fn insert(&self, tx: &mut impl PageWrite, tuple: &[u8]) -> Result<PageId> {
        if tuple.len() > MAX_TUPLE_SIZE {
            return Err(Error::Constraint(format!(
                "row of {} bytes exceeds the page limit of {} bytes",
                tuple.len(),
                MAX_TUPLE_SIZE
            )));
        }

        let mut visited = HashSet::new();
        let mut current = self.first_page;
        let data = loop {
            if !visited.insert(current) {
                return Err(Error::corrupt(current, "heap page chain loops"));
            }
            let data = tx.read_page(current)?;
            match HeapPage::from_data(data.as_ref()).next_page_id() {
                Some(next) => current = next,
                None => break data,
            }
        };

        if HeapPage::from_data(data.as_ref()).fits(tuple.len()) {
            let mut page = HeapPage::from_data(data.to_vec());
            page.insert_tuple(tuple);
            tx.write_page(current, Bytes::from(page.into_inner()))?;
            return Ok(current);
        }

        let new_page = tx.allocate_page()?;
        let mut page = HeapPage::init(vec![0u8; PAGE_SIZE], new_page);
        page.insert_tuple(tuple);
        tx.write_page(new_page, Bytes::from(page.into_inner()))?;

        let mut tail = HeapPage::from_data(data.to_vec());
        tail.set_next_page_id(Some(new_page));
        tx.write_page(current, Bytes::from(tail.into_inner()))?;

        log::debug!("extended heap at {} with page {}", self.first_page, new_page);
        Ok(new_page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::testing::MemPages;

    fn collect(heap: &TableHeap, pages: &mut MemPages) -> Result<Vec<Vec<u8>>> {
        let mut rows = Vec::new();
        heap.scan(pages, |_, tuple| {
            rows.push(tuple.to_vec());
            Ok(())
        })?;
        Ok(rows)
    }

    #[test]
    fn test_empty_heap() -> Result<()> {
        let mut pages = MemPages::new();
        let heap = TableHeap::create(&mut pages)?;
        assert_eq!(heap.first_page(), PageId(2));
        assert!(collect(&heap, &mut pages)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_insert_and_scan_in_order() -> Result<()> {
        let mut pages = MemPages::new();
        let heap = TableHeap::create(&mut pages)?;
        heap.insert(&mut pages, b"a")?;
        heap.insert(&mut pages, b"b")?;
        heap.insert(&mut pages, b"c")?;
        assert_eq!(collect(&heap, &mut pages)?, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_insert_extends_chain() -> Result<()> {
        let mut pages = MemPages::new();
        let heap = TableHeap::create(&mut pages)?;
        let row = vec![7u8; 3000];
        let mut placed = Vec::new();
        for _ in 0..5 {
            placed.push(heap.insert(&mut pages, &row)?);
        }
        assert!(placed.iter().any(|&p| p != heap.first_page()));
        assert_eq!(collect(&heap, &mut pages)?.len(), 5);

        let first = HeapPage::from_data(pages.read_page(heap.first_page())?);
        assert!(first.next_page_id().is_some());
        Ok(())
    }

    #[test]
    fn test_small_row_after_full_page_keeps_insertion_order() -> Result<()> {
        let mut pages = MemPages::new();
        let heap = TableHeap::create(&mut pages)?;
        let wide_a = vec![b'a'; 5000];
        let wide_b = vec![b'b'; 5000];

        let first = heap.insert(&mut pages, &wide_a)?;
        let second = heap.insert(&mut pages, &wide_b)?;
        // The first page still has room for this row, but it goes to the tail.
        let third = heap.insert(&mut pages, b"y")?;
        assert_eq!(first, heap.first_page());
        assert_ne!(second, first);
        assert_eq!(third, second);

        assert_eq!(collect(&heap, &mut pages)?, vec![wide_a, wide_b, b"y".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_oversized_row_is_constraint_error() -> Result<()> {
        let mut pages = MemPages::new();
        let heap = TableHeap::create(&mut pages)?;
        let result = heap.insert(&mut pages, &vec![0u8; PAGE_SIZE]);
        assert!(matches!(result, Err(Error::Constraint(_))));
        Ok(())
    }

    #[test]
    fn test_chain_loop_is_corrupt() -> Result<()> {
        let mut pages = MemPages::new();
        let heap = TableHeap::create(&mut pages)?;
        let mut page = HeapPage::from_data(pages.read_page(heap.first_page())?.to_vec());
        page.set_next_page_id(Some(heap.first_page()));
        pages.write_page(heap.first_page(), Bytes::from(page.into_inner()))?;

        assert!(matches!(
            collect(&heap, &mut pages),
            Err(Error::Corrupt { .. })
        ));
        Ok(())
    }
}
