use crate::storage::page::PageId;
use std::collections::{HashMap, VecDeque};

/// Recency order of cached pages (least recently used at the front).
///
/// `touch` and `remove` only update `stamps`; queue slots whose stamp is no
/// longer current are skipped by `evict` and dropped by `compact`.
#[derive(Debug, Default)]
pub struct LruList {
    order: VecDeque<(u64, PageId)>,
    /// Stamp of the live queue slot of every tracked page.
    stamps: HashMap<PageId, u64>,
    clock: u64,
}

impl LruList {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            stamps: HashMap::with_capacity(capacity),
            clock: 0,
        }
    }

    /// Marks `page_id` as the most recently used page.
    pub fn touch(&mut self, page_id: PageId) {
        self.clock += 1;
        self.stamps.insert(page_id, self.clock);
        self.order.push_back((self.clock, page_id));
        self.compact();
    }

    pub fn remove(&mut self, page_id: PageId) {
        self.stamps.remove(&page_id);
        self.compact();
    }

    /// Pops the least recently used page.
    pub fn evict(&mut self) -> Option<PageId> {
        while let Some((stamp, page_id)) = self.order.pop_front() {
            if self.stamps.get(&page_id) == Some(&stamp) {
                self.stamps.remove(&page_id);
                return Some(page_id);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.stamps.clear();
    }

    /// Drops stale slots once they outnumber the live ones.
    fn compact(&mut self) {
        if self.order.len() <= 2 * self.stamps.len() + 16 {
            return;
        }
        let stamps = &self.stamps;
        self.order
            .retain(|(stamp, page_id)| stamps.get(page_id) == Some(stamp));
    }
}
