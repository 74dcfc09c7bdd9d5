//! Per-connection page cache.
//!
//! Cached images are only valid for the change counter they were read under.
//! Every transaction starts by handing the counter it just read from the
//! file (under a fresh `Shared` lock) to [`PageCache::begin_transaction`]; if
//! any connection committed since the cache was last validated, every entry
//! is dropped before a single page is served.

pub mod lru;

use crate::error::{Error, Result};
use crate::storage::page::{PageId, HEADER_PAGE_ID};
use bytes::Bytes;
use lru::LruList;
use std::collections::HashMap;

struct CacheEntry {
    data: Bytes,
    /// Change counter the image was read under.
    change_counter: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Number of times the whole cache was dropped.
    pub invalidations: u64,
    pub entries: usize,
}

pub struct PageCache {
    entries: HashMap<PageId, CacheEntry>,
    lru: LruList,
    capacity: usize,
    /// Counter of the running transaction, `None` between transactions.
    baseline: Option<u64>,
    /// Counter the cache contents were last validated against.
    last_counter: Option<u64>,
    stats: CacheStats,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity.min(1024)),
            lru: LruList::new(capacity.min(1024)),
            capacity,
            baseline: None,
            last_counter: None,
            stats: CacheStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Validates the cache against the change counter just read from the
    /// file. Must be called with at least a `Shared` lock held.
    pub fn begin_transaction(&mut self, change_counter: u64) -> Result<()> {
        if let Some(baseline) = self.baseline {
            return Err(Error::Misuse(format!(
                "cache transaction already running at counter {baseline}"
            )));
        }
        match self.last_counter {
            Some(last) if change_counter < last => {
                return Err(Error::corrupt(
                    HEADER_PAGE_ID,
                    format!("change counter went backwards ({last} -> {change_counter})"),
                ));
            }
            Some(last) if change_counter != last => {
                log::debug!(
                    "change counter moved {} -> {}, dropping {} cached page(s)",
                    last,
                    change_counter,
                    self.entries.len()
                );
                self.invalidate_all();
            }
            _ => {}
        }
        self.baseline = Some(change_counter);
        self.last_counter = Some(change_counter);
        Ok(())
    }

    /// Returns the cached image of `page_id`, or loads it with `load` and
    /// remembers it.
    pub fn get(&mut self, page_id: PageId, load: impl FnOnce() -> Result<Bytes>) -> Result<Bytes> {
        let baseline = self
            .baseline
            .ok_or_else(|| Error::Misuse("page cache used outside a transaction".into()))?;

        if let Some(entry) = self.entries.get(&page_id) {
            if entry.change_counter == baseline {
                self.stats.hits += 1;
                let data = entry.data.clone();
                self.lru.touch(page_id);
                return Ok(data);
            }
            self.remove(page_id);
        }

        self.stats.misses += 1;
        let data = load()?;
        self.insert(page_id, data.clone(), baseline);
        Ok(data)
    }

    /// Records this connection's own commit: pages it wrote are dropped and
    /// the remaining entries carry over to the new counter.
    pub fn commit_transaction(&mut self, change_counter: u64, written: impl IntoIterator<Item = PageId>) {
        for page_id in written {
            self.remove(page_id);
        }
        self.remove(HEADER_PAGE_ID);
        for entry in self.entries.values_mut() {
            entry.change_counter = change_counter;
        }
        self.baseline = self.baseline.map(|_| change_counter);
        self.last_counter = Some(change_counter);
    }

    pub fn end_transaction(&mut self) {
        self.baseline = None;
    }

    pub fn in_transaction(&self) -> bool {
        self.baseline.is_some()
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
        self.lru.clear();
        self.stats.invalidations += 1;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            ..self.stats
        }
    }

    fn insert(&mut self, page_id: PageId, data: Bytes, change_counter: u64) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.lru.evict() {
                Some(victim) => {
                    self.entries.remove(&victim);
                }
                None => break,
            }
        }
        self.entries.insert(page_id, CacheEntry { data, change_counter });
        self.lru.touch(page_id);
    }

    fn remove(&mut self, page_id: PageId) {
        if self.entries.remove(&page_id).is_some() {
            self.lru.remove(page_id);
        }
    }
}
