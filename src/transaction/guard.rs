//! Scoped transaction guard.
//!
//! A [`Transaction`] borrows a connection's page store, cache and state for
//! the duration of one statement. Dropping it without committing rolls back
//! staged pages, closes the cache transaction and releases every lock, so a
//! connection always returns to `Idle`.

use crate::concurrency::LockLevel;
use crate::error::{Error, Result};
use crate::storage::page::PageId;
use crate::storage::{PageCache, PageStore};
use crate::transaction::ConnectionState;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::thread;
use std::time::{Duration, Instant};

const WRITE_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Read access to pages at one consistent change counter.
pub trait PageRead {
    fn read_page(&mut self, page_id: PageId) -> Result<Bytes>;
}

/// Write access to pages inside a write transaction.
pub trait PageWrite: PageRead {
    fn write_page(&mut self, page_id: PageId, image: Bytes) -> Result<()>;

    fn allocate_page(&mut self) -> Result<PageId>;
}

pub struct Transaction<'c> {
    store: &'c mut PageStore,
    cache: &'c mut PageCache,
    state: &'c mut ConnectionState,
    change_counter: u64,
    written: BTreeSet<PageId>,
}

impl<'c> Transaction<'c> {
    /// Acquires `Shared`, recovers a hot journal if one is present and
    /// validates the cache against the change counter read under the new lock.
    pub fn begin_read(
        store: &'c mut PageStore,
        cache: &'c mut PageCache,
        state: &'c mut ConnectionState,
    ) -> Result<Self> {
        Self::require_idle(state)?;
        let change_counter = Self::start(store, cache, false)?;
        *state = ConnectionState::SharedRead;
        Ok(Self::new(store, cache, state, change_counter))
    }

    /// Begins a read transaction and upgrades it to the single writer.
    ///
    /// The write lock is never waited for while holding `Shared`: the current
    /// writer needs every reader gone to commit. A busy attempt drops all
    /// locks and starts over until the busy timeout runs out.
    pub fn begin_write(
        store: &'c mut PageStore,
        cache: &'c mut PageCache,
        state: &'c mut ConnectionState,
    ) -> Result<Self> {
        Self::require_idle(state)?;
        let deadline = Instant::now() + store.busy_timeout();
        let change_counter = loop {
            match Self::start(store, cache, true) {
                Ok(counter) => break counter,
                Err(e) if e.is_busy() && Instant::now() < deadline => {
                    log::trace!("{} waiting for the write lock", store.holder());
                    thread::sleep(WRITE_RETRY_INTERVAL);
                }
                Err(e) => return Err(e),
            }
        };
        *state = ConnectionState::ReservedWrite;
        Ok(Self::new(store, cache, state, change_counter))
    }

    fn new(
        store: &'c mut PageStore,
        cache: &'c mut PageCache,
        state: &'c mut ConnectionState,
        change_counter: u64,
    ) -> Self {
        log::trace!("{} {} at change counter {}", store.holder(), state, change_counter);
        Self {
            store,
            cache,
            state,
            change_counter,
            written: BTreeSet::new(),
        }
    }

    fn require_idle(state: &ConnectionState) -> Result<()> {
        if !state.is_idle() {
            return Err(Error::Misuse(format!(
                "cannot begin a transaction in state {state}"
            )));
        }
        Ok(())
    }

    /// Takes the locks for a new transaction and opens the cache baseline.
    /// Leaves nothing held on failure.
    fn start(store: &mut PageStore, cache: &mut PageCache, write: bool) -> Result<u64> {
        store.acquire_lock(LockLevel::Shared)?;
        let started = Self::start_locked(store, cache, write);
        if started.is_err() {
            cache.end_transaction();
            if let Err(e) = store.release_lock() {
                log::warn!("{} failed to release after error: {}", store.holder(), e);
            }
        }
        started
    }

    fn start_locked(store: &mut PageStore, cache: &mut PageCache, write: bool) -> Result<u64> {
        if store.recover_if_hot()? {
            cache.invalidate_all();
        }
        let change_counter = store.current_change_counter()?;
        cache.begin_transaction(change_counter)?;
        if write {
            store.begin_write_within(Duration::ZERO)?;
        }
        Ok(change_counter)
    }

    /// Change counter this transaction reads at.
    pub fn change_counter(&self) -> u64 {
        self.change_counter
    }

    pub fn is_write(&self) -> bool {
        self.state.is_writing()
    }

    /// Publishes the staged pages. Returns the new change counter; a read
    /// transaction just ends and returns its own counter.
    ///
    /// On failure (including `Busy` while waiting for readers) the writes are
    /// rolled back when the guard drops.
    pub fn commit(mut self) -> Result<u64> {
        if !self.is_write() {
            return Ok(self.change_counter);
        }
        self.transition(ConnectionState::PendingWrite)?;
        if let Err(e) = self.store.acquire_lock(LockLevel::Exclusive) {
            self.transition(ConnectionState::ReservedWrite)?;
            return Err(e);
        }
        self.transition(ConnectionState::ExclusiveWrite)?;
        debug_assert_eq!(self.state.lock_level(), self.store.lock_level());

        let counter = self.store.commit()?;
        // Published; the store is back at Shared until the guard drops.
        self.transition(ConnectionState::SharedRead)?;
        debug_assert_eq!(self.state.lock_level(), self.store.lock_level());

        self.cache
            .commit_transaction(counter, self.written.iter().copied());
        self.change_counter = counter;
        Ok(counter)
    }

    fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::Misuse(format!(
                "invalid transition {} -> {}",
                self.state, next
            )));
        }
        *self.state = next;
        Ok(())
    }

    fn require_write(&self) -> Result<()> {
        if !self.is_write() {
            return Err(Error::Misuse("write in a read transaction".into()));
        }
        Ok(())
    }
}

impl PageRead for Transaction<'_> {
    fn read_page(&mut self, page_id: PageId) -> Result<Bytes> {
        if let Some(image) = self.store.staged_page(page_id) {
            return Ok(image);
        }
        let store = &mut *self.store;
        self.cache.get(page_id, || store.read_committed(page_id))
    }
}

impl PageWrite for Transaction<'_> {
    fn write_page(&mut self, page_id: PageId, image: Bytes) -> Result<()> {
        self.require_write()?;
        self.store.write_page(page_id, image)?;
        self.written.insert(page_id);
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<PageId> {
        self.require_write()?;
        self.store.allocate_page()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.release_lock() {
            log::warn!("{} rollback on release failed: {}", self.store.holder(), e);
        }
        self.cache.end_transaction();
        *self.state = ConnectionState::Idle;
    }
}
