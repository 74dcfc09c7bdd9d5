//! Page store: one connection's handle on the shared database file.
//!
//! Each handle owns its own file descriptor, page codec and journal, and
//! shares the file's [`FileLock`] with every other handle in the process.
//! Reads need at least `Shared`, writes at least `Reserved`; commit escalates
//! to `Exclusive`, so no reader can ever observe a half-applied commit or a
//! bumped change counter next to old page bytes.

use crate::concurrency::{FileLock, HolderId, LockLevel, LockState};
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::storage::cipher::PageCodec;
use crate::storage::disk::PageManager;
use crate::storage::journal::Journal;
use crate::storage::page::{DatabaseHeader, PageId, HEADER_PAGE_ID, PAGE_SIZE};
use crate::transaction::{PageRead, PageWrite, TransactionId};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

pub struct PageStore {
    file: PageManager,
    codec: PageCodec,
    lock: Arc<FileLock>,
    holder: HolderId,
    journal: Journal,
    busy_timeout: Duration,
}

impl PageStore {
    pub fn open(config: &ConnectionConfig) -> Result<Self> {
        let file = PageManager::open(&config.path, config.create_if_missing, config.io_retries)?;
        let lock = FileLock::for_path(&config.path)?;
        let codec = PageCodec::with_key(config.key.as_deref())?;
        let journal = Journal::new(lock.path(), config.journal_mode);

        Ok(Self {
            file,
            codec,
            lock,
            holder: HolderId::next(),
            journal,
            busy_timeout: config.busy_timeout,
        })
    }

    pub fn holder(&self) -> HolderId {
        self.holder
    }

    pub fn lock_level(&self) -> LockLevel {
        self.lock.level_of(self.holder)
    }

    /// Lock state of the file as every connection sees it.
    pub fn lock_state(&self) -> LockState {
        self.lock.state()
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    pub fn is_encrypted(&self) -> bool {
        self.codec.is_encrypted()
    }

    /// Raises this handle's lock, waiting at most the busy timeout.
    pub fn acquire_lock(&mut self, level: LockLevel) -> Result<()> {
        self.lock.acquire(self.holder, level, self.busy_timeout)
    }

    /// Drops every lock, rolling back an uncommitted write transaction first.
    pub fn release_lock(&mut self) -> Result<()> {
        let rolled_back = if self.journal.transaction_id().is_some() {
            self.rollback()
        } else {
            Ok(())
        };
        self.lock.release(self.holder, LockLevel::None);
        rolled_back
    }

    /// True for a file that has never been initialized.
    pub fn is_empty(&self) -> Result<bool> {
        self.file.is_empty()
    }

    pub fn read_header(&mut self) -> Result<DatabaseHeader> {
        self.require(LockLevel::Shared, "read the header")?;
        let image = self.read_committed(HEADER_PAGE_ID)?;
        DatabaseHeader::decode(&image)
    }

    /// Change counter as currently stored in the file.
    pub fn current_change_counter(&mut self) -> Result<u64> {
        Ok(self.read_header()?.change_counter)
    }

    /// Reads a page as this connection should see it: its own staged image
    /// during a write transaction, the committed image otherwise.
    pub fn read_page(&mut self, page_id: PageId) -> Result<Bytes> {
        if let Some(image) = self.journal.staged(page_id) {
            return Ok(image.clone());
        }
        self.read_committed(page_id)
    }

    pub fn staged_page(&self, page_id: PageId) -> Option<Bytes> {
        self.journal.staged(page_id).cloned()
    }

    /// Reads and decodes the committed image of a page from the file.
    pub fn read_committed(&mut self, page_id: PageId) -> Result<Bytes> {
        self.require(LockLevel::Shared, "read pages")?;
        let mut raw = vec![0u8; PAGE_SIZE];
        self.file.read_page(page_id, &mut raw)?;
        log::trace!("{} fetched page {} from disk", self.holder, page_id);
        self.codec.decode(page_id, raw)
    }

    /// Stages a new page image; it becomes visible to other connections only
    /// when the transaction commits.
    pub fn write_page(&mut self, page_id: PageId, image: Bytes) -> Result<()> {
        self.require(LockLevel::Reserved, "write pages")?;
        if page_id == HEADER_PAGE_ID {
            return Err(Error::Misuse("the header page is maintained by commit".into()));
        }
        self.journal.stage(page_id, image)
    }

    pub fn allocate_page(&mut self) -> Result<PageId> {
        self.require(LockLevel::Reserved, "allocate pages")?;
        self.journal.allocate()
    }

    pub fn in_write_transaction(&self) -> bool {
        self.journal.transaction_id().is_some()
    }

    /// Takes the write lock (`Shared -> Reserved`) and starts a transaction.
    pub fn begin_write(&mut self) -> Result<TransactionId> {
        self.begin_write_within(self.busy_timeout)
    }

    /// Like [`begin_write`](Self::begin_write) with an explicit bound on the
    /// wait for the write lock.
    pub fn begin_write_within(&mut self, timeout: Duration) -> Result<TransactionId> {
        self.require(LockLevel::Shared, "begin a write transaction")?;
        self.lock.acquire(self.holder, LockLevel::Reserved, timeout)?;

        let page_count = if self.file.is_empty()? {
            0
        } else {
            self.read_header()?.page_count
        };
        let id = self.lock.next_transaction_id();
        self.journal.begin(id, page_count)?;
        log::debug!("{} began {} at {} page(s)", self.holder, id, page_count);
        Ok(id)
    }

    /// Publishes the staged pages together with a bumped change counter and
    /// drops back to `Shared`. Returns the new counter.
    ///
    /// A `Busy` failure while waiting for readers leaves the transaction
    /// intact at `Reserved`; the caller may retry or roll back.
    pub fn commit(&mut self) -> Result<u64> {
        let id = self
            .journal
            .transaction_id()
            .ok_or_else(|| Error::Misuse("no active write transaction".into()))?;
        self.acquire_lock(LockLevel::Exclusive)?;

        let previous = if self.file.is_empty()? {
            0
        } else {
            self.current_change_counter()?
        };
        let header = DatabaseHeader {
            page_count: self.journal.page_count().unwrap_or(0),
            change_counter: previous + 1,
        };

        let published = self
            .journal
            .stage(HEADER_PAGE_ID, Bytes::from(header.encode()))
            .and_then(|()| self.journal.commit(id, &mut self.file, &self.codec));
        if let Err(e) = published {
            log::debug!("{} commit of {} failed: {}", self.holder, id, e);
            if let Err(rollback) = self.journal.rollback(id, &mut self.file) {
                log::warn!("{} could not roll back {}: {}", self.holder, id, rollback);
            }
            self.lock.release(self.holder, LockLevel::Shared);
            return Err(e);
        }

        self.lock.release(self.holder, LockLevel::Shared);
        log::debug!(
            "{} committed {}, change counter {} -> {}",
            self.holder,
            id,
            previous,
            header.change_counter
        );
        Ok(header.change_counter)
    }

    /// Discards the active write transaction and drops back to `Shared`.
    pub fn rollback(&mut self) -> Result<()> {
        let result = match self.journal.transaction_id() {
            Some(id) => self.journal.rollback(id, &mut self.file),
            None => Ok(()),
        };
        if self.lock_level() > LockLevel::Shared {
            self.lock.release(self.holder, LockLevel::Shared);
        }
        result
    }

    /// Rolls back a journal left behind by an interrupted commit. Must be
    /// called with `Shared` held and before any page is trusted.
    pub fn recover_if_hot(&mut self) -> Result<bool> {
        self.require(LockLevel::Shared, "check for a hot journal")?;
        if self.lock.writer_active() || !self.journal.is_hot()? {
            return Ok(false);
        }

        self.acquire_lock(LockLevel::Reserved)?;
        let recovered = self.recover_locked();
        self.lock.release(self.holder, LockLevel::Shared);
        recovered
    }

    fn recover_locked(&mut self) -> Result<bool> {
        // Another connection may have recovered while we waited.
        if !self.journal.is_hot()? {
            return Ok(false);
        }
        self.acquire_lock(LockLevel::Exclusive)?;
        log::warn!(
            "{} found a hot journal at {}",
            self.holder,
            self.journal.path().display()
        );
        self.journal.playback(&mut self.file)?;
        Ok(true)
    }

    fn require(&self, level: LockLevel, action: &str) -> Result<()> {
        let held = self.lock_level();
        if held < level {
            return Err(Error::Misuse(format!(
                "cannot {} while holding {:?} (needs {:?})",
                action, held, level
            )));
        }
        Ok(())
    }

    /// Leaves the file exactly as a process crash in the middle of a commit
    /// would: journal written, only `pages_applied` pages in the database.
    #[cfg(test)]
    pub(crate) fn crash_during_commit(mut self, pages_applied: usize) -> Result<()> {
        self.acquire_lock(LockLevel::Exclusive)?;
        let header = DatabaseHeader {
            page_count: self.journal.page_count().unwrap_or(0),
            change_counter: self.current_change_counter()? + 1,
        };
        self.journal.stage(HEADER_PAGE_ID, Bytes::from(header.encode()))?;
        self.journal
            .commit_interrupted(&mut self.file, &self.codec, pages_applied)?;
        Ok(())
    }
}

impl PageRead for PageStore {
    fn read_page(&mut self, page_id: PageId) -> Result<Bytes> {
        PageStore::read_page(self, page_id)
    }
}

impl PageWrite for PageStore {
    fn write_page(&mut self, page_id: PageId, image: Bytes) -> Result<()> {
        PageStore::write_page(self, page_id, image)
    }

    fn allocate_page(&mut self) -> Result<PageId> {
        PageStore::allocate_page(self)
    }
}

impl Drop for PageStore {
    fn drop(&mut self) {
        if let Err(e) = self.release_lock() {
            log::warn!("{} failed to release on close: {}", self.holder, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::HeapPage;
    use tempfile::{tempdir, TempDir};

    fn config(dir: &TempDir) -> ConnectionConfig {
        ConnectionConfig::new(dir.path().join("store.db")).with_busy_timeout(Duration::ZERO)
    }

    fn heap_image(page_id: PageId, payload: &[u8]) -> Bytes {
        let mut page = HeapPage::init(vec![0u8; PAGE_SIZE], page_id);
        page.insert_tuple(payload);
        Bytes::from(page.into_inner())
    }

    /// Creates the header plus one data page holding `payload`.
    fn initialize(store: &mut PageStore, payload: &[u8]) -> Result<()> {
        store.acquire_lock(LockLevel::Shared)?;
        store.begin_write()?;
        store.allocate_page()?;
        let page = store.allocate_page()?;
        store.write_page(page, heap_image(page, payload))?;
        store.commit()?;
        store.release_lock()
    }

    fn first_tuple(store: &mut PageStore, page: PageId) -> Result<Vec<u8>> {
        let image = store.read_page(page)?;
        Ok(HeapPage::from_data(&image).get_tuple(0)?.to_vec())
    }

    #[test]
    fn test_initialize_and_read_back() -> Result<()> {
        let dir = tempdir()?;
        let mut store = PageStore::open(&config(&dir))?;
        assert!(store.is_empty()?);
        initialize(&mut store, b"first")?;

        store.acquire_lock(LockLevel::Shared)?;
        let header = store.read_header()?;
        assert_eq!(header.page_count, 2);
        assert_eq!(header.change_counter, 1);
        assert_eq!(first_tuple(&mut store, PageId(1))?, b"first");
        store.release_lock()
    }

    #[test]
    fn test_reads_require_shared_lock() -> Result<()> {
        let dir = tempdir()?;
        let mut store = PageStore::open(&config(&dir))?;
        initialize(&mut store, b"x")?;
        assert!(matches!(store.read_page(PageId(1)), Err(Error::Misuse(_))));
        assert!(matches!(store.current_change_counter(), Err(Error::Misuse(_))));
        Ok(())
    }

    #[test]
    fn test_staged_pages_invisible_until_commit() -> Result<()> {
        let dir = tempdir()?;
        let mut writer = PageStore::open(&config(&dir))?;
        let mut reader = PageStore::open(&config(&dir))?;
        initialize(&mut writer, b"old")?;

        writer.acquire_lock(LockLevel::Shared)?;
        writer.begin_write()?;
        writer.write_page(PageId(1), heap_image(PageId(1), b"new"))?;
        assert_eq!(first_tuple(&mut writer, PageId(1))?, b"new");

        reader.acquire_lock(LockLevel::Shared)?;
        assert_eq!(first_tuple(&mut reader, PageId(1))?, b"old");
        assert_eq!(reader.current_change_counter()?, 1);

        // The reader's shared lock keeps the writer from publishing.
        assert!(writer.commit().unwrap_err().is_busy());
        reader.release_lock()?;

        assert_eq!(writer.commit()?, 2);
        writer.release_lock()?;

        reader.acquire_lock(LockLevel::Shared)?;
        assert_eq!(reader.current_change_counter()?, 2);
        assert_eq!(first_tuple(&mut reader, PageId(1))?, b"new");
        reader.release_lock()
    }

    #[test]
    fn test_single_writer() -> Result<()> {
        let dir = tempdir()?;
        let mut a = PageStore::open(&config(&dir))?;
        let mut b = PageStore::open(&config(&dir))?;
        initialize(&mut a, b"x")?;

        a.acquire_lock(LockLevel::Shared)?;
        b.acquire_lock(LockLevel::Shared)?;
        a.begin_write()?;
        assert!(b.begin_write().unwrap_err().is_busy());
        assert!(!b.in_write_transaction());
        assert_eq!(a.lock_state(), LockState::Reserved);
        Ok(())
    }

    #[test]
    fn test_rollback_discards_staged_pages() -> Result<()> {
        let dir = tempdir()?;
        let mut store = PageStore::open(&config(&dir))?;
        initialize(&mut store, b"keep")?;

        store.acquire_lock(LockLevel::Shared)?;
        store.begin_write()?;
        store.write_page(PageId(1), heap_image(PageId(1), b"drop"))?;
        store.rollback()?;
        assert_eq!(store.lock_level(), LockLevel::Shared);
        assert_eq!(first_tuple(&mut store, PageId(1))?, b"keep");
        assert_eq!(store.current_change_counter()?, 1);
        store.release_lock()
    }

    #[test]
    fn test_crash_between_journal_and_counter_bump() -> Result<()> {
        let dir = tempdir()?;
        {
            let mut store = PageStore::open(&config(&dir))?;
            initialize(&mut store, b"before")?;
        }

        let mut crashing = PageStore::open(&config(&dir))?;
        crashing.acquire_lock(LockLevel::Shared)?;
        crashing.begin_write()?;
        crashing.write_page(PageId(1), heap_image(PageId(1), b"after"))?;
        let grown = crashing.allocate_page()?;
        crashing.write_page(grown, heap_image(grown, b"extra"))?;
        // Staged order is header, page 1, page 2: only the header lands.
        crashing.crash_during_commit(1)?;

        let mut survivor = PageStore::open(&config(&dir))?;
        survivor.acquire_lock(LockLevel::Shared)?;
        assert!(survivor.recover_if_hot()?);

        let header = survivor.read_header()?;
        assert_eq!(header.change_counter, 1);
        assert_eq!(header.page_count, 2);
        assert_eq!(first_tuple(&mut survivor, PageId(1))?, b"before");
        assert!(matches!(
            survivor.read_page(PageId(2)),
            Err(Error::Corrupt { .. })
        ));
        assert!(!survivor.recover_if_hot()?);
        survivor.release_lock()
    }

    #[test]
    fn test_header_page_is_not_writable() -> Result<()> {
        let dir = tempdir()?;
        let mut store = PageStore::open(&config(&dir))?;
        initialize(&mut store, b"x")?;
        store.acquire_lock(LockLevel::Shared)?;
        store.begin_write()?;
        let image = Bytes::from(vec![0u8; PAGE_SIZE]);
        assert!(matches!(
            store.write_page(HEADER_PAGE_ID, image),
            Err(Error::Misuse(_))
        ));
        Ok(())
    }

    #[test]
    fn test_encrypted_store_needs_key() -> Result<()> {
        let dir = tempdir()?;
        {
            let mut store = PageStore::open(&config(&dir).with_key("123456789012"))?;
            assert!(store.is_encrypted());
            initialize(&mut store, b"secret")?;
        }

        let mut plain = PageStore::open(&config(&dir))?;
        plain.acquire_lock(LockLevel::Shared)?;
        assert!(matches!(plain.read_header(), Err(Error::Corrupt { .. })));
        plain.release_lock()?;

        let mut keyed = PageStore::open(&config(&dir).with_key("123456789012"))?;
        keyed.acquire_lock(LockLevel::Shared)?;
        assert_eq!(first_tuple(&mut keyed, PageId(1))?, b"secret");
        keyed.release_lock()
    }
}
