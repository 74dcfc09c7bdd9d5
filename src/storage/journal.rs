//! Rollback journal.
//!
//! A write transaction stages new page images here. Commit is crash-atomic:
//!
//! 1. the prior on-disk image of every staged page that already existed is
//!    written to `<db>-journal` and synced;
//! 2. the staged pages (header page with the bumped change counter included)
//!    are written to the database file and synced;
//! 3. the journal is deleted or truncated.
//!
//! Step 3 is the point at which the new image becomes authoritative. A journal
//! that survives a crash between steps 1 and 3 is "hot": playing it back
//! restores the exact pre-commit file.

pub mod record;

use crate::error::{Error, Result};
use crate::storage::cipher::PageCodec;
use crate::storage::disk::PageManager;
use crate::storage::page::{PageId, PAGE_SIZE};
use crate::transaction::TransactionId;
use bytes::Bytes;
use record::{read_frame, write_frame, JournalHeader, JournalRecord};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How the journal is retired once a commit is durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JournalMode {
    /// Delete the journal file.
    #[default]
    Delete,
    /// Truncate the journal file to zero bytes and keep it.
    Truncate,
}

impl FromStr for JournalMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "delete" => Ok(JournalMode::Delete),
            "truncate" => Ok(JournalMode::Truncate),
            other => Err(Error::Config(format!("unsupported journal mode '{other}'"))),
        }
    }
}

struct ActiveTransaction {
    id: TransactionId,
    original_page_count: u32,
    page_count: u32,
    staged: BTreeMap<PageId, Bytes>,
    journal_written: bool,
}

pub struct Journal {
    path: PathBuf,
    mode: JournalMode,
    active: Option<ActiveTransaction>,
}

impl Journal {
    pub fn new(db_path: &Path, mode: JournalMode) -> Self {
        Self {
            path: Self::journal_path(db_path),
            mode,
            active: None,
        }
    }

    pub fn journal_path(db_path: &Path) -> PathBuf {
        let mut name = db_path.file_name().unwrap_or_default().to_os_string();
        name.push("-journal");
        db_path.with_file_name(name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn begin(&mut self, id: TransactionId, page_count: u32) -> Result<()> {
        if let Some(active) = &self.active {
            return Err(Error::Misuse(format!(
                "{} is still active, cannot begin {}",
                active.id, id
            )));
        }
        self.active = Some(ActiveTransaction {
            id,
            original_page_count: page_count,
            page_count,
            staged: BTreeMap::new(),
            journal_written: false,
        });
        Ok(())
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.active.as_ref().map(|active| active.id)
    }

    /// Working page count of the active transaction.
    pub fn page_count(&self) -> Option<u32> {
        self.active.as_ref().map(|active| active.page_count)
    }

    pub fn stage(&mut self, page_id: PageId, image: Bytes) -> Result<()> {
        let active = self.active_mut()?;
        if page_id.0 >= active.page_count {
            return Err(Error::Misuse(format!("page {page_id} has not been allocated")));
        }
        if image.len() != PAGE_SIZE {
            return Err(Error::Misuse(format!(
                "page {} image has {} bytes",
                page_id,
                image.len()
            )));
        }
        active.staged.insert(page_id, image);
        Ok(())
    }

    pub fn staged(&self, page_id: PageId) -> Option<&Bytes> {
        self.active.as_ref()?.staged.get(&page_id)
    }

    pub fn staged_pages(&self) -> usize {
        self.active.as_ref().map_or(0, |active| active.staged.len())
    }

    /// Extends the transaction's working page count by one page.
    pub fn allocate(&mut self) -> Result<PageId> {
        let active = self.active_mut()?;
        let page_id = PageId(active.page_count);
        active.page_count += 1;
        Ok(page_id)
    }

    pub fn commit(
        &mut self,
        id: TransactionId,
        file: &mut PageManager,
        codec: &PageCodec,
    ) -> Result<()> {
        self.check_id(id)?;
        self.write_journal(file)?;
        self.apply(file, codec)?;
        self.finalize()?;
        let active = self.active.take();
        log::debug!(
            "{} committed {} page(s) to {}",
            id,
            active.map_or(0, |active| active.staged.len()),
            file.path().display()
        );
        Ok(())
    }

    /// Discards staged pages. If the commit had already started writing the
    /// database file, the journal is played back first.
    pub fn rollback(&mut self, id: TransactionId, file: &mut PageManager) -> Result<()> {
        self.check_id(id)?;
        let journal_written = self.active.as_ref().is_some_and(|a| a.journal_written);
        self.active = None;
        if journal_written {
            self.playback(file)?;
        }
        log::debug!("{} rolled back", id);
        Ok(())
    }

    /// True when a journal left by an interrupted commit is present.
    pub fn is_hot(&self) -> Result<bool> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let header: Option<JournalHeader> = read_frame(&mut BufReader::new(file))?;
        Ok(header.is_some_and(|h| h.is_valid()))
    }

    /// Restores every journaled page, truncates the database to its prior
    /// size and retires the journal. Returns the number of pages restored.
    pub fn playback(&self, file: &mut PageManager) -> Result<usize> {
        let mut reader = match File::open(&self.path) {
            Ok(journal) => BufReader::new(journal),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let header = match read_frame::<_, JournalHeader>(&mut reader)? {
            Some(header) if header.is_valid() => header,
            _ => {
                self.finalize()?;
                return Ok(0);
            }
        };

        let mut restored = 0;
        for _ in 0..header.record_count {
            let record = match read_frame::<_, JournalRecord>(&mut reader)? {
                Some(record) if record.is_valid() => record,
                // Torn tail: the database was not touched past this point.
                _ => break,
            };
            file.write_page(record.page_id, &record.image)?;
            restored += 1;
        }
        file.truncate(header.original_page_count)?;
        file.sync()?;
        self.finalize()?;

        log::warn!(
            "rolled back {} from {}: restored {} page(s)",
            header.transaction_id,
            self.path.display(),
            restored
        );
        Ok(restored)
    }

    fn write_journal(&mut self, file: &mut PageManager) -> Result<()> {
        let path = self.path.clone();
        let active = self.active_mut()?;

        let mut records = Vec::new();
        for &page_id in active.staged.keys() {
            if page_id.0 < active.original_page_count {
                let mut prior = vec![0u8; PAGE_SIZE];
                file.read_page(page_id, &mut prior)?;
                records.push(JournalRecord::new(active.id, page_id, prior));
            }
        }

        let journal = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let mut writer = BufWriter::new(journal);
        let header = JournalHeader::new(active.id, active.original_page_count, records.len() as u32);
        write_frame(&mut writer, &header)?;
        for record in &records {
            write_frame(&mut writer, record)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        sync_parent_dir(&path)?;

        active.journal_written = true;
        Ok(())
    }

    fn apply(&mut self, file: &mut PageManager, codec: &PageCodec) -> Result<()> {
        let active = self.active_mut()?;
        for (&page_id, image) in &active.staged {
            let raw = codec.encode(page_id, image)?;
            file.write_page(page_id, &raw)?;
        }
        file.sync()
    }

    fn finalize(&self) -> Result<()> {
        match self.mode {
            JournalMode::Delete => match fs::remove_file(&self.path) {
                Ok(()) => sync_parent_dir(&self.path),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
            JournalMode::Truncate => match OpenOptions::new().write(true).open(&self.path) {
                Ok(journal) => {
                    journal.set_len(0)?;
                    journal.sync_all()?;
                    Ok(())
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Runs the commit protocol but stops after `pages_applied` staged pages
    /// reached the database file, leaving the journal behind as a crash would.
    #[cfg(test)]
    pub(crate) fn commit_interrupted(
        &mut self,
        file: &mut PageManager,
        codec: &PageCodec,
        pages_applied: usize,
    ) -> Result<()> {
        self.write_journal(file)?;
        let active = self.active.take().expect("active transaction");
        for (&page_id, image) in active.staged.iter().take(pages_applied) {
            file.write_page(page_id, &codec.encode(page_id, image)?)?;
        }
        file.sync()
    }

    fn check_id(&self, id: TransactionId) -> Result<()> {
        match self.transaction_id() {
            Some(active) if active == id => Ok(()),
            Some(active) => Err(Error::Misuse(format!("{id} is not the active transaction ({active})"))),
            None => Err(Error::Misuse(format!("{id} is not active"))),
        }
    }

    fn active_mut(&mut self) -> Result<&mut ActiveTransaction> {
        self.active
            .as_mut()
            .ok_or_else(|| Error::Misuse("no active write transaction".into()))
    }
}

/// Makes the creation or removal of `path` durable. A synced file whose
/// directory entry is lost is as good as missing after a power failure.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        db_path: PathBuf,
        file: PageManager,
        codec: PageCodec,
    }

    /// A three-page file whose pages are filled with 1, 2 and 3.
    fn fixture() -> Result<Fixture> {
        let dir = tempdir()?;
        let db_path = dir.path().join("test.db");
        let mut file = PageManager::open(&db_path, true, 0)?;
        let codec = PageCodec::default();
        for i in 0..3u8 {
            let raw = codec.encode(PageId(i as u32), &vec![i + 1; PAGE_SIZE])?;
            file.write_page(PageId(i as u32), &raw)?;
        }
        Ok(Fixture {
            _dir: dir,
            db_path,
            file,
            codec,
        })
    }

    fn image(fill: u8) -> Bytes {
        Bytes::from(vec![fill; PAGE_SIZE])
    }

    fn first_byte(f: &mut Fixture, page: u32) -> Result<u8> {
        let mut buf = vec![0u8; PAGE_SIZE];
        f.file.read_page(PageId(page), &mut buf)?;
        Ok(f.codec.decode(PageId(page), buf)?[0])
    }

    #[test]
    fn test_commit_applies_staged_pages() -> Result<()> {
        let mut f = fixture()?;
        let mut journal = Journal::new(&f.db_path, JournalMode::Delete);
        let tx = TransactionId(1);

        journal.begin(tx, 3)?;
        journal.stage(PageId(1), image(20))?;
        let new_page = journal.allocate()?;
        journal.stage(new_page, image(40))?;
        journal.commit(tx, &mut f.file, &f.codec)?;

        assert_eq!(first_byte(&mut f, 1)?, 20);
        assert_eq!(first_byte(&mut f, 3)?, 40);
        assert!(!journal.path().exists());
        assert!(!journal.is_hot()?);
        Ok(())
    }

    #[test]
    fn test_rollback_before_commit_leaves_file_untouched() -> Result<()> {
        let mut f = fixture()?;
        let mut journal = Journal::new(&f.db_path, JournalMode::Delete);
        let tx = TransactionId(2);

        journal.begin(tx, 3)?;
        journal.stage(PageId(2), image(99))?;
        journal.rollback(tx, &mut f.file)?;

        assert_eq!(first_byte(&mut f, 2)?, 3);
        assert_eq!(journal.staged_pages(), 0);
        Ok(())
    }

    #[test]
    fn test_crash_mid_apply_is_rolled_back() -> Result<()> {
        let mut f = fixture()?;
        let tx = TransactionId(3);
        {
            let mut journal = Journal::new(&f.db_path, JournalMode::Delete);
            journal.begin(tx, 3)?;
            journal.stage(PageId(0), image(10))?;
            journal.stage(PageId(2), image(30))?;
            let grown = journal.allocate()?;
            journal.stage(grown, image(50))?;
            journal.write_journal(&mut f.file)?;
            // Crash after the first page reached the database file.
            let raw = f.codec.encode(PageId(0), &image(10))?;
            f.file.write_page(PageId(0), &raw)?;
            let raw = f.codec.encode(PageId(3), &image(50))?;
            f.file.write_page(PageId(3), &raw)?;
        }

        let recovery = Journal::new(&f.db_path, JournalMode::Delete);
        assert!(recovery.is_hot()?);
        assert_eq!(recovery.playback(&mut f.file)?, 2);

        assert_eq!(first_byte(&mut f, 0)?, 1);
        assert_eq!(first_byte(&mut f, 2)?, 3);
        assert_eq!(f.file.num_pages()?, 3);
        assert!(!recovery.is_hot()?);
        Ok(())
    }

    #[test]
    fn test_truncate_mode_keeps_empty_journal() -> Result<()> {
        let mut f = fixture()?;
        let mut journal = Journal::new(&f.db_path, JournalMode::Truncate);
        let tx = TransactionId(4);

        journal.begin(tx, 3)?;
        journal.stage(PageId(1), image(7))?;
        journal.commit(tx, &mut f.file, &f.codec)?;

        assert!(journal.path().exists());
        assert_eq!(fs::metadata(journal.path())?.len(), 0);
        assert!(!journal.is_hot()?);
        Ok(())
    }

    #[test]
    fn test_single_active_transaction() -> Result<()> {
        let f = fixture()?;
        let mut journal = Journal::new(&f.db_path, JournalMode::Delete);
        journal.begin(TransactionId(5), 3)?;
        assert!(matches!(
            journal.begin(TransactionId(6), 3),
            Err(Error::Misuse(_))
        ));
        Ok(())
    }

    #[test]
    fn test_stage_requires_allocation() -> Result<()> {
        let f = fixture()?;
        let mut journal = Journal::new(&f.db_path, JournalMode::Delete);
        journal.begin(TransactionId(7), 3)?;
        assert!(journal.stage(PageId(3), image(1)).is_err());
        Ok(())
    }

    #[test]
    fn test_sync_parent_dir() -> Result<()> {
        let dir = tempdir()?;
        let journal = dir.path().join("a.db-journal");
        fs::write(&journal, b"")?;
        sync_parent_dir(&journal)?;
        // A bare file name lives in the working directory.
        sync_parent_dir(Path::new("a.db-journal"))?;
        Ok(())
    }

    #[test]
    fn test_journal_path() {
        let path = Journal::journal_path(Path::new("/tmp/Simple.db"));
        assert_eq!(path, Path::new("/tmp/Simple.db-journal"));
    }
}
