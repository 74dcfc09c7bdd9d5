use crate::error::{Error, Result};
use crate::storage::page::{PageId, PAGE_SIZE};
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Reads and writes raw (encoded) page bytes of one database file.
///
/// Each connection owns its own `PageManager`; all of them address the same
/// file, so nothing here is cached in user space.
pub struct PageManager {
    file: File,
    path: PathBuf,
    io_retries: u32,
}

impl PageManager {
    pub fn open(path: &Path, create: bool, io_retries: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    Error::NotFound(format!("database file {}", path.display()))
                } else {
                    Error::Io(e)
                }
            })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            io_retries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        if buf.len() != PAGE_SIZE {
            return Err(Error::Misuse(format!(
                "buffer size must be PAGE_SIZE ({}), got {}",
                PAGE_SIZE,
                buf.len()
            )));
        }

        let offset = Self::page_offset(page_id);
        if offset + PAGE_SIZE as u64 > self.len()? {
            return Err(Error::corrupt(page_id, "page lies beyond the end of the file"));
        }

        self.with_retry("read", |file| {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(buf)
        })
    }

    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        if data.len() != PAGE_SIZE {
            return Err(Error::Misuse(format!(
                "data size must be PAGE_SIZE ({}), got {}",
                PAGE_SIZE,
                data.len()
            )));
        }

        let offset = Self::page_offset(page_id);
        self.with_retry("write", |file| {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(data)
        })
    }

    pub fn sync(&mut self) -> Result<()> {
        self.with_retry("sync", |file| file.sync_all())
    }

    pub fn num_pages(&self) -> Result<u32> {
        Ok((self.len()? / PAGE_SIZE as u64) as u32)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Shrinks (or grows) the file to exactly `num_pages` pages.
    pub fn truncate(&mut self, num_pages: u32) -> Result<()> {
        let new_size = num_pages as u64 * PAGE_SIZE as u64;
        self.with_retry("truncate", |file| file.set_len(new_size))
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id.0 as u64 * PAGE_SIZE as u64
    }

    /// Retries transient failures a bounded number of times, then surfaces them.
    fn with_retry<T>(
        &mut self,
        op: &str,
        mut f: impl FnMut(&mut File) -> io::Result<T>,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            match f(&mut self.file) {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) && attempt < self.io_retries => {
                    attempt += 1;
                    log::warn!(
                        "{} on {} failed ({}), retry {}/{}",
                        op,
                        self.path.display(),
                        e,
                        attempt,
                        self.io_retries
                    );
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create(path: &Path) -> Result<PageManager> {
        PageManager::open(path, true, 3)
    }

    #[test]
    fn test_create_and_open() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");

        {
            let pm = create(&file_path)?;
            assert_eq!(pm.num_pages()?, 0);
            assert!(pm.is_empty()?);
        }

        {
            let pm = PageManager::open(&file_path, false, 3)?;
            assert_eq!(pm.num_pages()?, 0);
        }

        Ok(())
    }

    #[test]
    fn test_write_and_read_page() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let mut pm = create(&dir.path().join("test.db"))?;

        let mut write_buf = vec![0u8; PAGE_SIZE];
        write_buf[0] = 42;
        write_buf[PAGE_SIZE - 1] = 24;
        pm.write_page(PageId(0), &write_buf)?;

        let mut read_buf = vec![0u8; PAGE_SIZE];
        pm.read_page(PageId(0), &mut read_buf)?;

        assert_eq!(read_buf[0], 42);
        assert_eq!(read_buf[PAGE_SIZE - 1], 24);

        Ok(())
    }

    #[test]
    fn test_page_boundary() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let mut pm = create(&dir.path().join("test.db"))?;

        pm.write_page(PageId(0), &vec![1u8; PAGE_SIZE])?;
        pm.write_page(PageId(1), &vec![2u8; PAGE_SIZE])?;

        let mut read_buf = vec![0u8; PAGE_SIZE];
        pm.read_page(PageId(0), &mut read_buf)?;
        assert!(read_buf.iter().all(|&b| b == 1));

        pm.read_page(PageId(1), &mut read_buf)?;
        assert!(read_buf.iter().all(|&b| b == 2));

        Ok(())
    }

    #[test]
    fn test_read_past_end_is_corrupt() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let mut pm = create(&dir.path().join("test.db"))?;

        let mut buf = vec![0u8; PAGE_SIZE];
        let result = pm.read_page(PageId(10), &mut buf);
        assert!(matches!(result, Err(Error::Corrupt { .. })));

        Ok(())
    }

    #[test]
    fn test_invalid_buffer_size() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let mut pm = create(&dir.path().join("test.db"))?;

        let mut small_buf = vec![0u8; 100];
        assert!(pm.read_page(PageId(0), &mut small_buf).is_err());
        assert!(pm.write_page(PageId(0), &small_buf).is_err());

        Ok(())
    }

    #[test]
    fn test_open_nonexistent_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let result = PageManager::open(&dir.path().join("nonexistent.db"), false, 3);
        assert!(matches!(result, Err(Error::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_file_growth_and_truncate() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let mut pm = create(&dir.path().join("test.db"))?;

        pm.write_page(PageId(5), &vec![5u8; PAGE_SIZE])?;
        assert_eq!(pm.num_pages()?, 6);

        pm.truncate(2)?;
        assert_eq!(pm.num_pages()?, 2);

        Ok(())
    }

    #[test]
    fn test_two_handles_share_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let mut writer = create(&file_path)?;
        let mut reader = PageManager::open(&file_path, false, 3)?;

        writer.write_page(PageId(0), &vec![9u8; PAGE_SIZE])?;

        let mut buf = vec![0u8; PAGE_SIZE];
        reader.read_page(PageId(0), &mut buf)?;
        assert_eq!(buf[0], 9);

        Ok(())
    }

    /// Runs `with_retry` over an operation that fails `failures` times with
    /// `kind` before succeeding. Returns the result and the attempts made.
    fn flaky(pm: &mut PageManager, kind: ErrorKind, failures: u32) -> (Result<u32>, u32) {
        let mut attempts = 0;
        let result = pm.with_retry("flaky op", |_| {
            attempts += 1;
            if attempts <= failures {
                Err(io::Error::from(kind))
            } else {
                Ok(attempts)
            }
        });
        (result, attempts)
    }

    #[test]
    fn test_transient_errors_are_retried_up_to_the_limit() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let mut pm = create(&dir.path().join("retry.db"))?;

        for failures in 0..=3 {
            let (result, attempts) = flaky(&mut pm, ErrorKind::Interrupted, failures);
            assert_eq!(result?, failures + 1);
            assert_eq!(attempts, failures + 1);
        }

        let (result, attempts) = flaky(&mut pm, ErrorKind::Interrupted, 4);
        assert!(matches!(result, Err(Error::Io(ref e)) if e.kind() == ErrorKind::Interrupted));
        assert_eq!(attempts, 4);
        Ok(())
    }

    #[test]
    fn test_permanent_errors_are_not_retried() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let mut pm = create(&dir.path().join("fatal.db"))?;

        let (result, attempts) = flaky(&mut pm, ErrorKind::PermissionDenied, 1);
        assert!(matches!(result, Err(Error::Io(ref e)) if e.kind() == ErrorKind::PermissionDenied));
        assert_eq!(attempts, 1);

        let mut no_retries = PageManager::open(&dir.path().join("fatal.db"), false, 0)?;
        let (result, attempts) = flaky(&mut no_retries, ErrorKind::TimedOut, 1);
        assert!(result.is_err());
        assert_eq!(attempts, 1);
        Ok(())
    }
}
