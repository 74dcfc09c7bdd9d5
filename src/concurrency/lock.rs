//! File-level lock table.
//!
//! Every database file has one [`FileLock`] per process, shared by all
//! connections that opened the file. Connections move through the levels
//! `None -> Shared -> Reserved -> Pending -> Exclusive`:
//!
//! - any number of holders may be `Shared` at once;
//! - `Reserved` is the single-writer token; it coexists with readers;
//! - `Pending` is held by the writer while it waits for readers to drain and
//!   keeps new readers out;
//! - `Exclusive` is granted once the writer is the only remaining holder.

use crate::error::{Error, Result};
use crate::transaction::{TransactionId, TransactionIdGenerator};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

/// Lock level held by a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockLevel {
    None,
    Shared,
    Reserved,
    Pending,
    Exclusive,
}

/// Lock state of a file as observed by all connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Shared(usize),
    Reserved,
    Pending,
    Exclusive,
}

/// Identifies a lock holder (one per page store handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HolderId(u64);

impl HolderId {
    pub fn next() -> Self {
        static NEXT_HOLDER: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_HOLDER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn{}", self.0)
    }
}

#[derive(Debug, Default)]
struct LockTable {
    shared: HashSet<HolderId>,
    reserved: Option<HolderId>,
    pending: Option<HolderId>,
    exclusive: Option<HolderId>,
}

impl LockTable {
    fn level_of(&self, holder: HolderId) -> LockLevel {
        if self.exclusive == Some(holder) {
            LockLevel::Exclusive
        } else if self.pending == Some(holder) {
            LockLevel::Pending
        } else if self.reserved == Some(holder) {
            LockLevel::Reserved
        } else if self.shared.contains(&holder) {
            LockLevel::Shared
        } else {
            LockLevel::None
        }
    }

    fn held_by_other(slot: Option<HolderId>, holder: HolderId) -> bool {
        slot.is_some_and(|h| h != holder)
    }

    /// Returns why `target` cannot be granted to `holder` right now.
    fn conflict(&self, holder: HolderId, target: LockLevel) -> Option<&'static str> {
        let writer_elsewhere = Self::held_by_other(self.reserved, holder)
            || Self::held_by_other(self.pending, holder)
            || Self::held_by_other(self.exclusive, holder);

        match target {
            LockLevel::None => None,
            LockLevel::Shared => {
                if Self::held_by_other(self.exclusive, holder) {
                    Some("another connection holds the exclusive lock")
                } else if Self::held_by_other(self.pending, holder) {
                    Some("another connection is waiting to commit")
                } else {
                    None
                }
            }
            LockLevel::Reserved | LockLevel::Pending => {
                writer_elsewhere.then_some("another connection holds the write lock")
            }
            LockLevel::Exclusive => {
                if writer_elsewhere {
                    Some("another connection holds the write lock")
                } else if self.shared.iter().any(|&h| h != holder) {
                    Some("readers are still active")
                } else {
                    None
                }
            }
        }
    }

    fn grant(&mut self, holder: HolderId, target: LockLevel) {
        match target {
            LockLevel::None => {}
            LockLevel::Shared => {
                self.shared.insert(holder);
            }
            LockLevel::Reserved => self.reserved = Some(holder),
            LockLevel::Pending => self.pending = Some(holder),
            LockLevel::Exclusive => {
                self.pending = None;
                self.exclusive = Some(holder);
            }
        }
    }

    /// Drops every level of `holder` above `to`.
    fn release(&mut self, holder: HolderId, to: LockLevel) {
        if self.exclusive == Some(holder) {
            self.exclusive = None;
        }
        if self.pending == Some(holder) {
            self.pending = None;
        }
        if self.reserved == Some(holder) {
            self.reserved = None;
        }
        if to == LockLevel::None {
            self.shared.remove(&holder);
        }
    }

    fn state(&self) -> LockState {
        if self.exclusive.is_some() {
            LockState::Exclusive
        } else if self.pending.is_some() {
            LockState::Pending
        } else if self.reserved.is_some() {
            LockState::Reserved
        } else if !self.shared.is_empty() {
            LockState::Shared(self.shared.len())
        } else {
            LockState::Unlocked
        }
    }
}

fn registry() -> &'static DashMap<PathBuf, Weak<FileLock>> {
    static REGISTRY: OnceLock<DashMap<PathBuf, Weak<FileLock>>> = OnceLock::new();
    REGISTRY.get_or_init(DashMap::new)
}

/// Lock table of one database file, shared by all of its connections.
pub struct FileLock {
    path: PathBuf,
    table: Mutex<LockTable>,
    changed: Condvar,
    tx_ids: TransactionIdGenerator,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table: Mutex::new(LockTable::default()),
            changed: Condvar::new(),
            tx_ids: TransactionIdGenerator::new(),
        }
    }

    /// Returns the process-wide lock table for the file at `path`.
    pub fn for_path(path: &Path) -> Result<Arc<FileLock>> {
        let canonical = path.canonicalize()?;
        let mut entry = registry()
            .entry(canonical.clone())
            .or_insert_with(Weak::new);
        if let Some(lock) = entry.upgrade() {
            return Ok(lock);
        }
        let lock = Arc::new(FileLock::new(canonical));
        *entry = Arc::downgrade(&lock);
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raises `holder` to `target`, waiting at most `timeout` for conflicting
    /// holders to go away. Fails with `Busy` when the wait expires.
    pub fn acquire(&self, holder: HolderId, target: LockLevel, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut table = self.table.lock();

        let current = table.level_of(holder);
        if current >= target {
            return Ok(());
        }
        let required = match target {
            LockLevel::None | LockLevel::Shared => LockLevel::None,
            LockLevel::Reserved => LockLevel::Shared,
            LockLevel::Pending | LockLevel::Exclusive => LockLevel::Reserved,
        };
        if current < required {
            return Err(Error::Misuse(format!(
                "cannot acquire {:?} lock while holding {:?}",
                target, current
            )));
        }

        if target == LockLevel::Exclusive && table.pending.is_none() {
            // Keep new readers out while waiting for current ones to leave.
            table.grant(holder, LockLevel::Pending);
        }

        loop {
            let reason = match table.conflict(holder, target) {
                None => {
                    table.grant(holder, target);
                    log::debug!("{} acquired {:?} on {}", holder, target, self.path.display());
                    return Ok(());
                }
                Some(reason) => reason,
            };

            if self.changed.wait_until(&mut table, deadline).timed_out() {
                if table.conflict(holder, target).is_none() {
                    table.grant(holder, target);
                    return Ok(());
                }
                if target == LockLevel::Exclusive && table.pending == Some(holder) {
                    table.pending = None;
                    self.changed.notify_all();
                }
                log::debug!(
                    "{} gave up on {:?} for {}: {}",
                    holder,
                    target,
                    self.path.display(),
                    reason
                );
                return Err(Error::Busy(format!(
                    "{} ({:?} lock on {})",
                    reason,
                    target,
                    self.path.display()
                )));
            }
        }
    }

    /// Lowers `holder` to `to` (`Shared` or `None`) and wakes waiters.
    pub fn release(&self, holder: HolderId, to: LockLevel) {
        let mut table = self.table.lock();
        table.release(holder, to);
        log::debug!("{} released to {:?} on {}", holder, to, self.path.display());
        self.changed.notify_all();
    }

    pub fn level_of(&self, holder: HolderId) -> LockLevel {
        self.table.lock().level_of(holder)
    }

    pub fn state(&self) -> LockState {
        self.table.lock().state()
    }

    /// True while some connection holds `Reserved` or stronger.
    pub fn writer_active(&self) -> bool {
        let table = self.table.lock();
        table.reserved.is_some() || table.pending.is_some() || table.exclusive.is_some()
    }

    pub fn next_transaction_id(&self) -> TransactionId {
        self.tx_ids.next()
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // A racing `for_path` may already have registered a replacement.
        registry().remove_if(&self.path, |_, lock| lock.strong_count() == 0);
    }
}
