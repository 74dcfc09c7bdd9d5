//! coherdb: a small single-file storage engine whose connections keep
//! independent page caches yet always observe each other's committed writes.
//!
//! Every connection re-reads the change counter in the header page each time
//! it acquires a shared lock and drops its cache when the counter moved, so a
//! write committed on one connection is visible to the next statement of any
//! other connection on the same file.

pub mod access;
pub mod catalog;
pub mod concurrency;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod sql;
pub mod storage;
pub mod transaction;

pub use access::{DataType, Value};
pub use concurrency::{LockLevel, LockState};
pub use config::ConnectionConfig;
pub use connection::{Connection, StatementResult};
pub use error::{Error, Result};
pub use executor::{Params, Row, RowSet};
pub use storage::{CacheStats, JournalMode, PageId, PAGE_SIZE};
pub use transaction::ConnectionState;
