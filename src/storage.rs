//! Storage layer of coherdb.
//!
//! - **Page**: fixed-size (8KB) blocks with a CRC-32C trailer; page 0 carries
//!   the database header and its change counter
//! - **PageManager**: raw page IO on one file handle
//! - **PageCodec**: optional page cipher on top of the checksum
//! - **Journal**: rollback journal that makes commits crash-atomic
//! - **PageStore**: one connection's locked view of the file
//! - **PageCache**: per-connection cache validated against the change counter

pub mod cache;
pub mod cipher;
pub mod disk;
pub mod journal;
pub mod page;
pub mod store;

pub use cache::{CacheStats, PageCache};
pub use cipher::{KeystreamCipher, PageCipher, PageCodec};
pub use disk::PageManager;
pub use journal::{Journal, JournalMode};
pub use page::{DatabaseHeader, HeapPage, PageId, PAGE_SIZE};
pub use store::PageStore;
