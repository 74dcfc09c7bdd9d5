//! Access layer for record-oriented operations.
//!
//! - **TableHeap**: a table's records spread over a chain of heap pages
//! - **Value**: type-safe representation of column values
//! - **DataType**: supported column types and the row encoding
//!
//! Everything here works against the [`PageRead`]/[`PageWrite`] traits, so
//! the access layer never touches locks or the cache directly.
//!
//! [`PageRead`]: crate::transaction::PageRead
//! [`PageWrite`]: crate::transaction::PageWrite

pub mod heap;
pub mod value;

pub use heap::TableHeap;
pub use value::{deserialize_values, serialize_values, DataType, Value};
