//! Transaction support for coherdb:
//! - transaction ids recorded in the journal
//! - the connection state machine
//! - the scoped [`Transaction`] guard that ties locks, cache and journal
//!   together for one statement

pub mod guard;
pub mod id;
pub mod state;

pub use guard::{PageRead, PageWrite, Transaction};
pub use id::{TransactionId, TransactionIdGenerator};
pub use state::ConnectionState;
