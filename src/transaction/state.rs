//! Connection state machine.
//!
//! ```text
//! Idle -> SharedRead -> Idle
//!                    -> ReservedWrite -> PendingWrite -> ExclusiveWrite -> SharedRead -> Idle
//! ```
//!
//! Each state names the lock actually held: a commit publishes under
//! `ExclusiveWrite` and drops back to `SharedRead` until the guard ends.
//!
//! Any state may fall back to `Idle` (rollback, error or guard drop).

use crate::concurrency::LockLevel;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    SharedRead,
    ReservedWrite,
    PendingWrite,
    ExclusiveWrite,
}

impl ConnectionState {
    /// Lock level a connection holds in this state.
    pub fn lock_level(&self) -> LockLevel {
        match self {
            Self::Idle => LockLevel::None,
            Self::SharedRead => LockLevel::Shared,
            Self::ReservedWrite => LockLevel::Reserved,
            Self::PendingWrite => LockLevel::Pending,
            Self::ExclusiveWrite => LockLevel::Exclusive,
        }
    }

    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Idle, SharedRead)
                | (SharedRead, ReservedWrite)
                | (ReservedWrite, PendingWrite)
                | (PendingWrite, ExclusiveWrite)
                // a failed escalation falls back to the reserved state
                | (PendingWrite, ReservedWrite)
                // a commit publishes and downgrades
                | (ExclusiveWrite, SharedRead)
                | (_, Idle)
        )
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_writing(&self) -> bool {
        matches!(
            self,
            Self::ReservedWrite | Self::PendingWrite | Self::ExclusiveWrite
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::SharedRead => write!(f, "SharedRead"),
            Self::ReservedWrite => write!(f, "ReservedWrite"),
            Self::PendingWrite => write!(f, "PendingWrite"),
            Self::ExclusiveWrite => write!(f, "ExclusiveWrite"),
        }
    }
}
