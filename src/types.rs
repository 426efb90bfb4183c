//! Shared primitive IDs, timestamps, and classification enums.

use serde::{Deserialize, Serialize};

/// Monotonic operation identifier, assigned by the durable log at append
/// time. Doubles as the idempotency token handed to the remote side.
pub type OpId = u64;
/// Milliseconds since the Unix epoch.
pub type TsMs = u64;

/// Lifecycle state of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpStatus {
    /// Waiting for execution, including retryable failures sitting out a
    /// backoff window.
    Pending,
    /// Handed to the remote executor; result not yet persisted.
    InFlight,
    /// Confirmed applied remotely. Terminal.
    Succeeded,
    /// Permanent error, or retry budget exhausted. Terminal.
    FailedPermanent,
}

impl OpStatus {
    /// True for terminal states that are never retried or mutated again.
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedPermanent)
    }
}

/// Retryability classification of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Network loss, timeout, 5xx-equivalent. Retried with backoff.
    Transient,
    /// Validation, conflict, 4xx-equivalent. Never retried.
    Permanent,
}
