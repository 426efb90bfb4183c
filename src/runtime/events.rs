//! Events emitted by the sync runtime and the UI-facing queue snapshot.

use crate::types::{OpId, TsMs};

/// Result counters for one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainSummary {
    /// Operations confirmed applied remotely during the pass.
    pub succeeded: u64,
    /// Operations that failed during the pass (rescheduled or terminal).
    pub failed: u64,
    /// Unresolved operations left in the log after the pass.
    pub remaining: u64,
}

/// Events emitted from the engine loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// An operation was durably queued for later delivery.
    Enqueued {
        /// Queued operation id.
        id: OpId,
    },
    /// An operation was confirmed applied remotely.
    Applied {
        /// Applied operation id.
        id: OpId,
    },
    /// An operation failed transiently and was rescheduled.
    Retrying {
        /// Rescheduled operation id.
        id: OpId,
        /// Attempts made so far.
        attempts: u32,
        /// Earliest time of the next attempt.
        next_eligible_at_ms: TsMs,
    },
    /// An operation failed terminally and will never be retried. The UI
    /// should surface this for corrective action.
    FailedPermanently {
        /// Failed operation id.
        id: OpId,
        /// Classified failure reason.
        message: String,
    },
    /// A drain pass finished.
    DrainFinished {
        /// Pass counters.
        summary: DrainSummary,
    },
}

/// Last known queue state, replayed to every new observer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueSnapshot {
    /// Unresolved operations in the log.
    pub pending: u64,
    /// Most recent event, if any.
    pub last_event: Option<SyncEvent>,
}
