//! Durable operation log: trait and storage backends.

/// In-memory log for tests and ephemeral hosts.
pub mod memory;
/// SQLite-backed log.
pub mod sqlite;

use crate::{
    op::{OpDraft, OpError, Operation},
    types::{OpId, TsMs},
};

/// Storage-layer failure.
#[derive(Debug)]
pub enum LogError {
    /// Underlying SQLite failure.
    Sqlite(rusqlite::Error),
    /// Error envelope encode/decode failure.
    Serde(serde_json::Error),
    /// No row with the given id.
    MissingOp(OpId),
    /// Attempted to mutate a resolved (terminal) row.
    Resolved(OpId),
    /// Anything else.
    Message(String),
}

impl From<rusqlite::Error> for LogError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for LogError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

/// Result alias for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Durable, append-mostly store of queued mutations. The single source of
/// truth for what has not yet reached the server.
///
/// Implementations are blocking; the runtime serializes access and calls
/// them from a blocking context. Mutating marks on a resolved row must fail
/// with [`LogError::Resolved`] rather than silently rewrite history.
pub trait DurableLog: Send {
    /// Appends a new `Pending` row and returns its assigned id.
    fn append(&mut self, draft: OpDraft, now_ms: TsMs) -> LogResult<OpId>;

    /// Fetches a row by id.
    fn get(&mut self, id: OpId) -> LogResult<Option<Operation>>;

    /// Returns the oldest `Pending` row whose backoff window has passed and
    /// whose resource lane has no older unresolved row, or `None`.
    fn next_eligible(&mut self, now_ms: TsMs) -> LogResult<Option<Operation>>;

    /// Like [`DurableLog::next_eligible`], but returns up to `max_lanes`
    /// lane heads across distinct resources, oldest first.
    fn eligible_lane_heads(&mut self, now_ms: TsMs, max_lanes: usize) -> LogResult<Vec<Operation>>;

    /// Marks a row `InFlight`.
    fn mark_in_flight(&mut self, id: OpId) -> LogResult<()>;

    /// Marks a row `Succeeded` and stamps its resolution time.
    fn mark_succeeded(&mut self, id: OpId, now_ms: TsMs) -> LogResult<()>;

    /// Records a retryable failure: increments attempts, stores the error,
    /// returns the row to `Pending` with the given eligibility time.
    fn mark_failed(&mut self, id: OpId, error: &OpError, next_eligible_at_ms: TsMs)
    -> LogResult<()>;

    /// Records a terminal failure: increments attempts, stores the error,
    /// marks the row `FailedPermanent`, stamps its resolution time.
    fn mark_permanent_failure(&mut self, id: OpId, error: &OpError, now_ms: TsMs) -> LogResult<()>;

    /// Number of unresolved rows.
    fn pending_count(&mut self) -> LogResult<u64>;

    /// Number of unresolved rows for one resource.
    fn pending_for_resource(&mut self, resource_id: &str) -> LogResult<u64>;

    /// Startup recovery: returns every `InFlight` row to `Pending` and
    /// reports how many were reset. Re-delivery is safe because the
    /// operation id is an idempotency token.
    fn recover_in_flight(&mut self) -> LogResult<u64>;

    /// Deletes resolved rows whose resolution time is older than `cutoff_ms`.
    fn purge_resolved_older_than(&mut self, cutoff_ms: TsMs) -> LogResult<u64>;
}
