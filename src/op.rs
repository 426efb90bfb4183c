//! Queued mutation records and their failure envelope.

use serde::{Deserialize, Serialize};

use crate::types::{ErrorClass, OpId, OpStatus, TsMs};

/// Version number for serialized [`OpError`] envelopes in the durable log.
pub const ERROR_FORMAT_VERSION: u16 = 1;

/// Caller-supplied description of a mutation to queue or execute.
///
/// The engine treats `kind` and `payload` as opaque; only `resource_id`
/// carries meaning (per-resource ordering).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpDraft {
    /// Mutation tag, e.g. `"ADD_ITEM"` or `"UPDATE_PROFILE"`.
    pub kind: String,
    /// Logical entity the mutation targets.
    pub resource_id: String,
    /// Opaque serialized data the remote executor needs to replay it.
    pub payload: Vec<u8>,
}

/// Last classified failure recorded against an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpError {
    /// Retryability classification.
    pub class: ErrorClass,
    /// Human-readable reason, surfaced to UI on terminal failure.
    pub message: String,
}

/// Versioned wrapper for stable on-disk error payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpErrorEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped error.
    pub error: OpError,
}

impl OpErrorEnvelope {
    /// Constructs an envelope using [`ERROR_FORMAT_VERSION`].
    pub fn new(error: OpError) -> Self {
        Self {
            format_version: ERROR_FORMAT_VERSION,
            error,
        }
    }
}

/// One durable row of the operation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Log-assigned identifier and idempotency token.
    pub id: OpId,
    /// Mutation tag.
    pub kind: String,
    /// Logical entity the mutation targets.
    pub resource_id: String,
    /// Opaque replay payload.
    pub payload: Vec<u8>,
    /// Lifecycle state.
    pub status: OpStatus,
    /// Execution attempts so far. Monotone, engine-incremented only.
    pub attempts: u32,
    /// Creation timestamp; with `id` as tiebreak, defines per-resource order.
    pub created_at_ms: TsMs,
    /// Earliest timestamp at which a retry may run.
    pub next_eligible_at_ms: TsMs,
    /// Last classified failure, if any.
    pub last_error: Option<OpError>,
}

impl Operation {
    /// True while the operation can still affect a reconciliation overlay.
    pub fn is_unresolved(&self) -> bool {
        !self.status.is_resolved()
    }
}
