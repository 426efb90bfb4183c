//! Remote execution contract.

use futures_util::future::BoxFuture;

use crate::{op::Operation, types::ErrorClass};

/// Classified failure returned by a [`RemoteExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// Retryability classification.
    pub class: ErrorClass,
    /// Reason, recorded against the operation.
    pub message: String,
}

impl RemoteError {
    /// A retryable failure (network, timeout, 5xx-class).
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Transient,
            message: message.into(),
        }
    }

    /// A non-retryable failure (validation, conflict, 4xx-class).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Permanent,
            message: message.into(),
        }
    }
}

/// Backend transport the engine replays operations against.
///
/// Implementations must treat [`Operation::id`] as an idempotency token:
/// re-delivery of an id already applied server-side must be a no-op success,
/// since the engine re-sends after a crash or timeout it cannot distinguish
/// from a lost response (at-least-once delivery).
pub trait RemoteExecutor: Send + Sync {
    /// Applies one operation remotely.
    fn apply<'a>(&'a self, op: &'a Operation) -> BoxFuture<'a, Result<(), RemoteError>>;
}
