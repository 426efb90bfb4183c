//! Remote execution contract, retry policy, and reconciliation.

/// Exponential backoff policy.
pub mod backoff;
/// Remote executor trait and failure classification.
pub mod executor;
/// Server-view / pending-intent merge.
pub mod reconciler;
