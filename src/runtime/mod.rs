//! Single-writer async runtime, scheduler, and event stream APIs.

/// Event stream and queue snapshot types.
pub mod events;
/// Handle, command loop, and drain implementation.
pub mod handle;
/// Durable-timer / event-triggered drain scheduling.
pub mod scheduler;
