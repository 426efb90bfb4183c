//! Offline-first synchronization engine: durable queuing of mutations made
//! while disconnected, and reconciliation with a remote service once
//! connectivity returns.
//!
//! Mutations submitted while offline land in a durable operation log and
//! are replayed against a caller-supplied [`engine::executor::RemoteExecutor`]
//! when a drain pass runs, with capped exponential backoff on transient
//! failures and per-resource ordering throughout. The operation id doubles
//! as an idempotency token, so at-least-once re-delivery after a crash or
//! timeout is safe.
//!
//! # Examples
//!
//! Offline submission with the in-memory log:
//! ```
//! use std::sync::Arc;
//!
//! use futures_util::future::BoxFuture;
//! use syncq::{
//!     connectivity::{ConnectivityMonitor, ConnectivityState},
//!     engine::executor::{RemoteError, RemoteExecutor},
//!     log::memory::MemoryLog,
//!     op::{OpDraft, Operation},
//!     runtime::handle::{SubmitOutcome, SyncConfig, spawn_sync},
//! };
//!
//! struct AlwaysOk;
//!
//! impl RemoteExecutor for AlwaysOk {
//!     fn apply<'a>(&'a self, _op: &'a Operation) -> BoxFuture<'a, Result<(), RemoteError>> {
//!         Box::pin(async { Ok(()) })
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let monitor = ConnectivityMonitor::fixed(ConnectivityState::OFFLINE);
//! let handle = spawn_sync(
//!     Box::new(MemoryLog::new()),
//!     Arc::new(AlwaysOk),
//!     monitor.observe(),
//!     SyncConfig::default(),
//! );
//!
//! let outcome = handle
//!     .submit(OpDraft {
//!         kind: "ADD_ITEM".to_string(),
//!         resource_id: "sku-1".to_string(),
//!         payload: br#"{"quantity":1}"#.to_vec(),
//!     })
//!     .await
//!     .expect("submit");
//! assert!(matches!(outcome, SubmitOutcome::Enqueued(_)));
//! assert_eq!(handle.pending_count().await.expect("count"), 1);
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
//!
//! Durable usage with the SQLite log and a scheduler:
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use futures_util::future::BoxFuture;
//! use syncq::{
//!     connectivity::{ConnectivityMonitor, ConnectivityState},
//!     engine::executor::{RemoteError, RemoteExecutor},
//!     log::sqlite::SqliteLog,
//!     op::Operation,
//!     runtime::{
//!         handle::{SyncConfig, spawn_sync},
//!         scheduler::spawn_scheduler,
//!     },
//! };
//!
//! struct AlwaysOk;
//!
//! impl RemoteExecutor for AlwaysOk {
//!     fn apply<'a>(&'a self, _op: &'a Operation) -> BoxFuture<'a, Result<(), RemoteError>> {
//!         Box::pin(async { Ok(()) })
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let log = SqliteLog::open("queue.db").expect("open sqlite");
//! let monitor = ConnectivityMonitor::fixed(ConnectivityState::ONLINE);
//! let handle = spawn_sync(
//!     Box::new(log),
//!     Arc::new(AlwaysOk),
//!     monitor.observe(),
//!     SyncConfig::default(),
//! );
//! let scheduler = spawn_scheduler(
//!     handle.clone(),
//!     monitor.observe(),
//!     Duration::from_secs(15 * 60),
//! );
//! scheduler.poke();
//! # }
//! ```

#![deny(missing_docs)]

/// Connectivity state, source trait, and de-duplicating monitor.
pub mod connectivity;
/// Remote execution contract, backoff policy, and reconciliation.
pub mod engine;
/// Durable operation log trait and backends.
pub mod log;
/// Operation records and failure envelope.
pub mod op;
/// Engine runtime, scheduler, and event streams.
pub mod runtime;
/// Shared primitive types and enums.
pub mod types;
