//! Engine handle and single-writer command loop.
//!
//! All log writes funnel through one actor task, which makes the drain pass
//! single-flight process-wide without an explicit lock: the loop runs one
//! command at a time, and scheduler-triggered drain requests coalesce in a
//! bounded-1 channel.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot, watch},
    task::JoinSet,
    time::Duration,
};
use tracing::{debug, info, warn};

use crate::{
    connectivity::ConnectivityState,
    engine::{
        backoff::BackoffPolicy,
        executor::{RemoteError, RemoteExecutor},
    },
    log::{DurableLog, LogError, LogResult},
    op::{OpDraft, OpError, Operation},
    types::{ErrorClass, OpId, TsMs},
};

use super::events::{DrainSummary, QueueSnapshot, SyncEvent};

/// Engine-level failure.
#[derive(Debug)]
pub enum EngineError {
    /// Durable log failure. Aborts the current pass; retried on the next
    /// scheduled drain.
    Log(LogError),
    /// Permanent rejection surfaced synchronously on the immediate path.
    /// The operation is recorded as `FailedPermanent`, never retried.
    Rejected(OpError),
    /// The engine task is gone.
    ChannelClosed,
}

impl From<LogError> for EngineError {
    fn from(value: LogError) -> Self {
        Self::Log(value)
    }
}

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Attempts before a transient failure is promoted to terminal.
    pub max_attempts: u32,
    /// Backoff base delay (and jitter window width).
    pub base_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Timeout for each remote call. A timeout classifies as transient.
    pub remote_timeout: Duration,
    /// Resource lanes drained concurrently. 1 = serial (default).
    pub drain_lanes: usize,
    /// How long resolved rows are kept for audit before purging.
    pub retention: Duration,
    /// When false, a metered connection defers draining.
    pub allow_metered: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            remote_timeout: Duration::from_secs(10),
            drain_lanes: 1,
            retention: Duration::from_secs(24 * 60 * 60),
            allow_metered: true,
        }
    }
}

/// Outcome of [`SyncHandle::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Executed immediately and confirmed applied.
    Applied(OpId),
    /// Durably queued for a later drain pass.
    Enqueued(OpId),
}

/// Cloneable handle to the engine task.
pub struct SyncHandle {
    cmd_tx: mpsc::Sender<Command>,
    drain_tx: mpsc::Sender<()>,
    events_tx: broadcast::Sender<SyncEvent>,
    queue_rx: watch::Receiver<QueueSnapshot>,
}

impl Clone for SyncHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            drain_tx: self.drain_tx.clone(),
            events_tx: self.events_tx.clone(),
            queue_rx: self.queue_rx.clone(),
        }
    }
}

enum Command {
    Submit {
        draft: OpDraft,
        resp: oneshot::Sender<Result<SubmitOutcome, EngineError>>,
    },
    Drain {
        resp: oneshot::Sender<Result<DrainSummary, EngineError>>,
    },
    PendingCount {
        resp: oneshot::Sender<Result<u64, EngineError>>,
    },
    Get {
        id: OpId,
        resp: oneshot::Sender<Result<Option<Operation>, EngineError>>,
    },
    Purge {
        resp: oneshot::Sender<Result<u64, EngineError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

type SharedLog = Arc<Mutex<Box<dyn DurableLog>>>;

#[derive(Clone)]
struct EngineCtx {
    log: SharedLog,
    executor: Arc<dyn RemoteExecutor>,
    connectivity: watch::Receiver<ConnectivityState>,
    events_tx: broadcast::Sender<SyncEvent>,
    queue_tx: Arc<watch::Sender<QueueSnapshot>>,
    config: SyncConfig,
    backoff: BackoffPolicy,
}

/// Spawns the engine task and returns its handle.
///
/// Startup recovery runs first: any `InFlight` rows left behind by a crash
/// are returned to `Pending` (at-least-once; the remote side de-duplicates
/// by operation id).
pub fn spawn_sync(
    log: Box<dyn DurableLog>,
    executor: Arc<dyn RemoteExecutor>,
    connectivity: watch::Receiver<ConnectivityState>,
    config: SyncConfig,
) -> SyncHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (drain_tx, mut drain_rx) = mpsc::channel::<()>(1);
    let (events_tx, _) = broadcast::channel::<SyncEvent>(1024);
    let (queue_tx, queue_rx) = watch::channel(QueueSnapshot::default());

    let ctx = EngineCtx {
        log: Arc::new(Mutex::new(log)),
        executor,
        connectivity,
        events_tx: events_tx.clone(),
        queue_tx: Arc::new(queue_tx),
        backoff: BackoffPolicy {
            base: config.base_delay,
            max: config.max_delay,
        },
        config,
    };

    tokio::spawn(async move {
        let mut recovered = match with_log(&ctx.log, |log| log.recover_in_flight()).await {
            Ok(reset) => {
                if reset > 0 {
                    info!(reset, "reset in-flight operations to pending at startup");
                }
                true
            }
            Err(err) => {
                warn!(error = ?err, "startup in-flight recovery failed, will retry on drain");
                false
            }
        };
        refresh_snapshot(&ctx, None).await;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    if handle_command(&ctx, cmd, &mut recovered).await {
                        break;
                    }
                }
                Some(()) = drain_rx.recv() => {
                    if let Err(err) = run_drain(&ctx, &mut recovered).await {
                        warn!(error = ?err, "scheduled drain pass aborted");
                    }
                }
            }
        }
    });

    SyncHandle {
        cmd_tx,
        drain_tx,
        events_tx,
        queue_rx,
    }
}

impl SyncHandle {
    /// Submits a mutation. When online and the resource lane is empty the
    /// operation is executed immediately; otherwise (or on transient
    /// failure) it stays durably queued. A permanent failure on the
    /// immediate path surfaces as [`EngineError::Rejected`].
    pub async fn submit(&self, draft: OpDraft) -> Result<SubmitOutcome, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Submit { draft, resp: tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Runs one drain pass and returns its counters. Exposed for explicit
    /// pull-to-refresh / manual retry triggers.
    pub async fn drain(&self) -> Result<DrainSummary, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Drain { resp: tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Requests a drain pass without waiting for it. Requests arriving
    /// while one is already queued coalesce into a single pass.
    pub fn request_drain(&self) {
        let _ = self.drain_tx.try_send(());
    }

    /// Number of unresolved operations in the log.
    pub async fn pending_count(&self) -> Result<u64, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::PendingCount { resp: tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Looks up one operation by id.
    pub async fn get(&self, id: OpId) -> Result<Option<Operation>, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Get { id, resp: tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Purges resolved rows older than the configured retention window.
    pub async fn purge_resolved(&self) -> Result<u64, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Purge { resp: tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Subscribes to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events_tx.subscribe()
    }

    /// Observes the queue: last known snapshot immediately, then every
    /// transition.
    pub fn observe_queue(&self) -> watch::Receiver<QueueSnapshot> {
        self.queue_rx.clone()
    }

    /// Stops the engine task.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Shutdown { resp: tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

async fn handle_command(ctx: &EngineCtx, cmd: Command, recovered: &mut bool) -> bool {
    match cmd {
        Command::Submit { draft, resp } => {
            let _ = resp.send(handle_submit(ctx, draft).await);
        }
        Command::Drain { resp } => {
            let _ = resp.send(run_drain(ctx, recovered).await);
        }
        Command::PendingCount { resp } => {
            let _ = resp.send(with_log(&ctx.log, |log| log.pending_count()).await);
        }
        Command::Get { id, resp } => {
            let _ = resp.send(with_log(&ctx.log, move |log| log.get(id)).await);
        }
        Command::Purge { resp } => {
            let cutoff = now_ms().saturating_sub(ctx.config.retention.as_millis() as u64);
            let _ = resp.send(with_log(&ctx.log, move |log| {
                log.purge_resolved_older_than(cutoff)
            })
            .await);
        }
        Command::Shutdown { resp } => {
            let _ = resp.send(());
            return true;
        }
    }
    false
}

async fn handle_submit(ctx: &EngineCtx, draft: OpDraft) -> Result<SubmitOutcome, EngineError> {
    let resource = draft.resource_id.clone();
    let lane_empty =
        with_log(&ctx.log, move |log| log.pending_for_resource(&resource)).await? == 0;

    let now = now_ms();
    let id = with_log(&ctx.log, move |log| log.append(draft, now)).await?;

    if drain_allowed(ctx) && lane_empty {
        let op = with_log(&ctx.log, move |log| log.get(id))
            .await?
            .ok_or(EngineError::Log(LogError::MissingOp(id)))?;
        return match execute_one(ctx, op).await? {
            ApplyOutcome::Succeeded => Ok(SubmitOutcome::Applied(id)),
            ApplyOutcome::Retrying => Ok(SubmitOutcome::Enqueued(id)),
            ApplyOutcome::Terminal { message } => Err(EngineError::Rejected(OpError {
                class: ErrorClass::Permanent,
                message,
            })),
        };
    }

    debug!(id, "operation enqueued for deferred delivery");
    publish(ctx, SyncEvent::Enqueued { id }).await;
    Ok(SubmitOutcome::Enqueued(id))
}

enum ApplyOutcome {
    Succeeded,
    Retrying,
    Terminal { message: String },
}

async fn execute_one(ctx: &EngineCtx, op: Operation) -> Result<ApplyOutcome, EngineError> {
    let id = op.id;
    with_log(&ctx.log, move |log| log.mark_in_flight(id)).await?;

    debug!(
        id,
        kind = %op.kind,
        resource = %op.resource_id,
        attempts = op.attempts,
        "applying operation"
    );
    let result = tokio::time::timeout(ctx.config.remote_timeout, ctx.executor.apply(&op)).await;

    let outcome = match result {
        Ok(Ok(())) => {
            let now = now_ms();
            with_log(&ctx.log, move |log| log.mark_succeeded(id, now)).await?;
            publish(ctx, SyncEvent::Applied { id }).await;
            ApplyOutcome::Succeeded
        }
        Ok(Err(err)) if err.class == ErrorClass::Permanent => {
            warn!(id, message = %err.message, "permanent remote failure");
            let op_error = OpError {
                class: ErrorClass::Permanent,
                message: err.message.clone(),
            };
            let now = now_ms();
            with_log(&ctx.log, move |log| {
                log.mark_permanent_failure(id, &op_error, now)
            })
            .await?;
            publish(
                ctx,
                SyncEvent::FailedPermanently {
                    id,
                    message: err.message.clone(),
                },
            )
            .await;
            ApplyOutcome::Terminal {
                message: err.message,
            }
        }
        other => {
            let err = match other {
                Ok(Err(err)) => err,
                _ => RemoteError::transient("remote call timed out"),
            };
            let attempts = op.attempts + 1;
            let op_error = OpError {
                class: ErrorClass::Transient,
                message: err.message.clone(),
            };

            if attempts >= ctx.config.max_attempts {
                warn!(id, attempts, message = %err.message, "retry budget exhausted");
                let now = now_ms();
                with_log(&ctx.log, move |log| {
                    log.mark_permanent_failure(id, &op_error, now)
                })
                .await?;
                publish(
                    ctx,
                    SyncEvent::FailedPermanently {
                        id,
                        message: err.message.clone(),
                    },
                )
                .await;
                ApplyOutcome::Terminal {
                    message: err.message,
                }
            } else {
                let next = now_ms().saturating_add(ctx.backoff.delay(attempts).as_millis() as u64);
                debug!(id, attempts, next_eligible_at_ms = next, "transient failure, rescheduled");
                with_log(&ctx.log, move |log| log.mark_failed(id, &op_error, next)).await?;
                publish(
                    ctx,
                    SyncEvent::Retrying {
                        id,
                        attempts,
                        next_eligible_at_ms: next,
                    },
                )
                .await;
                ApplyOutcome::Retrying
            }
        }
    };
    Ok(outcome)
}

async fn run_drain(ctx: &EngineCtx, recovered: &mut bool) -> Result<DrainSummary, EngineError> {
    // Crash recovery that hit a storage error at startup is retried here
    // until it lands; rows stuck `InFlight` are invisible to eligibility.
    if !*recovered {
        let reset = with_log(&ctx.log, |log| log.recover_in_flight()).await?;
        if reset > 0 {
            info!(reset, "reset in-flight operations to pending");
        }
        *recovered = true;
    }

    let mut summary = DrainSummary::default();
    let lanes = ctx.config.drain_lanes.max(1);

    loop {
        // Re-checked before every batch so a mid-pass connectivity drop
        // stops cleanly after the current entry's result is persisted.
        if !drain_allowed(ctx) {
            debug!("drain deferred: offline or metered");
            break;
        }
        let now = now_ms();

        if lanes == 1 {
            let Some(op) = with_log(&ctx.log, move |log| log.next_eligible(now)).await? else {
                break;
            };
            tally(execute_one(ctx, op).await?, &mut summary);
        } else {
            let heads =
                with_log(&ctx.log, move |log| log.eligible_lane_heads(now, lanes)).await?;
            if heads.is_empty() {
                break;
            }

            let mut set = JoinSet::new();
            for op in heads {
                let lane_ctx = ctx.clone();
                set.spawn(async move { execute_one(&lane_ctx, op).await });
            }

            let mut first_err: Option<EngineError> = None;
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(Ok(outcome)) => tally(outcome, &mut summary),
                    Ok(Err(err)) => {
                        first_err.get_or_insert(err);
                    }
                    Err(err) => {
                        first_err.get_or_insert(EngineError::Log(LogError::Message(format!(
                            "lane join error: {err}"
                        ))));
                    }
                }
            }
            if let Some(err) = first_err {
                return Err(err);
            }
        }
    }

    let cutoff = now_ms().saturating_sub(ctx.config.retention.as_millis() as u64);
    if let Err(err) = with_log(&ctx.log, move |log| log.purge_resolved_older_than(cutoff)).await {
        warn!(error = ?err, "retention purge failed");
    }

    summary.remaining = with_log(&ctx.log, |log| log.pending_count()).await?;
    publish(ctx, SyncEvent::DrainFinished { summary }).await;
    Ok(summary)
}

fn tally(outcome: ApplyOutcome, summary: &mut DrainSummary) {
    match outcome {
        ApplyOutcome::Succeeded => summary.succeeded += 1,
        ApplyOutcome::Retrying | ApplyOutcome::Terminal { .. } => summary.failed += 1,
    }
}

fn drain_allowed(ctx: &EngineCtx) -> bool {
    let state = *ctx.connectivity.borrow();
    state.online && (ctx.config.allow_metered || !state.metered)
}

async fn publish(ctx: &EngineCtx, event: SyncEvent) {
    let _ = ctx.events_tx.send(event.clone());
    refresh_snapshot(ctx, Some(event)).await;
}

async fn refresh_snapshot(ctx: &EngineCtx, event: Option<SyncEvent>) {
    let pending = match with_log(&ctx.log, |log| log.pending_count()).await {
        Ok(pending) => pending,
        // Keep the stale count rather than lying with zero.
        Err(_) => ctx.queue_tx.borrow().pending,
    };
    let last_event = event.or_else(|| ctx.queue_tx.borrow().last_event.clone());
    ctx.queue_tx.send_replace(QueueSnapshot {
        pending,
        last_event,
    });
}

async fn with_log<T, F>(log: &SharedLog, f: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn DurableLog) -> LogResult<T> + Send + 'static,
{
    let log = Arc::clone(log);
    tokio::task::spawn_blocking(move || {
        let mut guard = log.blocking_lock();
        f(guard.as_mut())
    })
    .await
    .map_err(|err| EngineError::Log(LogError::Message(format!("join error: {err}"))))?
    .map_err(EngineError::Log)
}

fn now_ms() -> TsMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
