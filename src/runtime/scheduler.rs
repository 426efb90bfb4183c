//! Drain scheduling: periodic safety-net tick, connectivity-restore
//! trigger, and host resume pokes.
//!
//! The scheduler holds no durable state. A missed tick only delays work;
//! everything recoverable lives in the operation log. Each trigger enqueues
//! a drain request on the engine handle, where bursts coalesce into one
//! pass.

use tokio::{sync::mpsc, time::Duration};
use tracing::debug;

use crate::connectivity::ConnectivityState;

use super::handle::SyncHandle;

/// Handle to a running scheduler task. Dropping every clone stops the task.
#[derive(Clone)]
pub struct SchedulerHandle {
    poke_tx: mpsc::Sender<()>,
}

impl SchedulerHandle {
    /// Signals a host resume (app foregrounded). Triggers a drain request.
    pub fn poke(&self) {
        let _ = self.poke_tx.try_send(());
    }
}

/// Spawns the scheduler task.
///
/// The first tick fires immediately, so a freshly started host drains any
/// backlog left from a previous run without waiting a full interval.
pub fn spawn_scheduler(
    handle: SyncHandle,
    mut connectivity: tokio::sync::watch::Receiver<ConnectivityState>,
    tick: Duration,
) -> SchedulerHandle {
    let (poke_tx, mut poke_rx) = mpsc::channel::<()>(8);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut was_online = connectivity.borrow().online;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("scheduler tick");
                    handle.request_drain();
                }
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = connectivity.borrow_and_update().online;
                    if online && !was_online {
                        debug!("connectivity restored");
                        handle.request_drain();
                    }
                    was_online = online;
                }
                poke = poke_rx.recv() => {
                    let Some(()) = poke else { break };
                    debug!("host resume poke");
                    handle.request_drain();
                }
            }
        }
    });

    SchedulerHandle { poke_tx }
}
