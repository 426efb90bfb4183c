//! Connectivity monitoring: de-duplicated online/offline transitions.

use tokio::{sync::watch, time::Duration};
use tracing::debug;

/// Snapshot of the transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
    /// True when the network is reachable.
    pub online: bool,
    /// True when the connection is metered (cellular-class).
    pub metered: bool,
}

impl ConnectivityState {
    /// Offline, unmetered.
    pub const OFFLINE: Self = Self {
        online: false,
        metered: false,
    };

    /// Online, unmetered.
    pub const ONLINE: Self = Self {
        online: true,
        metered: false,
    };
}

/// The platform API could not be read. The monitor treats this as offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnavailable;

/// Platform hook the monitor polls for the current transport state.
pub trait ConnectivitySource: Send + 'static {
    /// Reads the current state. Must not block.
    fn sample(&mut self) -> Result<ConnectivityState, SourceUnavailable>;
}

/// Polls a [`ConnectivitySource`] and publishes de-duplicated transitions.
///
/// Subscribers get the last known state immediately, then every subsequent
/// transition. Consecutive identical samples are collapsed, so no consumer
/// sees a redundant online→online event. The polling task exits once every
/// receiver has been dropped.
pub struct ConnectivityMonitor {
    rx: watch::Receiver<ConnectivityState>,
    // Keeps a fixed-state channel open for the monitor's lifetime.
    _fixed_tx: Option<watch::Sender<ConnectivityState>>,
}

impl ConnectivityMonitor {
    /// Spawns the polling task. The first sample is taken right away;
    /// until it lands subscribers observe offline, the conservative
    /// default.
    pub fn spawn(mut source: Box<dyn ConnectivitySource>, poll_interval: Duration) -> Self {
        let (tx, rx) = watch::channel(ConnectivityState::OFFLINE);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let next = source
                            .sample()
                            .unwrap_or(ConnectivityState::OFFLINE);
                        tx.send_if_modified(|current| {
                            if *current == next {
                                return false;
                            }
                            debug!(online = next.online, metered = next.metered, "connectivity transition");
                            *current = next;
                            true
                        });
                    }
                    _ = tx.closed() => break,
                }
            }
        });

        Self {
            rx,
            _fixed_tx: None,
        }
    }

    /// Monitor pinned to a constant state. For tests and hosts without a
    /// platform source.
    pub fn fixed(state: ConnectivityState) -> Self {
        let (tx, rx) = watch::channel(state);
        Self {
            rx,
            _fixed_tx: Some(tx),
        }
    }

    /// Subscribes a new consumer. Safe to call any number of times.
    pub fn observe(&self) -> watch::Receiver<ConnectivityState> {
        self.rx.clone()
    }
}
