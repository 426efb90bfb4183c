use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::watch;

use syncq::{
    connectivity::{ConnectivityMonitor, ConnectivitySource, ConnectivityState, SourceUnavailable},
    engine::executor::{RemoteError, RemoteExecutor},
    log::memory::MemoryLog,
    op::{OpDraft, Operation},
    runtime::{
        events::SyncEvent,
        handle::{SyncConfig, spawn_sync},
        scheduler::spawn_scheduler,
    },
};

const METERED: ConnectivityState = ConnectivityState {
    online: true,
    metered: true,
};

/// Replays a scripted sample sequence, then repeats the last entry.
struct ScriptedSource {
    samples: VecDeque<Result<ConnectivityState, SourceUnavailable>>,
    last: Result<ConnectivityState, SourceUnavailable>,
}

impl ScriptedSource {
    fn new(samples: Vec<Result<ConnectivityState, SourceUnavailable>>) -> Self {
        let last = samples.last().cloned().unwrap_or(Err(SourceUnavailable));
        Self {
            samples: samples.into(),
            last,
        }
    }
}

impl ConnectivitySource for ScriptedSource {
    fn sample(&mut self) -> Result<ConnectivityState, SourceUnavailable> {
        self.samples.pop_front().unwrap_or_else(|| self.last.clone())
    }
}

struct CountingExecutor {
    calls: Arc<Mutex<u64>>,
}

impl RemoteExecutor for CountingExecutor {
    fn apply<'a>(&'a self, _op: &'a Operation) -> BoxFuture<'a, Result<(), RemoteError>> {
        *self.calls.lock().expect("lock") += 1;
        Box::pin(async { Ok(()) })
    }
}

fn draft() -> OpDraft {
    OpDraft {
        kind: "ADD_ITEM".to_string(),
        resource_id: "sku-1".to_string(),
        payload: b"{}".to_vec(),
    }
}

async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectivityState>,
    want: ConnectivityState,
) -> bool {
    for _ in 0..50 {
        if *rx.borrow_and_update() == want {
            return true;
        }
        if tokio::time::timeout(Duration::from_millis(200), rx.changed())
            .await
            .is_err()
        {
            break;
        }
    }
    *rx.borrow() == want
}

async fn wait_for_drain_finished(events: &mut tokio::sync::broadcast::Receiver<SyncEvent>) {
    for _ in 0..50 {
        let evt = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event")
            .expect("recv");
        if matches!(evt, SyncEvent::DrainFinished { .. }) {
            return;
        }
    }
    panic!("no drain-finished event");
}

async fn wait_until_drained(handle: &syncq::runtime::handle::SyncHandle) -> bool {
    let mut queue = handle.observe_queue();
    for _ in 0..50 {
        if queue.borrow_and_update().pending == 0 {
            return true;
        }
        if tokio::time::timeout(Duration::from_millis(500), queue.changed())
            .await
            .is_err()
        {
            break;
        }
    }
    queue.borrow().pending == 0
}

#[tokio::test]
async fn monitor_deduplicates_and_reports_source_failure_as_offline() {
    let monitor = ConnectivityMonitor::spawn(
        Box::new(ScriptedSource::new(vec![
            Ok(ConnectivityState::ONLINE),
            Ok(ConnectivityState::ONLINE),
            Ok(ConnectivityState::ONLINE),
            Ok(METERED),
            Err(SourceUnavailable),
        ])),
        Duration::from_millis(10),
    );
    let mut rx = monitor.observe();

    let mut seen = vec![*rx.borrow_and_update()];
    while !(seen.contains(&METERED) && seen.last() == Some(&ConnectivityState::OFFLINE)) {
        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .expect("transition")
            .expect("watch open");
        let state = *rx.borrow_and_update();
        assert_ne!(Some(&state), seen.last(), "duplicate state published");
        seen.push(state);
    }

    // Three identical online samples collapse into at most one transition
    // (a slow subscriber may even skip straight to the metered state).
    let online_count = seen
        .iter()
        .filter(|s| **s == ConnectivityState::ONLINE)
        .count();
    assert!(online_count <= 1, "duplicate online transitions: {seen:?}");
    let metered_at = seen.iter().position(|s| *s == METERED).expect("metered");
    if let Some(online_at) = seen.iter().position(|s| *s == ConnectivityState::ONLINE) {
        assert!(online_at < metered_at);
    }
}

#[tokio::test]
async fn monitor_supports_multiple_subscribers() {
    let monitor = ConnectivityMonitor::spawn(
        Box::new(ScriptedSource::new(vec![Ok(ConnectivityState::ONLINE)])),
        Duration::from_millis(10),
    );
    let mut first = monitor.observe();
    let mut second = monitor.observe();

    assert!(wait_for_state(&mut first, ConnectivityState::ONLINE).await);
    assert!(wait_for_state(&mut second, ConnectivityState::ONLINE).await);
}

#[tokio::test]
async fn scheduler_drains_on_connectivity_restore() {
    let (conn_tx, conn_rx) = watch::channel(ConnectivityState::OFFLINE);
    let calls = Arc::new(Mutex::new(0));
    let handle = spawn_sync(
        Box::new(MemoryLog::new()),
        Arc::new(CountingExecutor {
            calls: Arc::clone(&calls),
        }),
        conn_rx.clone(),
        SyncConfig::default(),
    );
    // Long tick so only the restore event can trigger the drain.
    let _scheduler = spawn_scheduler(handle.clone(), conn_rx, Duration::from_secs(3600));

    handle.submit(draft()).await.expect("submit");
    assert_eq!(handle.pending_count().await.expect("count"), 1);

    conn_tx.send(ConnectivityState::ONLINE).expect("connectivity");

    assert!(wait_until_drained(&handle).await);
    assert_eq!(*calls.lock().expect("lock"), 1);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn metered_connection_defers_until_tick_after_policy_allows() {
    // Online but metered, and metered draining disallowed: submissions stay
    // queued. A later unmetered state is not an offline→online transition,
    // so only the periodic tick picks the backlog up.
    let (conn_tx, conn_rx) = watch::channel(METERED);
    let calls = Arc::new(Mutex::new(0));
    let handle = spawn_sync(
        Box::new(MemoryLog::new()),
        Arc::new(CountingExecutor {
            calls: Arc::clone(&calls),
        }),
        conn_rx.clone(),
        SyncConfig {
            allow_metered: false,
            ..SyncConfig::default()
        },
    );
    let _scheduler = spawn_scheduler(handle.clone(), conn_rx, Duration::from_millis(50));

    handle.submit(draft()).await.expect("submit");
    assert_eq!(handle.pending_count().await.expect("count"), 1);
    assert_eq!(*calls.lock().expect("lock"), 0);

    conn_tx.send(ConnectivityState::ONLINE).expect("connectivity");

    assert!(wait_until_drained(&handle).await);
    assert_eq!(*calls.lock().expect("lock"), 1);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn poke_triggers_a_drain_without_tick_or_transition() {
    let (conn_tx, conn_rx) = watch::channel(METERED);
    let calls = Arc::new(Mutex::new(0));
    let handle = spawn_sync(
        Box::new(MemoryLog::new()),
        Arc::new(CountingExecutor {
            calls: Arc::clone(&calls),
        }),
        conn_rx.clone(),
        SyncConfig {
            allow_metered: false,
            ..SyncConfig::default()
        },
    );
    let mut events = handle.subscribe();
    let scheduler = spawn_scheduler(handle.clone(), conn_rx, Duration::from_secs(3600));

    handle.submit(draft()).await.expect("submit");
    // The interval's first tick fires immediately; its drain pass defers on
    // the metered link. Wait for it to finish so the next drain can only
    // come from the poke.
    wait_for_drain_finished(&mut events).await;

    // Becomes unmetered: no restore transition fires, the next tick is an
    // hour out, so the backlog sits until the host pokes on resume.
    conn_tx.send(ConnectivityState::ONLINE).expect("connectivity");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.pending_count().await.expect("count"), 1);
    assert_eq!(*calls.lock().expect("lock"), 0);

    scheduler.poke();
    assert!(wait_until_drained(&handle).await);
    assert_eq!(*calls.lock().expect("lock"), 1);

    handle.shutdown().await.expect("shutdown");
}
