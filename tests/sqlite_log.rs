use tempfile::TempDir;

use syncq::{
    log::{DurableLog, LogError, sqlite::SqliteLog},
    op::{OpDraft, OpError},
    types::{ErrorClass, OpStatus},
};

fn draft(kind: &str, resource: &str) -> OpDraft {
    OpDraft {
        kind: kind.to_string(),
        resource_id: resource.to_string(),
        payload: br#"{"quantity":2}"#.to_vec(),
    }
}

fn transient(message: &str) -> OpError {
    OpError {
        class: ErrorClass::Transient,
        message: message.to_string(),
    }
}

#[test]
fn queued_operations_survive_reopen_and_in_flight_resets_to_pending() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("queue.db");

    let mut log = SqliteLog::open(&db_path).expect("open");
    let a = log.append(draft("ADD_ITEM", "sku-1"), 10).expect("append");
    let b = log.append(draft("REMOVE_ITEM", "sku-2"), 20).expect("append");
    log.mark_in_flight(a).expect("in flight");
    drop(log);

    // Simulated crash between mark_in_flight and the remote call.
    let mut log = SqliteLog::open(&db_path).expect("reopen");
    assert_eq!(log.pending_count().expect("count"), 2);
    assert_eq!(log.recover_in_flight().expect("recover"), 1);

    let a_op = log.get(a).expect("get").expect("row");
    assert_eq!(a_op.status, OpStatus::Pending);
    assert_eq!(a_op.kind, "ADD_ITEM");
    assert_eq!(a_op.payload, br#"{"quantity":2}"#.to_vec());

    let b_op = log.get(b).expect("get").expect("row");
    assert_eq!(b_op.status, OpStatus::Pending);
}

#[test]
fn eligibility_respects_lane_order_and_backoff_windows() {
    let mut log = SqliteLog::open_in_memory().expect("open");
    let a = log.append(draft("ADD_ITEM", "sku-1"), 10).expect("append");
    let b = log.append(draft("SET_QUANTITY", "sku-1"), 20).expect("append");
    let c = log.append(draft("ADD_ITEM", "sku-2"), 30).expect("append");

    // Oldest lane head first.
    assert_eq!(log.next_eligible(100).expect("eligible").map(|op| op.id), Some(a));

    // A failed head sits out its backoff window and keeps blocking the lane.
    log.mark_failed(a, &transient("timeout"), 500).expect("fail");
    assert_eq!(log.next_eligible(100).expect("eligible").map(|op| op.id), Some(c));

    // In-flight heads also block their lane.
    log.mark_in_flight(c).expect("in flight");
    assert_eq!(log.next_eligible(100).expect("eligible"), None);

    // Once the window passes, the retried head precedes its lane sibling.
    log.mark_succeeded(c, 600).expect("succeed");
    assert_eq!(log.next_eligible(600).expect("eligible").map(|op| op.id), Some(a));

    // Lane heads for parallel draining: one per resource.
    let d = log.append(draft("ADD_ITEM", "sku-2"), 700).expect("append");
    let heads: Vec<_> = log
        .eligible_lane_heads(700, 8)
        .expect("heads")
        .into_iter()
        .map(|op| op.id)
        .collect();
    assert_eq!(heads, vec![a, d]);
    let _ = b;
}

#[test]
fn failure_marks_increment_attempts_and_round_trip_the_error() {
    let mut log = SqliteLog::open_in_memory().expect("open");
    let id = log.append(draft("ADD_ITEM", "sku-1"), 10).expect("append");

    log.mark_in_flight(id).expect("in flight");
    log.mark_failed(id, &transient("503 from upstream"), 900).expect("fail");

    let op = log.get(id).expect("get").expect("row");
    assert_eq!(op.status, OpStatus::Pending);
    assert_eq!(op.attempts, 1);
    assert_eq!(op.next_eligible_at_ms, 900);
    let err = op.last_error.expect("recorded error");
    assert_eq!(err.class, ErrorClass::Transient);
    assert_eq!(err.message, "503 from upstream");
}

#[test]
fn resolved_rows_are_immutable() {
    let mut log = SqliteLog::open_in_memory().expect("open");
    let id = log.append(draft("ADD_ITEM", "sku-1"), 10).expect("append");
    log.mark_succeeded(id, 50).expect("succeed");

    assert!(matches!(
        log.mark_failed(id, &transient("late failure"), 100),
        Err(LogError::Resolved(conflict)) if conflict == id
    ));
    assert!(matches!(
        log.mark_in_flight(id),
        Err(LogError::Resolved(_))
    ));
    assert!(matches!(
        log.get(9999),
        Ok(None)
    ));
    assert!(matches!(
        log.mark_in_flight(9999),
        Err(LogError::MissingOp(9999))
    ));
}

#[test]
fn purge_removes_only_resolved_rows_past_the_cutoff() {
    let mut log = SqliteLog::open_in_memory().expect("open");
    let a = log.append(draft("ADD_ITEM", "sku-1"), 10).expect("append");
    let b = log.append(draft("ADD_ITEM", "sku-2"), 20).expect("append");
    let c = log.append(draft("ADD_ITEM", "sku-3"), 30).expect("append");

    log.mark_succeeded(a, 100).expect("succeed");
    log.mark_permanent_failure(b, &transient("gone"), 200).expect("terminal");

    assert_eq!(log.purge_resolved_older_than(150).expect("purge"), 1);
    assert!(log.get(a).expect("get").is_none());
    assert!(log.get(b).expect("get").is_some());

    assert_eq!(log.purge_resolved_older_than(500).expect("purge"), 1);
    assert!(log.get(b).expect("get").is_none());

    // Unresolved rows are never purged.
    assert_eq!(log.pending_count().expect("count"), 1);
    assert!(log.get(c).expect("get").is_some());
}
