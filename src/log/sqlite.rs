//! SQLite-backed durable operation log.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::{
    op::{OpDraft, OpError, OpErrorEnvelope, Operation},
    types::{OpId, OpStatus, TsMs},
};

use super::{DurableLog, LogError, LogResult};

const STATUS_PENDING: i64 = 0;
const STATUS_IN_FLIGHT: i64 = 1;
const STATUS_SUCCEEDED: i64 = 2;
const STATUS_FAILED_PERMANENT: i64 = 3;

// Oldest pending row past its backoff window whose resource lane has no
// older unresolved row. The lane-head predicate yields at most one row per
// resource, so the same query serves serial and parallel draining.
const ELIGIBLE_SQL: &str = "\
SELECT id, kind, resource_id, payload, status, attempts, created_at_ms, next_eligible_at_ms, last_error \
FROM operations o \
WHERE o.status = 0 AND o.next_eligible_at_ms <= ?1 \
  AND NOT EXISTS ( \
    SELECT 1 FROM operations b \
    WHERE b.resource_id = o.resource_id \
      AND b.status IN (0, 1) \
      AND (b.created_at_ms < o.created_at_ms \
           OR (b.created_at_ms = o.created_at_ms AND b.id < o.id)) \
  ) \
ORDER BY o.created_at_ms ASC, o.id ASC \
LIMIT ?2";

/// SQLite implementation of [`DurableLog`].
pub struct SqliteLog {
    conn: Connection,
}

impl SqliteLog {
    /// Opens or creates a log at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> LogResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory log (no durability; tests only).
    pub fn open_in_memory() -> LogResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> LogResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    fn query_op(&self, id: OpId) -> LogResult<Option<Operation>> {
        self.conn
            .query_row(
                "SELECT id, kind, resource_id, payload, status, attempts, created_at_ms, \
                 next_eligible_at_ms, last_error FROM operations WHERE id = ?1",
                params![id as i64],
                row_to_op,
            )
            .optional()
            .map_err(LogError::from)
    }

    /// Marks rows atomically, refusing to touch resolved rows.
    fn mark<F>(&mut self, id: OpId, update: F) -> LogResult<()>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<usize>,
    {
        let tx = self.conn.transaction()?;
        let status: Option<i64> = tx
            .query_row(
                "SELECT status FROM operations WHERE id = ?1",
                params![id as i64],
                |row| row.get(0),
            )
            .optional()?;

        match status {
            None => return Err(LogError::MissingOp(id)),
            Some(s) if s == STATUS_SUCCEEDED || s == STATUS_FAILED_PERMANENT => {
                return Err(LogError::Resolved(id));
            }
            Some(_) => {}
        }

        update(&tx)?;
        tx.commit()?;
        Ok(())
    }
}

impl DurableLog for SqliteLog {
    fn append(&mut self, draft: OpDraft, now_ms: TsMs) -> LogResult<OpId> {
        self.conn.execute(
            "INSERT INTO operations(kind, resource_id, payload, status, attempts, \
             created_at_ms, next_eligible_at_ms) VALUES (?1, ?2, ?3, 0, 0, ?4, ?4)",
            params![draft.kind, draft.resource_id, draft.payload, now_ms as i64],
        )?;
        Ok(self.conn.last_insert_rowid() as OpId)
    }

    fn get(&mut self, id: OpId) -> LogResult<Option<Operation>> {
        self.query_op(id)
    }

    fn next_eligible(&mut self, now_ms: TsMs) -> LogResult<Option<Operation>> {
        let mut heads = self.eligible_lane_heads(now_ms, 1)?;
        Ok(heads.pop())
    }

    fn eligible_lane_heads(&mut self, now_ms: TsMs, max_lanes: usize) -> LogResult<Vec<Operation>> {
        let mut stmt = self.conn.prepare(ELIGIBLE_SQL)?;
        let rows = stmt.query_map(params![now_ms as i64, max_lanes as i64], row_to_op)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn mark_in_flight(&mut self, id: OpId) -> LogResult<()> {
        self.mark(id, |tx| {
            tx.execute(
                "UPDATE operations SET status = 1 WHERE id = ?1",
                params![id as i64],
            )
        })
    }

    fn mark_succeeded(&mut self, id: OpId, now_ms: TsMs) -> LogResult<()> {
        self.mark(id, |tx| {
            tx.execute(
                "UPDATE operations SET status = 2, resolved_at_ms = ?2 WHERE id = ?1",
                params![id as i64, now_ms as i64],
            )
        })
    }

    fn mark_failed(
        &mut self,
        id: OpId,
        error: &OpError,
        next_eligible_at_ms: TsMs,
    ) -> LogResult<()> {
        let blob = encode_error(error)?;
        self.mark(id, |tx| {
            tx.execute(
                "UPDATE operations SET status = 0, attempts = attempts + 1, \
                 next_eligible_at_ms = ?2, last_error = ?3 WHERE id = ?1",
                params![id as i64, next_eligible_at_ms as i64, blob],
            )
        })
    }

    fn mark_permanent_failure(&mut self, id: OpId, error: &OpError, now_ms: TsMs) -> LogResult<()> {
        let blob = encode_error(error)?;
        self.mark(id, |tx| {
            tx.execute(
                "UPDATE operations SET status = 3, attempts = attempts + 1, \
                 resolved_at_ms = ?2, last_error = ?3 WHERE id = ?1",
                params![id as i64, now_ms as i64, blob],
            )
        })
    }

    fn pending_count(&mut self) -> LogResult<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM operations WHERE status IN (0, 1)",
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    fn pending_for_resource(&mut self, resource_id: &str) -> LogResult<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM operations WHERE resource_id = ?1 AND status IN (0, 1)",
            params![resource_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    fn recover_in_flight(&mut self) -> LogResult<u64> {
        let n = self
            .conn
            .execute("UPDATE operations SET status = 0 WHERE status = 1", [])?;
        Ok(n as u64)
    }

    fn purge_resolved_older_than(&mut self, cutoff_ms: TsMs) -> LogResult<u64> {
        let n = self.conn.execute(
            "DELETE FROM operations WHERE status IN (2, 3) AND resolved_at_ms < ?1",
            params![cutoff_ms as i64],
        )?;
        Ok(n as u64)
    }
}

fn row_to_op(row: &Row<'_>) -> rusqlite::Result<Operation> {
    let id: i64 = row.get(0)?;
    let status: i64 = row.get(4)?;
    let attempts: i64 = row.get(5)?;
    let created_at_ms: i64 = row.get(6)?;
    let next_eligible_at_ms: i64 = row.get(7)?;
    let error_blob: Option<Vec<u8>> = row.get(8)?;

    let last_error = match error_blob {
        Some(blob) => Some(decode_error(&blob).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                blob.len(),
                rusqlite::types::Type::Blob,
                Box::new(std::io::Error::other(err)),
            )
        })?),
        None => None,
    };

    Ok(Operation {
        id: id as OpId,
        kind: row.get(1)?,
        resource_id: row.get(2)?,
        payload: row.get(3)?,
        status: decode_status(status).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                status as usize,
                rusqlite::types::Type::Integer,
                Box::new(std::io::Error::other(err)),
            )
        })?,
        attempts: attempts as u32,
        created_at_ms: created_at_ms as TsMs,
        next_eligible_at_ms: next_eligible_at_ms as TsMs,
        last_error,
    })
}

fn decode_status(status: i64) -> Result<OpStatus, String> {
    match status {
        STATUS_PENDING => Ok(OpStatus::Pending),
        STATUS_IN_FLIGHT => Ok(OpStatus::InFlight),
        STATUS_SUCCEEDED => Ok(OpStatus::Succeeded),
        STATUS_FAILED_PERMANENT => Ok(OpStatus::FailedPermanent),
        other => Err(format!("unknown status code: {other}")),
    }
}

fn encode_error(error: &OpError) -> LogResult<Vec<u8>> {
    Ok(serde_json::to_vec(&OpErrorEnvelope::new(error.clone()))?)
}

fn decode_error(blob: &[u8]) -> Result<OpError, String> {
    let envelope: OpErrorEnvelope =
        serde_json::from_slice(blob).map_err(|e| format!("error payload decode failed: {e}"))?;
    if envelope.format_version != crate::op::ERROR_FORMAT_VERSION {
        return Err(format!(
            "unsupported error format version: {}",
            envelope.format_version
        ));
    }
    Ok(envelope.error)
}
