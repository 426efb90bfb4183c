//! In-memory [`DurableLog`] backed by hash indexes.
//!
//! Not durable across process restarts; intended for tests, benches, and
//! hosts that explicitly opt out of persistence.

use hashbrown::{HashMap, HashSet};

use crate::{
    op::{OpDraft, OpError, Operation},
    types::{OpId, OpStatus, TsMs},
};

use super::{DurableLog, LogError, LogResult};

#[derive(Debug)]
struct Row {
    op: Operation,
    resolved_at_ms: Option<TsMs>,
}

/// In-memory implementation of [`DurableLog`].
#[derive(Debug, Default)]
pub struct MemoryLog {
    rows: HashMap<OpId, Row>,
    order: Vec<OpId>,
    by_resource: HashMap<String, Vec<OpId>>,
    next_id: OpId,
}

impl MemoryLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Ids in append order, for inspection in tests.
    pub fn ordered_ids(&self) -> &[OpId] {
        &self.order
    }

    fn row_mut(&mut self, id: OpId) -> LogResult<&mut Row> {
        self.rows.get_mut(&id).ok_or(LogError::MissingOp(id))
    }

    fn unresolved_row_mut(&mut self, id: OpId) -> LogResult<&mut Row> {
        let row = self.row_mut(id)?;
        if row.op.status.is_resolved() {
            return Err(LogError::Resolved(id));
        }
        Ok(row)
    }

    fn lane_heads(&self, now_ms: TsMs, max: usize) -> Vec<Operation> {
        let mut seen = HashSet::new();
        let mut heads = Vec::new();
        for id in &self.order {
            let Some(row) = self.rows.get(id) else {
                continue;
            };
            if row.op.status.is_resolved() {
                continue;
            }
            // Only the oldest unresolved entry per resource is a lane head.
            if !seen.insert(row.op.resource_id.clone()) {
                continue;
            }
            if row.op.status == OpStatus::Pending && row.op.next_eligible_at_ms <= now_ms {
                heads.push(row.op.clone());
                if heads.len() == max {
                    break;
                }
            }
        }
        heads
    }
}

impl DurableLog for MemoryLog {
    fn append(&mut self, draft: OpDraft, now_ms: TsMs) -> LogResult<OpId> {
        let id = self.next_id;
        self.next_id += 1;

        let op = Operation {
            id,
            kind: draft.kind,
            resource_id: draft.resource_id,
            payload: draft.payload,
            status: OpStatus::Pending,
            attempts: 0,
            created_at_ms: now_ms,
            next_eligible_at_ms: now_ms,
            last_error: None,
        };

        self.by_resource
            .entry(op.resource_id.clone())
            .or_default()
            .push(id);
        self.order.push(id);
        self.rows.insert(
            id,
            Row {
                op,
                resolved_at_ms: None,
            },
        );
        Ok(id)
    }

    fn get(&mut self, id: OpId) -> LogResult<Option<Operation>> {
        Ok(self.rows.get(&id).map(|row| row.op.clone()))
    }

    fn next_eligible(&mut self, now_ms: TsMs) -> LogResult<Option<Operation>> {
        Ok(self.lane_heads(now_ms, 1).into_iter().next())
    }

    fn eligible_lane_heads(&mut self, now_ms: TsMs, max_lanes: usize) -> LogResult<Vec<Operation>> {
        Ok(self.lane_heads(now_ms, max_lanes))
    }

    fn mark_in_flight(&mut self, id: OpId) -> LogResult<()> {
        let row = self.unresolved_row_mut(id)?;
        row.op.status = OpStatus::InFlight;
        Ok(())
    }

    fn mark_succeeded(&mut self, id: OpId, now_ms: TsMs) -> LogResult<()> {
        let row = self.unresolved_row_mut(id)?;
        row.op.status = OpStatus::Succeeded;
        row.resolved_at_ms = Some(now_ms);
        Ok(())
    }

    fn mark_failed(
        &mut self,
        id: OpId,
        error: &OpError,
        next_eligible_at_ms: TsMs,
    ) -> LogResult<()> {
        let row = self.unresolved_row_mut(id)?;
        row.op.status = OpStatus::Pending;
        row.op.attempts += 1;
        row.op.next_eligible_at_ms = next_eligible_at_ms;
        row.op.last_error = Some(error.clone());
        Ok(())
    }

    fn mark_permanent_failure(&mut self, id: OpId, error: &OpError, now_ms: TsMs) -> LogResult<()> {
        let row = self.unresolved_row_mut(id)?;
        row.op.status = OpStatus::FailedPermanent;
        row.op.attempts += 1;
        row.op.last_error = Some(error.clone());
        row.resolved_at_ms = Some(now_ms);
        Ok(())
    }

    fn pending_count(&mut self) -> LogResult<u64> {
        Ok(self
            .rows
            .values()
            .filter(|row| !row.op.status.is_resolved())
            .count() as u64)
    }

    fn pending_for_resource(&mut self, resource_id: &str) -> LogResult<u64> {
        Ok(self
            .by_resource
            .get(resource_id)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.rows.get(id))
            .filter(|row| !row.op.status.is_resolved())
            .count() as u64)
    }

    fn recover_in_flight(&mut self) -> LogResult<u64> {
        let mut reset = 0;
        for row in self.rows.values_mut() {
            if row.op.status == OpStatus::InFlight {
                row.op.status = OpStatus::Pending;
                reset += 1;
            }
        }
        Ok(reset)
    }

    fn purge_resolved_older_than(&mut self, cutoff_ms: TsMs) -> LogResult<u64> {
        let doomed: Vec<OpId> = self
            .rows
            .iter()
            .filter(|(_, row)| {
                row.op.status.is_resolved()
                    && row.resolved_at_ms.is_some_and(|ts| ts < cutoff_ms)
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &doomed {
            if let Some(row) = self.rows.remove(id) {
                if let Some(ids) = self.by_resource.get_mut(&row.op.resource_id) {
                    ids.retain(|x| x != id);
                }
            }
        }
        let rows = &self.rows;
        self.order.retain(|id| rows.contains_key(id));
        Ok(doomed.len() as u64)
    }
}
