//! Overlay of locally pending intent onto authoritative server state.
//!
//! Prevents the UI from flickering back to a stale server value while a
//! local edit is still round-tripping. Server values win for every field
//! except those targeted by a still-unresolved operation; once an operation
//! resolves (either way) its overlay disappears and the next server fetch
//! is authoritative again.

use serde_json::{Map, Value};

use crate::op::Operation;

/// Field map form of a resource view.
pub type FieldMap = Map<String, Value>;

/// Result of merging server state with pending local intent.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveView {
    /// Merged fields, ready for display.
    pub fields: FieldMap,
    /// Names of fields whose value came from a pending operation.
    pub overlaid: Vec<String>,
}

/// Merges a fetched server view with the queued-but-unconfirmed operations
/// for the same resource.
///
/// Operations are applied in log order (`created_at_ms`, then `id`), so a
/// later local edit of the same field wins. Only payloads that decode to a
/// JSON object participate; the engine treats payloads as opaque, and an
/// opaque payload carries no field intent the overlay can read.
pub fn merge(server: &FieldMap, pending: &[Operation]) -> EffectiveView {
    let mut fields = server.clone();
    let mut overlaid = Vec::new();

    let mut unresolved: Vec<&Operation> =
        pending.iter().filter(|op| op.is_unresolved()).collect();
    unresolved.sort_by_key(|op| (op.created_at_ms, op.id));

    for op in unresolved {
        let Ok(Value::Object(intent)) = serde_json::from_slice::<Value>(&op.payload) else {
            continue;
        };
        for (field, value) in intent {
            fields.insert(field.clone(), value);
            if !overlaid.contains(&field) {
                overlaid.push(field);
            }
        }
    }

    EffectiveView { fields, overlaid }
}
