// sentinel/src/persist/audit.rs
//
// Append-only audit log for evaluate decisions.
//
// Table shape: audit_logs keyed by unique eval_id. The unique key doubles
// as the idempotency mechanism: a duplicate eval_id is recognized before
// any scoring happens and the prior decision is returned unchanged.
// Writes are best-effort and never disturb the evaluate pipeline.

use dashmap::DashMap;

use crate::error::SentinelResult;
use crate::events::{AuditRecord, ComponentScores, Decision, EvaluateRequest, Mode};
use crate::util::{new_event_id, Clock};

pub struct AuditLog {
    records: DashMap<String, AuditRecord>,
    clock: Clock,
}

impl AuditLog {
    pub fn new(clock: Clock) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    /// Build and insert the record for a freshly decided evaluate.
    /// Returns false (and leaves the stored record intact) on duplicate
    /// eval_id.
    #[allow(clippy::too_many_arguments)]
    pub async fn emit(
        &self,
        request: &EvaluateRequest,
        decision: Decision,
        risk: f64,
        mode: Mode,
        scores: ComponentScores,
        anomaly_vectors: Vec<String>,
    ) -> SentinelResult<bool> {
        let record = AuditRecord {
            eval_id: request.eval_id.clone(),
            event_id: new_event_id(),
            session_id: request.session_id.clone(),
            user_id: request.user_id.clone(),
            ts: self.clock.now_utc(),
            decision,
            risk,
            mode,
            component_scores: scores,
            anomaly_vectors,
            context: request.request_context.clone(),
        };

        match self.records.entry(record.eval_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(vac) => {
                vac.insert(record);
                Ok(true)
            }
        }
    }

    /// Prior decision for an eval_id, if one was recorded.
    pub async fn get(&self, eval_id: &str) -> SentinelResult<Option<AuditRecord>> {
        Ok(self.records.get(eval_id).map(|r| r.clone()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
