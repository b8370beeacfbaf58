// sentinel/src/error.rs
//
// Error hierarchy for the risk engine. Every variant maps to one entry of
// the error-handling policy: none of these ever reach a client response
// directly; the orchestrator converts them into a decision (or a silent
// drop) at the boundary.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SentinelError {
    /// Malformed payload or a batch_id regression. Rejected at ingress,
    /// no state mutated.
    #[error("validation error: {0}")]
    Validation(String),

    /// Optimistic retries exhausted on a hot-state write.
    #[error("transient conflict on {key} after {attempts} attempts")]
    TransientConflict { key: String, attempts: u32 },

    /// Hot store unreachable or over its 200 ms budget.
    #[error("hot store unavailable: {0}")]
    HotStoreUnavailable(String),

    /// Cold store unreachable or over its 1 s budget.
    #[error("cold store unavailable: {0}")]
    ColdStoreUnavailable(String),

    /// Persisted model blob failed the base-64 / checksum contract.
    #[error("blob integrity violation for {user_id}/{model_type}: {detail}")]
    BlobIntegrity {
        user_id: String,
        model_type: String,
        detail: String,
    },

    /// Per-user learning lock already held; the caller drops the cycle.
    #[error("learning lock unavailable for {0}")]
    LockUnavailable(String),
}

pub type SentinelResult<T> = Result<T, SentinelError>;
