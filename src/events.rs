// sentinel/src/events.rs
//
// Shared domain types flowing through Sentinel: raw input events, stream
// batches, evaluate requests, and the decision/audit shapes they produce.
// Everything here is serde round-trippable; event timestamps are monotonic
// client-side milliseconds, never wall clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Raw input events ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyEventKind {
    Down,
    Up,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: String,
    pub kind: KeyEventKind,
    /// Monotonic client timestamp, milliseconds.
    pub t: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MouseEventKind {
    Move,
    Click,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MouseEvent {
    pub x: f64,
    pub y: f64,
    pub kind: MouseEventKind,
    pub t: f64,
}

// ── Stream batches ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyboardBatch {
    pub session_id: String,
    pub user_id: String,
    pub batch_id: u64,
    pub events: Vec<KeyEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MouseBatch {
    pub session_id: String,
    pub user_id: String,
    pub batch_id: u64,
    pub events: Vec<MouseEvent>,
}

// ── Feature window ────────────────────────────────────────────────────────────

/// Dimensionality of a keyboard feature window: mean/std/min/max over
/// dwell time, flight time, and inter-key interval.
pub const FEATURE_DIMS: usize = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureWindow {
    pub values: [f64; FEATURE_DIMS],
}

impl FeatureWindow {
    pub fn new(values: [f64; FEATURE_DIMS]) -> Self {
        Self { values }
    }

    /// Windows containing NaN or infinity are unusable for the trees.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

// ── Evaluate request context ──────────────────────────────────────────────────

/// Geo enrichment attached upstream of the core. Absent for private or
/// unresolvable addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub country: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub ip_address: String,
    pub user_agent: String,
    pub endpoint: String,
    pub method: String,
    pub device_id: String,
    #[serde(default)]
    pub geo: Option<GeoPoint>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusinessContext {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub action_type: String,
    #[serde(default)]
    pub resource_target: String,
    #[serde(default)]
    pub transaction_details: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFingerprint {
    pub device_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub session_id: String,
    pub user_id: String,
    pub request_context: RequestContext,
    #[serde(default)]
    pub business_context: BusinessContext,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub mfa_status: String,
    /// Unix milliseconds when the authenticated session began.
    #[serde(default)]
    pub session_start_time: Option<f64>,
    #[serde(default)]
    pub client_fingerprint: Option<ClientFingerprint>,
    pub eval_id: String,
}

// ── Decisions ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Allow,
    Challenge,
    Block,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "ALLOW"),
            Self::Challenge => write!(f, "CHALLENGE"),
            Self::Block => write!(f, "BLOCK"),
        }
    }
}

/// Operating posture controlling fusion weights and decision thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Normal,
    Challenge,
    Trusted,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Challenge => write!(f, "CHALLENGE"),
            Self::Trusted => write!(f, "TRUSTED"),
        }
    }
}

/// Session lifecycle stage, distinct from mode: phase only ratchets
/// forward on maturity and crashes back on identity contradiction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Unknown,
    Verifying,
    Trusted,
}

/// Navigator verdict: scores feed fusion, Block short-circuits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavDecision {
    Ok,
    Block,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ComponentScores {
    pub keyboard: f64,
    pub mouse: f64,
    pub navigator: f64,
    pub identity: f64,
    pub identity_confidence: f64,
}

/// Result of one /evaluate call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalOutcome {
    pub eval_id: String,
    pub decision: Decision,
    pub risk: f64,
    pub mode: Mode,
    pub anomaly_vectors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ban_expires_in_seconds: Option<u64>,
}

// ── Audit ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub eval_id: String,
    pub event_id: String,
    pub session_id: String,
    pub user_id: String,
    pub ts: DateTime<Utc>,
    pub decision: Decision,
    pub risk: f64,
    pub mode: Mode,
    pub component_scores: ComponentScores,
    pub anomaly_vectors: Vec<String>,
    pub context: RequestContext,
}
