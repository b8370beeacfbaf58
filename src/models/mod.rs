// sentinel/src/models/mod.rs
//
// Behavioral model surface. Two model kinds share one implementation: the
// session-anomaly baseline (keyboard_hst) and the per-user identity model
// (keyboard_identity) differ only in what they are trained on and how
// their confidence matures, so the kind is a tag, not a type hierarchy.
//
// Feature windows are clipped and min-max scaled to [0,1] with fixed,
// research-backed keystroke bounds before reaching the trees. Fixed bounds
// keep normalization identical across users and restarts; a learned scaler
// would itself be a poisoning target.

pub mod hst;

use serde::{Deserialize, Serialize};

use crate::config::SentinelConfig;
use crate::events::{FeatureWindow, FEATURE_DIMS};
use hst::HalfSpaceTrees;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    KeyboardHst,
    KeyboardIdentity,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeyboardHst => "keyboard_hst",
            Self::KeyboardIdentity => "keyboard_identity",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Clip bounds per dimension, (min, max). Families share bounds: a max
// dwell is still a dwell. Flight admits negatives for rollover typing.
const BOUNDS: [(f64, f64); FEATURE_DIMS] = [
    (0.0, 500.0),    // dwell mean
    (0.0, 150.0),    // dwell std
    (0.0, 500.0),    // dwell min
    (0.0, 500.0),    // dwell max
    (-100.0, 1200.0), // flight mean
    (0.0, 400.0),    // flight std
    (-100.0, 1200.0), // flight min
    (-100.0, 1200.0), // flight max
    (0.0, 1500.0),   // interval mean
    (0.0, 500.0),    // interval std
    (0.0, 1500.0),   // interval min
    (0.0, 1500.0),   // interval max
];

/// Clip to the fixed bounds and scale to [0,1].
pub fn scale_window(window: &FeatureWindow) -> [f64; FEATURE_DIMS] {
    let mut scaled = [0.0f64; FEATURE_DIMS];
    for (i, &value) in window.values.iter().enumerate() {
        let (lo, hi) = BOUNDS[i];
        let clipped = value.clamp(lo, hi);
        scaled[i] = if hi > lo { (clipped - lo) / (hi - lo) } else { 0.0 };
    }
    scaled
}

/// An online behavioral model: scaler + half-space trees, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorModel {
    pub kind: ModelKind,
    detector: HalfSpaceTrees,
}

impl BehaviorModel {
    pub fn new(kind: ModelKind, cfg: &SentinelConfig) -> Self {
        Self {
            kind,
            detector: HalfSpaceTrees::new(
                cfg.hst_trees,
                cfg.hst_height,
                cfg.hst_window_size,
                cfg.hst_warmup,
                cfg.hst_seed,
                FEATURE_DIMS,
            ),
        }
    }

    /// Anomaly score in [0,1]; 0 while the detector is warming up.
    pub fn score_one(&self, window: &FeatureWindow) -> f64 {
        self.detector.score_one(&scale_window(window))
    }

    pub fn learn_one(&mut self, window: &FeatureWindow) {
        self.detector.learn_one(&scale_window(window));
    }

    pub fn samples_learned(&self) -> u64 {
        self.detector.n_learned()
    }

    // ── Blob round trip ───────────────────────────────────────────────────────
    // The cold store treats the blob as opaque bytes; the base-64 and
    // checksum rules live there, not here.

    pub fn to_blob(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_blob(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
