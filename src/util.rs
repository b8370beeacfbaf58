// sentinel/src/util.rs
//
// Shared utilities: wall clock, clamping, id generation.
//
// The clock is injectable so TTL, maturity, and suspension logic can be
// driven deterministically in tests. Production code constructs
// Clock::system() once and clones it everywhere (cheap Arc).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

/// Millisecond wall clock. `System` reads the OS clock; `Manual` is an
/// atomically-advanced counter for tests.
#[derive(Clone)]
pub enum Clock {
    System,
    Manual(Arc<AtomicU64>),
}

impl Clock {
    pub fn system() -> Self {
        Clock::System
    }

    /// Manual clock starting at `start_ms`.
    pub fn manual(start_ms: u64) -> Self {
        Clock::Manual(Arc::new(AtomicU64::new(start_ms)))
    }

    /// Current wall time in Unix milliseconds.
    pub fn now_ms(&self) -> u64 {
        match self {
            Clock::System => Utc::now().timestamp_millis() as u64,
            Clock::Manual(t) => t.load(Ordering::SeqCst),
        }
    }

    /// Current wall time as a chrono timestamp (audit records).
    pub fn now_utc(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Manual(t) => Utc
                .timestamp_millis_opt(t.load(Ordering::SeqCst) as i64)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }

    /// Advance a manual clock. No-op on the system clock.
    pub fn advance_ms(&self, delta: u64) {
        if let Clock::Manual(t) = self {
            t.fetch_add(delta, Ordering::SeqCst);
        }
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Clock::System => write!(f, "Clock::System"),
            Clock::Manual(t) => write!(f, "Clock::Manual({})", t.load(Ordering::SeqCst)),
        }
    }
}

/// Clamp to [lo, hi].
pub fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

/// Clamp to the risk range [0, 1].
pub fn clamp01(v: f64) -> f64 {
    clamp(v, 0.0, 1.0)
}

/// Fresh event id for audit records.
pub fn new_event_id() -> String {
    format!("evt_{}", uuid::Uuid::new_v4())
}

/// Mean of a slice; 0.0 when empty.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation; 0.0 with fewer than two samples.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// 95th-percentile value of a slice, linearly interpolated so the top tail
/// sits above the cutoff even for small samples. 0.0 when empty.
pub fn p95(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = 0.95 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
    }
}
