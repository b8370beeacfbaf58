// sentinel/src/extractors/keyboard.rs
//
// Keyboard feature extraction — sliding-window keystroke dynamics.
//
// DOWN/UP events are paired into key presses; once 50 keystrokes have
// accumulated a 12-dim statistical window emits, then again every 5
// keystrokes (stride). Windows short of 50 presses or with non-finite
// statistics are discarded.
//
// Feature layout (FEATURE_DIMS = 12):
//   [0..4)  dwell time    mean / std / min / max   (UP.t − DOWN.t)
//   [4..8)  flight time   mean / std / min / max   (next DOWN.t − UP.t)
//   [8..12) inter-key gap mean / std / min / max   (DOWN.t − prev DOWN.t)
//
// The buffer state serializes into SessionState so extraction survives
// process hops between stream batches.

use serde::{Deserialize, Serialize};

use crate::config::SentinelConfig;
use crate::events::{FeatureWindow, KeyEvent, KeyEventKind, FEATURE_DIMS};
use crate::util::{mean, std_dev};

// Paired presses retained beyond the window size so the stride can slide.
const MAX_PRESSES: usize = 64;
// Unmatched DOWNs kept around waiting for their UP.
const MAX_PENDING_DOWNS: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPress {
    pub key: String,
    pub press_t: f64,
    pub release_t: f64,
}

impl KeyPress {
    pub fn dwell(&self) -> f64 {
        self.release_t - self.press_t
    }
}

/// Per-session keyboard extraction state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyboardBuffer {
    pending_downs: Vec<(String, f64)>,
    presses: Vec<KeyPress>,
    pub keystroke_count: u64,
}

impl KeyboardBuffer {
    /// Feed one event; returns a completed feature window when the stride
    /// fires. Emission happens on DOWN events only, mirroring how the
    /// keystroke counter advances.
    pub fn process_event(
        &mut self,
        event: &KeyEvent,
        cfg: &SentinelConfig,
    ) -> Option<FeatureWindow> {
        match event.kind {
            KeyEventKind::Down => {
                self.pending_downs.push((event.key.clone(), event.t));
                if self.pending_downs.len() > MAX_PENDING_DOWNS {
                    self.pending_downs.remove(0);
                }
                self.keystroke_count += 1;
            }
            KeyEventKind::Up => {
                if let Some(idx) = self.pending_downs.iter().position(|(k, _)| *k == event.key) {
                    let (key, press_t) = self.pending_downs.remove(idx);
                    // Out-of-order client batches can deliver an UP whose
                    // DOWN timestamp is later; negative dwells are dropped
                    // at feature time, not here.
                    self.presses.push(KeyPress {
                        key,
                        press_t,
                        release_t: event.t,
                    });
                    if self.presses.len() > MAX_PRESSES {
                        self.presses.remove(0);
                    }
                }
                return None;
            }
        }

        let size = cfg.kb_window_size as u64;
        let step = cfg.kb_window_step as u64;
        if self.keystroke_count < size {
            return None;
        }
        let primed = self.keystroke_count == size
            || (self.keystroke_count - size) % step.max(1) == 0;
        if !primed {
            return None;
        }

        self.extract_window(cfg)
    }

    /// Statistics over the most recent `kb_window_size` presses.
    fn extract_window(&self, cfg: &SentinelConfig) -> Option<FeatureWindow> {
        if self.presses.len() < cfg.kb_window_size {
            return None;
        }

        let mut window: Vec<&KeyPress> = self.presses.iter().collect();
        window.sort_by(|a, b| {
            a.press_t
                .partial_cmp(&b.press_t)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let window = &window[window.len() - cfg.kb_window_size..];

        let dwells: Vec<f64> = window
            .iter()
            .map(|p| p.dwell())
            .filter(|d| *d >= 0.0)
            .collect();

        // Flight = next DOWN − current UP; the coffee-break rule drops
        // pauses so a thinking user doesn't skew the distribution.
        // Rollover typing legitimately produces negative flights.
        let mut flights: Vec<f64> = Vec::with_capacity(window.len());
        let mut intervals: Vec<f64> = Vec::with_capacity(window.len());
        for pair in window.windows(2) {
            let flight = pair[1].press_t - pair[0].release_t;
            if flight <= cfg.max_flight_time_ms {
                flights.push(flight);
            }
            let gap = pair[1].press_t - pair[0].press_t;
            if gap > 0.0 && gap <= cfg.max_flight_time_ms {
                intervals.push(gap);
            }
        }

        if dwells.is_empty() || flights.is_empty() || intervals.is_empty() {
            return None;
        }

        let mut values = [0.0f64; FEATURE_DIMS];
        for (i, series) in [&dwells, &flights, &intervals].into_iter().enumerate() {
            let base = i * 4;
            values[base] = mean(series);
            values[base + 1] = std_dev(series);
            values[base + 2] = series.iter().cloned().fold(f64::INFINITY, f64::min);
            values[base + 3] = series.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        }

        let fw = FeatureWindow::new(values);
        if fw.is_finite() {
            Some(fw)
        } else {
            None
        }
    }

    /// Drop all buffered keystrokes (batch-gap reset).
    pub fn reset(&mut self) {
        self.pending_downs.clear();
        self.presses.clear();
        self.keystroke_count = 0;
    }
}

// ── Cold-start maturity ───────────────────────────────────────────────────────

/// Keyboard signal confidence: geometric mean of window-count maturity and
/// elapsed-time maturity. Zero until both contribute, so a burst of
/// synthetic windows in the first second cannot buy full confidence.
pub fn kb_confidence(
    window_count: u64,
    first_kb_event_ms: Option<f64>,
    now_ms: u64,
    cfg: &SentinelConfig,
) -> f64 {
    let count_conf = (window_count as f64 / cfg.kb_count_maturity as f64).min(1.0);
    let time_conf = match first_kb_event_ms {
        Some(first) => {
            let elapsed_s = ((now_ms as f64 - first) / 1000.0).max(0.0);
            (elapsed_s / cfg.kb_time_maturity_s).min(1.0)
        }
        None => 0.0,
    };
    (count_conf * time_conf).sqrt()
}

/// Time-maturity component alone; the phase machine needs it separately.
pub fn time_confidence(first_kb_event_ms: Option<f64>, now_ms: u64, cfg: &SentinelConfig) -> f64 {
    match first_kb_event_ms {
        Some(first) => {
            let elapsed_s = ((now_ms as f64 - first) / 1000.0).max(0.0);
            (elapsed_s / cfg.kb_time_maturity_s).min(1.0)
        }
        None => 0.0,
    }
}
