// sentinel/src/extractors/mouse.rs
//
// Mouse stroke extraction — action-based segmentation.
//
// Instead of fixed time windows, movement is cut into "strokes":
// intentional sequences terminated by a CLICK or a >500 ms pause. Each
// stroke yields the kinematic features the physics detector judges:
// velocity distribution, angular statistics (circular math), curvature,
// linearity error, timing regularity, and the tier-1 evidence counters
// (raw peak velocity, zero-dt displacements, repeated offsets).
//
// Stroke features are scored and kept in the session hot state; raw events
// are never persisted.

use serde::{Deserialize, Serialize};

use crate::events::{MouseEvent, MouseEventKind};
use crate::util::{mean, std_dev};

// Segment-level sanitization.
const MIN_SEGMENT_DISTANCE: f64 = 3.0; // px, sub-pixel noise floor
const MAX_SEGMENT_TIME_MS: f64 = 2000.0; // beyond this it is a pause
const PAUSE_THRESHOLD_MS: f64 = 500.0; // movement stop flushes the stroke
const ZERO_DT_FLOOR_MS: f64 = 0.001; // keeps zero-dt velocities finite

// Strokes retained per session for evaluate-time physics scoring.
pub const MAX_COMPLETED_STROKES: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Segment {
    distance: f64,
    time_diff: f64,
    velocity: f64,
    angle: f64,
    dx: f64,
    dy: f64,
    start: (f64, f64),
    end: (f64, f64),
    zero_dt: bool,
}

/// Kinematic summary of one completed stroke.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrokeFeatures {
    pub velocity_mean: f64,
    pub velocity_std: f64,
    /// True maximum, including zero-dt teleports. Tier-1 input.
    pub velocity_max_raw: f64,
    /// 95th percentile; ignores single-segment flick spikes.
    pub velocity_p95: f64,
    pub angle_mean: f64,
    pub angle_std: f64,
    pub curvature_mean: f64,
    pub curvature_std: f64,
    pub trajectory_efficiency: f64,
    pub path_distance: f64,
    pub linearity_error: f64,
    pub time_diff_std: f64,
    pub time_diff_cv: f64,
    pub segment_count: usize,
    pub zero_dt_moves: usize,
    /// Fraction of segments repeating the previous (dx, dy) exactly.
    pub repeated_offset_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokeTrigger {
    Click,
    Pause,
}

/// Per-session mouse extraction state, including the teleportation
/// counters the orchestrator reads at evaluate time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MouseBuffer {
    last_event: Option<MouseEvent>,
    segments: Vec<Segment>,
    /// Most recent first, capped at MAX_COMPLETED_STROKES.
    pub completed_strokes: Vec<StrokeFeatures>,
    pub move_count_since_last_click: u32,
    pub teleport_clicks: u32,
    pub total_clicks: u32,
}

impl MouseBuffer {
    /// Feed one event; returns stroke features when a stroke completes.
    pub fn process_event(&mut self, event: &MouseEvent) -> Option<(StrokeFeatures, StrokeTrigger)> {
        let mut flushed: Option<(StrokeFeatures, StrokeTrigger)> = None;

        if let Some(last) = self.last_event {
            let gap = event.t - last.t;
            if gap > PAUSE_THRESHOLD_MS && !self.segments.is_empty() {
                flushed = self
                    .flush_stroke()
                    .map(|f| (f, StrokeTrigger::Pause));
            }
        }

        match event.kind {
            MouseEventKind::Click => {
                // The approach segment into the click still belongs to
                // the stroke being judged.
                if let Some(last) = self.last_event {
                    if let Some(seg) = try_segment(&last, event) {
                        self.segments.push(seg);
                    }
                }
                if self.move_count_since_last_click < 3 {
                    self.teleport_clicks += 1;
                }
                self.total_clicks += 1;
                self.move_count_since_last_click = 0;

                if !self.segments.is_empty() {
                    flushed = self
                        .flush_stroke()
                        .map(|f| (f, StrokeTrigger::Click));
                }
            }
            MouseEventKind::Move => {
                if let Some(last) = self.last_event {
                    if let Some(seg) = try_segment(&last, event) {
                        self.segments.push(seg);
                    }
                }
                self.move_count_since_last_click += 1;
            }
        }

        self.last_event = Some(*event);

        if let Some((features, _)) = &flushed {
            self.completed_strokes.insert(0, features.clone());
            self.completed_strokes.truncate(MAX_COMPLETED_STROKES);
        }
        flushed
    }

    fn flush_stroke(&mut self) -> Option<StrokeFeatures> {
        let segments = std::mem::take(&mut self.segments);
        if segments.is_empty() {
            return None;
        }
        Some(extract_features(&segments))
    }

    /// Ratio of near-instant clicks to all clicks this session.
    pub fn teleport_ratio(&self) -> f64 {
        self.teleport_clicks as f64 / (self.total_clicks.max(1)) as f64
    }

    /// Drop buffered movement (batch-gap reset). Click counters survive:
    /// they describe the session, not the stroke in flight.
    pub fn reset(&mut self) {
        self.last_event = None;
        self.segments.clear();
        self.completed_strokes.clear();
    }
}

fn try_segment(p1: &MouseEvent, p2: &MouseEvent) -> Option<Segment> {
    let dx = p2.x - p1.x;
    let dy = p2.y - p1.y;
    let distance = (dx * dx + dy * dy).sqrt();
    let time_diff = p2.t - p1.t;

    if distance < MIN_SEGMENT_DISTANCE {
        return None;
    }
    if time_diff > MAX_SEGMENT_TIME_MS {
        return None;
    }

    // A displacement with no elapsed time is physically impossible for a
    // pointing device; keep the segment and flag it rather than filtering
    // the strongest bot evidence away.
    let zero_dt = time_diff <= 0.0;
    let velocity = distance / time_diff.max(ZERO_DT_FLOOR_MS);

    Some(Segment {
        distance,
        time_diff,
        velocity,
        angle: dy.atan2(dx),
        dx,
        dy,
        start: (p1.x, p1.y),
        end: (p2.x, p2.y),
        zero_dt,
    })
}

fn extract_features(segments: &[Segment]) -> StrokeFeatures {
    let velocities: Vec<f64> = segments.iter().map(|s| s.velocity).collect();
    let angles: Vec<f64> = segments.iter().map(|s| s.angle).collect();
    let time_diffs: Vec<f64> = segments.iter().map(|s| s.time_diff).collect();

    let mut curvatures = Vec::new();
    for pair in segments.windows(2) {
        let diff = angle_diff(pair[1].angle, pair[0].angle);
        if pair[1].distance > 0.0 {
            curvatures.push(diff.abs() / pair[1].distance);
        }
    }

    let path_distance: f64 = segments.iter().map(|s| s.distance).sum();
    let start = segments[0].start;
    let end = segments[segments.len() - 1].end;
    let net = ((end.0 - start.0).powi(2) + (end.1 - start.1).powi(2)).sqrt();
    let efficiency = if path_distance > 0.0 {
        (net / path_distance).min(1.0)
    } else {
        0.0
    };

    let mut sorted_v = velocities.clone();
    sorted_v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let p95_idx = ((sorted_v.len() as f64) * 0.95) as usize;
    let velocity_p95 = sorted_v[p95_idx.min(sorted_v.len() - 1)];
    let velocity_max_raw = *sorted_v.last().unwrap_or(&0.0);

    let dt_mean = mean(&time_diffs);
    let dt_std = std_dev(&time_diffs);
    let dt_cv = if dt_mean > 0.0 { dt_std / dt_mean } else { 0.0 };

    let mut repeated = 0usize;
    for pair in segments.windows(2) {
        if (pair[1].dx - pair[0].dx).abs() < f64::EPSILON
            && (pair[1].dy - pair[0].dy).abs() < f64::EPSILON
        {
            repeated += 1;
        }
    }
    let repeated_offset_ratio = if segments.len() > 1 {
        repeated as f64 / (segments.len() - 1) as f64
    } else {
        0.0
    };

    StrokeFeatures {
        velocity_mean: mean(&velocities),
        velocity_std: std_dev(&velocities),
        velocity_max_raw,
        velocity_p95,
        angle_mean: circular_mean(&angles),
        angle_std: circular_std(&angles),
        curvature_mean: mean(&curvatures),
        curvature_std: std_dev(&curvatures),
        trajectory_efficiency: efficiency,
        path_distance,
        linearity_error: linearity_error(segments),
        time_diff_std: dt_std,
        time_diff_cv: dt_cv,
        segment_count: segments.len(),
        zero_dt_moves: segments.iter().filter(|s| s.zero_dt).count(),
        repeated_offset_ratio,
    }
}

/// Mean perpendicular distance of intermediate points from the straight
/// line connecting stroke start to stroke end.
fn linearity_error(segments: &[Segment]) -> f64 {
    if segments.len() < 2 {
        return 0.0;
    }
    let mut points: Vec<(f64, f64)> = vec![segments[0].start];
    points.extend(segments.iter().map(|s| s.end));

    let start = points[0];
    let end = points[points.len() - 1];
    let line = (end.0 - start.0, end.1 - start.1);
    let len = (line.0 * line.0 + line.1 * line.1).sqrt();
    if len < 1e-9 {
        return 0.0;
    }

    let distances: Vec<f64> = points[1..points.len() - 1]
        .iter()
        .map(|p| (line.0 * (p.1 - start.1) - line.1 * (p.0 - start.0)).abs() / len)
        .collect();
    mean(&distances)
}

// ── Circular statistics ───────────────────────────────────────────────────────
// Angles wrap: -π and π are neighbors, so naive mean/std misreport
// direction changes across the discontinuity.

fn circular_mean(angles: &[f64]) -> f64 {
    if angles.is_empty() {
        return 0.0;
    }
    let sin_sum: f64 = angles.iter().map(|a| a.sin()).sum();
    let cos_sum: f64 = angles.iter().map(|a| a.cos()).sum();
    sin_sum.atan2(cos_sum)
}

fn circular_std(angles: &[f64]) -> f64 {
    if angles.len() < 2 {
        return 0.0;
    }
    let sin_sum: f64 = angles.iter().map(|a| a.sin()).sum();
    let cos_sum: f64 = angles.iter().map(|a| a.cos()).sum();
    let r = ((sin_sum.powi(2) + cos_sum.powi(2)).sqrt() / angles.len() as f64).clamp(0.0, 1.0);
    if r < 1e-9 {
        return std::f64::consts::PI; // maximum dispersion
    }
    if r >= 0.999_999 {
        return 0.0;
    }
    (-2.0 * r.ln()).sqrt()
}

fn angle_diff(a1: f64, a2: f64) -> f64 {
    let mut diff = a1 - a2;
    while diff > std::f64::consts::PI {
        diff -= 2.0 * std::f64::consts::PI;
    }
    while diff < -std::f64::consts::PI {
        diff += 2.0 * std::f64::consts::PI;
    }
    diff
}
