// sentinel/src/workers/physics.rs
//
// Physics worker — deterministic biomechanical liveness checks on mouse
// strokes. Zero ML, zero learning, zero drift.
//
// Tiered scoring:
//   Tier 1 (HARD FAIL): impossible kinematics, immediate 1.0
//     - peak velocity above the biomechanical ceiling
//     - zero elapsed time between distinct positions
//     - inhumanly straight long strokes
//   Tier 2 (ADDITIVE): suspicious regularity, bounded increments
//     - flat inter-event timing            +0.35
//     - missing velocity jitter            +0.25
//     - near-perfect straight segments     +0.25
//     - identical repeating offsets        +0.30
//     sum clamped to [0, 0.9]
//   Tier 3 (PASS-THROUGH): the accumulated score surfaces only above the
//     suspicion threshold; below it the stroke reads as clean.

use crate::config::SentinelConfig;
use crate::extractors::mouse::StrokeFeatures;

// Tier 1 linearity: humans cannot draw a long perfect line.
const INHUMAN_PATH_MIN: f64 = 300.0; // px
const INHUMAN_LINEARITY_MAX: f64 = 0.2; // px mean deviation
const EXACT_LINE_SEGMENTS: usize = 10;
const EXACT_LINE_EPS: f64 = 0.01;

// Tier 2 thresholds.
const MIN_TIMING_SEGMENTS: usize = 20;
const SUSPICIOUS_TIME_STD: f64 = 0.02; // ms, OS-quantized floor
const SUSPICIOUS_TIME_CV: f64 = 0.05;
const MIN_JITTER_SEGMENTS: usize = 5;
const SUSPICIOUS_VELOCITY_STD: f64 = 0.01;
const SUSPICIOUS_PATH_MIN: f64 = 150.0;
const SUSPICIOUS_LINEARITY_MAX: f64 = 0.5;
const MIN_OFFSET_SEGMENTS: usize = 10;
const REPEATED_OFFSET_RATIO: f64 = 0.9;

const WEIGHT_TIMING: f64 = 0.35;
const WEIGHT_JITTER: f64 = 0.25;
const WEIGHT_LINEARITY: f64 = 0.25;
const WEIGHT_OFFSETS: f64 = 0.30;
const TIER2_CAP: f64 = 0.9;

#[derive(Debug, Clone, Default)]
pub struct PhysicsSignal {
    pub score: f64,
    pub evidence: Vec<String>,
}

/// Score a single stroke.
pub fn analyze(stroke: &StrokeFeatures, cfg: &SentinelConfig) -> PhysicsSignal {
    // ── Tier 1 ────────────────────────────────────────────────────────────────
    if stroke.velocity_max_raw > cfg.max_velocity_px_ms {
        return PhysicsSignal {
            score: 1.0,
            evidence: vec![format!(
                "teleport_speed:{:.1}px_ms",
                stroke.velocity_max_raw
            )],
        };
    }
    if stroke.zero_dt_moves > 0 {
        return PhysicsSignal {
            score: 1.0,
            evidence: vec![format!("zero_dt_displacement:{}", stroke.zero_dt_moves)],
        };
    }
    let perfectly_straight = stroke.segment_count >= EXACT_LINE_SEGMENTS
        && stroke.linearity_error < EXACT_LINE_EPS;
    let inhumanly_straight = stroke.path_distance > INHUMAN_PATH_MIN
        && stroke.linearity_error < INHUMAN_LINEARITY_MAX;
    if perfectly_straight || inhumanly_straight {
        return PhysicsSignal {
            score: 1.0,
            evidence: vec![format!(
                "inhuman_linearity:{:.3}px_on_{:.0}px",
                stroke.linearity_error, stroke.path_distance
            )],
        };
    }

    // ── Tier 2 ────────────────────────────────────────────────────────────────
    let mut score = 0.0f64;
    let mut evidence = Vec::new();

    if stroke.segment_count >= MIN_TIMING_SEGMENTS
        && (stroke.time_diff_std < SUSPICIOUS_TIME_STD || stroke.time_diff_cv < SUSPICIOUS_TIME_CV)
    {
        score += WEIGHT_TIMING;
        evidence.push(format!(
            "overly_regular_timing:std={:.4}ms_cv={:.3}",
            stroke.time_diff_std, stroke.time_diff_cv
        ));
    }
    if stroke.segment_count >= MIN_JITTER_SEGMENTS
        && stroke.velocity_std < SUSPICIOUS_VELOCITY_STD
    {
        score += WEIGHT_JITTER;
        evidence.push(format!("low_velocity_jitter:{:.4}", stroke.velocity_std));
    }
    if stroke.path_distance > SUSPICIOUS_PATH_MIN
        && stroke.linearity_error < SUSPICIOUS_LINEARITY_MAX
    {
        score += WEIGHT_LINEARITY;
        evidence.push(format!(
            "excessive_linearity:{:.3}px",
            stroke.linearity_error
        ));
    }
    if stroke.segment_count >= MIN_OFFSET_SEGMENTS
        && stroke.repeated_offset_ratio >= REPEATED_OFFSET_RATIO
    {
        score += WEIGHT_OFFSETS;
        evidence.push(format!(
            "repeating_offsets:{:.0}%",
            stroke.repeated_offset_ratio * 100.0
        ));
    }

    score = score.min(TIER2_CAP);

    // ── Tier 3 ────────────────────────────────────────────────────────────────
    if score >= cfg.physics_suspicion_threshold {
        PhysicsSignal { score, evidence }
    } else {
        PhysicsSignal::default()
    }
}

/// Worst stroke wins: a bot cannot launder one impossible stroke by
/// following it with clean ones.
pub fn score_session(strokes: &[StrokeFeatures], cfg: &SentinelConfig) -> PhysicsSignal {
    let mut worst = PhysicsSignal::default();
    for stroke in strokes {
        let signal = analyze(stroke, cfg);
        if signal.score > worst.score {
            worst = signal;
        }
    }
    worst
}
