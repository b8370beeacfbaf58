// sentinel/src/engine/fusion.rs
//
// Weighted-sum signal fusion and the mode-dependent decision thresholds.
//
// Weight table (rows are signals, columns the operating mode):
//
//   signal     NORMAL  CHALLENGE  TRUSTED
//   keyboard    0.70     0.85      0.56   (×0.8 of NORMAL)
//   mouse       0.90     1.00      0.90
//   navigator   1.00     1.00      1.00
//   identity    0.65     0.85      0.39   (×0.6 of NORMAL)
//
// The identity contribution is additionally scaled by √confidence so an
// immature identity model cannot dominate the sum. Weights intentionally
// sum past 1.0: two strong signals saturate the clamp, which is the point.

use crate::events::{ComponentScores, Decision, Mode};
use crate::util::clamp01;

#[derive(Debug, Clone, Copy)]
pub struct SignalWeights {
    pub keyboard: f64,
    pub mouse: f64,
    pub navigator: f64,
    pub identity: f64,
}

pub const fn weights(mode: Mode) -> SignalWeights {
    match mode {
        Mode::Normal => SignalWeights {
            keyboard: 0.70,
            mouse: 0.90,
            navigator: 1.00,
            identity: 0.65,
        },
        Mode::Challenge => SignalWeights {
            keyboard: 0.85,
            mouse: 1.00,
            navigator: 1.00,
            identity: 0.85,
        },
        Mode::Trusted => SignalWeights {
            keyboard: 0.70 * 0.8,
            mouse: 0.90,
            navigator: 1.00,
            identity: 0.65 * 0.6,
        },
    }
}

/// Decision thresholds per mode: ALLOW below `challenge_at`, BLOCK at or
/// above `block_at`, CHALLENGE in between.
#[derive(Debug, Clone, Copy)]
pub struct ModeThresholds {
    pub challenge_at: f64,
    pub block_at: f64,
}

pub const fn thresholds(mode: Mode) -> ModeThresholds {
    match mode {
        Mode::Normal => ModeThresholds {
            challenge_at: 0.50,
            block_at: 0.85,
        },
        Mode::Challenge => ModeThresholds {
            challenge_at: 0.40,
            block_at: 0.75,
        },
        Mode::Trusted => ModeThresholds {
            challenge_at: 0.60,
            block_at: 0.92,
        },
    }
}

/// Weighted-sum fusion, clamped to [0,1] and rounded to 4 decimals so the
/// same inputs always audit identically.
pub fn fuse(scores: &ComponentScores, mode: Mode) -> f64 {
    let w = weights(mode);
    let identity_term =
        w.identity * scores.identity * scores.identity_confidence.max(0.0).sqrt();
    let sum = w.keyboard * scores.keyboard
        + w.mouse * scores.mouse
        + w.navigator * scores.navigator
        + identity_term;
    (clamp01(sum) * 10_000.0).round() / 10_000.0
}

pub fn decide(risk: f64, mode: Mode) -> Decision {
    let t = thresholds(mode);
    if risk >= t.block_at {
        Decision::Block
    } else if risk >= t.challenge_at {
        Decision::Challenge
    } else {
        Decision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trusted_mode_discounts_behavioral_signals() {
        let scores = ComponentScores {
            keyboard: 0.6,
            mouse: 0.0,
            navigator: 0.0,
            identity: 0.4,
            identity_confidence: 1.0,
        };
        assert!(fuse(&scores, Mode::Trusted) < fuse(&scores, Mode::Normal));
        assert!(fuse(&scores, Mode::Normal) < fuse(&scores, Mode::Challenge));
    }

    #[test]
    fn immature_identity_is_discounted_by_sqrt_confidence() {
        let mut scores = ComponentScores {
            identity: 1.0,
            identity_confidence: 0.25,
            ..Default::default()
        };
        let low = fuse(&scores, Mode::Normal);
        scores.identity_confidence = 1.0;
        let high = fuse(&scores, Mode::Normal);
        assert!((low - 0.65 * 0.5).abs() < 1e-9);
        assert!((high - 0.65).abs() < 1e-9);
    }

    #[test]
    fn decision_boundaries_are_inclusive_on_the_high_side() {
        assert_eq!(decide(0.49, Mode::Normal), Decision::Allow);
        assert_eq!(decide(0.50, Mode::Normal), Decision::Challenge);
        assert_eq!(decide(0.85, Mode::Normal), Decision::Block);
        assert_eq!(decide(0.40, Mode::Challenge), Decision::Challenge);
        assert_eq!(decide(0.75, Mode::Challenge), Decision::Block);
        assert_eq!(decide(0.59, Mode::Trusted), Decision::Allow);
        assert_eq!(decide(0.92, Mode::Trusted), Decision::Block);
    }

    #[test]
    fn fusion_saturates_instead_of_overflowing() {
        let scores = ComponentScores {
            keyboard: 1.0,
            mouse: 1.0,
            navigator: 1.0,
            identity: 1.0,
            identity_confidence: 1.0,
        };
        assert_eq!(fuse(&scores, Mode::Challenge), 1.0);
    }
}
