// sentinel/src/engine/learning.rs
//
// Selective-learning gate: decides, per evaluate, which completed windows
// each model may train on. Learning is the attack surface of an online
// model, so the gate is conservative by construction:
//
//   HST  — cold start (< 50 windows this session): learn on ALLOW and
//          CHALLENGE, then clear the windows so the next action has to
//          re-collect. Mature: only ALLOW, in NORMAL mode, unsuspended.
//   Identity — NORMAL mode, unsuspended, nav < 0.5, trust ≥ 0.65,
//          ≥ 5 consecutive allows, context stable ≥ 30 s. All available
//          windows, no cap. Windows whose HST score sits above the 95th
//          percentile of the batch are excluded: the windows most likely
//          to be drift are exactly the ones an identity model must not
//          absorb.
//   Cold-start override — while a model holds < 50 persisted windows, a
//          CHALLENGE decision does not veto its learning; sessions stuck
//          in the challenge loop could otherwise never mature.
//
// Suspension: nav ≥ 0.85 suspends learning 30 s; the suspension lifts only
// after 60 s of clean activity (nav < 0.5).

use crate::config::SentinelConfig;
use crate::events::{Decision, FeatureWindow, Mode};
use crate::models::BehaviorModel;
use crate::state::session::SessionState;
use crate::util::p95;

#[derive(Debug, Default)]
pub struct LearningPlan {
    pub hst_windows: Vec<FeatureWindow>,
    pub identity_windows: Vec<FeatureWindow>,
    /// Cold-start discipline: wipe session windows after learning.
    pub clear_windows: bool,
}

/// True while model updates are forbidden for this session.
pub fn suspended(state: &SessionState, now_ms: u64, cfg: &SentinelConfig) -> bool {
    if state.learning_suspended_until == 0 {
        return false;
    }
    if now_ms < state.learning_suspended_until {
        return true;
    }
    // Past the hard window: still suspended until a full clean span.
    now_ms < state.last_dirty_nav_ms + cfg.learn_resume_after_s * 1000
}

#[allow(clippy::too_many_arguments)]
pub fn plan(
    state: &SessionState,
    decision: Decision,
    nav_score: f64,
    hst_model: Option<&BehaviorModel>,
    hst_persisted_windows: u32,
    identity_persisted_windows: u32,
    now_ms: u64,
    cfg: &SentinelConfig,
) -> LearningPlan {
    let mut out = LearningPlan::default();
    if state.completed_windows.is_empty() || decision == Decision::Block {
        return out;
    }

    // The suspension the current nav score is about to trigger applies to
    // this evaluate too: a hostile context never feeds the models.
    let is_suspended =
        suspended(state, now_ms, cfg) || nav_score >= cfg.learn_suspend_on;
    let session_cold = state.kb_window_count < cfg.kb_count_maturity as u64;

    // ── HST baseline ──────────────────────────────────────────────────────────
    if session_cold || hst_persisted_windows < cfg.kb_count_maturity {
        if matches!(decision, Decision::Allow | Decision::Challenge) && !is_suspended {
            out.hst_windows = state.completed_windows.clone();
            out.clear_windows = true;
        }
    } else if decision == Decision::Allow && state.mode == Mode::Normal && !is_suspended {
        out.hst_windows = state.completed_windows.clone();
    }

    // ── Identity ──────────────────────────────────────────────────────────────
    let identity_cold = identity_persisted_windows < cfg.kb_count_maturity;
    let decision_ok =
        decision == Decision::Allow || (decision == Decision::Challenge && identity_cold);
    let context_stable = state
        .context_stable_since
        .map(|since| now_ms.saturating_sub(since) >= cfg.context_stable_s * 1000)
        .unwrap_or(false);

    if decision_ok
        && state.mode == Mode::Normal
        && !is_suspended
        && nav_score < 0.5
        && state.trust_score >= 0.65
        && state.consecutive_allows >= 5
        && context_stable
    {
        out.identity_windows = filter_drifted(&state.completed_windows, hst_model);
    }

    out
}

/// Drop the windows the baseline itself finds most anomalous. Without a
/// scoreable baseline nothing can be filtered, so everything passes: the
/// trust and streak gates above are the backstop in that regime.
fn filter_drifted(
    windows: &[FeatureWindow],
    hst_model: Option<&BehaviorModel>,
) -> Vec<FeatureWindow> {
    let model = match hst_model {
        Some(m) => m,
        None => return windows.to_vec(),
    };
    let scores: Vec<f64> = windows.iter().map(|w| model.score_one(w)).collect();
    let cutoff = p95(&scores);
    windows
        .iter()
        .zip(scores.iter())
        .filter(|(_, s)| **s <= cutoff)
        .map(|(w, _)| w.clone())
        .collect()
}
