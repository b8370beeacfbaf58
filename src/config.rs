// sentinel/src/config.rs
//
// Engine configuration. Every recognized option with its default; the
// weight and threshold tables live in engine/fusion.rs as constants since
// they define the decision contract, not deployment tuning.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    // Keyboard windowing
    pub kb_window_size: usize,     // keystrokes per feature window
    pub kb_window_step: usize,     // emit cadence once primed
    pub kb_count_maturity: u32,    // windows until count confidence = 1
    pub kb_time_maturity_s: f64,   // seconds until time confidence = 1
    pub max_flight_time_ms: f64,   // coffee-break rule: longer gaps excluded

    // Identity model
    pub identity_samples_required: u32, // windows until full identity confidence

    // Trust machine
    pub trusted_threshold: f64, // trust score entering TRUSTED phase
    pub trust_delta: f64,       // stabilizer step size

    // Bans and strikes
    pub strike_ttl_days: u32,
    pub provisional_ban_ttl_s: u64,
    pub batch_gap_reset: u64, // batch_id gap triggering window reset + strike

    // Selective learning
    pub learn_suspend_on: f64,     // nav score that suspends learning
    pub learn_suspend_s: u64,      // suspension duration
    pub learn_resume_after_s: u64, // clean-activity span required to resume
    pub context_stable_s: u64,     // stability span gating identity learning

    // Physics detector
    pub max_velocity_px_ms: f64,         // biomechanical ceiling, tier 1
    pub physics_suspicion_threshold: f64, // tier 3 pass-through floor

    // Hot / cold store budgets
    pub hot_store_timeout_ms: u64,
    pub cold_store_timeout_ms: u64,
    pub session_ttl_s: u64,

    // Rate limits (per session, per second)
    pub stream_rate_limit: u32,
    pub eval_rate_limit: u32,

    // Half-space trees
    pub hst_trees: usize,
    pub hst_height: usize,
    pub hst_window_size: usize,
    pub hst_warmup: usize,
    pub hst_seed: u64,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            kb_window_size: 50,
            kb_window_step: 5,
            kb_count_maturity: 50,
            kb_time_maturity_s: 20.0,
            max_flight_time_ms: 2000.0,

            identity_samples_required: 150,

            trusted_threshold: 0.75,
            trust_delta: 0.12,

            strike_ttl_days: 7,
            provisional_ban_ttl_s: 300,
            batch_gap_reset: 10,

            learn_suspend_on: 0.85,
            learn_suspend_s: 30,
            learn_resume_after_s: 60,
            context_stable_s: 30,

            max_velocity_px_ms: 9.0,
            physics_suspicion_threshold: 0.3,

            hot_store_timeout_ms: 200,
            cold_store_timeout_ms: 1000,
            session_ttl_s: 1800,

            stream_rate_limit: 20,
            eval_rate_limit: 10,

            hst_trees: 25,
            hst_height: 6,
            hst_window_size: 50,
            hst_warmup: 50,
            hst_seed: 42,
        }
    }
}
