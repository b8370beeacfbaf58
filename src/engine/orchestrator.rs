// sentinel/src/engine/orchestrator.rs
//
// Central coordinator: stream ingestion and transaction evaluation.
//
// Ingestion (keyboard/mouse) validates batch ordering, runs the
// extractors, and commits the new session state in a single optimistic
// transaction. It never emits a decision.
//
// Evaluation is the 11-step sequence: hydrate → ban check → component
// scores → priority overrides → weighted fusion → threshold decision →
// trust stabilizer → phase transitions → bookkeeping → gated selective
// learning → audit. All scoring is pure; the only suspension points are
// the store calls, each under its timeout budget. A hot-store failure
// degrades to CHALLENGE (fail-safe); a cold-store failure degrades that
// model to cold start and skips its learning.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::SentinelConfig;
use crate::engine::{fusion, learning};
use crate::error::{SentinelError, SentinelResult};
use crate::events::{
    ComponentScores, Decision, EvalOutcome, EvaluateRequest, KeyboardBatch, Mode, MouseBatch,
    NavDecision, Phase,
};
use crate::extractors::keyboard::{kb_confidence, time_confidence};
use crate::models::{BehaviorModel, ModelKind};
use crate::persist::audit::AuditLog;
use crate::persist::model_store::ModelStore;
use crate::state::session::{SessionState, SessionStore};
use crate::util::{clamp01, Clock};
use crate::workers::{navigator, physics, teleport};

/// Windows scored per evaluate; learning has no such cap.
const SCORE_WINDOW_LIMIT: usize = 5;
/// Identity risk at which trust crashes to zero.
const TRUST_CRASH_IDENTITY_RISK: f64 = 0.9;
const BAN_PROVENANCE: &str = "sentinel";

pub struct Orchestrator {
    cfg: SentinelConfig,
    pub sessions: Arc<SessionStore>,
    pub models: Arc<ModelStore>,
    pub audit: Arc<AuditLog>,
    clock: Clock,
}

impl Orchestrator {
    pub fn new(cfg: SentinelConfig, clock: Clock) -> Self {
        Self {
            sessions: Arc::new(SessionStore::new(clock.clone())),
            models: Arc::new(ModelStore::new(cfg.clone(), clock.clone())),
            audit: Arc::new(AuditLog::new(clock.clone())),
            cfg,
            clock,
        }
    }

    pub fn config(&self) -> &SentinelConfig {
        &self.cfg
    }

    // ── Stream ingestion ──────────────────────────────────────────────────────

    /// Ingest a keyboard batch. Replays reject with Validation and touch
    /// nothing; a gap above the reset threshold clears the window state
    /// and charges half a strike.
    pub async fn ingest_keyboard(&self, batch: &KeyboardBatch) -> SentinelResult<()> {
        let current = self.hot(self.sessions.get(&batch.session_id)).await?;
        if let Some(state) = &current {
            if batch.batch_id <= state.last_kb_batch_id {
                return Err(SentinelError::Validation(format!(
                    "keyboard batch_id {} not after {}",
                    batch.batch_id, state.last_kb_batch_id
                )));
            }
        }

        let cfg = self.cfg.clone();
        let batch = batch.clone();
        let (session_id, user_id) = (batch.session_id.clone(), batch.user_id.clone());
        // Maturity math runs on server wall time; event timestamps are a
        // client-side monotonic clock and never mix with it.
        let arrival_ms = self.clock.now_ms() as f64;
        let result = self
            .hot(self.sessions.update_transactional(
                &session_id,
                &user_id,
                move |state| {
                    // Re-checked inside the transaction: a racing duplicate
                    // must become a no-op, not a double-apply.
                    if batch.batch_id <= state.last_kb_batch_id {
                        return;
                    }
                    if state.last_kb_batch_id > 0
                        && batch.batch_id - state.last_kb_batch_id > cfg.batch_gap_reset
                    {
                        warn!(
                            session_id = %batch.session_id,
                            from = state.last_kb_batch_id,
                            to = batch.batch_id,
                            "keyboard batch gap, resetting windows"
                        );
                        state.keyboard.reset();
                        state.completed_windows.clear();
                        state.strike_count += 0.5;
                    }
                    state.last_kb_batch_id = batch.batch_id;

                    if state.first_kb_event_time.is_none() && !batch.events.is_empty() {
                        state.first_kb_event_time = Some(arrival_ms);
                    }
                    for event in &batch.events {
                        if let Some(window) = state.keyboard.process_event(event, &cfg) {
                            state.push_window(window);
                        }
                    }
                },
            ))
            .await;

        match result {
            Ok(_) => Ok(()),
            // Contended ingest drops silently; the client retransmits.
            Err(SentinelError::TransientConflict { key, .. }) => {
                debug!(key, "keyboard ingest dropped on conflict");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Ingest a mouse batch. Same ordering rules; completed strokes are
    /// physics-scored immediately so evaluate reads a ready verdict.
    pub async fn ingest_mouse(&self, batch: &MouseBatch) -> SentinelResult<()> {
        let current = self.hot(self.sessions.get(&batch.session_id)).await?;
        if let Some(state) = &current {
            if batch.batch_id <= state.last_mouse_batch_id {
                return Err(SentinelError::Validation(format!(
                    "mouse batch_id {} not after {}",
                    batch.batch_id, state.last_mouse_batch_id
                )));
            }
        }

        let cfg = self.cfg.clone();
        let batch = batch.clone();
        let (session_id, user_id) = (batch.session_id.clone(), batch.user_id.clone());
        let result = self
            .hot(self.sessions.update_transactional(
                &session_id,
                &user_id,
                move |state| {
                    if batch.batch_id <= state.last_mouse_batch_id {
                        return;
                    }
                    if state.last_mouse_batch_id > 0
                        && batch.batch_id - state.last_mouse_batch_id > cfg.batch_gap_reset
                    {
                        warn!(
                            session_id = %batch.session_id,
                            from = state.last_mouse_batch_id,
                            to = batch.batch_id,
                            "mouse batch gap, resetting stroke state"
                        );
                        state.mouse.reset();
                        state.strike_count += 0.5;
                    }
                    state.last_mouse_batch_id = batch.batch_id;

                    for event in &batch.events {
                        if let Some((stroke, _trigger)) = state.mouse.process_event(event) {
                            let signal = physics::analyze(&stroke, &cfg);
                            if signal.score > state.last_mouse_score {
                                state.last_mouse_score = signal.score;
                            }
                        }
                    }
                },
            ))
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(SentinelError::TransientConflict { key, .. }) => {
                debug!(key, "mouse ingest dropped on conflict");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // ── Evaluation ────────────────────────────────────────────────────────────

    /// Evaluate a sensitive action. Infrastructure failures never reach
    /// the caller as errors: the fail-safe posture is CHALLENGE.
    pub async fn evaluate(&self, request: &EvaluateRequest) -> EvalOutcome {
        match self.evaluate_inner(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(eval_id = %request.eval_id, %e, "evaluate degraded to fail-safe");
                EvalOutcome {
                    eval_id: request.eval_id.clone(),
                    decision: Decision::Challenge,
                    risk: 0.5,
                    mode: Mode::Normal,
                    anomaly_vectors: vec!["fail_safe".to_string()],
                    ban_expires_in_seconds: None,
                }
            }
        }
    }

    async fn evaluate_inner(&self, request: &EvaluateRequest) -> SentinelResult<EvalOutcome> {
        let now = self.clock.now_ms();

        // Idempotent replay: same eval_id, same answer.
        if let Some(prior) = self.cold(self.audit.get(&request.eval_id)).await? {
            debug!(eval_id = %request.eval_id, "duplicate eval_id, returning prior decision");
            return Ok(EvalOutcome {
                eval_id: prior.eval_id,
                decision: prior.decision,
                risk: prior.risk,
                mode: prior.mode,
                anomaly_vectors: prior.anomaly_vectors,
                ban_expires_in_seconds: None,
            });
        }

        // Ban check precedes everything else.
        if let Some((value, remaining)) =
            self.hot(self.sessions.get_ban(&request.user_id)).await?
        {
            let reason = value.split('|').nth(1).unwrap_or("banned").to_string();
            let outcome = EvalOutcome {
                eval_id: request.eval_id.clone(),
                decision: Decision::Block,
                risk: 1.0,
                mode: Mode::Normal,
                anomaly_vectors: vec![reason],
                ban_expires_in_seconds: Some(remaining),
            };
            self.emit_audit(request, &outcome, ComponentScores::default())
                .await;
            return Ok(outcome);
        }

        // Hydrate.
        let state = self
            .hot(self.sessions.get(&request.session_id))
            .await?
            .unwrap_or_else(|| SessionState::new(&request.user_id, now));

        // ── Component scores ──────────────────────────────────────────────────
        let ctx = &request.request_context;

        let first_evaluate = state.tofu_context.is_none();
        let nav = if first_evaluate {
            // TOFU: pin now, trust this first context by definition.
            navigator::NavSignal::default()
        } else {
            navigator::analyze(
                ctx,
                state.tofu_context.as_ref(),
                state.last_geo.as_ref().map(|(g, t)| (g, *t)),
                now,
            )
        };
        let pin = first_evaluate.then(|| navigator::TofuContext::pin(ctx));

        // Keyboard baseline: cold-store failure reads as cold start.
        let hst_loaded = self
            .load_model_soft(&request.user_id, ModelKind::KeyboardHst)
            .await;
        let hst_persisted = hst_loaded.as_ref().map(|m| m.1).unwrap_or(0);
        let kb_conf = kb_confidence(
            state.kb_window_count,
            state.first_kb_event_time,
            now,
            &self.cfg,
        );
        let kb_score = match &hst_loaded {
            Some((model, _)) => mean_window_score(model, &state) * kb_conf,
            None => 0.0,
        };

        // Mouse: worst recent stroke vs teleport ratio.
        let physics_signal = physics::score_session(&state.mouse.completed_strokes, &self.cfg);
        let teleport_signal = teleport::analyze(&state.mouse);
        let mouse_score =
            teleport::effective_mouse_risk(physics_signal.score, teleport_signal.ratio);

        // Identity.
        let identity_loaded = self
            .load_model_soft(&request.user_id, ModelKind::KeyboardIdentity)
            .await;
        let identity_persisted = identity_loaded.as_ref().map(|m| m.1).unwrap_or(0);
        let (identity_risk, identity_conf) = match &identity_loaded {
            Some((model, count)) => (
                mean_window_score(model, &state),
                (*count as f64 / self.cfg.identity_samples_required as f64).min(1.0),
            ),
            None => (0.0, 0.0),
        };

        let scores = ComponentScores {
            keyboard: kb_score,
            mouse: mouse_score,
            navigator: nav.score,
            identity: identity_risk,
            identity_confidence: identity_conf,
        };

        // ── Priority overrides, then fusion ───────────────────────────────────
        let strikes = state.strikes_rounded();
        let (decision, risk, override_reason) = if strikes >= 3 {
            (Decision::Block, 1.0, Some("strike_limit"))
        } else if mouse_score >= 1.0 {
            (Decision::Block, 1.0, Some("non_human_physics"))
        } else if nav.decision == NavDecision::Block {
            (Decision::Block, 1.0, Some("environment_violation"))
        } else if identity_risk >= 0.95 && identity_conf >= 0.6 {
            (Decision::Block, 1.0, Some("identity_contradiction"))
        } else if identity_risk >= 0.98 && identity_conf < 0.6 {
            (
                Decision::Challenge,
                clamp01(fusion::fuse(&scores, state.mode).max(0.5)),
                Some("immature_identity"),
            )
        } else if state.kb_window_count < self.cfg.kb_count_maturity as u64 {
            (
                Decision::Challenge,
                clamp01(fusion::fuse(&scores, state.mode).max(0.5)),
                Some("hst_cold_start"),
            )
        } else {
            let risk = fusion::fuse(&scores, state.mode);
            (fusion::decide(risk, state.mode), risk, None)
        };

        let mut anomaly_vectors: Vec<String> = Vec::new();
        if let Some(reason) = override_reason {
            anomaly_vectors.push(reason.to_string());
        }
        anomaly_vectors.extend(physics_signal.evidence.iter().cloned());
        anomaly_vectors.extend(teleport_signal.evidence.iter().cloned());
        anomaly_vectors.extend(nav.evidence.iter().cloned());

        // ── Learning plan (pure) against the pre-update state ─────────────────
        let hst_model_ref = hst_loaded.as_ref().map(|(m, _)| m);
        let plan = learning::plan(
            &state,
            decision,
            nav.score,
            hst_model_ref,
            hst_persisted,
            identity_persisted,
            now,
            &self.cfg,
        );

        // ── Commit: stabilizer, phases, bookkeeping in one transaction ────────
        let cfg = self.cfg.clone();
        let nav_score = nav.score;
        let tofu_deviation = nav.evidence.iter().any(|e| e.starts_with("tofu_"));
        let geo = ctx.geo.clone();
        let clear_windows = plan.clear_windows;
        let committed = self
            .hot(self.sessions.update_transactional(
                &request.session_id,
                &request.user_id,
                move |s| {
                    s.last_kb_score = kb_score;
                    s.last_mouse_score = mouse_score;
                    s.last_nav_score = nav_score;
                    s.last_identity_score = identity_risk;
                    s.last_identity_confidence = identity_conf;

                    if let Some(pin) = &pin {
                        s.tofu_context = Some(pin.clone());
                        s.context_stable_since = Some(now);
                    } else if tofu_deviation {
                        s.context_stable_since = Some(now);
                    } else if s.context_stable_since.is_none() {
                        s.context_stable_since = Some(now);
                    }
                    if let Some(g) = &geo {
                        s.last_geo = Some((g.clone(), now));
                    }

                    // Learning suspension bookkeeping.
                    if nav_score >= cfg.learn_suspend_on {
                        s.learning_suspended_until = now + cfg.learn_suspend_s * 1000;
                    }
                    if nav_score >= 0.5 {
                        s.last_dirty_nav_ms = now;
                    }
                    if s.learning_suspended_until != 0
                        && now >= s.learning_suspended_until
                        && now >= s.last_dirty_nav_ms + cfg.learn_resume_after_s * 1000
                    {
                        s.learning_suspended_until = 0;
                    }

                    // Trust stabilizer, then the crash rule.
                    s.trust_score =
                        clamp01(s.trust_score + cfg.trust_delta * (0.5 - risk));
                    let crashed = identity_risk >= TRUST_CRASH_IDENTITY_RISK;
                    if crashed {
                        s.trust_score = 0.0;
                    }

                    // Phase machine.
                    if crashed {
                        s.phase = Phase::Unknown;
                        s.mode = Mode::Normal;
                    } else {
                        if s.phase == Phase::Unknown
                            && s.kb_window_count >= cfg.kb_count_maturity as u64
                            && time_confidence(s.first_kb_event_time, now, &cfg) >= 1.0
                        {
                            s.phase = Phase::Verifying;
                        }
                        if s.phase == Phase::Verifying && s.trust_score >= cfg.trusted_threshold
                        {
                            s.phase = Phase::Trusted;
                            s.mode = Mode::Trusted;
                        }
                    }

                    // Decision bookkeeping.
                    match decision {
                        Decision::Allow => {
                            s.consecutive_allows += 1;
                            if s.mode == Mode::Challenge {
                                s.mode = Mode::Normal;
                            }
                            if s.phase == Phase::Trusted
                                && s.trust_score >= cfg.trusted_threshold
                            {
                                s.mode = Mode::Trusted;
                            }
                        }
                        Decision::Challenge => {
                            s.mode = Mode::Challenge;
                            s.consecutive_allows = 0;
                        }
                        Decision::Block => {
                            s.strike_count += 1.0;
                            s.trust_score = 0.0;
                            s.consecutive_allows = 0;
                            s.mode = Mode::Normal;
                        }
                    }

                    if clear_windows {
                        s.completed_windows.clear();
                    }

                    s.last_decision = Some(decision);
                    s.last_risk = Some(risk);
                },
            ))
            .await?;

        // Ban and global strike on BLOCK.
        let ban_expires = if decision == Decision::Block {
            let reason = override_reason.unwrap_or("risk_threshold");
            self.hot(self.sessions.set_ban(
                &request.user_id,
                self.cfg.provisional_ban_ttl_s,
                BAN_PROVENANCE,
                reason,
            ))
            .await?;
            let total = self.hot(self.sessions.incr_strike(&request.user_id)).await?;
            info!(
                user_id = %request.user_id,
                reason,
                global_strikes = total,
                "provisional ban set"
            );
            Some(self.cfg.provisional_ban_ttl_s)
        } else {
            None
        };

        // ── Selective learning (gated, non-blocking per user) ─────────────────
        if !plan.hst_windows.is_empty() {
            match self
                .cold(self.models.learn_with_retry(
                    &request.user_id,
                    ModelKind::KeyboardHst,
                    &plan.hst_windows,
                ))
                .await
            {
                Ok(learned) => {
                    if learned {
                        debug!(
                            user_id = %request.user_id,
                            windows = plan.hst_windows.len(),
                            "hst learned"
                        );
                    }
                }
                Err(e) => warn!(%e, "hst learning skipped"),
            }
        }
        if !plan.identity_windows.is_empty() {
            match self
                .cold(self.models.learn_with_retry(
                    &request.user_id,
                    ModelKind::KeyboardIdentity,
                    &plan.identity_windows,
                ))
                .await
            {
                Ok(learned) => {
                    if learned {
                        debug!(
                            user_id = %request.user_id,
                            windows = plan.identity_windows.len(),
                            "identity learned"
                        );
                    }
                }
                Err(e) => warn!(%e, "identity learning skipped"),
            }
        }

        let outcome = EvalOutcome {
            eval_id: request.eval_id.clone(),
            decision,
            risk,
            mode: committed.mode,
            anomaly_vectors,
            ban_expires_in_seconds: ban_expires,
        };
        self.emit_audit(request, &outcome, scores).await;
        Ok(outcome)
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    async fn emit_audit(
        &self,
        request: &EvaluateRequest,
        outcome: &EvalOutcome,
        scores: ComponentScores,
    ) {
        let result = self
            .cold(self.audit.emit(
                request,
                outcome.decision,
                outcome.risk,
                outcome.mode,
                scores,
                outcome.anomaly_vectors.clone(),
            ))
            .await;
        if let Err(e) = result {
            warn!(eval_id = %request.eval_id, %e, "audit write failed");
        }
    }

    /// Cold-store load that degrades to cold start instead of failing the
    /// evaluate. Returns (model, persisted window count).
    async fn load_model_soft(
        &self,
        user_id: &str,
        kind: ModelKind,
    ) -> Option<(BehaviorModel, u32)> {
        match self.cold(self.models.load(user_id, kind)).await {
            Ok(Some(stored)) => Some((stored.model, stored.feature_window_count)),
            Ok(None) => None,
            Err(e) => {
                warn!(user_id, model_type = %kind, %e, "cold store load failed, cold start");
                None
            }
        }
    }

    /// Hot-store budget: 200 ms, then HotStoreUnavailable.
    async fn hot<T>(
        &self,
        fut: impl std::future::Future<Output = SentinelResult<T>>,
    ) -> SentinelResult<T> {
        match timeout(Duration::from_millis(self.cfg.hot_store_timeout_ms), fut).await {
            Ok(result) => result,
            Err(_) => Err(SentinelError::HotStoreUnavailable("timeout".to_string())),
        }
    }

    /// Cold-store budget: 1 s, then ColdStoreUnavailable.
    async fn cold<T>(
        &self,
        fut: impl std::future::Future<Output = SentinelResult<T>>,
    ) -> SentinelResult<T> {
        match timeout(Duration::from_millis(self.cfg.cold_store_timeout_ms), fut).await {
            Ok(result) => result,
            Err(_) => Err(SentinelError::ColdStoreUnavailable("timeout".to_string())),
        }
    }
}

/// Mean anomaly score over the most recent completed windows.
fn mean_window_score(model: &BehaviorModel, state: &SessionState) -> f64 {
    let recent: Vec<f64> = state
        .completed_windows
        .iter()
        .take(SCORE_WINDOW_LIMIT)
        .map(|w| model.score_one(w))
        .collect();
    if recent.is_empty() {
        0.0
    } else {
        recent.iter().sum::<f64>() / recent.len() as f64
    }
}
