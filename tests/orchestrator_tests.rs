//! Orchestrator Scenario Tests
//!
//! End-to-end sequences through ingest + evaluate:
//! - cold-start challenge and the cold-start exit to ALLOW
//! - teleporting bot: tier-1 physics → BLOCK + provisional ban
//! - batch replay rejection and gap-reset strikes
//! - eval_id idempotency
//! - strike-limit override, trust crash, TRUSTED transition
//! - learning suspension under hostile navigator context

use sentinel::config::SentinelConfig;
use sentinel::error::SentinelError;
use sentinel::events::{
    Decision, EvaluateRequest, FeatureWindow, GeoPoint, KeyEvent, KeyEventKind, KeyboardBatch,
    Mode, MouseBatch, MouseEvent, MouseEventKind, Phase, RequestContext,
};
use sentinel::models::{BehaviorModel, ModelKind};
use sentinel::util::Clock;
use sentinel::Orchestrator;

const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
const T0: u64 = 1_700_000_000_000;

fn engine() -> (Orchestrator, Clock) {
    let clock = Clock::manual(T0);
    (
        Orchestrator::new(SentinelConfig::default(), clock.clone()),
        clock,
    )
}

/// Clean human typing: `n` keystrokes of interleaved D/U pairs.
fn kb_batch(session: &str, batch_id: u64, n: usize, t0: f64) -> KeyboardBatch {
    let mut events = Vec::with_capacity(n * 2);
    let mut t = t0;
    for i in 0..n {
        let key = format!("k{}", i % 26);
        let dwell = 80.0 + (i % 7) as f64 * 3.0;
        events.push(KeyEvent {
            key: key.clone(),
            kind: KeyEventKind::Down,
            t,
        });
        events.push(KeyEvent {
            key,
            kind: KeyEventKind::Up,
            t: t + dwell,
        });
        t += dwell + 120.0 + (i % 5) as f64 * 9.0;
    }
    KeyboardBatch {
        session_id: session.to_string(),
        user_id: format!("user-{session}"),
        batch_id,
        events,
    }
}

fn request(session: &str, eval_id: &str) -> EvaluateRequest {
    EvaluateRequest {
        session_id: session.to_string(),
        user_id: format!("user-{session}"),
        request_context: RequestContext {
            ip_address: "198.51.100.7".to_string(),
            user_agent: CHROME_UA.to_string(),
            endpoint: "/api/transfer".to_string(),
            method: "POST".to_string(),
            device_id: "dev-1".to_string(),
            geo: Some(GeoPoint {
                country: "US".to_string(),
                lat: 40.71,
                lon: -74.0,
            }),
        },
        business_context: Default::default(),
        role: "member".to_string(),
        mfa_status: "passed".to_string(),
        session_start_time: Some(T0 as f64),
        client_fingerprint: None,
        eval_id: eval_id.to_string(),
    }
}

/// Same location, wrong everything else: unknown UA (+0.4) plus UA-class
/// and device TOFU deviations (+0.3 each) put nav at 1.0 without
/// triggering the impossible-travel hard block.
fn hostile_request(session: &str, eval_id: &str) -> EvaluateRequest {
    let mut req = request(session, eval_id);
    req.request_context.user_agent = "python-requests/2.32".to_string();
    req.request_context.device_id = "dev-66".to_string();
    req
}

// ── Cold start ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_evaluate_challenges_on_hst_cold_start() {
    let (engine, _clock) = engine();
    let outcome = engine.evaluate(&request("s1", "e1")).await;
    assert_eq!(outcome.decision, Decision::Challenge);
    assert!(outcome
        .anomaly_vectors
        .contains(&"hst_cold_start".to_string()));
    assert!(outcome.ban_expires_in_seconds.is_none());
}

#[tokio::test]
async fn legitimate_user_exits_cold_start_into_allow() {
    let (engine, clock) = engine();
    let session = "s-coldstart";

    let mut batch_id = 1;
    let mut keystrokes = 0usize;
    loop {
        let t0 = (batch_id * 60_000) as f64;
        engine
            .ingest_keyboard(&kb_batch(session, batch_id, 60, t0))
            .await
            .unwrap();
        keystrokes += 60;
        clock.advance_ms(5_000);

        let state = engine.sessions.get(session).await.unwrap().unwrap();
        if state.kb_window_count >= 50 {
            break;
        }
        // Interleaved evaluates: CHALLENGE while cold, learning anyway.
        let outcome = engine
            .evaluate(&request(session, &format!("e-cold-{batch_id}")))
            .await;
        assert_eq!(outcome.decision, Decision::Challenge);
        batch_id += 1;
        assert!(keystrokes < 1000, "cold start must exit within bounds");
    }

    let outcome = engine.evaluate(&request(session, "e-final")).await;
    assert_eq!(outcome.decision, Decision::Allow);
    assert!(outcome.risk < 0.5);
}

#[tokio::test]
async fn cold_start_learning_consumes_the_windows() {
    let (engine, _clock) = engine();
    let session = "s-learn";
    engine
        .ingest_keyboard(&kb_batch(session, 1, 60, 0.0))
        .await
        .unwrap();
    let before = engine.sessions.get(session).await.unwrap().unwrap();
    assert!(!before.completed_windows.is_empty());

    let outcome = engine.evaluate(&request(session, "e1")).await;
    assert_eq!(outcome.decision, Decision::Challenge);

    // Windows were learned into the per-user HST, then cleared.
    let learned = engine
        .models
        .sample_count(&format!("user-{session}"), ModelKind::KeyboardHst)
        .await;
    assert!(learned > 0);
    let after = engine.sessions.get(session).await.unwrap().unwrap();
    assert!(after.completed_windows.is_empty());
    assert_eq!(after.kb_window_count, before.kb_window_count);
}

// ── Teleporting bot ───────────────────────────────────────────────────────────

#[tokio::test]
async fn teleporting_bot_blocks_with_provisional_ban() {
    let (engine, _clock) = engine();
    let session = "s-bot";
    let batch = MouseBatch {
        session_id: session.to_string(),
        user_id: format!("user-{session}"),
        batch_id: 1,
        events: vec![
            MouseEvent {
                x: 0.0,
                y: 0.0,
                kind: MouseEventKind::Move,
                t: 1_000.0,
            },
            MouseEvent {
                x: 1000.0,
                y: 1000.0,
                kind: MouseEventKind::Click,
                t: 1_001.0,
            },
        ],
    };
    engine.ingest_mouse(&batch).await.unwrap();

    let outcome = engine.evaluate(&request(session, "e1")).await;
    assert_eq!(outcome.decision, Decision::Block);
    assert_eq!(outcome.risk, 1.0);
    assert!(outcome
        .anomaly_vectors
        .contains(&"non_human_physics".to_string()));
    assert_eq!(outcome.ban_expires_in_seconds, Some(300));

    // The ban now short-circuits subsequent evaluates.
    let outcome = engine.evaluate(&request(session, "e2")).await;
    assert_eq!(outcome.decision, Decision::Block);
    assert!(outcome.ban_expires_in_seconds.unwrap_or(0) <= 300);
}

// ── Batch ordering ────────────────────────────────────────────────────────────

#[tokio::test]
async fn replayed_batch_is_rejected_without_state_change() {
    let (engine, _clock) = engine();
    let session = "s-replay";
    engine
        .ingest_keyboard(&kb_batch(session, 7, 20, 0.0))
        .await
        .unwrap();
    let before = engine.sessions.get(session).await.unwrap().unwrap();

    let err = engine
        .ingest_keyboard(&kb_batch(session, 7, 20, 50_000.0))
        .await
        .unwrap_err();
    assert!(matches!(err, SentinelError::Validation(_)));

    let after = engine.sessions.get(session).await.unwrap().unwrap();
    assert_eq!(after.last_kb_batch_id, before.last_kb_batch_id);
    assert_eq!(after.keyboard.keystroke_count, before.keyboard.keystroke_count);
    assert_eq!(after.strike_count, before.strike_count);
}

#[tokio::test]
async fn batch_gap_resets_windows_and_charges_half_a_strike() {
    let (engine, _clock) = engine();
    let session = "s-gap";
    engine
        .ingest_keyboard(&kb_batch(session, 5, 60, 0.0))
        .await
        .unwrap();
    let before = engine.sessions.get(session).await.unwrap().unwrap();
    assert!(!before.completed_windows.is_empty());

    engine
        .ingest_keyboard(&kb_batch(session, 20, 10, 100_000.0))
        .await
        .unwrap();
    let after = engine.sessions.get(session).await.unwrap().unwrap();
    assert_eq!(after.last_kb_batch_id, 20);
    assert_eq!(after.strike_count, 0.5);
    assert_eq!(after.strikes_rounded(), 1);
    // Windows cleared; the 10 new keystrokes start from scratch.
    assert_eq!(after.keyboard.keystroke_count, 10);
}

// ── Idempotency ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_eval_id_returns_prior_decision_without_side_effects() {
    let (engine, _clock) = engine();
    let session = "s-idem";
    let first = engine.evaluate(&request(session, "e-same")).await;
    let trust_after_first = engine
        .sessions
        .get(session)
        .await
        .unwrap()
        .unwrap()
        .trust_score;

    let second = engine.evaluate(&request(session, "e-same")).await;
    assert_eq!(second.decision, first.decision);
    assert_eq!(second.risk, first.risk);

    let trust_after_second = engine
        .sessions
        .get(session)
        .await
        .unwrap()
        .unwrap()
        .trust_score;
    assert_eq!(trust_after_first, trust_after_second);
    assert_eq!(engine.audit.len(), 1);
}

// ── Overrides and the trust machine ───────────────────────────────────────────

#[tokio::test]
async fn strike_limit_blocks_ahead_of_everything_else() {
    let (engine, _clock) = engine();
    let session = "s-strikes";
    engine
        .sessions
        .update_transactional(session, &format!("user-{session}"), |s| {
            s.strike_count = 3.0;
        })
        .await
        .unwrap();

    let outcome = engine.evaluate(&request(session, "e1")).await;
    assert_eq!(outcome.decision, Decision::Block);
    assert!(outcome.anomaly_vectors.contains(&"strike_limit".to_string()));
    assert_eq!(outcome.ban_expires_in_seconds, Some(300));
}

#[tokio::test]
async fn identity_contradiction_crashes_trust_to_zero() {
    let (engine, _clock) = engine();
    let session = "s-crash";
    let user = format!("user-{session}");
    let cfg = SentinelConfig::default();

    // Identity model trained on a tight low-feature cluster, 60 windows
    // persisted (confidence 0.4, below the hard-block bar).
    let mut identity = BehaviorModel::new(ModelKind::KeyboardIdentity, &cfg);
    let near = FeatureWindow::new([60.0, 8.0, 45.0, 80.0, 90.0, 30.0, 40.0, 160.0, 150.0, 35.0,
        100.0, 220.0]);
    for _ in 0..60 {
        identity.learn_one(&near);
    }
    engine
        .models
        .save(&user, ModelKind::KeyboardIdentity, &identity, 60, None)
        .await
        .unwrap();

    // Session windows sit at the far end of every bound.
    let far = FeatureWindow::new([480.0, 140.0, 460.0, 495.0, 1100.0, 390.0, 1000.0, 1190.0,
        1400.0, 480.0, 1300.0, 1480.0]);
    engine
        .sessions
        .update_transactional(session, &user, move |s| {
            s.trust_score = 0.8;
            for _ in 0..5 {
                s.push_window(far.clone());
            }
        })
        .await
        .unwrap();

    let outcome = engine.evaluate(&request(session, "e1")).await;
    assert_ne!(outcome.decision, Decision::Block, "confidence 0.4 cannot hard-block");

    let state = engine.sessions.get(session).await.unwrap().unwrap();
    assert!(state.last_identity_score >= 0.9);
    assert_eq!(state.trust_score, 0.0);
    assert_eq!(state.phase, Phase::Unknown);
}

#[tokio::test]
async fn mature_verified_session_transitions_to_trusted() {
    let (engine, clock) = engine();
    let session = "s-trusted";
    let user = format!("user-{session}");
    engine
        .sessions
        .update_transactional(session, &user, |s| {
            s.kb_window_count = 60;
            s.first_kb_event_time = Some(T0 as f64);
            s.trust_score = 0.72;
        })
        .await
        .unwrap();
    clock.advance_ms(25_000); // past time maturity

    let outcome = engine.evaluate(&request(session, "e1")).await;
    assert_eq!(outcome.decision, Decision::Allow);
    assert_eq!(outcome.mode, Mode::Trusted);

    let state = engine.sessions.get(session).await.unwrap().unwrap();
    assert_eq!(state.phase, Phase::Trusted);
    assert!(state.trust_score >= 0.75);
}

// ── Learning suspension ───────────────────────────────────────────────────────

#[tokio::test]
async fn hostile_navigator_context_suspends_all_learning() {
    let (engine, clock) = engine();
    let session = "s-suspend";
    let user = format!("user-{session}");

    // Pin a clean context first, then collect windows.
    engine.evaluate(&request(session, "e-pin")).await;
    engine
        .ingest_keyboard(&kb_batch(session, 1, 60, 0.0))
        .await
        .unwrap();

    // Hostile context: unknown UA + device + geo deviations → nav 1.0.
    let outcome = engine.evaluate(&hostile_request(session, "e-hostile")).await;
    assert_eq!(outcome.decision, Decision::Challenge);
    assert_eq!(
        engine.models.sample_count(&user, ModelKind::KeyboardHst).await,
        0,
        "no learning while the context is hostile"
    );

    // Clean again 5 s later: the 30 s suspension still holds.
    clock.advance_ms(5_000);
    engine.evaluate(&request(session, "e-clean")).await;
    assert_eq!(
        engine.models.sample_count(&user, ModelKind::KeyboardHst).await,
        0,
        "suspension persists past the triggering evaluate"
    );

    let state = engine.sessions.get(session).await.unwrap().unwrap();
    assert!(state.learning_suspended_until > 0);
}

// ── Determinism ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn identical_inputs_and_state_produce_identical_outcomes() {
    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let (engine, clock) = engine();
        let session = "s-det";
        engine
            .ingest_keyboard(&kb_batch(session, 1, 60, 0.0))
            .await
            .unwrap();
        clock.advance_ms(3_000);
        let outcome = engine.evaluate(&request(session, "e1")).await;
        outcomes.push((outcome.decision, outcome.risk, outcome.mode));
    }
    assert_eq!(outcomes[0], outcomes[1]);
}

// ── Invariant: risk and trust stay in [0,1] ──────────────────────────────────

#[tokio::test]
async fn trust_and_risk_stay_bounded_under_mixed_traffic() {
    let (engine, clock) = engine();
    let session = "s-bounds";
    for round in 0..12u64 {
        let t0 = round as f64 * 30_000.0;
        engine
            .ingest_keyboard(&kb_batch(session, round + 1, 30, t0))
            .await
            .ok();
        clock.advance_ms(2_000);
        let req = if round % 3 == 2 {
            hostile_request(session, &format!("e-{round}"))
        } else {
            request(session, &format!("e-{round}"))
        };
        let outcome = engine.evaluate(&req).await;
        assert!((0.0..=1.0).contains(&outcome.risk));
        let state = engine.sessions.get(session).await.unwrap().unwrap();
        assert!((0.0..=1.0).contains(&state.trust_score));
    }
}
