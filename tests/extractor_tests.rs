//! Feature Extractor Tests
//!
//! Covers:
//! - keyboard sliding-window emission (size 50, stride 5)
//! - short windows discarded, maturity confidence math
//! - mouse stroke segmentation, pause flush, teleport counters

use sentinel::config::SentinelConfig;
use sentinel::events::{KeyEvent, KeyEventKind, MouseEvent, MouseEventKind};
use sentinel::extractors::keyboard::{kb_confidence, KeyboardBuffer};
use sentinel::extractors::mouse::MouseBuffer;

/// One clean D/U pair per keystroke: dwell ~80 ms, flight ~120 ms, with
/// deterministic jitter so std is non-zero.
fn type_keystrokes(buffer: &mut KeyboardBuffer, cfg: &SentinelConfig, n: usize, t0: f64) -> usize {
    let mut windows = 0;
    let mut t = t0;
    for i in 0..n {
        let key = format!("k{}", i % 26);
        let dwell = 80.0 + (i % 7) as f64 * 3.0;
        let flight = 120.0 + (i % 5) as f64 * 9.0;
        if buffer
            .process_event(
                &KeyEvent {
                    key: key.clone(),
                    kind: KeyEventKind::Down,
                    t,
                },
                cfg,
            )
            .is_some()
        {
            windows += 1;
        }
        buffer.process_event(
            &KeyEvent {
                key,
                kind: KeyEventKind::Up,
                t: t + dwell,
            },
            cfg,
        );
        t += dwell + flight;
    }
    windows
}

#[test]
fn no_window_before_fifty_keystrokes() {
    let cfg = SentinelConfig::default();
    let mut buffer = KeyboardBuffer::default();
    assert_eq!(type_keystrokes(&mut buffer, &cfg, 49, 0.0), 0);
}

#[test]
fn windows_emit_on_the_stride_once_primed() {
    let cfg = SentinelConfig::default();
    let mut buffer = KeyboardBuffer::default();
    // The 50th DOWN fires before its UP pairs, so the first full window
    // lands on the next stride boundary; 70 keystrokes cross 55, 60, 65, 70.
    let windows = type_keystrokes(&mut buffer, &cfg, 70, 0.0);
    assert_eq!(windows, 4);
}

#[test]
fn window_statistics_are_plausible_and_finite() {
    let cfg = SentinelConfig::default();
    let mut buffer = KeyboardBuffer::default();
    let mut captured = None;
    let mut t = 0.0;
    for i in 0..60 {
        let key = format!("k{}", i % 26);
        if let Some(w) = buffer.process_event(
            &KeyEvent {
                key: key.clone(),
                kind: KeyEventKind::Down,
                t,
            },
            &cfg,
        ) {
            captured = Some(w);
        }
        buffer.process_event(
            &KeyEvent {
                key,
                kind: KeyEventKind::Up,
                t: t + 85.0,
            },
            &cfg,
        );
        t += 200.0;
    }
    let window = captured.expect("a window should have emitted");
    assert!(window.is_finite());
    // Constant 85 ms dwell: mean 85, std 0.
    assert!((window.values[0] - 85.0).abs() < 1e-9);
    assert!(window.values[1].abs() < 1e-9);
    // Inter-key interval is the constant 200 ms cadence.
    assert!((window.values[8] - 200.0).abs() < 1e-9);
}

#[test]
fn reset_clears_the_stream_position() {
    let cfg = SentinelConfig::default();
    let mut buffer = KeyboardBuffer::default();
    type_keystrokes(&mut buffer, &cfg, 60, 0.0);
    buffer.reset();
    assert_eq!(buffer.keystroke_count, 0);
    assert_eq!(type_keystrokes(&mut buffer, &cfg, 49, 100_000.0), 0);
}

#[test]
fn kb_confidence_is_geometric_and_zero_sided() {
    let cfg = SentinelConfig::default();
    // No time component yet: confidence must be zero no matter the count.
    assert_eq!(kb_confidence(500, None, 1_000, &cfg), 0.0);
    // Both saturated.
    let c = kb_confidence(50, Some(0.0), 20_000, &cfg);
    assert!((c - 1.0).abs() < 1e-9);
    // Half the count maturity, full time maturity: sqrt(0.5).
    let c = kb_confidence(25, Some(0.0), 60_000, &cfg);
    assert!((c - 0.5f64.sqrt()).abs() < 1e-9);
}

// ── Mouse ─────────────────────────────────────────────────────────────────────

fn mv(x: f64, y: f64, t: f64) -> MouseEvent {
    MouseEvent {
        x,
        y,
        kind: MouseEventKind::Move,
        t,
    }
}

fn click(x: f64, y: f64, t: f64) -> MouseEvent {
    MouseEvent {
        x,
        y,
        kind: MouseEventKind::Click,
        t,
    }
}

#[test]
fn click_flushes_a_stroke_with_kinematics() {
    let mut buffer = MouseBuffer::default();
    let mut t = 0.0;
    let mut flushed = None;
    for i in 0..30 {
        // Curved path with human-ish 12-17 ms cadence.
        let x = i as f64 * 10.0;
        let y = (i as f64 * 0.3).sin() * 40.0;
        if let Some(f) = buffer.process_event(&mv(x, y, t)) {
            flushed = Some(f);
        }
        t += 12.0 + (i % 4) as f64 * 1.7;
    }
    if let Some(f) = buffer.process_event(&click(310.0, 10.0, t)) {
        flushed = Some(f);
    }
    let (stroke, _) = flushed.expect("stroke should flush on click");
    assert!(stroke.segment_count >= 25);
    assert!(stroke.path_distance > 200.0);
    assert!(stroke.velocity_max_raw < 9.0, "human stroke stays subsonic");
    assert!(stroke.time_diff_std > 0.0);
}

#[test]
fn pause_flushes_the_stroke_in_flight() {
    let mut buffer = MouseBuffer::default();
    let mut t = 0.0;
    for i in 0..15 {
        buffer.process_event(&mv(i as f64 * 8.0, 5.0 + (i % 3) as f64 * 4.0, t));
        t += 14.0;
    }
    // 800 ms of stillness, then movement resumes: the old stroke flushes.
    let flushed = buffer.process_event(&mv(200.0, 40.0, t + 800.0));
    assert!(flushed.is_some());
}

#[test]
fn teleport_clicks_are_counted_against_total() {
    let mut buffer = MouseBuffer::default();
    // Click with no approach movement: teleport.
    buffer.process_event(&click(500.0, 500.0, 10.0));
    assert_eq!(buffer.teleport_clicks, 1);
    assert_eq!(buffer.total_clicks, 1);

    // Click after a real approach (≥3 moves): not a teleport.
    let mut t = 100.0;
    for i in 0..6 {
        buffer.process_event(&mv(i as f64 * 20.0, 0.0, t));
        t += 15.0;
    }
    buffer.process_event(&click(130.0, 0.0, t));
    assert_eq!(buffer.teleport_clicks, 1);
    assert_eq!(buffer.total_clicks, 2);
    assert!((buffer.teleport_ratio() - 0.5).abs() < 1e-9);
}

#[test]
fn move_counter_resets_on_every_click() {
    let mut buffer = MouseBuffer::default();
    let mut t = 0.0;
    for i in 0..4 {
        buffer.process_event(&mv(i as f64 * 30.0, 0.0, t));
        t += 20.0;
    }
    buffer.process_event(&click(120.0, 0.0, t));
    assert_eq!(buffer.move_count_since_last_click, 0);
    // Only two moves before the next click: teleport.
    buffer.process_event(&mv(140.0, 0.0, t + 20.0));
    buffer.process_event(&mv(160.0, 0.0, t + 40.0));
    buffer.process_event(&click(170.0, 0.0, t + 60.0));
    assert_eq!(buffer.teleport_clicks, 1);
}
