// sentinel/src/workers/teleport.rs
//
// Teleportation worker — click-path plausibility.
//
// A real pointer travels to its target: a click preceded by fewer than 3
// MOVE events means the cursor materialized there. Scripted clicks via
// element coordinates do exactly this. The signal is the ratio of such
// clicks to all clicks in the session, so one misread is forgiven while a
// clicking bot converges to 1.0.

use crate::extractors::mouse::MouseBuffer;

#[derive(Debug, Clone, Default)]
pub struct TeleportSignal {
    pub ratio: f64,
    pub evidence: Vec<String>,
}

pub fn analyze(buffer: &MouseBuffer) -> TeleportSignal {
    let ratio = buffer.teleport_ratio();
    let evidence = if buffer.teleport_clicks > 0 {
        vec![format!(
            "teleport_clicks:{}/{}",
            buffer.teleport_clicks,
            buffer.total_clicks.max(1)
        )]
    } else {
        Vec::new()
    };
    TeleportSignal { ratio, evidence }
}

/// Effective mouse risk fed to fusion: physics and teleportation are
/// independent detectors of the same actuator, so the stronger one speaks.
pub fn effective_mouse_risk(physics_score: f64, teleport_ratio: f64) -> f64 {
    physics_score.max(teleport_ratio)
}
