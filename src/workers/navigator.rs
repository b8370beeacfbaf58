// sentinel/src/workers/navigator.rs
//
// Navigator worker — stateless policy rules over the request context.
//
// Signals:
//   unknown_user_agent  — UA outside the known-good browser classes  +0.4
//   tofu_*_deviation    — pinned first-use context fields drifting   +0.3 each
//   impossible_travel   — mid-session geo velocity above 500 mph     → BLOCK
//
// TOFU (trust on first use): the first evaluate of a session pins
// (ua_class, device_id, geo_country); the pin itself never scores.

use serde::{Deserialize, Serialize};

use crate::events::{GeoPoint, NavDecision, RequestContext};
use crate::util::clamp01;

/// Fastest plausible mid-session relocation, mph. Commercial aviation
/// plus slack; anything above is two actors or a proxy hop.
const MAX_TRAVEL_MPH: f64 = 500.0;

const UNKNOWN_UA_WEIGHT: f64 = 0.4;
const TOFU_DEVIATION_WEIGHT: f64 = 0.3;

/// Browser families accepted without comment. Everything else (curl,
/// python-requests, headless shells, empty strings) scores.
const KNOWN_UA_CLASSES: &[&str] = &["chrome", "firefox", "safari", "edge"];

#[derive(Debug, Clone)]
pub struct NavSignal {
    pub score: f64,
    pub decision: NavDecision,
    pub evidence: Vec<String>,
}

impl Default for NavSignal {
    fn default() -> Self {
        Self {
            score: 0.0,
            decision: NavDecision::Ok,
            evidence: Vec::new(),
        }
    }
}

/// Context pinned on the session's first evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TofuContext {
    pub ua_class: String,
    pub device_id: String,
    pub geo_country: String,
}

impl TofuContext {
    pub fn pin(ctx: &RequestContext) -> Self {
        Self {
            ua_class: ua_class(&ctx.user_agent).to_string(),
            device_id: ctx.device_id.clone(),
            geo_country: ctx
                .geo
                .as_ref()
                .map(|g| g.country.clone())
                .unwrap_or_default(),
        }
    }
}

/// Coarse UA classification. Order matters: Chrome ships "Safari/" in its
/// UA string, Edge ships both.
pub fn ua_class(ua: &str) -> &'static str {
    if ua.contains("Edg/") || ua.contains("Edge/") {
        "edge"
    } else if ua.contains("Chrome/") {
        "chrome"
    } else if ua.contains("Firefox/") {
        "firefox"
    } else if ua.contains("Safari/") {
        "safari"
    } else {
        "unknown"
    }
}

pub fn analyze(
    ctx: &RequestContext,
    tofu: Option<&TofuContext>,
    last_geo: Option<(&GeoPoint, u64)>,
    now_ms: u64,
) -> NavSignal {
    let mut score = 0.0f64;
    let mut evidence = Vec::new();

    // Impossible travel first: it is a hard verdict, not a score.
    if let (Some(current), Some((previous, seen_ms))) = (ctx.geo.as_ref(), last_geo) {
        let miles = haversine_miles(previous.lat, previous.lon, current.lat, current.lon);
        let hours = ((now_ms.saturating_sub(seen_ms)) as f64 / 3_600_000.0).max(1.0 / 3600.0);
        let mph = miles / hours;
        if mph > MAX_TRAVEL_MPH {
            return NavSignal {
                score: 1.0,
                decision: NavDecision::Block,
                evidence: vec![format!("impossible_travel:{:.0}mph", mph)],
            };
        }
    }

    let class = ua_class(&ctx.user_agent);
    if !KNOWN_UA_CLASSES.contains(&class) {
        score += UNKNOWN_UA_WEIGHT;
        evidence.push(format!("unknown_user_agent:{}", truncate(&ctx.user_agent, 40)));
    }

    if let Some(pin) = tofu {
        if pin.ua_class != class {
            score += TOFU_DEVIATION_WEIGHT;
            evidence.push(format!("tofu_ua_deviation:{}→{}", pin.ua_class, class));
        }
        if pin.device_id != ctx.device_id {
            score += TOFU_DEVIATION_WEIGHT;
            evidence.push("tofu_device_deviation".to_string());
        }
        let country = ctx
            .geo
            .as_ref()
            .map(|g| g.country.as_str())
            .unwrap_or_default();
        if !pin.geo_country.is_empty() && pin.geo_country != country {
            score += TOFU_DEVIATION_WEIGHT;
            evidence.push(format!(
                "tofu_geo_deviation:{}→{}",
                pin.geo_country,
                if country.is_empty() { "?" } else { country }
            ));
        }
    }

    NavSignal {
        score: clamp01(score),
        decision: NavDecision::Ok,
        evidence,
    }
}

fn truncate(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Great-circle distance in statute miles.
fn haversine_miles(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_MI: f64 = 3958.8;
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_MI * a.sqrt().atan2((1.0 - a).sqrt())
}
