//! Navigator Policy Engine Tests
//!
//! - UA classification and the unknown-UA increment
//! - TOFU pinning and per-field deviation scoring
//! - impossible travel returning a hard BLOCK

use sentinel::events::{GeoPoint, NavDecision, RequestContext};
use sentinel::workers::navigator::{analyze, ua_class, TofuContext};

const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

fn ctx(ua: &str, device: &str, country: &str) -> RequestContext {
    RequestContext {
        ip_address: "198.51.100.7".to_string(),
        user_agent: ua.to_string(),
        endpoint: "/api/transfer".to_string(),
        method: "POST".to_string(),
        device_id: device.to_string(),
        geo: Some(GeoPoint {
            country: country.to_string(),
            lat: 40.71,
            lon: -74.0,
        }),
    }
}

#[test]
fn ua_classification_handles_vendor_overlap() {
    assert_eq!(ua_class(CHROME_UA), "chrome");
    assert_eq!(
        ua_class("Mozilla/5.0 (X11; Linux x86_64; rv:127.0) Gecko/20100101 Firefox/127.0"),
        "firefox"
    );
    // Edge carries Chrome/ and Safari/ tokens too.
    assert_eq!(
        ua_class("Mozilla/5.0 AppleWebKit/537.36 Chrome/126.0.0.0 Safari/537.36 Edg/126.0"),
        "edge"
    );
    assert_eq!(ua_class("curl/8.5.0"), "unknown");
    assert_eq!(ua_class("python-requests/2.32"), "unknown");
}

#[test]
fn known_browser_with_matching_pin_scores_zero() {
    let context = ctx(CHROME_UA, "dev-1", "US");
    let pin = TofuContext::pin(&context);
    let signal = analyze(&context, Some(&pin), None, 1_000);
    assert_eq!(signal.score, 0.0);
    assert_eq!(signal.decision, NavDecision::Ok);
    assert!(signal.evidence.is_empty());
}

#[test]
fn unknown_user_agent_contributes_point_four() {
    let context = ctx("curl/8.5.0", "dev-1", "US");
    let signal = analyze(&context, None, None, 1_000);
    assert!((signal.score - 0.4).abs() < 1e-9);
    assert!(signal.evidence[0].starts_with("unknown_user_agent"));
}

#[test]
fn each_deviating_pinned_field_adds_point_three() {
    let pinned = TofuContext::pin(&ctx(CHROME_UA, "dev-1", "US"));

    // Device swap only.
    let signal = analyze(&ctx(CHROME_UA, "dev-2", "US"), Some(&pinned), None, 1_000);
    assert!((signal.score - 0.3).abs() < 1e-9);

    // Device + country swap.
    let signal = analyze(&ctx(CHROME_UA, "dev-2", "DE"), Some(&pinned), None, 1_000);
    assert!((signal.score - 0.6).abs() < 1e-9);

    // UA class + device + country: 0.4 (unknown) + 3 × 0.3, clamped.
    let signal = analyze(&ctx("curl/8.5.0", "dev-2", "DE"), Some(&pinned), None, 1_000);
    assert_eq!(signal.score, 1.0);
}

#[test]
fn impossible_travel_is_a_hard_block() {
    // Pinned in New York, reappears in London 60 s later: ~3460 mph.
    let previous = GeoPoint {
        country: "US".to_string(),
        lat: 40.71,
        lon: -74.0,
    };
    let mut context = ctx(CHROME_UA, "dev-1", "GB");
    context.geo = Some(GeoPoint {
        country: "GB".to_string(),
        lat: 51.5,
        lon: -0.12,
    });
    let pin = TofuContext::pin(&ctx(CHROME_UA, "dev-1", "US"));
    let signal = analyze(&context, Some(&pin), Some((&previous, 0)), 60_000);
    assert_eq!(signal.decision, NavDecision::Block);
    assert_eq!(signal.score, 1.0);
    assert!(signal.evidence[0].starts_with("impossible_travel"));
}

#[test]
fn plausible_relocation_does_not_block() {
    // Same hop but 8 hours later: ~430 mph, an ordinary flight.
    let previous = GeoPoint {
        country: "US".to_string(),
        lat: 40.71,
        lon: -74.0,
    };
    let mut context = ctx(CHROME_UA, "dev-1", "GB");
    context.geo = Some(GeoPoint {
        country: "GB".to_string(),
        lat: 51.5,
        lon: -0.12,
    });
    let signal = analyze(&context, None, Some((&previous, 0)), 8 * 3_600_000);
    assert_eq!(signal.decision, NavDecision::Ok);
}
