//! Location validation — WiFi and GPS signal fusion.
//!
//! Scores whether a requester is physically present at a session's
//! required location. Each signal is evaluated independently; the
//! combined decision is valid if either signal validates, and the
//! reported confidence is the stronger of the two.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres, for great-circle distance.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A latitude/longitude point in degrees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// A circular geofence around a point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoFence {
    pub center: GeoPoint,
    pub radius_m: f64,
}

/// A visible wireless network, as reported by a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WifiNetwork {
    pub ssid: String,
    /// Received signal strength in dBm (diagnostic only — match is by SSID).
    pub signal_strength_dbm: i32,
}

/// A GPS position fix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Reported fix accuracy in metres.
    pub accuracy_m: f64,
}

/// Location requirements attached to a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionLocation {
    /// SSIDs that identify the venue. Matching any subset counts.
    pub wifi_ssids: Vec<String>,
    pub geofence: Option<GeoFence>,
}

/// Outcome of a single signal check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalCheck {
    pub valid: bool,
    pub confidence: f64,
}

impl SignalCheck {
    /// The signal was unavailable or not required — invalid with zero
    /// confidence, but never an error.
    pub const ABSENT: SignalCheck = SignalCheck {
        valid: false,
        confidence: 0.0,
    };
}

/// Fused outcome across both signals.
#[derive(Debug, Clone, Copy)]
pub struct LocationCheck {
    pub valid: bool,
    pub confidence: f64,
    pub wifi: SignalCheck,
    pub gps: SignalCheck,
}

/// Outcome of evaluating several candidate locations.
#[derive(Debug, Clone)]
pub struct MultiLocationCheck {
    /// Indices of all candidates that validated, in evaluation order.
    pub valid_indices: Vec<usize>,
    /// Highest-confidence valid candidate; ties resolve to the first
    /// evaluated.
    pub best: Option<(usize, LocationCheck)>,
}

/// Great-circle distance between two points via the Haversine formula.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Check visible networks against the required SSID set.
///
/// Confidence is the fraction of required SSIDs observed, matched
/// case-insensitively. Valid whenever at least one required SSID is
/// visible. An empty requirement never validates.
pub fn check_wifi(required_ssids: &[String], visible: &[WifiNetwork]) -> SignalCheck {
    if required_ssids.is_empty() {
        return SignalCheck::ABSENT;
    }

    let seen = required_ssids
        .iter()
        .filter(|req| {
            visible
                .iter()
                .any(|net| net.ssid.eq_ignore_ascii_case(req))
        })
        .count();

    let confidence = seen as f64 / required_ssids.len() as f64;
    SignalCheck {
        valid: confidence > 0.0,
        confidence,
    }
}

/// Check a GPS fix against a geofence.
///
/// Valid iff the fix lies within the radius (the boundary itself is
/// inside). Confidence decays linearly from 1 at the center to 0 at
/// the radius.
pub fn check_gps(fence: &GeoFence, fix: &GpsFix) -> SignalCheck {
    let here = GeoPoint {
        latitude: fix.latitude,
        longitude: fix.longitude,
    };
    let distance = haversine_m(fence.center, here);
    if distance <= fence.radius_m {
        SignalCheck {
            valid: true,
            confidence: (1.0 - distance / fence.radius_m).max(0.0),
        }
    } else {
        SignalCheck::ABSENT
    }
}

/// Evaluate both signals against a required location.
///
/// A missing signal (scan timed out, no fix) degrades to invalid with
/// zero confidence; the other signal can still carry the decision.
pub fn check(
    required: &SessionLocation,
    visible_wifi: Option<&[WifiNetwork]>,
    gps_fix: Option<&GpsFix>,
) -> LocationCheck {
    let wifi = match visible_wifi {
        Some(networks) => check_wifi(&required.wifi_ssids, networks),
        None => SignalCheck::ABSENT,
    };

    let gps = match (&required.geofence, gps_fix) {
        (Some(fence), Some(fix)) => check_gps(fence, fix),
        _ => SignalCheck::ABSENT,
    };

    LocationCheck {
        valid: wifi.valid || gps.valid,
        confidence: wifi.confidence.max(gps.confidence),
        wifi,
        gps,
    }
}

/// Evaluate several candidate locations independently.
pub fn best_location(
    candidates: &[SessionLocation],
    visible_wifi: Option<&[WifiNetwork]>,
    gps_fix: Option<&GpsFix>,
) -> MultiLocationCheck {
    let mut valid_indices = Vec::new();
    let mut best: Option<(usize, LocationCheck)> = None;

    for (i, candidate) in candidates.iter().enumerate() {
        let result = check(candidate, visible_wifi, gps_fix);
        if !result.valid {
            continue;
        }
        valid_indices.push(i);
        // Strict > keeps the earliest candidate on ties.
        let better = match &best {
            None => true,
            Some((_, prev)) => result.confidence > prev.confidence,
        };
        if better {
            best = Some((i, result));
        }
    }

    MultiLocationCheck {
        valid_indices,
        best,
    }
}
