//! Freshness oracle: maps confidence, domain and quality to retention.
//!
//! Every function here is pure. Higher confidence or quality never yields a
//! shorter time-to-live.

use chrono::{DateTime, Duration, Utc};

use crate::claim::Confidence;

pub const HOUR_SECS: i64 = 3_600;
pub const DAY_SECS: i64 = 24 * HOUR_SECS;

/// Suggested TTL for a claim of the given confidence.
pub fn suggest_ttl_seconds(confidence: Confidence) -> i64 {
    match confidence {
        Confidence::Low => DAY_SECS,
        Confidence::Medium => 3 * DAY_SECS,
        Confidence::High => 7 * DAY_SECS,
        Confidence::Verified => 30 * DAY_SECS,
    }
}

/// `last_verified + ttl_seconds`, saturating at the representable range.
pub fn expiry_timestamp(last_verified: DateTime<Utc>, ttl_seconds: i64) -> DateTime<Utc> {
    Duration::try_seconds(ttl_seconds)
        .and_then(|ttl| last_verified.checked_add_signed(ttl))
        .unwrap_or(if ttl_seconds < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
}

/// Domain-specific TTL that overrides the confidence default.
///
/// Prices go stale within a day; regulations barely move.
pub fn domain_ttl_override(domain: Option<&str>) -> Option<i64> {
    match domain? {
        "pricing" | "commerce" => Some(DAY_SECS),
        "research" => Some(3 * DAY_SECS),
        "spec" => Some(60 * DAY_SECS),
        "law" => Some(120 * DAY_SECS),
        _ => None,
    }
}

/// Resolve the TTL for a candidate: domain override, else confidence default.
pub fn resolve_ttl_seconds(domain: Option<&str>, confidence: Confidence) -> i64 {
    domain_ttl_override(domain).unwrap_or_else(|| suggest_ttl_seconds(confidence))
}

/// Retention in hours for a 0..=1 quality score.
pub fn quality_ttl_hours(quality: f64) -> i64 {
    let q = if quality.is_nan() { 0.0 } else { quality.clamp(0.0, 1.0) };
    if q >= 0.8 {
        168
    } else if q >= 0.6 {
        72
    } else if q >= 0.4 {
        24
    } else {
        6
    }
}
