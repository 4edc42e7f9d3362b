//! Shared types for the tag tracker

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway id recorded when a batch arrives without one
pub const UNKNOWN_GATEWAY: &str = "unknown";

/// Normalized (lowercase) tag MAC address
///
/// Construction goes through [`TagMac::parse`], so a `TagMac` is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagMac(String);

impl TagMac {
    /// Lowercase `raw`; returns None for an empty identifier
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        Some(Self(raw.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TagMac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a gateway MAC: lowercase, alphanumerics only
///
/// `"AA:BB-CC"` and `"aabbcc"` identify the same gateway.
pub fn normalize_gateway_mac(raw: &str) -> String {
    raw.to_lowercase().chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Coerce a loosely-typed JSON value to an integer
///
/// Accepts integer numbers, finite floats (truncated toward zero) and strings
/// holding an integer. Everything else yields None.
pub fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(i);
            }
            if let Some(u) = n.as_u64() {
                return i64::try_from(u).ok();
            }
            let f = n.as_f64()?;
            let truncated = f.trunc();
            if truncated.is_finite() && truncated >= i64::MIN as f64 && truncated < i64::MAX as f64 {
                Some(truncated as i64)
            } else {
                None
            }
        }
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// One durable sighting of a tag by a gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SightingEvent {
    pub mac: TagMac,
    pub rssi: i64,
    pub battery_level: Option<i64>,
    /// Reporting gateway; None only for rows whose gateway reference was cleared
    pub gateway_id: Option<String>,
    /// Epoch seconds
    pub timestamp: i64,
}

impl SightingEvent {
    pub fn gateway_or_unknown(&self) -> &str {
        self.gateway_id.as_deref().unwrap_or(UNKNOWN_GATEWAY)
    }
}

/// Raw advertisement as reported by a gateway
///
/// Every field is optional and untyped; [`RawAdvertisement::validate`] decides
/// whether the record becomes a [`SightingEvent`] or is dropped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAdvertisement {
    #[serde(default)]
    pub mac: Option<Value>,
    #[serde(default)]
    pub rssi: Option<Value>,
    #[serde(default)]
    pub battery: Option<Value>,
    #[serde(default)]
    pub tm: Option<Value>,
}

/// Why a raw advertisement was dropped during ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingMac,
    MissingRssi,
    InvalidRssi,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingMac => "missing_mac",
            SkipReason::MissingRssi => "missing_rssi",
            SkipReason::InvalidRssi => "invalid_rssi",
        }
    }
}

impl RawAdvertisement {
    /// Lenient conversion from an arbitrary JSON value
    ///
    /// Non-object values become an empty record, which validation then drops.
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    /// Validate and normalize into a sighting event
    ///
    /// `now` (epoch seconds) stands in for a missing or non-integer `tm`.
    pub fn validate(&self, gateway_id: &str, now: i64) -> Result<SightingEvent, SkipReason> {
        let mac = match &self.mac {
            Some(Value::String(s)) => TagMac::parse(s).ok_or(SkipReason::MissingMac)?,
            _ => return Err(SkipReason::MissingMac),
        };
        let rssi = self.rssi.as_ref().ok_or(SkipReason::MissingRssi)?;
        let rssi = coerce_integer(rssi).ok_or(SkipReason::InvalidRssi)?;
        let timestamp = self.tm.as_ref().and_then(coerce_integer).unwrap_or(now);
        let battery_level = self.battery.as_ref().and_then(coerce_integer);

        Ok(SightingEvent {
            mac,
            rssi,
            battery_level,
            gateway_id: Some(gateway_id.to_string()),
            timestamp,
        })
    }
}

/// Gateway latitude/longitude in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geolocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl Geolocation {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Registered gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gateway {
    pub mac: String,
    pub name: String,
    #[serde(default)]
    pub geolocation: Option<Geolocation>,
}

/// Partial gateway update; None leaves the field unchanged
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GatewayUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub geolocation: Option<Geolocation>,
}

/// Presence classification of a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Present,
    Absent,
}

impl Presence {
    /// Present when the sighting falls inside `[now - window_secs, ..]`
    pub fn classify(timestamp: i64, now: i64, window_secs: i64) -> Self {
        if timestamp >= now - window_secs {
            Presence::Present
        } else {
            Presence::Absent
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Presence::Present => "present",
            Presence::Absent => "absent",
        }
    }
}

/// Current state of a tag, derived from its latest sighting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedTagState {
    pub mac: TagMac,
    pub last_rssi: i64,
    #[serde(rename = "gateway")]
    pub gateway_id: String,
    pub last_seen: i64,
    pub last_seen_humanized: String,
    pub presence: Presence,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Store-level history query; `limit` is already clamped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub mac: TagMac,
    /// Inclusive lower bound, epoch seconds
    pub start_time: Option<i64>,
    /// Inclusive upper bound, epoch seconds
    pub end_time: Option<i64>,
    pub limit: usize,
}

impl HistoryQuery {
    pub fn matches(&self, event: &SightingEvent) -> bool {
        event.mac == self.mac
            && self.start_time.map_or(true, |start| event.timestamp >= start)
            && self.end_time.map_or(true, |end| event.timestamp <= end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub timestamp: i64,
    pub rssi: i64,
    pub gateway: String,
}

impl From<&SightingEvent> for HistoryEntry {
    fn from(event: &SightingEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            rssi: event.rssi,
            gateway: event.gateway_or_unknown().to_string(),
        }
    }
}

/// A page of tag history; `total` is the page size
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagHistory {
    pub mac: TagMac,
    pub entries: Vec<HistoryEntry>,
    pub total: usize,
}
