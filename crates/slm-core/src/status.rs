//! `DeviceStatus` — the durable last-known snapshot per device, plus
//! reachability/timing metadata (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observed measurement state, as stored (distinct from
/// [`slm_protocol::MeasurementState`], which is the wire-level parse of a
/// single observation; this is the persisted field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredMeasurementState {
    Start,
    Stop,
    Unknown,
}

impl StoredMeasurementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoredMeasurementState::Start => "Start",
            StoredMeasurementState::Stop => "Stop",
            StoredMeasurementState::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "Start" => StoredMeasurementState::Start,
            "Stop" => StoredMeasurementState::Stop,
            _ => StoredMeasurementState::Unknown,
        }
    }
}

/// At most one row per device. Lazily created when the first snapshot
/// arrives; updated by the Snapshot Merger and Background Poller; never
/// deleted except cascading with its [`crate::config::DeviceConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub unit_id: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub measurement_state: StoredMeasurementState,
    pub measurement_start_time: Option<DateTime<Utc>>,
    pub counter: Option<String>,
    pub lp: Option<String>,
    pub leq: Option<String>,
    pub lmax: Option<String>,
    pub lmin: Option<String>,
    pub lpeak: Option<String>,
    pub battery_level: Option<String>,
    pub power_source: Option<String>,
    pub sd_remaining_mb: Option<String>,
    pub sd_free_ratio: Option<String>,
    pub raw_payload: Option<String>,
    pub is_reachable: bool,
    pub consecutive_failures: u32,
    pub last_poll_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub start_time_sync_attempted: bool,
}

/// The hard cap on `last_error` length (bytes), per §3.
pub const LAST_ERROR_MAX_BYTES: usize = 500;

/// Truncate `message` to at most [`LAST_ERROR_MAX_BYTES`] bytes, respecting
/// UTF-8 character boundaries.
pub fn truncate_error(message: &str) -> String {
    if message.len() <= LAST_ERROR_MAX_BYTES {
        return message.to_owned();
    }
    let mut end = LAST_ERROR_MAX_BYTES;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_owned()
}

impl DeviceStatus {
    /// A freshly-created row for a device that has never reported in.
    pub fn new(unit_id: impl Into<String>) -> Self {
        DeviceStatus {
            unit_id: unit_id.into(),
            last_seen: None,
            measurement_state: StoredMeasurementState::Unknown,
            measurement_start_time: None,
            counter: None,
            lp: None,
            leq: None,
            lmax: None,
            lmin: None,
            lpeak: None,
            battery_level: None,
            power_source: None,
            sd_remaining_mb: None,
            sd_free_ratio: None,
            raw_payload: None,
            is_reachable: false,
            consecutive_failures: 0,
            last_poll_attempt: None,
            last_success: None,
            last_error: None,
            start_time_sync_attempted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_error_leaves_short_messages_untouched() {
        assert_eq!(truncate_error("boom"), "boom");
    }

    #[test]
    fn truncate_error_caps_at_max_bytes() {
        let long = "x".repeat(600);
        let truncated = truncate_error(&long);
        assert_eq!(truncated.len(), LAST_ERROR_MAX_BYTES);
    }

    #[test]
    fn truncate_error_respects_utf8_boundaries() {
        // 500 bytes lands mid-character for this input; the truncation must
        // back off to the nearest boundary rather than panic.
        let long = "é".repeat(400); // 800 bytes, 2 bytes/char
        let truncated = truncate_error(&long);
        assert!(truncated.len() <= LAST_ERROR_MAX_BYTES);
        assert!(truncated.is_char_boundary(truncated.len()));
    }
}
