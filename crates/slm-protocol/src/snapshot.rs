//! Parsing of DOD/DRD measurement payloads into [`Snapshot`].
//!
//! # Field order
//!
//! Source variants of this device family disagree on whether index 0 is the
//! interval counter or `lp`. This implementation fixes counter-first, per
//! the most recent device variant and its DRD documentation. The mapping is
//! the single [`FIELD_ORDER`] constant below; an integrator bringing up a
//! new firmware revision should validate it against a known-good capture
//! before trusting merged data.

use super::error::DeviceError;

/// Positional field map for a DOD/DRD payload. Index into this array with
/// the same index used to split the payload on commas.
pub const FIELD_ORDER: [&str; 6] = ["counter", "lp", "leq", "lmax", "lmin", "lpeak"];

/// The measurement state as observed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementState {
    Start,
    Stop,
    Unknown,
}

impl MeasurementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementState::Start => "Start",
            MeasurementState::Stop => "Stop",
            MeasurementState::Unknown => "unknown",
        }
    }
}

impl From<&str> for MeasurementState {
    fn from(s: &str) -> Self {
        match s.trim() {
            "Start" => MeasurementState::Start,
            "Stop" => MeasurementState::Stop,
            _ => MeasurementState::Unknown,
        }
    }
}

/// An ephemeral parsed measurement sample.
///
/// Owned by the caller; [`crate::snapshot::Snapshot`] carries no
/// `measurement_state` of its own for the DOD/DRD decimal line (the state is
/// observed separately via `Measure?` and stamped in by the caller) except
/// where noted — callers merging a snapshot must supply the state they
/// observed alongside it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub counter: Option<String>,
    pub lp: Option<String>,
    pub leq: Option<String>,
    pub lmax: Option<String>,
    pub lmin: Option<String>,
    pub lpeak: Option<String>,
    pub raw_payload: String,
}

/// Parse a single DOD/DRD data line into a [`Snapshot`].
///
/// Fewer than six comma-separated fields is tolerated (trailing scalars are
/// left absent). Zero or one field is a [`DeviceError::Parse`].
pub fn parse_payload(line: &str) -> Result<Snapshot, DeviceError> {
    let trimmed = line.trim();
    let fields: Vec<&str> = trimmed.split(',').collect();
    if fields.len() < 2 {
        return Err(DeviceError::Parse(format!(
            "expected at least 2 comma-separated fields, got {} in '{}'",
            fields.len(),
            trimmed
        )));
    }

    let get = |idx: usize| -> Option<String> {
        fields.get(idx).map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
    };

    Ok(Snapshot {
        counter: get(0),
        lp: get(1),
        leq: get(2),
        lmax: get(3),
        lmin: get(4),
        lpeak: get(5),
        raw_payload: trimmed.to_owned(),
    })
}

/// Re-serialize the first six fields of a snapshot in wire order.
///
/// Used by property test P6 (round-trip of a DOD payload with >= 6 fields).
pub fn serialize_first_six(snapshot: &Snapshot) -> String {
    [
        snapshot.counter.as_deref().unwrap_or(""),
        snapshot.lp.as_deref().unwrap_or(""),
        snapshot.leq.as_deref().unwrap_or(""),
        snapshot.lmax.as_deref().unwrap_or(""),
        snapshot.lmin.as_deref().unwrap_or(""),
        snapshot.lpeak.as_deref().unwrap_or(""),
    ]
    .join(",")
}
