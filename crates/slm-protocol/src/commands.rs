//! The closed command catalog for the device control protocol (§4.4).
//!
//! Every function returns the exact wire text (without CRLF — [`crate::codec::frame_command`]
//! appends that). Keeping these as functions rather than string constants makes
//! the parameterized commands (clock, store name, weighting presets) impossible
//! to typo at the call site.

/// `DOD?` — one immediate snapshot of live measurement values.
pub fn live_sample() -> String {
    "DOD?".to_owned()
}

/// `DLC?` — final calculation results of the last measurement.
pub fn final_calc() -> String {
    "DLC?".to_owned()
}

/// `Measure,Start` / `Measure,Stop`.
pub fn measure(start: bool) -> String {
    format!("Measure,{}", if start { "Start" } else { "Stop" })
}

/// `Measure?` — current measurement state.
pub fn measure_query() -> String {
    "Measure?".to_owned()
}

/// `Pause,On` / `Pause,Off`.
pub fn pause(on: bool) -> String {
    format!("Pause,{}", if on { "On" } else { "Off" })
}

/// `Reset`.
pub fn reset() -> String {
    "Reset".to_owned()
}

/// `Store Mode,Manual`.
pub fn store_mode_manual() -> String {
    "Store Mode,Manual".to_owned()
}

/// `Manual Store,Start`.
pub fn manual_store_start() -> String {
    "Manual Store,Start".to_owned()
}

/// `Battery Level?`.
pub fn battery_level() -> String {
    "Battery Level?".to_owned()
}

/// `Clock?`.
pub fn clock_query() -> String {
    "Clock?".to_owned()
}

/// `Clock,YYYY/MM/DD HH:MM:SS`.
pub fn clock_set(formatted: &str) -> String {
    format!("Clock,{formatted}")
}

/// Main-channel frequency weighting: `A`, `C`, or `Z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyWeighting {
    A,
    C,
    Z,
}

impl FrequencyWeighting {
    fn as_wire(self) -> &'static str {
        match self {
            FrequencyWeighting::A => "A",
            FrequencyWeighting::C => "C",
            FrequencyWeighting::Z => "Z",
        }
    }
}

pub fn frequency_weighting_query() -> String {
    "Frequency Weighting (Main)?".to_owned()
}

pub fn frequency_weighting_set(w: FrequencyWeighting) -> String {
    format!("Frequency Weighting (Main),{}", w.as_wire())
}

/// Main-channel time weighting: `F` (fast), `S` (slow), `I` (impulse).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWeighting {
    Fast,
    Slow,
    Impulse,
}

impl TimeWeighting {
    fn as_wire(self) -> &'static str {
        match self {
            TimeWeighting::Fast => "F",
            TimeWeighting::Slow => "S",
            TimeWeighting::Impulse => "I",
        }
    }
}

pub fn time_weighting_query() -> String {
    "Time Weighting (Main)?".to_owned()
}

pub fn time_weighting_set(w: TimeWeighting) -> String {
    format!("Time Weighting (Main),{}", w.as_wire())
}

pub fn measurement_time_preset_query() -> String {
    "Measurement Time Preset Manual?".to_owned()
}

pub fn measurement_time_preset_set(value: &str) -> String {
    format!("Measurement Time Preset Manual,{value}")
}

pub fn leq_interval_query() -> String {
    "Leq Calculation Interval Preset?".to_owned()
}

pub fn leq_interval_set(value: &str) -> String {
    format!("Leq Calculation Interval Preset,{value}")
}

pub fn lp_interval_query() -> String {
    "Lp Store Interval?".to_owned()
}

pub fn lp_interval_set(value: &str) -> String {
    format!("Lp Store Interval,{value}")
}

/// `Store Name?` — current four-digit storage slot index.
pub fn store_name_query() -> String {
    "Store Name?".to_owned()
}

/// `Store Name,NNNN`. `index` is taken modulo 10000 and zero-padded.
pub fn store_name_set(index: u32) -> String {
    format!("Store Name,{:04}", index % 10_000)
}

/// `Overwrite?` — whether the currently-selected slot already has data.
pub fn overwrite_query() -> String {
    "Overwrite?".to_owned()
}

pub fn sleep_mode_query() -> String {
    "Sleep Mode?".to_owned()
}

pub fn sleep_mode_set(on: bool) -> String {
    format!("Sleep Mode,{}", if on { "On" } else { "Off" })
}

/// `FTP?` / `FTP,On` / `FTP,Off`.
pub fn ftp_query() -> String {
    "FTP?".to_owned()
}

pub fn ftp_set(on: bool) -> String {
    format!("FTP,{}", if on { "On" } else { "Off" })
}

/// `DRD?` — opens a continuous stream, terminated with [`crate::codec::STREAM_TERMINATOR`].
pub fn drd_stream_open() -> String {
    "DRD?".to_owned()
}
