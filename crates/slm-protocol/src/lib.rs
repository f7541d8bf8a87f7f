//! Wire-level protocol types for the sound-level-meter control channel:
//! command framing, result-code parsing, the measurement payload parser,
//! the closed error taxonomy, and FTP listing timestamp parsing.
//!
//! This crate has no I/O of its own — `slm-device` owns the sockets and
//! calls into this crate to frame requests and interpret responses.

pub mod codec;
pub mod commands;
pub mod error;
pub mod ftp_time;
pub mod snapshot;

pub use error::{DeviceError, FtpPhase};
pub use snapshot::{parse_payload, serialize_first_six, MeasurementState, Snapshot, FIELD_ORDER};
