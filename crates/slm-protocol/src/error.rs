//! Closed error taxonomy for device wire interactions.
//!
//! Every variant here corresponds 1:1 to a failure mode a caller must be
//! able to distinguish: result-code mapping, timeouts, parse failures, and
//! FTP sub-phases. Propagation is the caller's job — this crate never logs
//! or swallows an error, it only classifies one.

use std::fmt;

/// A single FTP sub-phase, used to qualify [`DeviceError::Ftp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpPhase {
    Connect,
    Auth,
    Listing,
    Data,
}

impl fmt::Display for FtpPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FtpPhase::Connect => "connect",
            FtpPhase::Auth => "auth",
            FtpPhase::Listing => "listing",
            FtpPhase::Data => "data",
        };
        write!(f, "{s}")
    }
}

/// The closed set of errors a device interaction can raise.
///
/// Variants map directly to §7 of the specification. The Background Poller
/// converts any of these into a failure-counter increment and never
/// re-raises; the Cycle Orchestrator surfaces them in a structured report
/// and only propagates [`DeviceError::StorageFull`].
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("connect to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("device rejected command '{command}': unrecognized (R+0001)")]
    Command { command: String },

    #[error("device rejected command '{command}': bad parameter (R+0002)")]
    Parameter { command: String },

    #[error("device rejected command '{command}': unsupported by this model (R+0003)")]
    Spec { command: String },

    #[error("device rejected command '{command}': wrong state (R+0004)")]
    State { command: String },

    #[error("protocol violation on '{command}': unexpected result code '{code}'")]
    Protocol { command: String, code: String },

    #[error("could not parse payload: {0}")]
    Parse(String),

    #[error("DRD stream quiet period exceeded ({0:?} without a line)")]
    StreamTimeout(std::time::Duration),

    #[error("device storage is full: no free index found in {attempts} attempts")]
    StorageFull { attempts: u32 },

    #[error("FTP {phase} failed: {detail}")]
    Ftp { phase: FtpPhase, detail: String },
}

impl DeviceError {
    /// Map a non-success result code to its error kind, per §4.3's closed table.
    pub fn from_result_code(command: &str, code: &str) -> Option<DeviceError> {
        match code {
            "R+0000" => None,
            "R+0001" => Some(DeviceError::Command {
                command: command.to_owned(),
            }),
            "R+0002" => Some(DeviceError::Parameter {
                command: command.to_owned(),
            }),
            "R+0003" => Some(DeviceError::Spec {
                command: command.to_owned(),
            }),
            "R+0004" => Some(DeviceError::State {
                command: command.to_owned(),
            }),
            other => Some(DeviceError::Protocol {
                command: command.to_owned(),
                code: other.to_owned(),
            }),
        }
    }
}
