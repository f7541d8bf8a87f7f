//! `DeviceConfig` — the durable connection parameters and polling policy
//! for one device (§3).

use serde::{Deserialize, Serialize};

/// Connection parameters and polling policy for a single device, keyed by
/// `unit_id`. Created by an external request (the registry API); mutated
/// only through [`crate::store::GatewayStore`]'s registry methods; deletion
/// cascades to the device's [`crate::status::DeviceStatus`] row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub unit_id: String,
    pub host: String,
    pub tcp_port: u16,
    pub ftp_port: u16,
    pub tcp_enabled: bool,
    pub ftp_enabled: bool,
    pub ftp_username: String,
    pub ftp_password: String,
    pub poll_interval_seconds: u32,
    pub poll_enabled: bool,
}

/// Validation failure for a [`DeviceConfig`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeviceConfigError {
    #[error("unit_id must not be empty")]
    EmptyUnitId,
    #[error("tcp_port must be in 1..=65535, got {0}")]
    InvalidTcpPort(u32),
    #[error("ftp_port must be in 1..=65535, got {0}")]
    InvalidFtpPort(u32),
    #[error("poll_interval_seconds must be in 10..=3600, got {0}")]
    InvalidPollInterval(u32),
}

impl DeviceConfig {
    /// Build a config with the documented defaults, validating bounds.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        unit_id: impl Into<String>,
        host: impl Into<String>,
        tcp_port: u16,
        ftp_port: Option<u16>,
        tcp_enabled: bool,
        ftp_enabled: bool,
        ftp_username: Option<String>,
        ftp_password: Option<String>,
        poll_interval_seconds: Option<u32>,
        poll_enabled: bool,
    ) -> Result<Self, DeviceConfigError> {
        let unit_id = unit_id.into();
        if unit_id.trim().is_empty() {
            return Err(DeviceConfigError::EmptyUnitId);
        }
        let poll_interval_seconds = poll_interval_seconds.unwrap_or(60);
        if !(10..=3600).contains(&poll_interval_seconds) {
            return Err(DeviceConfigError::InvalidPollInterval(poll_interval_seconds));
        }
        Ok(DeviceConfig {
            unit_id,
            host: host.into(),
            tcp_port,
            ftp_port: ftp_port.unwrap_or(21),
            tcp_enabled,
            ftp_enabled,
            ftp_username: ftp_username.unwrap_or_else(|| "USER".to_owned()),
            ftp_password: ftp_password.unwrap_or_else(|| "0000".to_owned()),
            poll_interval_seconds,
            poll_enabled,
        })
    }
}
