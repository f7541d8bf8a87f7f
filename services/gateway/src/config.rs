//! Gateway configuration loading (C11).
//!
//! TOML is the sole config source, loaded from a path resolved in order:
//! `--config` CLI flag, else `/etc/slm-gateway/gateway.toml`. Three values
//! may be overridden by environment variables read once at startup:
//! `TIMEZONE_OFFSET`, `TIMEZONE_NAME`, `LOG_RETENTION_DAYS`.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub sqlite_path: String,
    pub ops_http_bind: String,
    pub timezone_offset_hours: f64,
    pub timezone_name: String,
    pub log_retention_days: i64,
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Clone)]
pub struct DeviceEntry {
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

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file '{path}': {source}")]
    Io { path: String, source: std::io::Error },
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid value for {field}: {detail}")]
    InvalidValue { field: String, detail: String },
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    sqlite_path: Option<String>,
    ops_http_bind: Option<String>,
    timezone_offset_hours: Option<f64>,
    timezone_name: Option<String>,
    log_retention_days: Option<i64>,
    devices: Option<Vec<RawDeviceEntry>>,
}

#[derive(Debug, Deserialize)]
struct RawDeviceEntry {
    unit_id: Option<String>,
    host: Option<String>,
    tcp_port: Option<u16>,
    ftp_port: Option<u16>,
    tcp_enabled: Option<bool>,
    ftp_enabled: Option<bool>,
    ftp_username: Option<String>,
    ftp_password: Option<String>,
    poll_interval_seconds: Option<u32>,
    poll_enabled: Option<bool>,
}

pub const DEFAULT_CONFIG_PATH: &str = "/etc/slm-gateway/gateway.toml";

pub fn load_config_from_path(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    load_config_from_str(&text)
}

pub fn load_config_from_str(text: &str) -> Result<GatewayConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(text)?;

    let devices = raw
        .devices
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, d)| build_device(i, d))
        .collect::<Result<Vec<_>, _>>()?;

    let timezone_offset_hours = std::env::var("TIMEZONE_OFFSET")
        .ok()
        .and_then(|v| v.parse().ok())
        .or(raw.timezone_offset_hours)
        .unwrap_or(-5.0);
    let timezone_name = std::env::var("TIMEZONE_NAME")
        .ok()
        .or(raw.timezone_name)
        .unwrap_or_else(|| "America/New_York".to_owned());
    let log_retention_days = std::env::var("LOG_RETENTION_DAYS")
        .ok()
        .and_then(|v| v.parse().ok())
        .or(raw.log_retention_days)
        .unwrap_or(7);

    Ok(GatewayConfig {
        sqlite_path: raw.sqlite_path.unwrap_or_else(|| "/var/lib/slm-gateway/gateway.sqlite3".to_owned()),
        ops_http_bind: raw.ops_http_bind.unwrap_or_else(|| "0.0.0.0:8090".to_owned()),
        timezone_offset_hours,
        timezone_name,
        log_retention_days,
        devices,
    })
}

fn build_device(index: usize, raw: RawDeviceEntry) -> Result<DeviceEntry, ConfigError> {
    let unit_id = raw.unit_id.ok_or_else(|| ConfigError::MissingField(format!("devices[{index}].unit_id")))?;
    let host = raw.host.ok_or_else(|| ConfigError::MissingField(format!("devices[{index}].host")))?;
    let tcp_port = raw.tcp_port.ok_or_else(|| ConfigError::MissingField(format!("devices[{index}].tcp_port")))?;
    let poll_interval_seconds = raw.poll_interval_seconds.unwrap_or(60);
    if !(10..=3600).contains(&poll_interval_seconds) {
        return Err(ConfigError::InvalidValue {
            field: format!("devices[{index}].poll_interval_seconds"),
            detail: format!("must be in 10..=3600, got {poll_interval_seconds}"),
        });
    }

    Ok(DeviceEntry {
        unit_id,
        host,
        tcp_port,
        ftp_port: raw.ftp_port.unwrap_or(21),
        tcp_enabled: raw.tcp_enabled.unwrap_or(true),
        ftp_enabled: raw.ftp_enabled.unwrap_or(true),
        ftp_username: raw.ftp_username.unwrap_or_else(|| "USER".to_owned()),
        ftp_password: raw.ftp_password.unwrap_or_else(|| "0000".to_owned()),
        poll_interval_seconds,
        poll_enabled: raw.poll_enabled.unwrap_or(true),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_applies_defaults() {
        let cfg = load_config_from_str("").unwrap();
        assert_eq!(cfg.sqlite_path, "/var/lib/slm-gateway/gateway.sqlite3");
        assert_eq!(cfg.timezone_offset_hours, -5.0);
        assert!(cfg.devices.is_empty());
    }

    #[test]
    fn device_requires_unit_id_host_and_tcp_port() {
        let err = load_config_from_str(
            r#"
            [[devices]]
            host = "10.0.0.5"
            tcp_port = 3001
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f.contains("unit_id")));
    }

    #[test]
    fn device_entry_fills_defaults() {
        let cfg = load_config_from_str(
            r#"
            [[devices]]
            unit_id = "NL43-001"
            host = "10.0.0.5"
            tcp_port = 3001
            "#,
        )
        .unwrap();
        let d = &cfg.devices[0];
        assert_eq!(d.ftp_port, 21);
        assert_eq!(d.ftp_username, "USER");
        assert_eq!(d.poll_interval_seconds, 60);
    }

    #[test]
    fn poll_interval_out_of_bounds_is_rejected() {
        let err = load_config_from_str(
            r#"
            [[devices]]
            unit_id = "u"
            host = "h"
            tcp_port = 1
            poll_interval_seconds = 5
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
