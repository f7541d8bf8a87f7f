//! Start-Time Synchronizer (C8): on-demand reconstruction of
//! `measurement_start_time` from FTP directory listing timestamps, for a
//! device whose current measurement session started before the gateway was
//! watching.
//!
//! Called by the Background Poller once a merge leaves a device in "Start"
//! with no recorded start time. Failures are recorded against the device's
//! `last_error` and never raised past this module: a missing start time is
//! not fatal to polling.

use chrono::{DateTime, Utc};
use slm_core::{truncate_error, DeviceConfig, DeviceStatus, GatewayStore, StoredMeasurementState};
use slm_device::{self as device, DeviceClient, FtpCredentials};
use slm_protocol::commands;
use std::time::Duration;

use crate::MergeError;

const FTP_READY_POLL_INTERVAL: Duration = Duration::from_millis(2_000);
const FTP_READY_TIMEOUT: Duration = Duration::from_secs(30);
const FTP_TOGGLE_PAUSE: Duration = Duration::from_millis(500);
const COMMAND_DEADLINE: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MEASUREMENT_DIRECTORY: &str = "/NL-43";

/// Whether `status` currently qualifies for a synchronization attempt.
pub fn needs_sync(status: &DeviceStatus, config: &DeviceConfig) -> bool {
    status.measurement_state == StoredMeasurementState::Start
        && status.measurement_start_time.is_none()
        && !status.start_time_sync_attempted
        && config.ftp_enabled
}

/// Outcome of a synchronization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A start time was found and persisted.
    Synchronized(DateTime<Utc>),
    /// FTP was reachable but no parseable directory entry was found.
    NoTimestampFound,
    /// The attempt failed; the detail was recorded in `last_error`.
    Failed(String),
}

/// Run the three-step procedure and persist the result. Marks
/// `start_time_sync_attempted` before doing any network I/O, so a crash or
/// failure mid-attempt does not cause a retry within the same session.
pub async fn synchronize_start_time(
    store: &mut GatewayStore,
    client: &DeviceClient,
    config: &DeviceConfig,
    tz_offset_hours: f64,
    now: DateTime<Utc>,
) -> Result<SyncOutcome, MergeError> {
    mark_attempted(store, &config.unit_id)?;

    match attempt(client, config, tz_offset_hours, now).await {
        Ok(Some(start_time)) => {
            set_start_time(store, &config.unit_id, start_time)?;
            Ok(SyncOutcome::Synchronized(start_time))
        }
        Ok(None) => Ok(SyncOutcome::NoTimestampFound),
        Err(detail) => {
            record_failure(store, &config.unit_id, &detail)?;
            Ok(SyncOutcome::Failed(detail))
        }
    }
}

async fn attempt(
    client: &DeviceClient,
    config: &DeviceConfig,
    tz_offset_hours: f64,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, String> {
    toggle_ftp_off_then_on(client, config).await?;
    wait_for_ftp_ready(client, config).await?;

    let creds = FtpCredentials {
        host: &config.host,
        port: config.ftp_port,
        username: &config.ftp_username,
        password: &config.ftp_password,
    };
    let mut entries = device::list_directory(&creds, MEASUREMENT_DIRECTORY, CONNECT_TIMEOUT)
        .await
        .map_err(|e| e.to_string())?;
    entries.retain(|e| e.is_dir);

    let mut dated: Vec<(DateTime<Utc>, device::FtpEntry)> = entries
        .into_iter()
        .filter_map(|e| device::ftp::entry_modified_at(&e, now, tz_offset_hours).map(|t| (t, e)))
        .collect();
    dated.sort_by(|a, b| b.0.cmp(&a.0));

    Ok(dated.into_iter().next().map(|(t, _)| t))
}

async fn toggle_ftp_off_then_on(client: &DeviceClient, config: &DeviceConfig) -> Result<(), String> {
    let _ = client
        .call(
            &config.unit_id,
            &config.host,
            config.tcp_port,
            &commands::ftp_set(false),
            COMMAND_DEADLINE,
        )
        .await;
    tokio::time::sleep(FTP_TOGGLE_PAUSE).await;
    client
        .call(
            &config.unit_id,
            &config.host,
            config.tcp_port,
            &commands::ftp_set(true),
            COMMAND_DEADLINE,
        )
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}

async fn wait_for_ftp_ready(client: &DeviceClient, config: &DeviceConfig) -> Result<(), String> {
    let deadline = tokio::time::Instant::now() + FTP_READY_TIMEOUT;
    loop {
        let state = client
            .call(
                &config.unit_id,
                &config.host,
                config.tcp_port,
                &commands::ftp_query(),
                COMMAND_DEADLINE,
            )
            .await
            .map_err(|e| e.to_string())?;
        if state.as_deref() == Some("On") {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err("FTP server did not report ready within 30s".to_owned());
        }
        tokio::time::sleep(FTP_READY_POLL_INTERVAL).await;
    }
}

fn mark_attempted(store: &mut GatewayStore, unit_id: &str) -> Result<(), MergeError> {
    store
        .with_transaction(|txn| {
            txn.ensure_status_row(unit_id)?;
            let mut status = txn.read_status(unit_id)?.unwrap_or_else(|| DeviceStatus::new(unit_id));
            status.start_time_sync_attempted = true;
            txn.write_status(&status)
        })
        .map_err(MergeError::from)
}

fn set_start_time(store: &mut GatewayStore, unit_id: &str, start_time: DateTime<Utc>) -> Result<(), MergeError> {
    store
        .with_transaction(|txn| {
            let mut status = txn.read_status(unit_id)?.unwrap_or_else(|| DeviceStatus::new(unit_id));
            status.measurement_start_time = Some(start_time);
            txn.write_status(&status)
        })
        .map_err(MergeError::from)
}

fn record_failure(store: &mut GatewayStore, unit_id: &str, detail: &str) -> Result<(), MergeError> {
    store
        .with_transaction(|txn| {
            let mut status = txn.read_status(unit_id)?.unwrap_or_else(|| DeviceStatus::new(unit_id));
            status.last_error = Some(truncate_error(detail));
            txn.write_status(&status)
        })
        .map_err(MergeError::from)
}
