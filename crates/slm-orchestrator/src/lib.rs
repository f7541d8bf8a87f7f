//! Cycle Orchestrator (C10): composes several Device Client calls into the
//! start-measurement and stop-measurement sequences. Performs no rollback —
//! the device has no transactional facility, so a mid-sequence failure is
//! surfaced with whatever partial progress was made.

use chrono::{DateTime, Utc};
use slm_device::{CallError, DeviceClient};
use slm_protocol::commands;
use std::path::Path;
use std::time::Duration;

const FTP_READY_POLL_INTERVAL: Duration = Duration::from_millis(2_000);
const FTP_READY_TIMEOUT: Duration = Duration::from_secs(30);
const FTP_TOGGLE_PAUSE: Duration = Duration::from_millis(500);
const STORAGE_SLOTS: u32 = 10_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("device storage is full: no free index found in {attempts} attempts")]
    StorageFull { attempts: u32 },
    #[error(transparent)]
    Device(#[from] CallError),
}

/// Everything needed to address and authenticate against one device for a
/// cycle operation. Deliberately narrower than `DeviceConfig` — the
/// orchestrator has no registry dependency of its own.
#[derive(Debug, Clone)]
pub struct CycleTarget<'a> {
    pub unit_id: &'a str,
    pub host: &'a str,
    pub tcp_port: u16,
    pub ftp_port: u16,
    pub ftp_username: &'a str,
    pub ftp_password: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub struct StartCycleOptions {
    pub sync_clock: bool,
    pub max_attempts: u32,
    pub command_deadline: Duration,
}

impl Default for StartCycleOptions {
    fn default() -> Self {
        StartCycleOptions {
            sync_clock: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            command_deadline: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCycleReport {
    pub old_index: u32,
    pub new_index: u32,
    pub attempts: u32,
    pub clock_synced: bool,
}

/// `clock_value` is written verbatim as the device clock when `sync_clock`
/// is set — callers apply any configured offset before calling this
/// (the device has no timezone concept of its own).
pub async fn start_cycle(
    client: &DeviceClient,
    target: &CycleTarget<'_>,
    clock_value: DateTime<Utc>,
    options: StartCycleOptions,
) -> Result<StartCycleReport, OrchestratorError> {
    let mut clock_synced = false;
    if options.sync_clock {
        let formatted = clock_value.format("%Y/%m/%d %H:%M:%S").to_string();
        client
            .call(target.unit_id, target.host, target.tcp_port, &commands::clock_set(&formatted), options.command_deadline)
            .await?;
        clock_synced = true;
    }

    let cur = read_store_name(client, target, options.command_deadline).await?;
    let mut test = (cur + 1) % STORAGE_SLOTS;
    let mut attempts = 0u32;

    loop {
        client
            .call(
                target.unit_id,
                target.host,
                target.tcp_port,
                &commands::store_name_set(test),
                options.command_deadline,
            )
            .await?;
        let overwrite = client
            .call(target.unit_id, target.host, target.tcp_port, &commands::overwrite_query(), options.command_deadline)
            .await?;
        attempts += 1;

        if overwrite.as_deref() == Some("None") {
            break;
        }
        if attempts >= options.max_attempts || test == cur {
            return Err(OrchestratorError::StorageFull { attempts });
        }
        test = (test + 1) % STORAGE_SLOTS;
    }

    client
        .call(target.unit_id, target.host, target.tcp_port, &commands::measure(true), options.command_deadline)
        .await?;

    Ok(StartCycleReport {
        old_index: cur,
        new_index: test,
        attempts,
        clock_synced,
    })
}

#[derive(Debug, Clone)]
pub struct StopCycleOptions {
    pub ftp_connect_timeout: Duration,
    pub command_deadline: Duration,
}

impl Default for StopCycleOptions {
    fn default() -> Self {
        StopCycleOptions {
            ftp_connect_timeout: Duration::from_secs(10),
            command_deadline: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
pub struct StopCycleReport {
    pub folder: String,
    pub ftp_ready: bool,
    /// `Err` only describes the folder download's own failure; it does not
    /// undo the measurement stop, which has already happened by this point.
    pub download: Result<slm_device::ftp::FolderDownloadReport, String>,
}

pub async fn stop_cycle(
    client: &DeviceClient,
    target: &CycleTarget<'_>,
    dest_path: &Path,
    options: StopCycleOptions,
) -> Result<StopCycleReport, OrchestratorError> {
    client
        .call(target.unit_id, target.host, target.tcp_port, &commands::measure(false), options.command_deadline)
        .await?;

    let _ = client
        .call(target.unit_id, target.host, target.tcp_port, &commands::ftp_set(false), options.command_deadline)
        .await;
    tokio::time::sleep(FTP_TOGGLE_PAUSE).await;
    let _ = client
        .call(target.unit_id, target.host, target.tcp_port, &commands::ftp_set(true), options.command_deadline)
        .await;
    let ftp_ready = wait_for_ftp_ready(client, target, options.command_deadline).await;

    let index = read_store_name(client, target, options.command_deadline).await?;
    let folder = format!("Auto_{index:04}");

    let creds = slm_device::FtpCredentials {
        host: target.host,
        port: target.ftp_port,
        username: target.ftp_username,
        password: target.ftp_password,
    };
    let remote_folder = format!("/NL-43/{folder}");
    let download = slm_device::download_folder_as_zip(&creds, &remote_folder, dest_path, options.ftp_connect_timeout)
        .await
        .map_err(|e| e.to_string());

    Ok(StopCycleReport { folder, ftp_ready, download })
}

async fn read_store_name(client: &DeviceClient, target: &CycleTarget<'_>, deadline: Duration) -> Result<u32, CallError> {
    let line = client
        .call(target.unit_id, target.host, target.tcp_port, &commands::store_name_query(), deadline)
        .await?;
    Ok(line.and_then(|s| s.trim().parse().ok()).unwrap_or(0))
}

/// Best-effort readiness wait: returns `false` rather than erroring if FTP
/// never reports ready, per "proceed even if unverified".
async fn wait_for_ftp_ready(client: &DeviceClient, target: &CycleTarget<'_>, deadline: Duration) -> bool {
    let poll_deadline = tokio::time::Instant::now() + FTP_READY_TIMEOUT;
    loop {
        let state = client
            .call(target.unit_id, target.host, target.tcp_port, &commands::ftp_query(), deadline)
            .await;
        if let Ok(state) = state {
            if state.as_deref() == Some("On") {
                return true;
            }
        }
        if tokio::time::Instant::now() >= poll_deadline {
            return false;
        }
        tokio::time::sleep(FTP_READY_POLL_INTERVAL).await;
    }
}
