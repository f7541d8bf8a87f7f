//! Background Poller (C9): the single process-wide task that keeps every
//! enabled device's status row current.
//!
//! One loop iteration enumerates due devices, pulls a fresh snapshot
//! through the Device Client, merges it, and does reachability bookkeeping.
//! Lock contention on a device (a concurrent long stream or cycle step) is
//! reported as [`PollOutcome::Skipped`] rather than a failure — it says
//! nothing about whether the device itself is reachable.

use chrono::{DateTime, Utc};
use slm_core::{DeviceConfig, DeviceStatus, GatewayStore};
use slm_device::{CallError, DeviceClient};
use slm_merge::Observation;
use slm_protocol::{commands, MeasurementState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const MIN_SLEEP: Duration = Duration::from_secs(30);
const MAX_SLEEP: Duration = Duration::from_secs(300);
const IDLE_SLEEP: Duration = Duration::from_secs(60);
const LOG_PURGE_INTERVAL: chrono::Duration = chrono::Duration::hours(1);

/// Tunables that don't vary per device.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub call_deadline: Duration,
    pub timezone_offset_hours: f64,
    pub log_retention_days: i64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        PollerConfig {
            call_deadline: Duration::from_secs(10),
            timezone_offset_hours: -5.0,
            log_retention_days: 7,
        }
    }
}

/// Result of one device's poll step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Success,
    Skipped,
    Failure(String),
}

pub struct Poller {
    store: Arc<Mutex<GatewayStore>>,
    client: Arc<DeviceClient>,
    config: PollerConfig,
}

impl Poller {
    pub fn new(store: Arc<Mutex<GatewayStore>>, client: Arc<DeviceClient>, config: PollerConfig) -> Self {
        Poller { store, client, config }
    }

    /// Run the poll loop until `cancel` fires. Intended to be spawned as a
    /// single long-lived task; see [`PollerHandle`] for lifecycle management.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut last_purge: Option<DateTime<Utc>> = None;

        while !cancel.is_cancelled() {
            let now = Utc::now();
            let devices = self.list_enabled_devices().await;

            for cfg in &devices {
                if cancel.is_cancelled() {
                    break;
                }
                let status = self.read_status(&cfg.unit_id).await;
                if !is_due(status.as_ref(), cfg.poll_interval_seconds, Utc::now()) {
                    continue;
                }
                let outcome = self.poll_device(cfg, Utc::now()).await;
                let (level, message) = match &outcome {
                    PollOutcome::Skipped => {
                        tracing::debug!(unit_id = %cfg.unit_id, "poll skipped: device busy");
                        ("debug", "poll skipped: device busy".to_owned())
                    }
                    PollOutcome::Failure(detail) => {
                        tracing::warn!(unit_id = %cfg.unit_id, detail, "poll failed");
                        ("warn", format!("poll failed: {detail}"))
                    }
                    PollOutcome::Success => {
                        tracing::debug!(unit_id = %cfg.unit_id, "poll succeeded");
                        ("debug", "poll succeeded".to_owned())
                    }
                };
                self.append_log(&cfg.unit_id, level, "poll", &message, Utc::now()).await;
            }

            if last_purge.is_none_or(|t| now.signed_duration_since(t) >= LOG_PURGE_INTERVAL) {
                self.purge_logs(now).await;
                last_purge = Some(now);
            }

            let sleep_for = sleep_duration(&devices);
            cooperative_sleep(sleep_for, &cancel).await;
        }
    }

    async fn list_enabled_devices(&self) -> Vec<DeviceConfig> {
        let store = self.store.lock().await;
        match store.list_enabled_devices() {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(error = %e, "failed to list enabled devices");
                Vec::new()
            }
        }
    }

    async fn read_status(&self, unit_id: &str) -> Option<DeviceStatus> {
        let store = self.store.lock().await;
        store.read_status(unit_id).ok().flatten()
    }

    /// Append a `device_log` row (C13) alongside the process trace. Logging
    /// failures are swallowed — a full disk shouldn't stop polling.
    async fn append_log(&self, unit_id: &str, level: &str, category: &str, message: &str, when: DateTime<Utc>) {
        let mut store = self.store.lock().await;
        if let Err(e) = store.append_log(unit_id, level, category, message, when) {
            tracing::warn!(unit_id, error = %e, "failed to append device log row");
        }
    }

    async fn purge_logs(&self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::days(self.config.log_retention_days);
        let mut store = self.store.lock().await;
        match store.purge_logs_older_than(cutoff) {
            Ok(n) if n > 0 => tracing::info!(purged = n, "purged stale device log rows"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "log purge failed"),
        }
    }

    async fn poll_device(&self, cfg: &DeviceConfig, now: DateTime<Utc>) -> PollOutcome {
        {
            let mut store = self.store.lock().await;
            if let Err(e) = store.set_last_poll_attempt(&cfg.unit_id, now) {
                tracing::warn!(unit_id = %cfg.unit_id, error = %e, "failed to stamp poll attempt");
            }
        }

        let snapshot = match self
            .client
            .call_snapshot(&cfg.unit_id, &cfg.host, cfg.tcp_port, &commands::live_sample(), self.config.call_deadline)
            .await
        {
            Ok(s) => s,
            Err(CallError::Busy) => return PollOutcome::Skipped,
            Err(CallError::Device(e)) => return self.record_failure(&cfg.unit_id, now, &e.to_string()).await,
        };

        let state_line = match self
            .client
            .call(&cfg.unit_id, &cfg.host, cfg.tcp_port, &commands::measure_query(), self.config.call_deadline)
            .await
        {
            Ok(line) => line,
            Err(CallError::Busy) => return PollOutcome::Skipped,
            Err(CallError::Device(e)) => return self.record_failure(&cfg.unit_id, now, &e.to_string()).await,
        };
        let state = MeasurementState::from(state_line.as_deref().unwrap_or("").trim());
        let observation = Observation { snapshot, state };

        let status = {
            let mut store = self.store.lock().await;
            match slm_merge::apply_snapshot(&mut store, &cfg.unit_id, &observation, now) {
                Ok(status) => status,
                Err(e) => return self.record_failure(&cfg.unit_id, now, &e.to_string()).await,
            }
        };

        {
            let mut store = self.store.lock().await;
            if let Err(e) = store.record_poll_success(&cfg.unit_id, now) {
                tracing::warn!(unit_id = %cfg.unit_id, error = %e, "failed to record poll success");
            }
        }

        if slm_merge::needs_sync(&status, cfg) {
            let outcome = {
                let mut store = self.store.lock().await;
                slm_merge::synchronize_start_time(&mut store, &self.client, cfg, self.config.timezone_offset_hours, now).await
            };
            match outcome {
                Ok(outcome) => {
                    tracing::info!(unit_id = %cfg.unit_id, ?outcome, "start-time sync attempted");
                    self.append_log(&cfg.unit_id, "info", "sync", &format!("start-time sync: {outcome:?}"), now).await;
                }
                Err(e) => tracing::warn!(unit_id = %cfg.unit_id, error = %e, "start-time sync failed"),
            }
        }

        PollOutcome::Success
    }

    async fn record_failure(&self, unit_id: &str, now: DateTime<Utc>, detail: &str) -> PollOutcome {
        let mut store = self.store.lock().await;
        match store.record_poll_failure(unit_id, now, detail) {
            Ok(just_became_unreachable) => {
                if just_became_unreachable {
                    tracing::warn!(unit_id, detail, "device became unreachable after 3 consecutive failures");
                }
            }
            Err(e) => tracing::warn!(unit_id, error = %e, "failed to record poll failure"),
        }
        PollOutcome::Failure(detail.to_owned())
    }
}

/// A running [`Poller`] task, for `start()`/`stop()` lifecycle management
/// bound to the application's lifetime.
pub struct PollerHandle {
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl PollerHandle {
    pub fn spawn(poller: Arc<Poller>) -> Self {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let join = tokio::spawn(async move { poller.run(child).await });
        PollerHandle { cancel, join }
    }

    /// Ask the loop to stop, waiting up to 5s before giving up and leaving
    /// it to finish its current step on its own.
    pub async fn stop(self) {
        self.cancel.cancel();
        if tokio::time::timeout(Duration::from_secs(5), self.join).await.is_err() {
            tracing::warn!("poller did not stop within 5s of cancellation");
        }
    }
}

fn is_due(status: Option<&DeviceStatus>, poll_interval_seconds: u32, now: DateTime<Utc>) -> bool {
    match status.and_then(|s| s.last_poll_attempt) {
        None => true,
        Some(last) => now.signed_duration_since(last) >= chrono::Duration::seconds(i64::from(poll_interval_seconds)),
    }
}

fn sleep_duration(devices: &[DeviceConfig]) -> Duration {
    if devices.is_empty() {
        return IDLE_SLEEP;
    }
    let min_interval = devices.iter().map(|d| d.poll_interval_seconds).min().unwrap_or(60);
    Duration::from_secs(u64::from(min_interval) / 2).clamp(MIN_SLEEP, MAX_SLEEP)
}

async fn cooperative_sleep(total: Duration, cancel: &CancellationToken) {
    let steps = total.as_secs().max(1);
    for _ in 0..steps {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    }
}
