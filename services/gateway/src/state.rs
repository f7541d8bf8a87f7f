//! Wires the per-device infrastructure (C1-C6) together with the
//! Background Poller (C9) and ops HTTP (C12) into one running gateway.

use crate::config::GatewayConfig;
use crate::ops_http::{OpsHttpServer, Readiness};
use slm_core::{DeviceConfig, GatewayStore, StoreError};
use slm_device::{DeviceClient, DeviceLockTable, RateGovernor};
use slm_poller::{Poller, PollerConfig, PollerHandle};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct GatewayState {
    pub store: Arc<Mutex<GatewayStore>>,
    pub client: Arc<DeviceClient>,
    poller: Option<PollerHandle>,
    ops_http: Option<OpsHttpServer>,
}

impl GatewayState {
    /// Open the store, register every configured device, and start the
    /// poller. Does not start ops HTTP; call [`Self::start_ops_http`]
    /// separately once everything else is ready.
    pub fn bootstrap(config: &GatewayConfig) -> Result<Self, StoreError> {
        let mut store = if config.sqlite_path == ":memory:" {
            GatewayStore::open_in_memory()?
        } else {
            GatewayStore::open(std::path::Path::new(&config.sqlite_path))?
        };

        for device in &config.devices {
            store.upsert_device(&to_device_config(device))?;
        }

        let store = Arc::new(Mutex::new(store));
        let client = Arc::new(DeviceClient::new(Arc::new(RateGovernor::new()), Arc::new(DeviceLockTable::new())));

        let poller_config = PollerConfig {
            timezone_offset_hours: config.timezone_offset_hours,
            log_retention_days: config.log_retention_days,
            ..PollerConfig::default()
        };
        let poller = Arc::new(Poller::new(store.clone(), client.clone(), poller_config));
        let poller_handle = PollerHandle::spawn(poller);

        Ok(GatewayState {
            store,
            client,
            poller: Some(poller_handle),
            ops_http: None,
        })
    }

    pub async fn start_ops_http(&mut self, bind: &str) -> Result<std::net::SocketAddr, std::io::Error> {
        let readiness = Arc::new(Mutex::new(Readiness::not_ready()));
        readiness.lock().await.mark_ready();
        let server = OpsHttpServer::start(bind, readiness, self.store.clone()).await?;
        let addr = server.local_addr();
        self.ops_http = Some(server);
        Ok(addr)
    }

    /// Stop the poller cooperatively (bounded ~5s wait). Ops HTTP has no
    /// explicit shutdown; its listener is dropped with the process.
    pub async fn shutdown(mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop().await;
        }
    }
}

fn to_device_config(entry: &crate::config::DeviceEntry) -> DeviceConfig {
    DeviceConfig::new(
        entry.unit_id.clone(),
        entry.host.clone(),
        entry.tcp_port,
        Some(entry.ftp_port),
        entry.tcp_enabled,
        entry.ftp_enabled,
        Some(entry.ftp_username.clone()),
        Some(entry.ftp_password.clone()),
        Some(entry.poll_interval_seconds),
        entry.poll_enabled,
    )
    .expect("gateway config already validated these bounds at load time")
}
