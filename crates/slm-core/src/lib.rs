//! Durable state for the gateway: device registry, last-known status, and
//! the SQLite store backing both.

pub mod config;
pub mod status;
pub mod store;

pub use config::{DeviceConfig, DeviceConfigError};
pub use status::{truncate_error, DeviceStatus, StoredMeasurementState, LAST_ERROR_MAX_BYTES};
pub use store::{GatewayStore, StoreError, StoreTxn};
