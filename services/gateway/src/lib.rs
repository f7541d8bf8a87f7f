//! Gateway process composition: config loading, ops HTTP, and the wiring
//! that ties the registry, status store, rate governor, device lock table,
//! device client, and poller into one running process.

pub mod config;
pub mod ops_http;
pub mod state;

pub use config::{load_config_from_path, load_config_from_str, GatewayConfig};
pub use state::GatewayState;
