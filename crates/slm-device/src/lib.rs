//! Device-facing transport: rate limiting, per-device exclusive locking,
//! the ASCII command/stream client, and active-mode FTP.

pub mod client;
pub mod device_lock;
pub mod ftp;
pub mod rate_governor;

pub use client::{CallError, DeviceClient};
pub use device_lock::{Busy, DeviceLockTable};
pub use ftp::{download_file, download_folder_as_zip, list_directory, FtpCredentials, FtpEntry};
pub use rate_governor::RateGovernor;
