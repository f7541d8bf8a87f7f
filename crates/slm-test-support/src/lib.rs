//! Minimal protocol-level device doubles shared across the workspace's
//! integration tests: an ASCII command/stream TCP stub and an active-mode
//! FTP stub, both backed by an in-memory script/fixture rather than a real
//! device.

pub mod ftp;
pub mod tcp;

pub use ftp::{spawn_mock_ftp, FixtureEntry, FtpFixture};
pub use tcp::{spawn_mock_tcp, TcpFixture};
