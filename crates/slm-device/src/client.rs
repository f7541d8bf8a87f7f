//! Device Client (C6): single-command exchange and DRD streaming over the
//! ASCII TCP protocol.
//!
//! Ordering for every operation is C4 (device lock) then C3 (rate
//! governor) then the TCP exchange itself, per the design notes. A
//! single-command deadline covers the whole sequence; the device lock is
//! given that same budget to wait for contention, and whatever remains
//! after the lock + rate-governor wait becomes the connect+exchange
//! budget. If the lock cannot be acquired in time the caller sees
//! [`CallError::Busy`], not a protocol error — that distinction is what
//! lets the Background Poller treat contention with a long stream as a
//! skip rather than a counted failure.

use crate::device_lock::DeviceLockTable;
use crate::rate_governor::RateGovernor;
use slm_protocol::{codec, commands, parse_payload, DeviceError, Snapshot};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a single-command call can fail with, keeping [`Busy`] (lock
/// contention) distinct from a genuine device/protocol failure so the
/// Background Poller can skip rather than count it as a failed poll.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("device busy: exclusive lock held by another operation")]
    Busy,
    #[error(transparent)]
    Device(#[from] DeviceError),
}

pub struct DeviceClient {
    rate_governor: Arc<RateGovernor>,
    locks: Arc<DeviceLockTable>,
}

impl DeviceClient {
    pub fn new(rate_governor: Arc<RateGovernor>, locks: Arc<DeviceLockTable>) -> Self {
        DeviceClient {
            rate_governor,
            locks,
        }
    }

    /// Send one framed command and read its result code, plus a data line
    /// for query commands. Returns the raw data line (trimmed, prompt
    /// already stripped by the codec) when present.
    pub async fn call(
        &self,
        unit_id: &str,
        host: &str,
        port: u16,
        command: &str,
        deadline: Duration,
    ) -> Result<Option<String>, CallError> {
        let start = Instant::now();
        let _guard = self
            .locks
            .acquire(unit_id, deadline)
            .await
            .map_err(|_| CallError::Busy)?;
        self.rate_governor.acquire(unit_id).await;

        let remaining = deadline.saturating_sub(start.elapsed());
        match tokio::time::timeout(remaining, exchange(host, port, command)).await {
            Ok(result) => result.map_err(CallError::from),
            Err(_) => Err(CallError::Device(DeviceError::Timeout(deadline))),
        }
    }

    /// Convenience wrapper over [`Self::call`] for `DOD?`/`DLC?`-shaped
    /// queries that return a parseable snapshot payload.
    pub async fn call_snapshot(
        &self,
        unit_id: &str,
        host: &str,
        port: u16,
        command: &str,
        deadline: Duration,
    ) -> Result<Snapshot, CallError> {
        let line = self
            .call(unit_id, host, port, command, deadline)
            .await?
            .ok_or_else(|| CallError::Device(DeviceError::Parse("query returned no data line".to_owned())))?;
        parse_payload(&line).map_err(CallError::from)
    }

    /// Open a `DRD?` stream, holding the device lock for its entire
    /// duration, and forward each parsed [`Snapshot`] to `tx`. Lines that
    /// fail to parse are dropped, not surfaced — exactly-once delivery is
    /// not provided.
    ///
    /// Returns `Ok(())` on a clean remote close or caller cancellation via
    /// `cancel`, `Err(DeviceError::StreamTimeout)` if a line doesn't arrive
    /// within `quiet_period`.
    pub async fn stream_drd(
        &self,
        unit_id: &str,
        host: &str,
        port: u16,
        tx: mpsc::Sender<Snapshot>,
        quiet_period: Duration,
        lock_timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<(), CallError> {
        let _guard = self
            .locks
            .acquire(unit_id, lock_timeout)
            .await
            .map_err(|_| CallError::Busy)?;
        self.rate_governor.acquire(unit_id).await;

        let stream = connect(host, port).await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let opening = commands::drd_stream_open();
        write_half
            .write_all(&codec::frame_command(&opening))
            .await
            .map_err(|e| connect_error(host, port, e))?;

        let first = read_line(&mut reader)
            .await
            .map_err(|e| connect_error(host, port, e))?
            .ok_or_else(|| DeviceError::Protocol {
                command: opening.clone(),
                code: "EOF".to_owned(),
            })?;
        codec::check_result_code(&opening, codec::strip_prompt(&first))?;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    let _ = write_half.write_all(&[codec::STREAM_TERMINATOR]).await;
                    let _ = write_half.shutdown().await;
                    return Ok(());
                }
                outcome = tokio::time::timeout(quiet_period, read_line(&mut reader)) => {
                    match outcome {
                        Err(_elapsed) => {
                            let _ = write_half.write_all(&[codec::STREAM_TERMINATOR]).await;
                            return Err(CallError::Device(DeviceError::StreamTimeout(quiet_period)));
                        }
                        Ok(Err(e)) => return Err(connect_error(host, port, e).into()),
                        Ok(Ok(None)) => return Ok(()),
                        Ok(Ok(Some(line))) => {
                            if let Ok(snapshot) = parse_payload(&line) {
                                if tx.send(snapshot).await.is_err() {
                                    // Receiver gone; best-effort stop.
                                    let _ = write_half.write_all(&[codec::STREAM_TERMINATOR]).await;
                                    return Ok(());
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn connect(host: &str, port: u16) -> Result<TcpStream, DeviceError> {
    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(connect_error(host, port, e)),
        Err(_) => Err(connect_error(
            host,
            port,
            io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
        )),
    }
}

fn connect_error(host: &str, port: u16, source: io::Error) -> DeviceError {
    DeviceError::Connect {
        host: host.to_owned(),
        port,
        source,
    }
}

async fn read_line<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_owned()))
}

async fn exchange(host: &str, port: u16, command: &str) -> Result<Option<String>, DeviceError> {
    let stream = connect(host, port).await?;
    let (read_half, mut write_half) = stream.into_split();
    write_half
        .write_all(&codec::frame_command(command))
        .await
        .map_err(|e| connect_error(host, port, e))?;

    let mut reader = BufReader::new(read_half);
    let first = read_line(&mut reader)
        .await
        .map_err(|e| connect_error(host, port, e))?
        .ok_or_else(|| DeviceError::Protocol {
            command: command.to_owned(),
            code: "EOF".to_owned(),
        })?;
    codec::check_result_code(command, codec::strip_prompt(&first))?;

    if codec::is_query(command) {
        let data = read_line(&mut reader)
            .await
            .map_err(|e| connect_error(host, port, e))?
            .ok_or_else(|| DeviceError::Protocol {
                command: command.to_owned(),
                code: "EOF".to_owned(),
            })?;
        Ok(Some(data))
    } else {
        Ok(None)
    }
}
