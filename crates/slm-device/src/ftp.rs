//! Active-mode FTP client used for the Device Client's (C6) listing and
//! folder-download operations, plus folder archival into a ZIP.
//!
//! No FTP crate exists anywhere in the dependency lineage this workspace
//! draws on, and the device's active-mode-only requirement (server opens
//! the data connection back to us) is unusual enough that a general-purpose
//! client wouldn't fit cleanly anyway. This hand-rolls RFC 959's minimum:
//! `USER`/`PASS`, `TYPE I`, `PORT`, `LIST`/`RETR`. Control replies are
//! assumed single-line — the devices this targets do not send multi-line
//! continuations.

use async_zip::base::write::ZipFileWriter;
use async_zip::{Compression, ZipEntryBuilder};
use slm_protocol::ftp_time::parse_listing_mtime;
use slm_protocol::{DeviceError, FtpPhase};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const DATA_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct FtpEntry {
    pub name: String,
    pub is_dir: bool,
    pub raw_mtime: String,
}

#[derive(Debug, Clone)]
pub struct FtpCredentials<'a> {
    pub host: &'a str,
    pub port: u16,
    pub username: &'a str,
    pub password: &'a str,
}

/// Outcome of a recursive folder download: files that made it into the
/// archive and paths that failed, with their error, logged but not fatal.
#[derive(Debug, Default)]
pub struct FolderDownloadReport {
    pub archived: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub zip_bytes: usize,
}

pub async fn list_directory(
    creds: &FtpCredentials<'_>,
    path: &str,
    connect_timeout: Duration,
) -> Result<Vec<FtpEntry>, DeviceError> {
    let raw = retrieve(creds, &format!("LIST {path}"), connect_timeout).await?;
    let text = String::from_utf8_lossy(&raw);
    Ok(text.lines().filter_map(parse_listing_line).collect())
}

pub async fn download_file(
    creds: &FtpCredentials<'_>,
    path: &str,
    connect_timeout: Duration,
) -> Result<Vec<u8>, DeviceError> {
    retrieve(creds, &format!("RETR {path}"), connect_timeout).await
}

/// Recursively download `remote_folder` and pack every regular file into a
/// deflate ZIP written to `dest_path`, with entries rooted at the folder's
/// own name (e.g. `Auto_0010/a.bin`). Per-file and per-subdirectory
/// failures are recorded in the report, not raised.
pub async fn download_folder_as_zip(
    creds: &FtpCredentials<'_>,
    remote_folder: &str,
    dest_path: &std::path::Path,
    connect_timeout: Duration,
) -> Result<FolderDownloadReport, DeviceError> {
    let folder_name = remote_folder
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(remote_folder)
        .to_owned();

    let mut report = FolderDownloadReport::default();
    let mut stack = vec![(remote_folder.trim_end_matches('/').to_owned(), String::new())];
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();

    while let Some((remote_path, rel_prefix)) = stack.pop() {
        let entries = match list_directory(creds, &remote_path, connect_timeout).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(remote_path, error = %e, "folder listing failed, skipping subtree");
                report.failed.push((remote_path, e.to_string()));
                continue;
            }
        };

        for entry in entries {
            if entry.name == "." || entry.name == ".." {
                continue;
            }
            let rel = if rel_prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{rel_prefix}/{}", entry.name)
            };
            let remote_child = format!("{remote_path}/{}", entry.name);

            if entry.is_dir {
                stack.push((remote_child, rel));
                continue;
            }

            match download_file(creds, &remote_child, connect_timeout).await {
                Ok(bytes) => {
                    report.archived.push(rel.clone());
                    files.push((format!("{folder_name}/{rel}"), bytes));
                }
                Err(e) => {
                    tracing::warn!(remote_child, error = %e, "file download failed, skipping");
                    report.failed.push((rel, e.to_string()));
                }
            }
        }
    }

    let mut out = tokio::fs::File::create(dest_path)
        .await
        .map_err(|e| ftp_data_error(format!("creating zip output file: {e}")))?;
    {
        let mut writer = ZipFileWriter::with_tokio(&mut out);
        for (entry_name, data) in &files {
            let builder = ZipEntryBuilder::new(entry_name.clone().into(), Compression::Deflate);
            writer
                .write_entry_whole(builder, data)
                .await
                .map_err(|e| ftp_data_error(format!("writing zip entry '{entry_name}': {e}")))?;
        }
        writer
            .close()
            .await
            .map_err(|e| ftp_data_error(format!("finalizing zip: {e}")))?;
    }
    report.zip_bytes = files.iter().map(|(_, d)| d.len()).sum();
    Ok(report)
}

fn ftp_data_error(detail: String) -> DeviceError {
    DeviceError::Ftp {
        phase: FtpPhase::Data,
        detail,
    }
}

fn parse_listing_line(line: &str) -> Option<FtpEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 9 {
        return None;
    }
    let is_dir = fields[0].starts_with('d');
    let month = fields[fields.len() - 4];
    let day = fields[fields.len() - 3];
    let time_or_year = fields[fields.len() - 2];
    let name = fields[fields.len() - 1];
    Some(FtpEntry {
        name: name.to_owned(),
        is_dir,
        raw_mtime: format!("{month} {day} {time_or_year}"),
    })
}

/// Parse an entry's `raw_mtime` into a UTC timestamp, given the process
/// timezone offset and a reference "now".
pub fn entry_modified_at(
    entry: &FtpEntry,
    now_utc: chrono::DateTime<chrono::Utc>,
    tz_offset_hours: f64,
) -> Option<chrono::DateTime<chrono::Utc>> {
    parse_listing_mtime(&entry.raw_mtime, now_utc, tz_offset_hours).ok()
}

// ---------------------------------------------------------------------------
// Control/data channel plumbing
// ---------------------------------------------------------------------------

async fn retrieve(
    creds: &FtpCredentials<'_>,
    command: &str,
    connect_timeout: Duration,
) -> Result<Vec<u8>, DeviceError> {
    let control = connect_control(creds, connect_timeout).await?;
    let (read_half, mut write_half) = control.into_split();
    let mut reader = BufReader::new(read_half);

    read_reply(&mut reader, FtpPhase::Connect).await?;
    authenticate(&mut reader, &mut write_half, creds).await?;

    send_and_expect(&mut reader, &mut write_half, "TYPE I", FtpPhase::Data, &["200"]).await?;

    let local_ip = match write_half
        .local_addr()
        .map_err(|e| ftp_data_error(e.to_string()))?
        .ip()
    {
        std::net::IpAddr::V4(ip) => ip,
        std::net::IpAddr::V6(_) => {
            return Err(ftp_data_error("active mode requires an IPv4 local address".to_owned()))
        }
    };

    let listener = TcpListener::bind((std::net::IpAddr::V4(local_ip), 0))
        .await
        .map_err(|e| ftp_data_error(e.to_string()))?;
    let listen_port = listener
        .local_addr()
        .map_err(|e| ftp_data_error(e.to_string()))?
        .port();

    send_and_expect(
        &mut reader,
        &mut write_half,
        &port_command(local_ip, listen_port),
        FtpPhase::Data,
        &["200"],
    )
    .await?;

    send_and_expect(&mut reader, &mut write_half, command, FtpPhase::Data, &["150"]).await?;

    let (mut data_stream, _) = tokio::time::timeout(DATA_ACCEPT_TIMEOUT, listener.accept())
        .await
        .map_err(|_| ftp_data_error("timed out waiting for device data connection".to_owned()))?
        .map_err(|e| ftp_data_error(e.to_string()))?;

    let mut buf = Vec::new();
    data_stream
        .read_to_end(&mut buf)
        .await
        .map_err(|e| ftp_data_error(e.to_string()))?;

    read_reply(&mut reader, FtpPhase::Data).await?;
    let _ = write_half.write_all(b"QUIT\r\n").await;

    Ok(buf)
}

async fn connect_control(
    creds: &FtpCredentials<'_>,
    connect_timeout: Duration,
) -> Result<TcpStream, DeviceError> {
    tokio::time::timeout(connect_timeout, TcpStream::connect((creds.host, creds.port)))
        .await
        .map_err(|_| ftp_connect_error("connect timed out".to_owned()))?
        .map_err(|e| ftp_connect_error(e.to_string()))
}

fn ftp_connect_error(detail: String) -> DeviceError {
    DeviceError::Ftp {
        phase: FtpPhase::Connect,
        detail,
    }
}

async fn authenticate(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    creds: &FtpCredentials<'_>,
) -> Result<(), DeviceError> {
    send_and_expect(
        reader,
        writer,
        &format!("USER {}", creds.username),
        FtpPhase::Auth,
        &["331", "230"],
    )
    .await?;
    send_and_expect(
        reader,
        writer,
        &format!("PASS {}", creds.password),
        FtpPhase::Auth,
        &["230"],
    )
    .await?;
    Ok(())
}

async fn send_and_expect(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    command: &str,
    phase: FtpPhase,
    expected_codes: &[&str],
) -> Result<String, DeviceError> {
    writer
        .write_all(format!("{command}\r\n").as_bytes())
        .await
        .map_err(|e| DeviceError::Ftp {
            phase,
            detail: e.to_string(),
        })?;
    let reply = read_reply(reader, phase).await?;
    let code = reply.get(0..3).unwrap_or("");
    if !expected_codes.contains(&code) {
        return Err(DeviceError::Ftp {
            phase,
            detail: format!("unexpected reply to '{command}': {reply}"),
        });
    }
    Ok(reply)
}

async fn read_reply(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    phase: FtpPhase,
) -> Result<String, DeviceError> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await.map_err(|e| DeviceError::Ftp {
        phase,
        detail: e.to_string(),
    })?;
    if n == 0 {
        return Err(DeviceError::Ftp {
            phase,
            detail: "control connection closed unexpectedly".to_owned(),
        });
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_owned())
}

fn port_command(ip: Ipv4Addr, port: u16) -> String {
    let o = ip.octets();
    let p1 = (port >> 8) as u8;
    let p2 = (port & 0xFF) as u8;
    format!("PORT {},{},{},{},{},{}", o[0], o[1], o[2], o[3], p1, p2)
}
