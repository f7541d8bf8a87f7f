//! A minimal active-mode FTP stub matching what
//! `slm_device::ftp`'s hand-rolled client speaks: `USER`/`PASS`, `TYPE I`,
//! `PORT`, then `LIST`/`RETR` with the data connection dialed back out to
//! the port the client advertised.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct FixtureEntry {
    pub name: String,
    pub is_dir: bool,
    pub raw_mtime: String,
}

/// An in-memory directory tree: `dirs` maps an absolute path to its listing
/// entries, `files` maps an absolute path to its bytes.
#[derive(Debug, Default, Clone)]
pub struct FtpFixture {
    dirs: HashMap<String, Vec<FixtureEntry>>,
    files: HashMap<String, Vec<u8>>,
}

impl FtpFixture {
    pub fn new() -> Self {
        FtpFixture::default()
    }

    pub fn with_dir(mut self, path: impl Into<String>, entries: Vec<FixtureEntry>) -> Self {
        self.dirs.insert(path.into(), entries);
        self
    }

    pub fn with_file(mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), bytes.into());
        self
    }
}

pub async fn spawn_mock_ftp(fixture: FtpFixture) -> (String, u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock ftp control port");
    let addr = listener.local_addr().unwrap();
    let fixture = Arc::new(fixture);

    let handle = tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let fixture = fixture.clone();
            tokio::spawn(async move {
                let _ = serve_control_connection(socket, &fixture).await;
            });
        }
    });

    (addr.ip().to_string(), addr.port(), handle)
}

async fn serve_control_connection(socket: TcpStream, fixture: &FtpFixture) -> std::io::Result<()> {
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    write_half.write_all(b"220 mock ftp ready\r\n").await?;

    let mut data_addr: Option<(std::net::Ipv4Addr, u16)> = None;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(());
        }
        let line = line.trim_end_matches(['\r', '\n']);

        if let Some(user) = line.strip_prefix("USER ") {
            let _ = user;
            write_half.write_all(b"331 need password\r\n").await?;
        } else if let Some(pass) = line.strip_prefix("PASS ") {
            let _ = pass;
            write_half.write_all(b"230 logged in\r\n").await?;
        } else if line == "TYPE I" {
            write_half.write_all(b"200 binary mode\r\n").await?;
        } else if let Some(args) = line.strip_prefix("PORT ") {
            data_addr = Some(parse_port_command(args));
            write_half.write_all(b"200 port ok\r\n").await?;
        } else if let Some(path) = line.strip_prefix("LIST ") {
            write_half.write_all(b"150 opening data connection\r\n").await?;
            let listing = render_listing(fixture.dirs.get(path).cloned().unwrap_or_default());
            send_data(data_addr, listing.as_bytes()).await?;
            write_half.write_all(b"226 listing complete\r\n").await?;
        } else if let Some(path) = line.strip_prefix("RETR ") {
            write_half.write_all(b"150 opening data connection\r\n").await?;
            let bytes = fixture.files.get(path).cloned().unwrap_or_default();
            send_data(data_addr, &bytes).await?;
            write_half.write_all(b"226 transfer complete\r\n").await?;
        } else if line == "QUIT" {
            let _ = write_half.write_all(b"221 bye\r\n").await;
            return Ok(());
        } else {
            write_half.write_all(b"500 unrecognized command\r\n").await?;
        }
    }
}

async fn send_data(addr: Option<(std::net::Ipv4Addr, u16)>, bytes: &[u8]) -> std::io::Result<()> {
    let (ip, port) = addr.expect("PORT must precede a data transfer");
    let mut data_stream = TcpStream::connect((ip, port)).await?;
    data_stream.write_all(bytes).await?;
    data_stream.shutdown().await?;
    Ok(())
}

fn parse_port_command(args: &str) -> (std::net::Ipv4Addr, u16) {
    let parts: Vec<u16> = args.split(',').filter_map(|p| p.trim().parse().ok()).collect();
    let ip = std::net::Ipv4Addr::new(parts[0] as u8, parts[1] as u8, parts[2] as u8, parts[3] as u8);
    let port = (parts[4] << 8) | parts[5];
    (ip, port)
}

fn render_listing(entries: Vec<FixtureEntry>) -> String {
    entries
        .into_iter()
        .map(|e| {
            let kind = if e.is_dir { 'd' } else { '-' };
            format!("{kind}rwxr-xr-x 2 user group 4096 {} {}\r\n", e.raw_mtime, e.name)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_command_round_trips_through_parse() {
        let (ip, port) = parse_port_command("10,0,0,5,18,52");
        assert_eq!(ip, std::net::Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(port, 0x1234);
    }

    #[test]
    fn listing_renders_parseable_lines() {
        let rendered = render_listing(vec![FixtureEntry {
            name: "Auto_0010".to_owned(),
            is_dir: true,
            raw_mtime: "Jan 07 14:23".to_owned(),
        }]);
        assert!(rendered.starts_with("drwxr-xr-x"));
        assert!(rendered.contains("Auto_0010"));
    }
}
