//! Ops HTTP (C12): a minimal hand-rolled HTTP/1.1 responder, in the same
//! raw-TCP style used for status reporting elsewhere in this lineage rather
//! than pulling in a full framework for three endpoints.
//!
//! - `GET /healthz` — always 200, process is running.
//! - `GET /readyz` — 200 once the registry/status store/poller are
//!   initialized, 503 otherwise.
//! - `GET /api/v1/devices/{unit_id}/status` — the cached [`DeviceStatus`]
//!   as JSON; pure read-through of the status store, no device round-trip.
//!   Everything else in the wider REST contract is left for an external
//!   HTTP layer to implement against this crate's public API.

use slm_core::GatewayStore;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness(bool);

impl Readiness {
    pub fn not_ready() -> Self {
        Readiness(false)
    }

    pub fn mark_ready(&mut self) {
        self.0 = true;
    }

    pub fn is_ready(self) -> bool {
        self.0
    }
}

pub struct OpsHttpServer {
    local_addr: std::net::SocketAddr,
}

impl OpsHttpServer {
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    pub async fn start(
        bind: &str,
        readiness: Arc<Mutex<Readiness>>,
        store: Arc<Mutex<GatewayStore>>,
    ) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(bind).await?;
        let local_addr = listener.local_addr()?;

        tokio::spawn(async move {
            run_server(listener, readiness, store).await;
        });

        Ok(OpsHttpServer { local_addr })
    }
}

async fn run_server(listener: TcpListener, readiness: Arc<Mutex<Readiness>>, store: Arc<Mutex<GatewayStore>>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let readiness = readiness.clone();
                let store = store.clone();
                tokio::spawn(async move {
                    handle_connection(stream, readiness, store).await;
                });
            }
            Err(_) => break,
        }
    }
}

async fn handle_connection(mut stream: TcpStream, readiness: Arc<Mutex<Readiness>>, store: Arc<Mutex<GatewayStore>>) {
    let mut buf = vec![0u8; 4096];
    let n = match stream.read(&mut buf).await {
        Ok(n) if n > 0 => n,
        _ => return,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => {
            send_response(&mut stream, 400, "text/plain", "Bad Request").await;
            return;
        }
    };
    let first_line = request.lines().next().unwrap_or("");
    let mut parts = first_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("/");

    match (method, path) {
        ("GET", "/healthz") => {
            send_response(&mut stream, 200, "text/plain", "ok").await;
        }
        ("GET", "/readyz") => {
            if readiness.lock().await.is_ready() {
                send_response(&mut stream, 200, "text/plain", "ready").await;
            } else {
                send_response(&mut stream, 503, "text/plain", "not ready").await;
            }
        }
        ("GET", path) if path.starts_with("/api/v1/devices/") && path.ends_with("/status") => {
            let unit_id = &path["/api/v1/devices/".len()..path.len() - "/status".len()];
            let status = {
                let store = store.lock().await;
                store.read_status(unit_id)
            };
            match status {
                Ok(Some(status)) => match serde_json::to_string(&status) {
                    Ok(body) => send_response(&mut stream, 200, "application/json", &body).await,
                    Err(e) => send_response(&mut stream, 500, "text/plain", &e.to_string()).await,
                },
                Ok(None) => send_response(&mut stream, 404, "text/plain", "unknown device").await,
                Err(e) => send_response(&mut stream, 500, "text/plain", &e.to_string()).await,
            }
        }
        _ => {
            send_response(&mut stream, 404, "text/plain", "Not Found").await;
        }
    }
}

async fn send_response(stream: &mut TcpStream, status: u16, content_type: &str, body: &str) {
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    };
    let response = format!(
        "HTTP/1.1 {status} {status_text}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {len}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        len = body.len(),
    );
    let _ = stream.write_all(response.as_bytes()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;

    async fn get(addr: std::net::SocketAddr, path: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(format!("GET {path} HTTP/1.1\r\nHost: x\r\n\r\n").as_bytes()).await.unwrap();
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf).await;
        let text = String::from_utf8_lossy(&buf).into_owned();
        let status: u16 = text.split_whitespace().nth(1).unwrap_or("0").parse().unwrap_or(0);
        let body = text.split("\r\n\r\n").nth(1).unwrap_or("").to_owned();
        (status, body)
    }

    #[tokio::test]
    async fn healthz_is_always_ok() {
        let store = Arc::new(Mutex::new(GatewayStore::open_in_memory().unwrap()));
        let readiness = Arc::new(Mutex::new(Readiness::not_ready()));
        let server = OpsHttpServer::start("127.0.0.1:0", readiness, store).await.unwrap();

        let (status, _) = get(server.local_addr(), "/healthz").await;
        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn readyz_reflects_flag() {
        let store = Arc::new(Mutex::new(GatewayStore::open_in_memory().unwrap()));
        let readiness = Arc::new(Mutex::new(Readiness::not_ready()));
        let server = OpsHttpServer::start("127.0.0.1:0", readiness.clone(), store).await.unwrap();

        let (status, _) = get(server.local_addr(), "/readyz").await;
        assert_eq!(status, 503);

        readiness.lock().await.mark_ready();
        let (status, _) = get(server.local_addr(), "/readyz").await;
        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn device_status_round_trips_as_json() {
        let mut store = GatewayStore::open_in_memory().unwrap();
        let cfg = slm_core::DeviceConfig::new("u1", "10.0.0.5", 3001, None, true, true, None, None, None, true).unwrap();
        store.upsert_device(&cfg).unwrap();
        store.ensure_status_row("u1").unwrap();
        let store = Arc::new(Mutex::new(store));
        let readiness = Arc::new(Mutex::new(Readiness::not_ready()));
        let server = OpsHttpServer::start("127.0.0.1:0", readiness, store).await.unwrap();

        let (status, body) = get(server.local_addr(), "/api/v1/devices/u1/status").await;
        assert_eq!(status, 200);
        assert!(body.contains("\"unit_id\":\"u1\""));
    }

    #[tokio::test]
    async fn unknown_device_status_is_404() {
        let store = Arc::new(Mutex::new(GatewayStore::open_in_memory().unwrap()));
        let readiness = Arc::new(Mutex::new(Readiness::not_ready()));
        let server = OpsHttpServer::start("127.0.0.1:0", readiness, store).await.unwrap();

        let (status, _) = get(server.local_addr(), "/api/v1/devices/nope/status").await;
        assert_eq!(status, 404);
    }
}
