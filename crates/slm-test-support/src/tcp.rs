//! A scripted stand-in for the device's ASCII command/stream TCP port.
//!
//! Each accepted connection is treated as one command exchange, matching
//! the real device's and the Device Client's one-connection-per-command
//! convention: read a CRLF-terminated command line, look up its next
//! scripted reply, write it back, close.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Scripted replies keyed by the exact command text the client sends
/// (without CRLF). Each command's replies are consumed in order; once
/// exhausted, the last queued reply repeats.
#[derive(Debug, Default, Clone)]
pub struct TcpFixture {
    replies: HashMap<String, VecDeque<Vec<u8>>>,
}

impl TcpFixture {
    pub fn new() -> Self {
        TcpFixture::default()
    }

    /// Queue `reply` (the full wire bytes, e.g. `b"R+0000\r\n87\r\n"`) as the
    /// next response to `command`.
    pub fn on(mut self, command: impl Into<String>, reply: impl Into<Vec<u8>>) -> Self {
        self.replies.entry(command.into()).or_default().push_back(reply.into());
        self
    }
}

/// Start the stub on an ephemeral port, returning its address and a handle
/// that keeps running until dropped/aborted.
pub async fn spawn_mock_tcp(fixture: TcpFixture) -> (String, u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock tcp device");
    let addr = listener.local_addr().unwrap();
    let replies = Arc::new(Mutex::new(fixture.replies));

    let handle = tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let replies = replies.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 512];
                let n = match socket.read(&mut buf).await {
                    Ok(n) if n > 0 => n,
                    _ => return,
                };
                let command = String::from_utf8_lossy(&buf[..n]);
                let command = command.trim_end_matches(['\r', '\n']);

                let reply = {
                    let mut replies = replies.lock().await;
                    match replies.get_mut(command) {
                        Some(queue) if queue.len() > 1 => queue.pop_front(),
                        Some(queue) => queue.front().cloned(),
                        None => None,
                    }
                };
                let reply = reply.unwrap_or_else(|| b"R+0001\r\n".to_vec());
                let _ = socket.write_all(&reply).await;
            });
        }
    });

    (addr.ip().to_string(), addr.port(), handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn replies_to_scripted_command() {
        let fixture = TcpFixture::new().on("Battery Level?", b"R+0000\r\n87\r\n".to_vec());
        let (host, port, _handle) = spawn_mock_tcp(fixture).await;

        let mut stream = TcpStream::connect((host.as_str(), port)).await.unwrap();
        stream.write_all(b"Battery Level?\r\n").await.unwrap();
        let mut buf = vec![0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"R+0000\r\n87\r\n");
    }

    #[tokio::test]
    async fn unscripted_command_gets_unrecognized_code() {
        let fixture = TcpFixture::new();
        let (host, port, _handle) = spawn_mock_tcp(fixture).await;

        let mut stream = TcpStream::connect((host.as_str(), port)).await.unwrap();
        stream.write_all(b"Nonsense\r\n").await.unwrap();
        let mut buf = vec![0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"R+0001\r\n");
    }
}
