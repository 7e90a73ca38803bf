//! Loopback fixtures: a scripted lease backend and a minimal HTTP responder.

#![allow(dead_code)]

use maestro_core::protocol::{ReplyEnvelope, RequestEnvelope};
use maestro_core::{Action, Connection, LeaseClient, MaestroConfig, MemoryConnector};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Lease backend that assigns `127.0.0.1:port` and records every request.
pub struct LeaseBackend {
    pub leases: LeaseClient,
    requests: mpsc::UnboundedReceiver<RequestEnvelope>,
}

impl LeaseBackend {
    pub async fn start(port: u16) -> Self {
        let (connector, mut listener) = MemoryConnector::pair();
        let config = MaestroConfig::builder("ws://backend.test/ws", "secret")
            .build()
            .unwrap();
        let connection = Arc::new(Connection::with_connector(config, Arc::new(connector)));
        connection.connect().await.unwrap();
        let mut peer = listener.accept().await.unwrap();

        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut granted = 0u32;
            while let Some(frame) = peer.recv().await {
                if frame == "pong" {
                    continue;
                }
                let request: RequestEnvelope = serde_json::from_str(&frame).unwrap();
                let reply = match request.action {
                    Action::Reserve => {
                        granted += 1;
                        ReplyEnvelope::success(
                            request.request_id,
                            json!({
                                "assignmentId": format!("a{}", granted),
                                "host": "127.0.0.1",
                                "port": port,
                                "expiresAt": "2030-01-01T00:00:00Z"
                            }),
                        )
                    }
                    Action::Release => ReplyEnvelope::success(request.request_id, json!({})),
                };
                let _ = seen_tx.send(request);
                peer.send(serde_json::to_string(&reply).unwrap());
            }
        });

        Self {
            leases: LeaseClient::new(connection),
            requests: seen_rx,
        }
    }

    pub async fn next_request(&mut self) -> RequestEnvelope {
        tokio::time::timeout(Duration::from_secs(2), self.requests.recv())
            .await
            .expect("lease backend saw no request")
            .expect("lease backend stopped")
    }

    pub async fn assert_idle(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(50), self.requests.recv()).await;
        assert!(!matches!(next, Ok(Some(_))), "unexpected request: {:?}", next);
    }
}

/// One canned HTTP response.
pub struct Canned {
    pub status: u16,
    pub chunks: Vec<String>,
    /// Keep the connection open after the last chunk instead of closing it.
    pub hold_open: bool,
}

impl Canned {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            chunks: vec![body.to_string()],
            hold_open: false,
        }
    }

    pub fn ndjson(lines: &[Value]) -> Self {
        Self {
            status: 200,
            chunks: lines.iter().map(|line| format!("{}\n", line)).collect(),
            hold_open: false,
        }
    }

    pub fn held(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

/// A request as seen by the HTTP responder.
#[derive(Debug)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub body: Value,
}

/// HTTP/1.1 responder answering one connection per canned response, in order.
pub struct HttpResponder {
    pub port: u16,
    requests: mpsc::UnboundedReceiver<Recorded>,
}

impl HttpResponder {
    pub async fn start(responses: Vec<Canned>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for canned in responses {
                let (socket, _) = listener.accept().await.unwrap();
                let seen_tx = seen_tx.clone();
                tokio::spawn(async move {
                    serve_one(socket, canned, seen_tx).await;
                });
            }
        });

        Self {
            port,
            requests: seen_rx,
        }
    }

    pub async fn next_request(&mut self) -> Recorded {
        tokio::time::timeout(Duration::from_secs(2), self.requests.recv())
            .await
            .expect("HTTP responder saw no request")
            .expect("HTTP responder stopped")
    }
}

async fn serve_one(mut socket: TcpStream, canned: Canned, seen: mpsc::UnboundedSender<Recorded>) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = find(&buffer, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buffer[..head_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buffer.len() < head_end + content_length {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
    let body_bytes = &buffer[head_end..(head_end + content_length).min(buffer.len())];
    let body = serde_json::from_slice(body_bytes).unwrap_or(Value::Null);
    let _ = seen.send(Recorded { method, path, body });

    let reason = match canned.status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    };
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/x-ndjson\r\nConnection: close\r\n",
        canned.status, reason
    );
    if !canned.hold_open {
        let total: usize = canned.chunks.iter().map(String::len).sum();
        head.push_str(&format!("Content-Length: {}\r\n", total));
    }
    head.push_str("\r\n");

    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    for chunk in &canned.chunks {
        if socket.write_all(chunk.as_bytes()).await.is_err() {
            return;
        }
        let _ = socket.flush().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    if canned.hold_open {
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
    let _ = socket.shutdown().await;
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}
