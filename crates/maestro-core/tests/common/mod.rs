//! Shared helpers for the maestro-core integration tests.

#![allow(dead_code)]

use maestro_core::protocol::{ReplyEnvelope, RequestEnvelope};
use maestro_core::{Connection, MaestroConfig, MemoryConnector, MemoryListener, MemoryPeer};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What the scripted backend does with one request.
pub enum Respond {
    Reply(ReplyEnvelope),
    /// Leave the request unanswered.
    Ignore,
    /// Close the connection without answering.
    HangUp,
}

/// A backend running on the far side of a memory transport.
pub struct ScriptedBackend {
    /// Every request received, in arrival order.
    pub requests: mpsc::UnboundedReceiver<RequestEnvelope>,
    task: JoinHandle<()>,
}

impl ScriptedBackend {
    /// Next request the backend saw, failing the test after a second.
    pub async fn next_request(&mut self) -> RequestEnvelope {
        tokio::time::timeout(Duration::from_secs(1), self.requests.recv())
            .await
            .expect("backend saw no request")
            .expect("backend stopped")
    }

    /// Assert that no further request arrives within a short window.
    pub async fn assert_idle(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(50), self.requests.recv()).await;
        assert!(
            !matches!(next, Ok(Some(_))),
            "unexpected request: {:?}",
            next
        );
    }
}

impl Drop for ScriptedBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Answer every request on `peer` with `respond`.
pub fn serve<F>(mut peer: MemoryPeer, mut respond: F) -> ScriptedBackend
where
    F: FnMut(&RequestEnvelope) -> Respond + Send + 'static,
{
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        while let Some(frame) = peer.recv().await {
            if frame == "pong" {
                continue;
            }
            let request: RequestEnvelope =
                serde_json::from_str(&frame).expect("client sent a malformed request");
            let _ = seen_tx.send(request.clone());

            match respond(&request) {
                Respond::Reply(reply) => {
                    peer.send(serde_json::to_string(&reply).expect("reply serializes"));
                }
                Respond::Ignore => {}
                Respond::HangUp => {
                    peer.close();
                    return;
                }
            }
        }
    });

    ScriptedBackend {
        requests: seen_rx,
        task,
    }
}

/// A backend that grants every reservation and acknowledges every release.
pub fn cooperative(peer: MemoryPeer) -> ScriptedBackend {
    let mut granted = 0u32;
    serve(peer, move |request| match request.action {
        maestro_core::Action::Reserve => {
            granted += 1;
            Respond::Reply(ReplyEnvelope::success(
                request.request_id,
                assignment_json(&format!("a{}", granted), "10.0.0.5", 11434),
            ))
        }
        maestro_core::Action::Release => {
            Respond::Reply(ReplyEnvelope::success(request.request_id, json!({})))
        }
    })
}

pub fn assignment_json(id: &str, host: &str, port: u16) -> Value {
    json!({
        "assignmentId": id,
        "host": host,
        "port": port,
        "expiresAt": "2030-01-01T00:00:00Z"
    })
}

pub fn test_config() -> MaestroConfig {
    MaestroConfig::builder("ws://backend.test/ws", "secret")
        .build()
        .expect("valid test config")
}

/// A connected client and the backend side of its transport.
pub async fn connected_pair(config: MaestroConfig) -> (Arc<Connection>, MemoryPeer, MemoryListener) {
    let (connector, mut listener) = MemoryConnector::pair();
    let connection = Arc::new(Connection::with_connector(config, Arc::new(connector)));
    connection.connect().await.expect("memory connect");
    let peer = listener.accept().await.expect("peer accepted");
    (connection, peer, listener)
}

/// Poll `check` until it holds, failing the test after about a second.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
