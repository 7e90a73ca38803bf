//! Reader and writer tasks driving one established transport.
//!
//! Each `connect` starts one writer task and one reader task. The writer owns
//! the sink and drains two queues: an unbounded control queue for heartbeat
//! answers, always served first, and the bounded outbound queue for requests.
//! The reader owns the stream, answers heartbeats and settles replies; it
//! never waits on the bounded queue, so callers filling it cannot stall reply
//! delivery. Both tasks carry the generation they were started for, so a task
//! from a replaced transport can never tear down its successor.

use super::ConnectionEvent;
use crate::config::ConnectionDefaults;
use crate::correlation::CorrelationTable;
use crate::protocol::{decode_inbound, Inbound};
use crate::transport::{FrameSink, FrameStream};
use crate::{MaestroError, Result};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, warn};

/// Longest prefix of an undecodable frame echoed into the log.
const LOGGED_FRAME_PREFIX: usize = 200;

/// One frame queued for the writer.
pub(super) struct Outbound {
    pub frame: String,
    /// Completed with the write result; heartbeat answers carry none.
    pub ack: Option<oneshot::Sender<Result<()>>>,
}

/// Handles to the live transport of one generation.
pub(super) struct Link {
    pub generation: u64,
    pub outbound: mpsc::Sender<Outbound>,
    /// Set to `true` to stop the reader.
    pub shutdown: watch::Sender<bool>,
}

/// State shared between the connection and its I/O tasks.
pub(super) struct Shared {
    pub connected: AtomicBool,
    pub generation: AtomicU64,
    pub heartbeats: AtomicU64,
    pub table: Arc<CorrelationTable>,
    pub events: broadcast::Sender<ConnectionEvent>,
    fail_pending_on_disconnect: bool,
    link: Mutex<Option<Link>>,
}

impl Shared {
    pub fn new(
        table: Arc<CorrelationTable>,
        events: broadcast::Sender<ConnectionEvent>,
        fail_pending_on_disconnect: bool,
    ) -> Self {
        Self {
            connected: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
            table,
            events,
            fail_pending_on_disconnect,
            link: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make `link` the live transport and mark the connection up.
    pub fn install(&self, link: Link) {
        let mut slot = self.slot();
        *slot = Some(link);
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn current_generation(&self) -> Option<u64> {
        self.slot().as_ref().map(|link| link.generation)
    }

    pub fn outbound(&self) -> Option<mpsc::Sender<Outbound>> {
        self.slot().as_ref().map(|link| link.outbound.clone())
    }

    /// Tear down the transport of `generation` if it is still the live one.
    pub fn handle_loss(&self, generation: u64) {
        let removed = {
            let mut slot = self.slot();
            if slot.as_ref().map(|link| link.generation) == Some(generation) {
                self.connected.store(false, Ordering::SeqCst);
                slot.take()
            } else {
                None
            }
        };

        // Torn down outside the lock: stops the reader and, once drained, the writer.
        let Some(link) = removed else {
            return;
        };
        let _ = link.shutdown.send(true);
        drop(link);

        warn!(generation, "Backend connection closed");
        let _ = self.events.send(ConnectionEvent::Closed);

        if self.fail_pending_on_disconnect {
            let failed = self.table.fail_all(|| MaestroError::ConnectionLost);
            if failed > 0 {
                warn!(failed, "Failed pending requests after connection loss");
            }
        }
    }
}

pub(super) async fn write_loop(
    mut sink: FrameSink,
    mut control: mpsc::UnboundedReceiver<String>,
    mut outbound: mpsc::Receiver<Outbound>,
    shared: Arc<Shared>,
    generation: u64,
) {
    loop {
        let Outbound { frame, ack } = tokio::select! {
            biased;
            Some(frame) = control.recv() => Outbound { frame, ack: None },
            next = outbound.recv() => match next {
                Some(next) => next,
                None => break,
            },
        };

        match sink.send(frame).await {
            Ok(()) => {
                if let Some(ack) = ack {
                    let _ = ack.send(Ok(()));
                }
            }
            Err(e) => {
                warn!(generation, error = %e, "Failed to write frame");
                let _ = shared.events.send(ConnectionEvent::Error(e.to_string()));
                if let Some(ack) = ack {
                    let _ = ack.send(Err(e));
                }
                shared.handle_loss(generation);
                return;
            }
        }
    }

    if let Err(e) = sink.close().await {
        debug!(generation, error = %e, "Error while closing transport");
    }
    debug!(generation, "Writer stopped");
}

pub(super) async fn read_loop(
    mut stream: FrameStream,
    control: mpsc::UnboundedSender<String>,
    mut shutdown: watch::Receiver<bool>,
    shared: Arc<Shared>,
    generation: u64,
) {
    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = shutdown.changed() => {
                debug!(generation, "Reader stopped by shutdown");
                break;
            }
        };

        match next {
            Some(Ok(frame)) => dispatch(&shared, &control, frame),
            Some(Err(e)) => {
                warn!(generation, error = %e, "Failed to read frame");
                let _ = shared.events.send(ConnectionEvent::Error(e.to_string()));
                break;
            }
            None => {
                debug!(generation, "Transport ended");
                break;
            }
        }
    }

    shared.handle_loss(generation);
}

/// Handle one inbound frame.
fn dispatch(shared: &Shared, control: &mpsc::UnboundedSender<String>, frame: String) {
    match decode_inbound(&frame) {
        Ok(Inbound::Heartbeat) => {
            shared.heartbeats.fetch_add(1, Ordering::Relaxed);
            debug!("Answering heartbeat");
            let pong = ConnectionDefaults::HEARTBEAT_RESPONSE.to_string();
            if control.send(pong).is_err() {
                debug!("Heartbeat answer dropped, writer has stopped");
            }
        }
        Ok(Inbound::Reply(reply)) => {
            let (request_id, settlement) = reply.into_settlement();
            if let Err(e) = shared.table.settle(request_id, settlement) {
                warn!(request_id, error = %e, "Received reply with no matching request");
            }
        }
        Err(e) => {
            let shown: String = frame.chars().take(LOGGED_FRAME_PREFIX).collect();
            warn!(error = %e, frame = %shown, "Dropping undecodable frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ReplyEnvelope;
    use serde_json::json;
    use std::time::Duration;

    fn shared(table: Arc<CorrelationTable>) -> Arc<Shared> {
        let (events, _) = broadcast::channel(8);
        Arc::new(Shared::new(table, events, true))
    }

    #[tokio::test]
    async fn test_reader_settles_replies_without_a_draining_writer() {
        let table = CorrelationTable::new();
        let shared = shared(table.clone());
        // Nothing drains the control queue, as if the writer were stuck.
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let (id, reply) = table.register();
        let answer = serde_json::to_string(&ReplyEnvelope::success(id, json!("granted"))).unwrap();
        let mut frames: Vec<Result<String>> = (0..100).map(|_| Ok("ping".to_string())).collect();
        frames.push(Ok(answer));
        let stream: FrameStream =
            Box::pin(futures::stream::iter(frames).chain(futures::stream::pending()));

        let reader = tokio::spawn(read_loop(stream, control_tx, shutdown_rx, shared.clone(), 1));

        let outcome = reply.wait(Some(Duration::from_secs(5))).await;
        assert_eq!(outcome.unwrap(), Some(json!("granted")));
        assert_eq!(shared.heartbeats.load(Ordering::Relaxed), 100);
        assert_eq!(control_rx.recv().await.as_deref(), Some("pong"));
        reader.abort();
    }

    #[tokio::test]
    async fn test_writer_sends_heartbeat_answers_first() {
        let (sink_tx, mut sink_rx) = futures::channel::mpsc::unbounded::<String>();
        let sink: FrameSink = Box::pin(sink_tx.sink_map_err(MaestroError::transport));

        let (outbound_tx, outbound_rx) = mpsc::channel(4);
        let (ack_tx, ack_rx) = oneshot::channel();
        outbound_tx
            .send(Outbound {
                frame: "request".to_string(),
                ack: Some(ack_tx),
            })
            .await
            .unwrap();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        control_tx.send("pong".to_string()).unwrap();
        drop(control_tx);
        drop(outbound_tx);

        write_loop(sink, control_rx, outbound_rx, shared(CorrelationTable::new()), 1).await;

        assert_eq!(sink_rx.next().await.as_deref(), Some("pong"));
        assert_eq!(sink_rx.next().await.as_deref(), Some("request"));
        assert!(ack_rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_loss_signals_reader_shutdown() {
        let shared = shared(CorrelationTable::new());
        let (outbound, _outbound_rx) = mpsc::channel(1);
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        shared.install(Link {
            generation: 3,
            outbound,
            shutdown,
        });

        shared.handle_loss(3);

        assert!(shutdown_rx.has_changed().unwrap_or(true));
        assert!(*shutdown_rx.borrow_and_update());
        assert!(!shared.connected.load(Ordering::SeqCst));
    }
}
