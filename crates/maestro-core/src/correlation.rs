//! Correlation table: matches asynchronous replies to the callers awaiting them.
//!
//! Flow:
//! 1. The caller calls [`CorrelationTable::register`] and gets an id plus a
//!    [`PendingReply`] handle.
//! 2. The caller sends a request envelope tagged with that id.
//! 3. The connection reader calls [`CorrelationTable::settle`] when the reply
//!    arrives, which removes the entry and completes the handle.
//! 4. The caller awaits the handle.
//!
//! Ids start at 1, strictly increase and are never reused. Id allocation and
//! table insertion happen under one short lock; no lock is held across I/O.
//! Dropping a [`PendingReply`] before it completes removes its entry.

use crate::protocol::Settlement;
use crate::{MaestroError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

type Completion = oneshot::Sender<Result<Option<Value>>>;

struct PendingEntry {
    completion: Completion,
    registered_at: Instant,
}

struct TableInner {
    next_id: u64,
    pending: HashMap<u64, PendingEntry>,
}

/// Counters describing the table's lifetime activity.
#[derive(Debug, Default)]
pub struct TableStats {
    pub registered: AtomicU64,
    pub settled: AtomicU64,
    pub unknown_replies: AtomicU64,
    pub abandoned: AtomicU64,
    pub timed_out: AtomicU64,
    pub failed: AtomicU64,
}

/// Plain copy of [`TableStats`] at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStatsSnapshot {
    pub registered: u64,
    pub settled: u64,
    pub unknown_replies: u64,
    pub abandoned: u64,
    pub timed_out: u64,
    pub failed: u64,
}

impl TableStats {
    pub fn snapshot(&self) -> TableStatsSnapshot {
        TableStatsSnapshot {
            registered: self.registered.load(Ordering::Relaxed),
            settled: self.settled.load(Ordering::Relaxed),
            unknown_replies: self.unknown_replies.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Table of outstanding requests keyed by correlation id.
pub struct CorrelationTable {
    inner: Mutex<TableInner>,
    stats: TableStats,
}

impl std::fmt::Debug for CorrelationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationTable")
            .field("pending", &self.pending_count())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl CorrelationTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(TableInner {
                next_id: 1,
                pending: HashMap::new(),
            }),
            stats: TableStats::default(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, TableInner> {
        // Critical sections never panic mid-mutation, so a poisoned table is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate the next correlation id and an unsettled completion slot.
    pub fn register(self: &Arc<Self>) -> (u64, PendingReply) {
        let (tx, rx) = oneshot::channel();

        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.pending.insert(
                id,
                PendingEntry {
                    completion: tx,
                    registered_at: Instant::now(),
                },
            );
            id
        };
        self.stats.registered.fetch_add(1, Ordering::Relaxed);

        debug!(request_id = id, "Registered pending request");

        let reply = PendingReply {
            id,
            receiver: rx,
            table: Arc::downgrade(self),
            finished: false,
        };
        (id, reply)
    }

    /// Settle the entry for `request_id` with the backend's outcome.
    ///
    /// Returns [`MaestroError::UnknownReply`] when no entry is pending under
    /// that id (never registered, already settled, timed out or abandoned).
    /// Other entries are never affected.
    pub fn settle(&self, request_id: u64, settlement: Settlement) -> Result<()> {
        let Some(entry) = self.lock().pending.remove(&request_id) else {
            self.stats.unknown_replies.fetch_add(1, Ordering::Relaxed);
            return Err(MaestroError::UnknownReply { request_id });
        };

        self.stats.settled.fetch_add(1, Ordering::Relaxed);
        let elapsed = entry.registered_at.elapsed();
        if entry.completion.send(settlement.into_result()).is_err() {
            debug!(request_id, "Pending reply dropped before settlement");
        } else {
            debug!(
                request_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "Settled pending request"
            );
        }
        Ok(())
    }

    /// Fail every pending entry, e.g. after the connection was lost.
    ///
    /// Returns the number of entries failed.
    pub fn fail_all(&self, make_error: impl Fn() -> MaestroError) -> usize {
        let drained: Vec<(u64, PendingEntry)> = self.lock().pending.drain().collect();
        let count = drained.len();

        for (request_id, entry) in drained {
            debug!(request_id, "Failing pending request");
            let _ = entry.completion.send(Err(make_error()));
        }

        if count > 0 {
            self.stats.failed.fetch_add(count as u64, Ordering::Relaxed);
        }
        count
    }

    /// Remove an entry whose caller gave up waiting. Counted as timed out only.
    fn expire(&self, request_id: u64) -> bool {
        if self.lock().pending.remove(&request_id).is_some() {
            self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Remove an entry without completing it. Returns false if it was not pending.
    pub fn abandon(&self, request_id: u64) -> bool {
        if self.lock().pending.remove(&request_id).is_some() {
            self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
            debug!(request_id, "Abandoned pending request");
            true
        } else {
            false
        }
    }

    /// True while `request_id` is registered and not yet settled.
    pub fn is_pending(&self, request_id: u64) -> bool {
        self.lock().pending.contains_key(&request_id)
    }

    /// Number of requests currently awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn stats(&self) -> &TableStats {
        &self.stats
    }
}

/// Caller-side handle to one pending request.
///
/// Resolves exactly once with the settled outcome. Dropping it early removes
/// the entry from the table; other entries are untouched.
#[must_use = "dropping a PendingReply abandons the request"]
pub struct PendingReply {
    id: u64,
    receiver: oneshot::Receiver<Result<Option<Value>>>,
    table: Weak<CorrelationTable>,
    finished: bool,
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish()
    }
}

impl PendingReply {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Await the outcome, failing with [`MaestroError::Timeout`] after `timeout`.
    ///
    /// A timed-out entry is removed from the table, so a late reply is
    /// treated as unknown.
    pub async fn wait(self, timeout: Option<Duration>) -> Result<Option<Value>> {
        let Some(limit) = timeout else {
            return self.await;
        };

        let mut reply = self;
        match tokio::time::timeout(limit, &mut reply).await {
            Ok(outcome) => outcome,
            Err(_) => {
                reply.finished = true;
                let expired = reply
                    .table
                    .upgrade()
                    .is_some_and(|table| table.expire(reply.id));
                if !expired {
                    // Settled between the deadline and the removal.
                    if let Ok(outcome) = reply.receiver.try_recv() {
                        return outcome;
                    }
                }
                warn!(
                    request_id = reply.id,
                    timeout_ms = limit.as_millis() as u64,
                    "Request timed out"
                );
                Err(MaestroError::Timeout(limit))
            }
        }
    }
}

impl Future for PendingReply {
    type Output = Result<Option<Value>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(outcome) => {
                self.finished = true;
                // A dropped sender means the table went away without settling.
                Poll::Ready(outcome.unwrap_or(Err(MaestroError::ConnectionLost)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(table) = self.table.upgrade() {
            table.abandon(self.id);
        }
    }
}
