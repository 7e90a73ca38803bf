//! Streaming and non-streaming results of downstream calls.
//!
//! A call that asked for a stream yields [`Streamable::Stream`]; the stream
//! owns the lease it was made under and releases it when it ends or is
//! dropped. Anything else yields [`Streamable::Single`].

use bytes::BytesMut;
use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use maestro_core::{LeaseGuard, MaestroError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

use crate::cancel::CancellationToken;

/// Items decoded from a streamed response body.
pub type ResponseStream<T> = BoxStream<'static, Result<T>>;

/// Result of a call that can answer with one value or a stream of values.
#[derive(Debug)]
pub enum Streamable<T> {
    Single(T),
    Stream(LeasedStream<T>),
}

impl<T> Streamable<T> {
    pub fn is_stream(&self) -> bool {
        matches!(self, Streamable::Stream(_))
    }

    pub fn into_single(self) -> Option<T> {
        match self {
            Streamable::Single(value) => Some(value),
            Streamable::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<LeasedStream<T>> {
        match self {
            Streamable::Single(_) => None,
            Streamable::Stream(stream) => Some(stream),
        }
    }

    /// Every value the call produces, draining a stream to its end.
    pub async fn collect(self) -> Result<Vec<T>> {
        match self {
            Streamable::Single(value) => Ok(vec![value]),
            Streamable::Stream(stream) => stream.try_collect().await,
        }
    }
}

/// A response stream that holds a lease until it is exhausted or dropped.
pub struct LeasedStream<T> {
    inner: ResponseStream<T>,
    lease: Option<LeaseGuard>,
}

impl<T> std::fmt::Debug for LeasedStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeasedStream")
            .field(
                "assignment_id",
                &self.lease.as_ref().map(|lease| &lease.assignment().assignment_id),
            )
            .finish_non_exhaustive()
    }
}

impl<T> LeasedStream<T> {
    /// A stream with no lease attached.
    pub fn unleased(inner: ResponseStream<T>) -> Self {
        Self { inner, lease: None }
    }

    /// Attach the lease the stream runs under.
    pub fn with_lease(mut self, lease: LeaseGuard) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Whether the lease is still held.
    pub fn holds_lease(&self) -> bool {
        self.lease.is_some()
    }

    fn release(&mut self) {
        if let Some(lease) = self.lease.take() {
            debug!(
                assignment_id = %lease.assignment().assignment_id,
                "Stream finished, releasing lease"
            );
            lease.release_detached();
        }
    }
}

impl<T> Stream for LeasedStream<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let next = this.inner.poll_next_unpin(cx);
        if let Poll::Ready(None) = next {
            this.release();
        }
        next
    }
}

impl<T> Drop for LeasedStream<T> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Decode a newline-delimited JSON body into typed items.
///
/// A line carrying an `error` field ends the stream with that error.
/// Cancelling `token` ends it with [`MaestroError::Cancelled`].
pub fn ndjson_stream<S, E, T>(body: S, token: CancellationToken) -> ResponseStream<T>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
    T: DeserializeOwned + Send + 'static,
{
    struct State<B> {
        body: Pin<Box<B>>,
        buffer: BytesMut,
        token: CancellationToken,
        done: bool,
    }

    let state = State {
        body: Box::pin(body),
        buffer: BytesMut::new(),
        token,
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }

            if let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
                let line = state.buffer.split_to(pos + 1);
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                let item = decode_line(&line);
                state.done = item.is_err();
                return Some((item, state));
            }

            let chunk = tokio::select! {
                _ = state.token.cancelled() => {
                    debug!("Stream cancelled");
                    state.done = true;
                    return Some((Err(MaestroError::Cancelled), state));
                }
                chunk = state.body.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => state.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    state.done = true;
                    let err = MaestroError::Network {
                        message: format!("Failed to read response stream: {}", e),
                        status: None,
                    };
                    return Some((Err(err), state));
                }
                None => {
                    state.done = true;
                    let rest = state.buffer.split();
                    if rest.iter().all(u8::is_ascii_whitespace) {
                        return None;
                    }
                    return Some((decode_line(&rest), state));
                }
            }
        }
    })
    .boxed()
}

fn decode_line<T: DeserializeOwned>(line: &[u8]) -> Result<T> {
    let value: Value = serde_json::from_slice(line).map_err(|e| {
        MaestroError::protocol(format!("undecodable stream line: {}", e), Some(e))
    })?;

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        warn!(error, "Backend reported an error mid-stream");
        return Err(MaestroError::Remote(error.to_string()));
    }

    serde_json::from_value(value)
        .map_err(|e| MaestroError::protocol(format!("unexpected stream item: {}", e), Some(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        n: u32,
    }

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = std::result::Result<Bytes, String>> {
        futures::stream::iter(
            parts
                .iter()
                .map(|part| Ok(Bytes::from_static(part.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let body = chunks(&["{\"n\":1}\n{\"n\"", ":2}\n\n{\"n\":3}"]);
        let items: Vec<Item> = ndjson_stream(body, CancellationToken::new())
            .try_collect()
            .await
            .unwrap();

        assert_eq!(items, vec![Item { n: 1 }, Item { n: 2 }, Item { n: 3 }]);
    }

    #[tokio::test]
    async fn test_error_line_ends_stream() {
        let body = chunks(&["{\"n\":1}\n{\"error\":\"model not found\"}\n{\"n\":2}\n"]);
        let items: Vec<Result<Item>> = ndjson_stream(body, CancellationToken::new())
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &Item { n: 1 });
        assert!(matches!(&items[1], Err(MaestroError::Remote(msg)) if msg == "model not found"));
    }

    #[tokio::test]
    async fn test_cancelled_stream_ends_with_cancelled() {
        let token = CancellationToken::new();
        let body = chunks(&["{\"n\":1}\n"]).chain(futures::stream::pending());
        let mut stream = ndjson_stream::<_, _, Item>(body, token.clone());

        assert_eq!(stream.next().await.unwrap().unwrap(), Item { n: 1 });
        token.cancel();
        assert!(matches!(stream.next().await, Some(Err(MaestroError::Cancelled))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_single_collects_to_one_item() {
        let values = Streamable::Single(5).collect().await.unwrap();
        assert_eq!(values, vec![5]);
    }

    #[tokio::test]
    async fn test_unleased_stream_collects() {
        let inner: ResponseStream<u32> = futures::stream::iter(vec![Ok(1), Ok(2)]).boxed();
        let streamable = Streamable::Stream(LeasedStream::unleased(inner));
        assert!(streamable.is_stream());
        assert_eq!(streamable.collect().await.unwrap(), vec![1, 2]);
    }
}
