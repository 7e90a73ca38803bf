//! WebSocket transport built on `tokio-tungstenite`.
//!
//! Protocol-level ping/pong and close handshakes are answered by tungstenite
//! itself; only text (and UTF-8 binary) messages reach the supervisor.

use super::{Connector, TransportLink};
use crate::{MaestroError, Result};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use tracing::debug;
use url::Url;

/// Connects to the backend over `ws://` or `wss://`.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url, token: &str) -> Result<TransportLink> {
        let mut request = url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
            MaestroError::Config {
                message: "API token contains characters not allowed in a header".to_string(),
            }
        })?;
        request.headers_mut().insert("Authorization", bearer);

        let (socket, response) = connect_async(request).await?;
        debug!(status = %response.status(), "WebSocket handshake complete");

        let (write, read) = socket.split();

        let sink = write
            .with(|text: String| async move {
                Ok::<_, tokio_tungstenite::tungstenite::Error>(Message::Text(text.into()))
            })
            .sink_map_err(MaestroError::from);

        let stream = futures::stream::unfold(read, |mut read| async move {
            loop {
                match read.next().await? {
                    Ok(Message::Text(text)) => return Some((Ok(text.to_string()), read)),
                    Ok(Message::Binary(bytes)) => {
                        let frame = String::from_utf8(bytes.to_vec()).map_err(|e| {
                            MaestroError::protocol(format!("binary frame is not UTF-8: {}", e), None)
                        });
                        return Some((frame, read));
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "Backend closed the WebSocket");
                        return None;
                    }
                    Ok(_) => continue,
                    Err(e) => return Some((Err(MaestroError::from(e)), read)),
                }
            }
        });

        Ok(TransportLink {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
