//! WebSocket transport.
//!
//! Binds the [`Transport`] interface to `tokio-tungstenite`. Text frames are
//! passed through; binary frames are accepted when they hold UTF-8; ping and
//! pong are answered by tungstenite and skipped here.
//!
//! `wss://` URLs need the crate's `tls` feature.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};

use super::{Link, Transport};

// ============================================================================
// Types
// ============================================================================

/// Client side WebSocket stream.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// WebSocketTransport
// ============================================================================

/// Opens WebSocket links.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Creates a WebSocket transport.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &Url) -> Result<Box<dyn Link>> {
        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::connection_failed(format!("WebSocket connect to {url} failed: {e}")))?;

        debug!(%url, status = %response.status(), "WebSocket connection established");

        Ok(Box::new(WebSocketLink { stream }))
    }
}

// ============================================================================
// WebSocketLink
// ============================================================================

/// An open WebSocket link.
struct WebSocketLink {
    stream: WsStream,
}

#[async_trait]
impl Link for WebSocketLink {
    async fn send(&mut self, message: String) -> Result<()> {
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| Error::connection_closed(format!("WebSocket send failed: {e}")))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),

                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => warn!(len = bytes.len(), "Dropping non UTF-8 binary frame"),
                },

                Ok(Message::Close(frame)) => {
                    debug!(?frame, "WebSocket closed by remote");
                    return None;
                }

                // Ping, Pong and raw frames
                Ok(other) => trace!(?other, "Skipping control frame"),

                Err(e) => {
                    return Some(Err(Error::connection_closed(format!(
                        "WebSocket error: {e}"
                    ))));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| Error::connection_closed(format!("WebSocket close failed: {e}")))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_unreachable_endpoint_fails() {
        // Bind and drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let url = Url::parse(&format!("ws://127.0.0.1:{port}")).expect("url");
        let result = WebSocketTransport::new().open(&url).await;

        assert!(matches!(result, Err(Error::ConnectionFailed { .. })));
    }

    #[tokio::test]
    async fn test_link_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            while let Some(Ok(message)) = ws.next().await {
                if message.is_text() {
                    ws.send(message).await.expect("echo");
                } else if message.is_close() {
                    break;
                }
            }
        });

        let url = Url::parse(&format!("ws://127.0.0.1:{port}")).expect("url");
        let mut link = WebSocketTransport::new().open(&url).await.expect("open");

        link.send("hello".to_string()).await.expect("send");
        let echoed = link.recv().await.expect("message").expect("ok");
        assert_eq!(echoed, "hello");

        link.close().await.expect("close");
        server.await.expect("server task");
    }
}
