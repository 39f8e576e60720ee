//! In-process transport.
//!
//! [`MemoryTransport`] opens links backed by unbounded channels. Every
//! opened link shows up on the paired [`MemoryGateway`] as a [`MemoryPeer`],
//! which plays the gateway side: it sends challenges, ticks, responses and
//! events, and can close the link at any point.
//!
//! Used to embed the client next to an in-process gateway and to drive the
//! session state machine deterministically in tests.
//!
//! # Example
//!
//! ```ignore
//! let (transport, mut gateway) = MemoryTransport::pair();
//! let client = GatewayClient::new(transport);
//!
//! tokio::spawn(async move {
//!     let mut peer = gateway.accept().await.unwrap();
//!     peer.accept_handshake(Duration::from_secs(30)).await.unwrap();
//! });
//!
//! client.connect(ConnectionConfig::new("ws://gateway.test")?).await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result, millis};
use crate::identifiers::RequestId;
use crate::protocol::{
    CHALLENGE_EVENT, CONNECT_METHOD, ConnectParams, ErrorShape, Event, Frame, HELLO_OK, HelloOk,
    PROTOCOL_VERSION, Policy, Request, Response, TICK_EVENT, now_millis, parse, serialize,
};

use super::{Link, Transport};

// ============================================================================
// Shared State
// ============================================================================

/// State shared between the transport and its gateway end.
struct MemoryShared {
    /// Number of upcoming opens to refuse.
    refuse_next: AtomicUsize,
    /// Refuse every open while set.
    refuse_all: AtomicBool,
    /// Time of every open attempt, refused or not.
    attempts: Mutex<Vec<Instant>>,
}

// ============================================================================
// MemoryTransport
// ============================================================================

/// Client end of the in-process transport.
#[derive(Clone)]
pub struct MemoryTransport {
    /// Hands newly opened peers to the gateway end.
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    shared: Arc<MemoryShared>,
}

impl MemoryTransport {
    /// Creates a transport and its gateway end.
    #[must_use]
    pub fn pair() -> (Self, MemoryGateway) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(MemoryShared {
            refuse_next: AtomicUsize::new(0),
            refuse_all: AtomicBool::new(false),
            attempts: Mutex::new(Vec::new()),
        });

        (
            Self {
                accept_tx,
                shared: Arc::clone(&shared),
            },
            MemoryGateway { accept_rx, shared },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, url: &Url) -> Result<Box<dyn Link>> {
        self.shared.attempts.lock().push(Instant::now());

        let refused = self.shared.refuse_all.load(Ordering::SeqCst)
            || self
                .shared
                .refuse_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if refused {
            debug!(%url, "In-memory gateway refused connection");
            return Err(Error::connection_failed(format!("{url} refused the connection")));
        }

        let (to_gateway, from_client) = mpsc::unbounded_channel();
        let (to_client, from_gateway) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            url: url.clone(),
            tx: Some(to_client),
            rx: from_client,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| Error::connection_failed("in-memory gateway has shut down"))?;

        Ok(Box::new(MemoryLink {
            tx: Some(to_gateway),
            rx: from_gateway,
        }))
    }
}

// ============================================================================
// MemoryLink
// ============================================================================

/// Client side of one in-memory link.
struct MemoryLink {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Link for MemoryLink {
    async fn send(&mut self, message: String) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::connection_closed("link already closed"))?;

        tx.send(message)
            .map_err(|_| Error::connection_closed("gateway end dropped the link"))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}

// ============================================================================
// MemoryGateway
// ============================================================================

/// Gateway end of the in-process transport.
pub struct MemoryGateway {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    shared: Arc<MemoryShared>,
}

impl MemoryGateway {
    /// Waits for the client to open the next link.
    ///
    /// Returns `None` once every [`MemoryTransport`] clone is dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Returns an already opened link without waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }

    /// Refuses the next `count` open attempts.
    pub fn refuse_next(&self, count: usize) {
        self.shared.refuse_next.store(count, Ordering::SeqCst);
    }

    /// Refuses every open attempt while `refuse` is set.
    pub fn refuse_all(&self, refuse: bool) {
        self.shared.refuse_all.store(refuse, Ordering::SeqCst);
    }

    /// Returns the time of every open attempt so far.
    #[must_use]
    pub fn open_attempts(&self) -> Vec<Instant> {
        self.shared.attempts.lock().clone()
    }

    /// Returns the number of open attempts so far.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.shared.attempts.lock().len()
    }
}

// ============================================================================
// MemoryPeer
// ============================================================================

/// Gateway side of one in-memory link.
pub struct MemoryPeer {
    url: Url,
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// URL the client opened.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Sends a raw text message to the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if either side closed the link.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::connection_closed("peer already closed"))?;

        tx.send(text.into())
            .map_err(|_| Error::connection_closed("client dropped the link"))
    }

    /// Sends a frame to the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if either side closed the link.
    pub fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.send_text(serialize(frame)?)
    }

    /// Sends an event to the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if either side closed the link.
    pub fn send_event(&self, event: impl Into<String>, payload: Value) -> Result<()> {
        self.send_frame(&Frame::Event(Event::new(event, payload)))
    }

    /// Sends a heartbeat tick.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if either side closed the link.
    pub fn tick(&self) -> Result<()> {
        self.send_event(TICK_EVENT, json!({ "ts": now_millis() }))
    }

    /// Answers a request successfully.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if either side closed the link.
    pub fn respond(&self, id: &RequestId, payload: Value) -> Result<()> {
        self.send_frame(&Frame::Response(Response::success(id.clone(), payload)))
    }

    /// Answers a request with an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if either side closed the link.
    pub fn respond_error(
        &self,
        id: &RequestId,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<()> {
        self.send_frame(&Frame::Response(Response::failure(
            id.clone(),
            ErrorShape::new(code, message),
        )))
    }

    /// Receives the next raw message from the client.
    ///
    /// Returns `None` once the client closed the link.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Receives and decodes the next frame from the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the client closed the link and
    /// [`Error::InvalidFrame`] if the message does not decode.
    pub async fn recv_frame(&mut self) -> Result<Frame> {
        let text = self
            .recv_text()
            .await
            .ok_or_else(|| Error::connection_closed("client closed the link"))?;
        parse(&text)
    }

    /// Receives the next request from the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFrame`] if the next frame is not a request.
    pub async fn recv_request(&mut self) -> Result<Request> {
        match self.recv_frame().await? {
            Frame::Request(request) => Ok(request),
            other => Err(Error::invalid_frame(format!(
                "expected request, got {}",
                other.kind()
            ))),
        }
    }

    /// Sends a `connect.challenge` event with `nonce`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if either side closed the link.
    pub fn send_challenge(&self, nonce: &str) -> Result<()> {
        self.send_event(CHALLENGE_EVENT, json!({ "nonce": nonce, "ts": now_millis() }))
    }

    /// Receives the client's `connect` request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFrame`] if the next request is not `connect`
    /// or its params do not decode.
    pub async fn recv_connect(&mut self) -> Result<(RequestId, ConnectParams)> {
        let request = self.recv_request().await?;
        if request.method != CONNECT_METHOD {
            return Err(Error::invalid_frame(format!(
                "expected connect, got {}",
                request.method
            )));
        }

        let params: ConnectParams = serde_json::from_value(request.params)?;
        Ok((request.id, params))
    }

    /// Runs the gateway side of a successful handshake advertising
    /// `tick_interval`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client misbehaves or closes the link.
    pub async fn accept_handshake(&mut self, tick_interval: Duration) -> Result<ConnectParams> {
        self.accept_handshake_with(hello_ok(PROTOCOL_VERSION, tick_interval))
            .await
    }

    /// Runs the gateway side of a handshake answered with `hello`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client misbehaves or closes the link.
    pub async fn accept_handshake_with(&mut self, hello: HelloOk) -> Result<ConnectParams> {
        self.send_challenge(&RequestId::generate().to_string())?;
        let (id, params) = self.recv_connect().await?;
        self.respond(&id, serde_json::to_value(&hello)?)?;
        Ok(params)
    }

    /// Runs the gateway side of a rejected handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the client misbehaves or closes the link.
    pub async fn reject_handshake(
        &mut self,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<ConnectParams> {
        self.send_challenge(&RequestId::generate().to_string())?;
        let (id, params) = self.recv_connect().await?;
        self.respond_error(&id, code, message)?;
        Ok(params)
    }

    /// Closes the gateway side of the link.
    pub fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }
}

/// Builds a `hello-ok` payload.
#[must_use]
pub fn hello_ok(protocol: u32, tick_interval: Duration) -> HelloOk {
    HelloOk {
        kind: Some(HELLO_OK.to_string()),
        protocol,
        server: None,
        policy: Some(Policy {
            tick_interval_ms: Some(millis(tick_interval)),
            max_payload: None,
        }),
        snapshot: Value::Null,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("ws://gateway.test").expect("url")
    }

    #[tokio::test]
    async fn test_messages_flow_both_ways() {
        let (transport, mut gateway) = MemoryTransport::pair();

        let mut link = transport.open(&url()).await.expect("open");
        let mut peer = gateway.accept().await.expect("peer");
        assert_eq!(peer.url(), &url());

        link.send("ping".into()).await.expect("send");
        assert_eq!(peer.recv_text().await.as_deref(), Some("ping"));

        peer.send_text("pong").expect("send");
        assert_eq!(link.recv().await.expect("message").expect("ok"), "pong");
    }

    #[tokio::test]
    async fn test_peer_close_ends_client_stream() {
        let (transport, mut gateway) = MemoryTransport::pair();

        let mut link = transport.open(&url()).await.expect("open");
        let mut peer = gateway.accept().await.expect("peer");

        peer.close();
        assert!(link.recv().await.is_none());
        assert!(peer.send_text("late").is_err());
    }

    #[tokio::test]
    async fn test_client_close_ends_peer_stream() {
        let (transport, mut gateway) = MemoryTransport::pair();

        let mut link = transport.open(&url()).await.expect("open");
        let mut peer = gateway.accept().await.expect("peer");

        link.close().await.expect("close");
        assert!(peer.recv_text().await.is_none());
        assert!(link.send("late".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_refuse_next_counts_down() {
        let (transport, gateway) = MemoryTransport::pair();
        gateway.refuse_next(2);

        assert!(transport.open(&url()).await.is_err());
        assert!(transport.open(&url()).await.is_err());
        assert!(transport.open(&url()).await.is_ok());
        assert_eq!(gateway.open_count(), 3);
    }

    #[tokio::test]
    async fn test_refuse_all_until_cleared() {
        let (transport, gateway) = MemoryTransport::pair();
        gateway.refuse_all(true);

        for _ in 0..3 {
            let err = transport.open(&url()).await.err().expect("refused");
            assert!(matches!(err, Error::ConnectionFailed { .. }));
        }

        gateway.refuse_all(false);
        assert!(transport.open(&url()).await.is_ok());
    }

    #[tokio::test]
    async fn test_open_fails_after_gateway_dropped() {
        let (transport, gateway) = MemoryTransport::pair();
        drop(gateway);

        assert!(transport.open(&url()).await.is_err());
    }

    #[tokio::test]
    async fn test_accept_ends_after_every_transport_dropped() {
        let (transport, mut gateway) = MemoryTransport::pair();
        let clone = transport.clone();

        let _link = clone.open(&url()).await.expect("open");
        drop(transport);
        drop(clone);

        assert!(gateway.accept().await.is_some(), "queued peer is still delivered");
        assert!(gateway.accept().await.is_none());
    }
}
