//! Public client handle.
//!
//! [`GatewayClient`] is a cheap, cloneable handle onto one session driver.
//! The driver is spawned on construction and stops once every handle is
//! dropped.
//!
//! # Example
//!
//! ```ignore
//! use gateway_client::{ConnectionConfig, GatewayClient, Token};
//! use serde_json::json;
//!
//! let client = GatewayClient::websocket();
//! client
//!     .connect(ConnectionConfig::local()?.with_token(Token::new("…")?))
//!     .await?;
//!
//! client.on("chat.*", |event| println!("{}: {}", event.event, event.payload));
//! let reply = client.request("chat.send", json!({ "text": "hello" })).await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::error::{Error, Result};
use crate::identifiers::{RequestId, SubscriptionId};
use crate::protocol::{Event, HEALTH_METHOD, Request};
use crate::transport::{Transport, WebSocketTransport};

use super::config::ConnectionConfig;
use super::dispatcher::{EventFilter, Subscription};
use super::driver::{Command, Driver, Shared};
use super::heartbeat::HeartbeatHealth;
use super::status::{ConnectionStatus, StatusEvent};

// ============================================================================
// SuspendMode
// ============================================================================

/// What to do with the transport while the application is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendMode {
    /// Keep the link open but stop expecting heartbeats.
    KeepTransport,
    /// Close the link; `resume()` reconnects with the same configuration.
    CloseTransport,
}

// ============================================================================
// GatewayClient
// ============================================================================

/// Handle onto a gateway session.
///
/// # Thread Safety
///
/// `GatewayClient` is `Send + Sync` and cheap to clone; all clones drive
/// the same session.
#[derive(Clone)]
pub struct GatewayClient {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayClient")
            .field("status", &self.status())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl GatewayClient {
    /// Creates a client over `transport` and spawns its driver.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(transport: impl Transport) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());

        let driver = Driver::new(Arc::new(transport), command_rx, Arc::clone(&shared));
        tokio::spawn(driver.run());

        Self { commands, shared }
    }

    /// Creates a client over the WebSocket transport.
    #[must_use]
    pub fn websocket() -> Self {
        Self::new(WebSocketTransport::new())
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

impl GatewayClient {
    /// Connects to the gateway in `config`.
    ///
    /// Resolves once the handshake succeeds. Failed attempts are retried
    /// according to the backoff policy without surfacing here; only a
    /// terminal failure is returned. An active session is replaced.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the configuration is invalid
    /// - [`Error::AuthRejected`] / [`Error::ProtocolMismatch`] from the handshake
    /// - the last attempt's error once reconnect attempts are exhausted
    /// - [`Error::ConnectionClosed`] if `disconnect()` or another `connect()`
    ///   intervenes
    pub async fn connect(&self, config: ConnectionConfig) -> Result<()> {
        config.validate()?;

        let (reply, reply_rx) = oneshot::channel();
        self.send(Command::Connect {
            config: Box::new(config),
            reply,
        })?;

        reply_rx.await.map_err(|_| driver_stopped())?
    }

    /// Closes the session, rejects pending requests and stops reconnecting.
    ///
    /// Resolves once the link is closed or the close grace period elapsed.
    pub async fn disconnect(&self) {
        let (reply, reply_rx) = oneshot::channel();
        if self.send(Command::Disconnect { reply }).is_ok() {
            let _ = reply_rx.await;
        }
    }

    /// Signals that the application went to the background.
    pub fn suspend(&self, mode: SuspendMode) {
        let _ = self.send(Command::Suspend(mode));
    }

    /// Signals that the application is back in the foreground.
    pub fn resume(&self) {
        let _ = self.send(Command::Resume);
    }
}

// ============================================================================
// Requests
// ============================================================================

impl GatewayClient {
    /// Sends a request and waits for its payload, using the configured
    /// request timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no session is up
    /// - [`Error::RequestTimeout`] if no response arrives in time
    /// - [`Error::RequestFailed`] if the gateway reports a failure
    /// - [`Error::ConnectionClosed`] / [`Error::HeartbeatStale`] if the
    ///   session drops first
    pub async fn request(&self, method: impl Into<String>, params: Value) -> Result<Value> {
        self.start(method.into(), params, None)?.await
    }

    /// Sends a request with an explicit timeout.
    ///
    /// # Errors
    ///
    /// See [`GatewayClient::request`].
    pub async fn request_with_timeout(
        &self,
        method: impl Into<String>,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        self.start(method.into(), params, Some(timeout))?.await
    }

    /// Sends a request with typed params and decodes the payload.
    ///
    /// # Errors
    ///
    /// See [`GatewayClient::request`]; additionally [`Error::InvalidFrame`]
    /// if params or payload do not (de)serialize.
    pub async fn request_as<T, P>(&self, method: impl Into<String>, params: &P) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let params = serde_json::to_value(params)?;
        let payload = self.request(method, params).await?;
        Ok(serde_json::from_value(payload)?)
    }

    /// Sends a request and returns a handle to its reply.
    ///
    /// The id is known immediately, so the request can be cancelled before
    /// it settles. Dropping the handle unsettled cancels the request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the driver has stopped.
    pub fn start_request(&self, method: impl Into<String>, params: Value) -> Result<PendingReply> {
        self.start(method.into(), params, None)
    }

    /// Cancels a pending request locally.
    ///
    /// The awaiting caller gets [`Error::Cancelled`]. The gateway is not
    /// told and may still process the call.
    pub fn cancel(&self, id: &RequestId) {
        let _ = self.send(Command::Cancel(id.clone()));
    }

    /// Probes gateway liveness with the `health` request.
    ///
    /// # Errors
    ///
    /// See [`GatewayClient::request`].
    pub async fn health(&self) -> Result<Value> {
        self.request(HEALTH_METHOD, json!({})).await
    }

    fn start(&self, method: String, params: Value, timeout: Option<Duration>) -> Result<PendingReply> {
        let request = Request::new(method, params);
        let id = request.id.clone();

        let (reply, reply_rx) = oneshot::channel();
        self.send(Command::Request {
            request,
            timeout,
            reply,
        })?;

        Ok(PendingReply {
            id,
            reply_rx,
            commands: self.commands.downgrade(),
            settled: false,
        })
    }
}

// ============================================================================
// Events
// ============================================================================

impl GatewayClient {
    /// Calls `handler` for every event matching `filter`.
    ///
    /// `filter` is an exact name, `"namespace.*"` or `"*"`. The handler runs
    /// on its own task, in arrival order.
    pub fn on<F>(&self, filter: impl Into<EventFilter>, handler: F) -> SubscriptionId
    where
        F: FnMut(Event) + Send + 'static,
    {
        self.shared.dispatcher.on(filter, handler)
    }

    /// Calls `handler` for every event.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: FnMut(Event) + Send + 'static,
    {
        self.shared.dispatcher.on(EventFilter::All, handler)
    }

    /// Returns a stream of events matching `filter`.
    pub fn subscribe(&self, filter: impl Into<EventFilter>) -> Subscription {
        self.shared.dispatcher.subscribe(filter)
    }

    /// Removes a subscriber. Returns `false` if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.shared.dispatcher.off(id)
    }
}

// ============================================================================
// Observation
// ============================================================================

impl GatewayClient {
    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.borrow()
    }

    /// Receiver that always holds the latest status.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Receiver of every status transition from now on.
    #[must_use]
    pub fn status_events(&self) -> broadcast::Receiver<StatusEvent> {
        self.shared.events.subscribe()
    }

    /// Most recent connection-level error.
    #[must_use]
    pub fn last_error(&self) -> Option<Error> {
        self.shared.last_error.lock().clone()
    }

    /// Heartbeat metrics of the current session.
    #[must_use]
    pub fn heartbeat(&self) -> HeartbeatHealth {
        *self.shared.heartbeat.lock()
    }

    /// Requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::Relaxed)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| driver_stopped())
    }
}

fn driver_stopped() -> Error {
    Error::connection_closed("session driver stopped")
}

// ============================================================================
// PendingReply
// ============================================================================

/// Reply to a request started with [`GatewayClient::start_request`].
///
/// Resolves like [`GatewayClient::request`]. Dropping it before it resolves
/// cancels the request.
#[derive(Debug)]
pub struct PendingReply {
    id: RequestId,
    reply_rx: oneshot::Receiver<Result<Value>>,
    commands: mpsc::WeakUnboundedSender<Command>,
    settled: bool,
}

impl PendingReply {
    /// Id of the request.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }
}

impl Future for PendingReply {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = match Pin::new(&mut self.reply_rx).poll(cx) {
            Poll::Ready(Ok(result)) => result,
            Poll::Ready(Err(_)) => Err(driver_stopped()),
            Poll::Pending => return Poll::Pending,
        };

        self.settled = true;
        Poll::Ready(outcome)
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(Command::Cancel(self.id.clone()));
        }
    }
}
