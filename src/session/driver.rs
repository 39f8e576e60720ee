//! Session driver.
//!
//! A single tokio task that owns the transport link, the pending request
//! map, the heartbeat monitor and the reconnect policy, and is the only
//! writer of the connection status. Client handles talk to it through an
//! unbounded command channel.
//!
//! # Phases
//!
//! ```text
//!            connect()
//!   Idle ───────────────► Attempt ──── hello-ok ────► Session
//!    ▲                     │   ▲                        │
//!    │ terminal failure    │   │ delay elapsed          │ link lost / stale
//!    └─────────────────────┤   │                        │
//!                          ▼   │                        │
//!                         Backoff ◄─────────────────────┘ (immediate retry)
//! ```
//!
//! Every phase keeps serving commands, so `disconnect()` and `connect()`
//! preempt whatever is in progress and all deadlines die with the phase.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result, millis};
use crate::identifiers::RequestId;
use crate::protocol::{
    Event, Frame, REQUEST_TIMEOUT, Request, TICK_EVENT, now_millis, parse, serialize,
};
use crate::transport::{Link, Transport};

use super::client::SuspendMode;
use super::config::{
    CLOSE_GRACE, ConnectionConfig, HEARTBEAT_DEGRADED_MULTIPLIER, HEARTBEAT_TIMEOUT_MULTIPLIER,
    MAX_PENDING_REQUESTS,
};
use super::correlator::{Correlator, Reply};
use super::dispatcher::EventDispatcher;
use super::handshake::{Handshake, HandshakeStep};
use super::heartbeat::{HeartbeatCheck, HeartbeatHealth, HeartbeatMonitor};
use super::reconnect::ReconnectPolicy;
use super::status::{ConnectionStatus, StatusEvent};

// ============================================================================
// Constants
// ============================================================================

/// Status events buffered per lagging observer.
const STATUS_EVENT_CAPACITY: usize = 64;

// ============================================================================
// Shared
// ============================================================================

/// State published by the driver and read by client handles.
pub(crate) struct Shared {
    pub(crate) status: watch::Sender<ConnectionStatus>,
    pub(crate) events: broadcast::Sender<StatusEvent>,
    pub(crate) last_error: Mutex<Option<Error>>,
    pub(crate) heartbeat: Mutex<HeartbeatHealth>,
    pub(crate) pending: AtomicUsize,
    pub(crate) dispatcher: EventDispatcher,
}

impl Shared {
    pub(crate) fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (events, _) = broadcast::channel(STATUS_EVENT_CAPACITY);

        Self {
            status,
            events,
            last_error: Mutex::new(None),
            heartbeat: Mutex::new(HeartbeatHealth::default()),
            pending: AtomicUsize::new(0),
            dispatcher: EventDispatcher::new(),
        }
    }
}

// ============================================================================
// Command
// ============================================================================

/// Messages from client handles to the driver.
pub(crate) enum Command {
    /// Start (or restart) a session.
    Connect {
        config: Box<ConnectionConfig>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// End the session and stop reconnecting.
    Disconnect { reply: oneshot::Sender<()> },
    /// Send a request and settle `reply` with its outcome.
    Request {
        request: Request,
        timeout: Option<Duration>,
        reply: Reply,
    },
    /// Settle a pending request as cancelled.
    Cancel(RequestId),
    /// Application went to the background.
    Suspend(SuspendMode),
    /// Application came back.
    Resume,
}

// ============================================================================
// Phase
// ============================================================================

enum Phase {
    /// No session and nothing scheduled.
    Idle,
    /// Opening the transport and running the handshake.
    Attempt,
    /// Handshake done; serving requests over the link.
    Session(Box<dyn Link>),
    /// Waiting before the next attempt.
    Backoff(Duration),
    /// Every client handle is gone.
    Exit,
}

// ============================================================================
// Driver
// ============================================================================

pub(crate) struct Driver {
    transport: Arc<dyn Transport>,
    commands: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Shared>,
    config: Option<ConnectionConfig>,
    status: ConnectionStatus,
    correlator: Correlator,
    heartbeat: HeartbeatMonitor,
    reconnect: ReconnectPolicy,
    waiters: Vec<oneshot::Sender<Result<()>>>,
    suspended: Option<SuspendMode>,
}

impl Driver {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        commands: mpsc::UnboundedReceiver<Command>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            transport,
            commands,
            shared,
            config: None,
            status: ConnectionStatus::Disconnected,
            correlator: Correlator::new(MAX_PENDING_REQUESTS),
            heartbeat: HeartbeatMonitor::new(HEARTBEAT_DEGRADED_MULTIPLIER, HEARTBEAT_TIMEOUT_MULTIPLIER),
            reconnect: ReconnectPolicy::default(),
            waiters: Vec::new(),
            suspended: None,
        }
    }

    /// Runs until every client handle is dropped.
    pub(crate) async fn run(mut self) {
        debug!("Session driver started");

        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Attempt => self.attempt().await,
                Phase::Session(link) => self.session(link).await,
                Phase::Backoff(delay) => self.backoff(delay).await,
                Phase::Exit => break,
            };
        }

        self.teardown(None, Error::connection_closed("client dropped")).await;
        self.set_status(ConnectionStatus::Disconnected, None, None);
        self.shared.dispatcher.clear();

        debug!("Session driver terminated");
    }

    // ========================================================================
    // Phases
    // ========================================================================

    async fn idle(&mut self) -> Phase {
        loop {
            let Some(command) = self.commands.recv().await else {
                return Phase::Exit;
            };
            if let Some(phase) = self.handle_command(command, None).await {
                return phase;
            }
        }
    }

    async fn backoff(&mut self, delay: Duration) -> Phase {
        let wake = sleep(delay);
        tokio::pin!(wake);

        loop {
            tokio::select! {
                () = &mut wake => return Phase::Attempt,

                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return Phase::Exit;
                    };
                    if let Some(phase) = self.handle_command(command, None).await {
                        return phase;
                    }
                }
            }
        }
    }

    async fn attempt(&mut self) -> Phase {
        let Some(config) = self.config.clone() else {
            return Phase::Idle;
        };

        self.set_status(ConnectionStatus::Connecting, None, None);
        debug!(url = %config.url, attempt = self.reconnect.attempts(), "Opening transport");

        // Open and handshake share one deadline.
        let deadline = sleep(config.connect_timeout);
        tokio::pin!(deadline);

        let transport = Arc::clone(&self.transport);
        let mut open = transport.open(&config.url);

        let mut link = loop {
            tokio::select! {
                result = &mut open => match result {
                    Ok(link) => break link,
                    Err(error) => return self.attempt_failed(error),
                },

                () = &mut deadline => {
                    return self.attempt_failed(Error::handshake_timeout(config.connect_timeout));
                }

                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return Phase::Exit;
                    };
                    if let Some(phase) = self.handle_command(command, None).await {
                        return phase;
                    }
                }
            }
        };

        self.set_status(ConnectionStatus::Handshaking, None, None);

        let mut handshake = Handshake::new(&config);
        let hello = loop {
            tokio::select! {
                message = link.recv() => {
                    let step = match message {
                        Some(Ok(text)) => handshake.on_text(&text),
                        Some(Err(error)) => Err(error),
                        None => Err(Error::connection_closed("gateway closed the connection during handshake")),
                    };

                    let step = match step {
                        Ok(HandshakeStep::Send(frame)) => send_frame(&mut link, &frame).await.map(|()| None),
                        Ok(HandshakeStep::Pending) => Ok(None),
                        Ok(HandshakeStep::Complete(hello)) => Ok(Some(hello)),
                        Err(error) => Err(error),
                    };

                    match step {
                        Ok(Some(hello)) => break hello,
                        Ok(None) => {}
                        Err(error) => {
                            self.close_link(&mut link).await;
                            return self.attempt_failed(error);
                        }
                    }
                }

                () = &mut deadline => {
                    self.close_link(&mut link).await;
                    return self.attempt_failed(Error::handshake_timeout(config.connect_timeout));
                }

                command = self.commands.recv() => {
                    let Some(command) = command else {
                        self.close_link(&mut link).await;
                        return Phase::Exit;
                    };
                    if let Some(phase) = self.handle_command(command, Some(&mut link)).await {
                        return phase;
                    }
                }
            }
        };

        let tick_interval = hello
            .tick_interval_ms()
            .filter(|ms| *ms > 0)
            .map_or(config.default_tick_interval, Duration::from_millis);

        info!(
            url = %config.url,
            protocol = hello.protocol,
            tick_ms = millis(tick_interval),
            conn_id = ?hello.server.as_ref().and_then(|s| s.conn_id.as_deref()),
            "Gateway session established"
        );

        self.reconnect.reset();
        self.heartbeat.start(tick_interval, Instant::now());
        self.publish_heartbeat();
        self.set_status(ConnectionStatus::Connected, None, None);

        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }

        Phase::Session(link)
    }

    async fn session(&mut self, mut link: Box<dyn Link>) -> Phase {
        loop {
            let wake = earliest(self.correlator.next_deadline(), self.heartbeat.next_deadline());

            tokio::select! {
                message = link.recv() => match message {
                    Some(Ok(text)) => self.on_message(&text),
                    Some(Err(error)) => return self.session_lost(&mut link, error).await,
                    None => {
                        let error = Error::connection_closed("gateway closed the connection");
                        return self.session_lost(&mut link, error).await;
                    }
                },

                () = sleep_until_opt(wake) => {
                    let now = Instant::now();
                    if self.correlator.expire(now) > 0 {
                        self.publish_pending();
                    }

                    match self.heartbeat.check(now) {
                        HeartbeatCheck::Healthy => {}
                        HeartbeatCheck::Degraded(silent) => {
                            warn!(silent_ms = millis(silent), "Heartbeat overdue");
                            self.publish_heartbeat();
                            self.set_status(ConnectionStatus::Degraded, None, None);
                        }
                        HeartbeatCheck::Stale(silent) => {
                            return self.session_lost(&mut link, Error::heartbeat_stale(silent)).await;
                        }
                    }
                }

                command = self.commands.recv() => {
                    let Some(command) = command else {
                        self.close_link(&mut link).await;
                        return Phase::Exit;
                    };
                    if let Some(phase) = self.handle_command(command, Some(&mut link)).await {
                        return phase;
                    }
                }
            }
        }
    }

    // ========================================================================
    // Outcomes
    // ========================================================================

    fn attempt_failed(&mut self, error: Error) -> Phase {
        if !error.is_retryable() {
            warn!(%error, "Connection attempt rejected");
            return self.fail(error);
        }

        match self.reconnect.record_failure() {
            Some(delay) => {
                warn!(
                    %error,
                    attempt = self.reconnect.attempts(),
                    retry_in_ms = millis(delay),
                    "Connection attempt failed"
                );
                self.set_status(ConnectionStatus::Reconnecting, Some(error), Some(delay));
                Phase::Backoff(delay)
            }
            None => {
                warn!(%error, attempts = self.reconnect.attempts(), "Giving up on gateway");
                self.fail(error)
            }
        }
    }

    fn fail(&mut self, error: Error) -> Phase {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
        self.set_status(ConnectionStatus::Failed, Some(error), None);
        Phase::Idle
    }

    async fn session_lost(&mut self, link: &mut Box<dyn Link>, error: Error) -> Phase {
        warn!(%error, pending = self.correlator.len(), "Gateway session lost");

        self.teardown(Some(link), error.clone()).await;
        self.set_status(ConnectionStatus::Reconnecting, Some(error), Some(Duration::ZERO));
        Phase::Attempt
    }

    /// Closes the link and settles everything waiting on the session.
    async fn teardown(&mut self, link: Option<&mut Box<dyn Link>>, error: Error) {
        if let Some(link) = link {
            self.close_link(link).await;
        }

        self.heartbeat.stop();
        self.publish_heartbeat();

        if !self.correlator.is_empty() {
            self.correlator.fail_all(&error);
            self.publish_pending();
        }

        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    async fn close_link(&self, link: &mut Box<dyn Link>) {
        let grace = self.config.as_ref().map_or(CLOSE_GRACE, |c| c.close_grace);

        match timeout(grace, link.close()).await {
            Ok(Ok(())) => debug!("Transport closed"),
            Ok(Err(error)) => debug!(%error, "Transport close failed"),
            Err(_) => warn!(grace_ms = millis(grace), "Transport close timed out"),
        }
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    fn on_message(&mut self, text: &str) {
        let frame = match parse(text) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, len = text.len(), "Dropping malformed frame");
                return;
            }
        };

        match frame {
            Frame::Response(response) => {
                if self.correlator.resolve(response) {
                    self.publish_pending();
                }
            }

            Frame::Event(event) => {
                if event.event == TICK_EVENT {
                    self.on_tick(&event);
                }
                let delivered = self.shared.dispatcher.dispatch(&event);
                trace!(event = %event.event, delivered, "Event dispatched");
            }

            Frame::Request(request) => {
                warn!(method = %request.method, "Ignoring request from gateway");
            }
        }
    }

    fn on_tick(&mut self, event: &Event) {
        let ts = event.payload.get("ts").and_then(Value::as_u64);
        // A resume clears the monitor's degraded flag, so go by the status.
        self.heartbeat.on_tick(Instant::now(), ts);
        self.publish_heartbeat();

        if self.status == ConnectionStatus::Degraded {
            info!("Heartbeat recovered");
            self.set_status(ConnectionStatus::Connected, None, None);
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn handle_command(
        &mut self,
        command: Command,
        link: Option<&mut Box<dyn Link>>,
    ) -> Option<Phase> {
        match command {
            Command::Connect { config, reply } => {
                if self.status.is_active() {
                    info!(status = %self.status, "Superseding current session");
                    self.teardown(link, Error::connection_closed("superseded by a new connect"))
                        .await;
                    self.set_status(ConnectionStatus::Disconnected, None, None);
                }

                self.apply(*config);
                self.waiters.push(reply);
                Some(Phase::Attempt)
            }

            Command::Disconnect { reply } => {
                info!(status = %self.status, "Disconnecting");
                self.teardown(link, Error::connection_closed("disconnected")).await;
                self.suspended = None;
                self.heartbeat.resume(Instant::now());
                self.reconnect.reset();
                self.set_status(ConnectionStatus::Disconnected, None, None);

                let _ = reply.send(());
                Some(Phase::Idle)
            }

            Command::Request {
                request,
                timeout,
                reply,
            } => match link {
                Some(link) if self.status.is_connected() => {
                    self.send_request(link, request, timeout, reply).await
                }
                _ => {
                    let _ = reply.send(Err(Error::not_connected(self.status)));
                    None
                }
            },

            Command::Cancel(id) => {
                if self.correlator.cancel(&id) {
                    self.publish_pending();
                }
                None
            }

            Command::Suspend(mode) => self.suspend(mode, link).await,

            Command::Resume => self.resume(),
        }
    }

    fn apply(&mut self, config: ConnectionConfig) {
        self.reconnect = ReconnectPolicy::new(config.backoff.clone(), config.max_reconnect_attempts);
        self.correlator.set_max_pending(config.max_pending_requests);
        self.heartbeat.set_multipliers(
            config.heartbeat_degraded_multiplier,
            config.heartbeat_timeout_multiplier,
        );
        self.heartbeat.resume(Instant::now());
        self.suspended = None;
        self.config = Some(config);
    }

    async fn send_request(
        &mut self,
        link: &mut Box<dyn Link>,
        request: Request,
        timeout: Option<Duration>,
        reply: Reply,
    ) -> Option<Phase> {
        if let Err(error) = self.correlator.admit(&request.id) {
            warn!(%error, method = %request.method, "Request rejected");
            let _ = reply.send(Err(error));
            return None;
        }

        let timeout = timeout
            .or_else(|| self.config.as_ref().map(|c| c.request_timeout))
            .unwrap_or(REQUEST_TIMEOUT);
        let id = request.id.clone();
        let method = request.method.clone();

        let text = match serialize(&Frame::Request(request)) {
            Ok(text) => text,
            Err(error) => {
                let _ = reply.send(Err(error));
                return None;
            }
        };

        trace!(%id, %method, timeout_ms = millis(timeout), "Sending request");
        self.correlator.register(id, method, timeout, Instant::now(), reply);
        self.publish_pending();

        if let Err(error) = link.send(text).await {
            return Some(self.session_lost(link, error).await);
        }
        None
    }

    async fn suspend(&mut self, mode: SuspendMode, link: Option<&mut Box<dyn Link>>) -> Option<Phase> {
        match mode {
            SuspendMode::KeepTransport => {
                debug!("Heartbeat watchdog suspended");
                self.heartbeat.pause();
                self.publish_heartbeat();
                self.suspended = Some(mode);
                None
            }

            SuspendMode::CloseTransport => {
                if !self.status.is_active() {
                    return None;
                }

                info!(status = %self.status, "Suspending session");
                self.teardown(link, Error::connection_closed("session suspended")).await;
                self.set_status(ConnectionStatus::Disconnected, None, None);
                self.suspended = Some(mode);
                Some(Phase::Idle)
            }
        }
    }

    fn resume(&mut self) -> Option<Phase> {
        let mode = self.suspended.take()?;
        self.heartbeat.resume(Instant::now());
        self.publish_heartbeat();

        match mode {
            SuspendMode::KeepTransport => {
                debug!("Heartbeat watchdog resumed");
                None
            }
            SuspendMode::CloseTransport => {
                self.config.as_ref()?;
                info!("Resuming session");
                self.reconnect.reset();
                Some(Phase::Attempt)
            }
        }
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    fn set_status(&mut self, next: ConnectionStatus, error: Option<Error>, retry_in: Option<Duration>) {
        let previous = self.status;
        if previous == next {
            return;
        }
        if !previous.can_transition_to(next) {
            warn!(from = %previous, to = %next, "Unexpected status transition");
        }

        self.status = next;
        if let Some(error) = &error {
            *self.shared.last_error.lock() = Some(error.clone());
        }

        info!(from = %previous, to = %next, "Connection status changed");
        self.shared.status.send_replace(next);

        let _ = self.shared.events.send(StatusEvent {
            status: next,
            previous,
            error,
            retry_in,
            attempt: self.reconnect.attempts(),
            timestamp: now_millis(),
        });
    }

    fn publish_pending(&self) {
        self.shared
            .pending
            .store(self.correlator.len(), Ordering::Relaxed);
    }

    fn publish_heartbeat(&self) {
        *self.shared.heartbeat.lock() = self.heartbeat.health();
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn send_frame(link: &mut Box<dyn Link>, frame: &Frame) -> Result<()> {
    link.send(serialize(frame)?).await
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

// ============================================================================
// Tests
// ============================================================================
