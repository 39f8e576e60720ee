//! Gateway client - resilient sessions with an agent gateway.
//!
//! This library keeps a durable, authenticated, bidirectional session with a
//! local or remote gateway process and multiplexes request/response calls
//! and unsolicited events over it.
//!
//! # Architecture
//!
//! The client is split into a transport-agnostic core and pluggable
//! transports:
//!
//! - **Session core**: one driver task per client owns the link, the
//!   pending request map, the heartbeat watchdog and the reconnect policy
//! - **Transport**: opens links and moves text messages (WebSocket or
//!   in-memory)
//!
//! Key design principles:
//!
//! - Only the driver writes the connection status; everything else observes
//! - Every request settles exactly once: response, timeout, cancel or teardown
//! - No request survives a reconnect; callers decide whether to retry
//! - Authentication and version errors are terminal, network errors are not
//!
//! # Quick Start
//!
//! ```no_run
//! use gateway_client::{ConnectionConfig, GatewayClient, Result, Token};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = GatewayClient::websocket();
//!
//!     let config = ConnectionConfig::new("ws://127.0.0.1:18789")?
//!         .with_token(Token::new("0123abcd")?);
//!     client.connect(config).await?;
//!
//!     client.on("chat.*", |event| println!("{}: {}", event.event, event.payload));
//!
//!     let health = client.health().await?;
//!     println!("Gateway health: {health}");
//!
//!     let reply = client.request("chat.send", json!({ "text": "hello" })).await?;
//!     println!("Reply: {reply}");
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`credentials`] | [`Token`], [`Credentials`] and the [`CredentialStore`] collaborator |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire frames, codec and handshake payloads |
//! | [`session`] | [`GatewayClient`] and the connection state machine |
//! | [`transport`] | Transport interface, WebSocket and in-memory bindings |

// ============================================================================
// Modules
// ============================================================================

/// Gateway credentials and storage collaborator.
pub mod credentials;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Gateway wire protocol.
///
/// Frame types, the JSON codec and handshake payloads.
pub mod protocol;

/// Session lifecycle: handshake, heartbeat, reconnection, correlation.
pub mod session;

/// Transport layer.
///
/// The [`Transport`] and [`Link`] traits plus the shipped bindings.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Credential types
pub use credentials::{CredentialStore, Credentials, MemoryCredentialStore, Token};

// Error types
pub use error::{Error, ErrorKind, Result};

// Identifier types
pub use identifiers::{RequestId, SubscriptionId};

// Protocol types
pub use protocol::{ClientInfo, Event, Frame, HelloOk, PROTOCOL_VERSION};

// Session types
pub use session::{
    ChallengeSigner, ConnectionConfig, ConnectionStatus, EventFilter, GatewayClient,
    HeartbeatHealth, PendingReply, StatusEvent, Subscription, SuspendMode,
};

// Transport types
pub use transport::{Link, MemoryGateway, MemoryPeer, MemoryTransport, Transport, WebSocketTransport};
