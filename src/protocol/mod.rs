//! Gateway wire protocol.
//!
//! This module defines the frames exchanged between the client and the
//! gateway, the handshake payloads, and the protocol constants.
//!
//! # Protocol Overview
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | `Request` | Client → Gateway | Method call, correlated by `id` |
//! | `Response` | Gateway → Client | Outcome of a request (`ok` flag) |
//! | `Event` | Gateway → Client | Unsolicited notification (`tick`, `connect.challenge`, ...) |
//!
//! # Handshake
//!
//! ```text
//! Gateway                         Client
//!    │ ── event connect.challenge ──► │
//!    │ ◄── request connect ────────── │
//!    │ ── response hello-ok ────────► │
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Frame types and the JSON codec |
//! | `handshake` | Challenge, connect and hello payloads |

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ============================================================================
// Submodules
// ============================================================================

/// Frame types and the JSON codec.
pub mod frame;

/// Handshake payload types.
pub mod handshake;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{ErrorShape, Event, Frame, Request, Response, parse, serialize};
pub use handshake::{Auth, Challenge, ClientInfo, ConnectParams, HelloError, HelloOk, Policy, ServerInfo};

// ============================================================================
// Constants
// ============================================================================

/// Protocol version spoken by this client.
pub const PROTOCOL_VERSION: u32 = 3;

/// Default deadline for transport open plus handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Default per-request deadline.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Tick interval assumed when the gateway does not advertise one.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Default URL of a gateway running on the local machine.
pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:18789";

/// Event carrying the handshake nonce.
pub const CHALLENGE_EVENT: &str = "connect.challenge";

/// Short challenge event name, accepted on receipt.
pub const CHALLENGE_EVENT_SHORT: &str = "challenge";

/// Periodic liveness event.
pub const TICK_EVENT: &str = "tick";

/// Method of the handshake request.
pub const CONNECT_METHOD: &str = "connect";

/// Method of the on-demand liveness probe.
pub const HEALTH_METHOD: &str = "health";

/// Payload `type` of a successful handshake reply.
pub const HELLO_OK: &str = "hello-ok";

/// Payload `type` of a rejected handshake reply.
pub const HELLO_ERROR: &str = "hello-error";

// ============================================================================
// Helpers
// ============================================================================

/// Returns `true` if `event` names the handshake challenge.
#[inline]
#[must_use]
pub fn is_challenge_event(event: &str) -> bool {
    event == CHALLENGE_EVENT || event == CHALLENGE_EVENT_SHORT
}

/// Milliseconds since the Unix epoch, as carried in frame timestamps.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
