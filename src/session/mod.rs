//! Gateway session management.
//!
//! This module implements the connection lifecycle on top of the
//! [`transport`](crate::transport) layer.
//!
//! # Architecture
//!
//! ```text
//! GatewayClient (cloneable handle)
//!        │ commands
//!        ▼
//!   Driver task ──── owns ────► Link, Correlator, HeartbeatMonitor, ReconnectPolicy
//!        │
//!        ├── status (watch) / StatusEvent (broadcast)
//!        └── EventDispatcher ──► subscriber tasks
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `client` | [`GatewayClient`] handle and [`PendingReply`] |
//! | `config` | [`ConnectionConfig`] and the [`ChallengeSigner`] hook |
//! | `correlator` | Pending request map with deadlines |
//! | `dispatcher` | Event routing to subscribers |
//! | `driver` | The actor owning all session state |
//! | `handshake` | Challenge → connect → hello sequencing |
//! | `heartbeat` | Tick watchdog and health metrics |
//! | `reconnect` | Backoff schedule and attempt cap |
//! | `status` | [`ConnectionStatus`] and [`StatusEvent`] |

// ============================================================================
// Submodules
// ============================================================================

/// Public client handle.
pub mod client;

/// Connection configuration.
pub mod config;

/// Event dispatcher.
pub mod dispatcher;

/// Heartbeat watchdog.
pub mod heartbeat;

/// Reconnection policy.
pub mod reconnect;

/// Connection status.
pub mod status;

mod correlator;
mod driver;
mod handshake;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::{GatewayClient, PendingReply, SuspendMode};
pub use config::{ChallengeSigner, ConnectionConfig, MAX_TIMEOUT};
pub use dispatcher::{EventDispatcher, EventFilter, Subscription};
pub use heartbeat::HeartbeatHealth;
pub use reconnect::{BACKOFF_SCHEDULE, MAX_RECONNECT_ATTEMPTS, ReconnectPolicy};
pub use status::{ConnectionStatus, StatusEvent};
