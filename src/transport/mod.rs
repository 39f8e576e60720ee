//! Transport layer.
//!
//! The session core never touches sockets directly. It opens a [`Link`]
//! through an injected [`Transport`] and exchanges raw text messages over it,
//! so each platform can plug in its own socket binding.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   open(url)   ┌───────────────┐        ┌──────────┐
//! │  Session driver  │──────────────►│   Transport   │───────►│ Gateway  │
//! │                  │◄─── Link ─────│ (ws / memory) │◄───────│          │
//! └──────────────────┘ send/recv/close └─────────────┘        └──────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `websocket` | WebSocket binding over `tokio-tungstenite` |
//! | `memory` | In-process binding with a scriptable gateway end |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use url::Url;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// In-process transport with a scriptable gateway end.
pub mod memory;

/// WebSocket transport.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use memory::{MemoryGateway, MemoryPeer, MemoryTransport, hello_ok};
pub use websocket::WebSocketTransport;

// ============================================================================
// Traits
// ============================================================================

/// Opens links to a gateway.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a new link to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailed`](crate::Error::ConnectionFailed)
    /// if the endpoint cannot be reached.
    async fn open(&self, url: &Url) -> Result<Box<dyn Link>>;
}

/// One open, bidirectional message link.
///
/// `recv` must be cancel safe: the driver polls it inside `select!` and may
/// drop the future whenever another branch completes.
#[async_trait]
pub trait Link: Send {
    /// Sends one text message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`](crate::Error::ConnectionClosed)
    /// if the link is gone.
    async fn send(&mut self, message: String) -> Result<()>;

    /// Receives the next text message.
    ///
    /// `None` means the peer closed the link. `Some(Err(_))` is a transport
    /// failure; the link is unusable afterwards.
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Closes the link, flushing a close notification when the transport
    /// has one.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails; the link is dropped
    /// either way.
    async fn close(&mut self) -> Result<()>;
}
