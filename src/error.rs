//! Error types for the gateway client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use gateway_client::{GatewayClient, Result};
//!
//! async fn example(client: &GatewayClient) -> Result<()> {
//!     let health = client.health().await?;
//!     println!("{health}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Kinds
//!
//! Every variant maps onto one wire-level [`ErrorKind`]:
//!
//! | Kind | Variants | Auto-retried |
//! |------|----------|--------------|
//! | `CONNECTION_FAILED` | [`Error::ConnectionFailed`] | yes |
//! | `AUTH_REJECTED` | [`Error::AuthRejected`] | never |
//! | `PROTOCOL_MISMATCH` | [`Error::ProtocolMismatch`] | never |
//! | `TIMEOUT` | [`Error::HandshakeTimeout`], [`Error::RequestTimeout`] | handshake only |
//! | `NETWORK_ERROR` | [`Error::ConnectionClosed`], [`Error::HeartbeatStale`] | yes |
//! | `INVALID_FRAME` | [`Error::InvalidFrame`] | handshake attempt only |
//! | `REQUEST_FAILED` | [`Error::RequestFailed`] | no |
//! | `INVALID_CONFIG` | [`Error::Config`], [`Error::Credentials`] | no |
//! | `NOT_CONNECTED` | [`Error::NotConnected`], [`Error::TooManyPending`] | no |
//! | `CANCELLED` | [`Error::Cancelled`] | no |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::result::Result as StdResult;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::identifiers::RequestId;
use crate::session::ConnectionStatus;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// ErrorKind
// ============================================================================

/// Stable error codes shared with front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport could not be opened.
    ConnectionFailed,
    /// Gateway rejected the credential.
    AuthRejected,
    /// Gateway speaks an unsupported protocol version.
    ProtocolMismatch,
    /// Handshake or request deadline exceeded.
    Timeout,
    /// Transport dropped mid-session.
    NetworkError,
    /// Malformed or unexpected frame.
    InvalidFrame,
    /// Application-level failure reported in a response.
    RequestFailed,
    /// Invalid local configuration or credentials.
    InvalidConfig,
    /// No usable session for the call.
    NotConnected,
    /// Cancelled locally by the caller.
    Cancelled,
}

impl ErrorKind {
    /// Returns the wire code, e.g. `"AUTH_REJECTED"`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::AuthRejected => "AUTH_REJECTED",
            Self::ProtocolMismatch => "PROTOCOL_MISMATCH",
            Self::Timeout => "TIMEOUT",
            Self::NetworkError => "NETWORK_ERROR",
            Self::InvalidFrame => "INVALID_FRAME",
            Self::RequestFailed => "REQUEST_FAILED",
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::NotConnected => "NOT_CONNECTED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Errors are `Clone` so that one connection failure can be delivered to
/// every waiter and kept as the client's last error.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when a [`ConnectionConfig`](crate::ConnectionConfig) fails validation.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Credential store failure.
    #[error("Credential store error: {message}")]
    Credentials {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport could not be opened.
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        /// Description of the connection error.
        message: String,
    },

    /// Gateway rejected the credential during the handshake.
    #[error("Authentication rejected ({code}): {message}")]
    AuthRejected {
        /// Reason code reported by the gateway.
        code: String,
        /// Human readable reason.
        message: String,
    },

    /// Gateway protocol version is outside the supported range.
    #[error("Protocol mismatch: gateway speaks v{server}, client supports v{min}..=v{max}")]
    ProtocolMismatch {
        /// Version announced by the gateway (0 when unknown).
        server: u32,
        /// Lowest supported version.
        min: u32,
        /// Highest supported version.
        max: u32,
    },

    /// Transport open plus handshake did not finish in time.
    #[error("Handshake timed out after {timeout_ms}ms")]
    HandshakeTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection closed while it was in use.
    #[error("Connection closed: {reason}")]
    ConnectionClosed {
        /// Why the connection went away.
        reason: String,
    },

    /// No heartbeat tick arrived within the watchdog window.
    #[error("Heartbeat lost: no tick for {silent_ms}ms")]
    HeartbeatStale {
        /// Milliseconds since the last tick (or since the session started).
        silent_ms: u64,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed or unexpected frame.
    #[error("Invalid frame: {message}")]
    InvalidFrame {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// Request got no response in time.
    #[error("Request {request_id} ({method}) timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Method of the request.
        method: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Gateway answered the request with an error.
    #[error("Request failed ({code}): {message}")]
    RequestFailed {
        /// Application error code.
        code: String,
        /// Error message.
        message: String,
        /// Optional structured details.
        details: Option<Value>,
        /// Whether the gateway considers the call retryable.
        retryable: bool,
        /// Suggested retry delay, if the gateway sent one.
        retry_after_ms: Option<u64>,
    },

    /// No session is available for the call.
    #[error("Not connected (status: {status})")]
    NotConnected {
        /// Status at the time of the call.
        status: ConnectionStatus,
    },

    /// Too many requests are already in flight.
    #[error("Too many pending requests: {pending}/{max}")]
    TooManyPending {
        /// Requests currently pending.
        pending: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Request was cancelled locally.
    #[error("Request {request_id} cancelled")]
    Cancelled {
        /// The cancelled request.
        request_id: RequestId,
    },
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a credential store error.
    #[inline]
    pub fn credentials(message: impl Into<String>) -> Self {
        Self::Credentials {
            message: message.into(),
        }
    }

    /// Creates a connection failed error.
    #[inline]
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    /// Creates an authentication rejected error.
    #[inline]
    pub fn auth_rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AuthRejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol mismatch error.
    #[inline]
    pub fn protocol_mismatch(server: u32, min: u32, max: u32) -> Self {
        Self::ProtocolMismatch { server, min, max }
    }

    /// Creates a handshake timeout error.
    #[inline]
    pub fn handshake_timeout(timeout: Duration) -> Self {
        Self::HandshakeTimeout {
            timeout_ms: millis(timeout),
        }
    }

    /// Creates a connection closed error.
    #[inline]
    pub fn connection_closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Creates a heartbeat stale error.
    #[inline]
    pub fn heartbeat_stale(silent: Duration) -> Self {
        Self::HeartbeatStale {
            silent_ms: millis(silent),
        }
    }

    /// Creates an invalid frame error.
    #[inline]
    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, method: impl Into<String>, timeout: Duration) -> Self {
        Self::RequestTimeout {
            request_id,
            method: method.into(),
            timeout_ms: millis(timeout),
        }
    }

    /// Creates a request failed error without details.
    #[inline]
    pub fn request_failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RequestFailed {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
            retry_after_ms: None,
        }
    }

    /// Creates a not connected error.
    #[inline]
    pub fn not_connected(status: ConnectionStatus) -> Self {
        Self::NotConnected { status }
    }

    /// Creates a cancelled error.
    #[inline]
    pub fn cancelled(request_id: RequestId) -> Self {
        Self::Cancelled { request_id }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns the stable error code for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } | Self::Credentials { .. } => ErrorKind::InvalidConfig,
            Self::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            Self::AuthRejected { .. } => ErrorKind::AuthRejected,
            Self::ProtocolMismatch { .. } => ErrorKind::ProtocolMismatch,
            Self::HandshakeTimeout { .. } | Self::RequestTimeout { .. } => ErrorKind::Timeout,
            Self::ConnectionClosed { .. } | Self::HeartbeatStale { .. } => ErrorKind::NetworkError,
            Self::InvalidFrame { .. } => ErrorKind::InvalidFrame,
            Self::RequestFailed { .. } => ErrorKind::RequestFailed,
            Self::NotConnected { .. } | Self::TooManyPending { .. } => ErrorKind::NotConnected,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// Returns `true` if this error concerns the connection rather than a
    /// single request.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::AuthRejected { .. }
                | Self::ProtocolMismatch { .. }
                | Self::HandshakeTimeout { .. }
                | Self::ConnectionClosed { .. }
                | Self::HeartbeatStale { .. }
        )
    }

    /// Returns `true` if retrying may succeed.
    ///
    /// Connection-level errors with this flag are retried automatically by
    /// the reconnection policy; the others are terminal until the caller
    /// supplies a new configuration.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. }
            | Self::HandshakeTimeout { .. }
            | Self::ConnectionClosed { .. }
            | Self::HeartbeatStale { .. }
            | Self::InvalidFrame { .. }
            | Self::RequestTimeout { .. }
            | Self::NotConnected { .. }
            | Self::TooManyPending { .. } => true,
            Self::RequestFailed { retryable, .. } => *retryable,
            Self::Config { .. }
            | Self::Credentials { .. }
            | Self::AuthRejected { .. }
            | Self::ProtocolMismatch { .. }
            | Self::Cancelled { .. } => false,
        }
    }

    /// Suggested delay before retrying, when the gateway provided one.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RequestFailed {
                retry_after_ms: Some(ms),
                ..
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_frame(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::config(format!("invalid gateway URL: {err}"))
    }
}

/// Saturating milliseconds of a duration.
#[inline]
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================
