//! Connection status and status change notifications.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::error::Error;

// ============================================================================
// ConnectionStatus
// ============================================================================

/// Lifecycle state of the gateway session.
///
/// ```text
/// Disconnected ──► Connecting ──► Handshaking ──► Connected ◄──► Degraded
///                    ▲   │            │   │           │              │
///                    │   ▼            ▼   └──► Failed │              │
///                  Reconnecting ◄─────┴───────────────┴──────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No session and no attempt in progress.
    #[default]
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open, handshake in progress.
    Handshaking,
    /// Session established and heartbeats arriving.
    Connected,
    /// Session established but heartbeats are late.
    Degraded,
    /// Waiting for the next connection attempt.
    Reconnecting,
    /// Gave up; only a new `connect()` leaves this state.
    Failed,
}

impl ConnectionStatus {
    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` if requests can be sent.
    #[inline]
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Degraded)
    }

    /// Returns `true` while a session exists or is being established.
    #[inline]
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Disconnected | Self::Failed)
    }

    /// Returns `true` for [`ConnectionStatus::Failed`].
    #[inline]
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Returns `true` if the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        use ConnectionStatus::{
            Connected, Connecting, Degraded, Disconnected, Failed, Handshaking, Reconnecting,
        };

        match (*self, next) {
            (_, Disconnected) => true,
            (Disconnected | Failed | Reconnecting, Connecting) => true,
            (Connecting, Handshaking | Reconnecting | Failed) => true,
            (Handshaking, Connected | Reconnecting | Failed) => true,
            (Connected, Degraded | Reconnecting) => true,
            (Degraded, Connected | Reconnecting) => true,
            (Reconnecting, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// StatusEvent
// ============================================================================

/// One status transition, as broadcast to observers.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    /// New status.
    pub status: ConnectionStatus,
    /// Status before the transition.
    pub previous: ConnectionStatus,
    /// Error that caused the transition, if any.
    pub error: Option<Error>,
    /// Delay before the next attempt when entering `Reconnecting`.
    pub retry_in: Option<Duration>,
    /// Consecutive failed attempts at the time of the transition.
    pub attempt: u32,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionStatus::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Handshaking));
        assert!(Handshaking.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Degraded));
        assert!(Degraded.can_transition_to(Connected));
    }

    #[test]
    fn test_failure_transitions() {
        assert!(Connecting.can_transition_to(Reconnecting));
        assert!(Handshaking.can_transition_to(Failed));
        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Degraded.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Connecting));
        assert!(Reconnecting.can_transition_to(Failed));
    }

    #[test]
    fn test_any_state_can_disconnect() {
        for status in [Disconnected, Connecting, Handshaking, Connected, Degraded, Reconnecting, Failed] {
            assert!(status.can_transition_to(Disconnected), "{status}");
        }
    }

    #[test]
    fn test_disallowed_transitions() {
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Connecting.can_transition_to(Connected));
        assert!(!Failed.can_transition_to(Reconnecting));
        assert!(!Connected.can_transition_to(Handshaking));
        assert!(!Connected.can_transition_to(Failed));
    }

    #[test]
    fn test_predicates() {
        assert!(Connected.is_connected());
        assert!(Degraded.is_connected());
        assert!(!Handshaking.is_connected());

        assert!(Reconnecting.is_active());
        assert!(!Failed.is_active());
        assert!(!Disconnected.is_active());
        assert!(Failed.is_failed());
    }

    #[test]
    fn test_display_and_serde() {
        assert_eq!(Reconnecting.to_string(), "reconnecting");
        assert_eq!(serde_json::to_value(Degraded).expect("serialize"), "degraded");
    }
}
