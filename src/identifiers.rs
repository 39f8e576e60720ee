//! Type-safe identifiers.
//!
//! Newtype wrappers prevent mixing request ids with subscription ids at
//! compile time.
//!
//! | Type | Inner | Source |
//! |------|-------|--------|
//! | [`RequestId`] | `String` | UUID v4 generated locally, echoed by the gateway |
//! | [`SubscriptionId`] | `u64` | Monotonic counter in the event dispatcher |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// RequestId
// ============================================================================

/// Correlation id of a request frame.
///
/// Locally generated ids are UUID v4 strings. Ids read from the wire are
/// kept verbatim so that any gateway-chosen format round-trips.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generates a new globally unique request id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an existing id string.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ============================================================================
// SubscriptionId
// ============================================================================

/// Handle of an event subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Creates a subscription id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_request_id_serializes_as_plain_string() {
        let id = RequestId::new("abc");
        assert_eq!(serde_json::to_string(&id).expect("serialize"), "\"abc\"");

        let parsed: RequestId = serde_json::from_str("\"abc\"").expect("parse");
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_subscription_id_display() {
        assert_eq!(SubscriptionId::new(7).to_string(), "sub-7");
        assert_eq!(SubscriptionId::new(7).as_u64(), 7);
    }
}
