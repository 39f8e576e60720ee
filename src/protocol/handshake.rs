//! Handshake payload types.
//!
//! Payloads of the `connect.challenge` event, the `connect` request, and the
//! `hello-ok` / `hello-error` replies. Field names are camelCase on the wire.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Challenge
// ============================================================================

/// Payload of the `connect.challenge` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Nonce that the client echoes (and optionally signs) in `connect`.
    pub nonce: String,

    /// Gateway time in milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<u64>,
}

// ============================================================================
// ConnectParams
// ============================================================================

/// Identity of the connecting front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client identifier, e.g. `"ios-app"`.
    pub id: String,
    /// Client version.
    pub version: String,
    /// Operating system or platform name.
    pub platform: String,
    /// Connection mode announced to the gateway.
    pub mode: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            id: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
            mode: "client".to_string(),
        }
    }
}

/// Credential block of the `connect` request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    /// Gateway token or instance key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Parameters of the `connect` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Lowest protocol version the client accepts.
    pub min_protocol: u32,
    /// Highest protocol version the client accepts.
    pub max_protocol: u32,
    /// Client identity.
    pub client: ClientInfo,
    /// Credential, omitted for unauthenticated local gateways.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
    /// Nonce echoed from the challenge.
    pub nonce: String,
    /// Optional signature over the nonce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

// ============================================================================
// HelloOk
// ============================================================================

/// Successful handshake reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloOk {
    /// Payload discriminator, `"hello-ok"` when present.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Negotiated protocol version.
    #[serde(alias = "protocolVersion")]
    pub protocol: u32,

    /// Gateway build information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerInfo>,

    /// Session policy (tick interval, limits).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,

    /// Initial session snapshot, opaque to the transport layer.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub snapshot: Value,
}

impl HelloOk {
    /// Returns the advertised tick interval in milliseconds, if any.
    #[inline]
    #[must_use]
    pub fn tick_interval_ms(&self) -> Option<u64> {
        self.policy.as_ref().and_then(|p| p.tick_interval_ms)
    }
}

/// Gateway build information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Gateway version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Gateway-side connection id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conn_id: Option<String>,
}

/// Session policy advertised by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Interval between `tick` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_interval_ms: Option<u64>,
    /// Largest frame the gateway accepts, in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

// ============================================================================
// HelloError
// ============================================================================

/// Rejected handshake reply carried as a response payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloError {
    /// Payload discriminator, `"hello-error"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Reason code, e.g. `AUTH_REJECTED`.
    pub reason: String,
    /// Human readable reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Version the gateway speaks, for mismatches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<u32>,
}

// ============================================================================
// Reason Classification
// ============================================================================

/// Returns `true` if a rejection code denotes a credential problem.
#[must_use]
pub fn is_auth_reason(code: &str) -> bool {
    let code = code.to_ascii_uppercase();
    matches!(
        code.as_str(),
        "UNAUTHORIZED" | "FORBIDDEN" | "INVALID_TOKEN" | "TOKEN_EXPIRED"
    ) || code.starts_with("AUTH_")
}

/// Returns `true` if a rejection code denotes version skew.
#[must_use]
pub fn is_protocol_reason(code: &str) -> bool {
    let code = code.to_ascii_uppercase();
    matches!(
        code.as_str(),
        "PROTOCOL_MISMATCH" | "UNSUPPORTED_PROTOCOL" | "VERSION_MISMATCH"
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connect_params_wire_names() {
        let params = ConnectParams {
            min_protocol: 3,
            max_protocol: 3,
            client: ClientInfo::default(),
            auth: Some(Auth {
                token: Some("secret".into()),
            }),
            nonce: "n-1".into(),
            signature: None,
        };

        let value = serde_json::to_value(&params).expect("serialize");
        assert_eq!(value["minProtocol"], 3);
        assert_eq!(value["maxProtocol"], 3);
        assert_eq!(value["auth"]["token"], "secret");
        assert_eq!(value["nonce"], "n-1");
        assert!(value.get("signature").is_none());
    }

    #[test]
    fn test_auth_debug_redacts_token() {
        let auth = Auth {
            token: Some("super-secret".into()),
        };
        let debug = format!("{auth:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_hello_ok_parsing() {
        let hello: HelloOk = serde_json::from_value(json!({
            "type": "hello-ok",
            "protocol": 3,
            "server": {"version": "2026.1", "connId": "c-9"},
            "policy": {"tickIntervalMs": 15000, "maxPayload": 1048576},
            "snapshot": {"sessions": []}
        }))
        .expect("parse");

        assert_eq!(hello.protocol, 3);
        assert_eq!(hello.tick_interval_ms(), Some(15_000));
        assert_eq!(hello.server.and_then(|s| s.conn_id).as_deref(), Some("c-9"));
    }

    #[test]
    fn test_hello_ok_minimal() {
        let hello: HelloOk = serde_json::from_value(json!({"protocol": 3})).expect("parse");
        assert_eq!(hello.kind, None);
        assert_eq!(hello.tick_interval_ms(), None);

        let hello: HelloOk =
            serde_json::from_value(json!({"type": "hello-ok", "protocolVersion": 3})).expect("parse");
        assert_eq!(hello.protocol, 3);
    }

    #[test]
    fn test_reason_classification() {
        assert!(is_auth_reason("AUTH_REJECTED"));
        assert!(is_auth_reason("auth_failed"));
        assert!(is_auth_reason("INVALID_TOKEN"));
        assert!(!is_auth_reason("RATE_LIMITED"));
        assert!(!is_auth_reason("OAUTH_PROVIDER_UNAVAILABLE"));
        assert!(!is_auth_reason("REAUTH_PENDING"));

        assert!(is_protocol_reason("PROTOCOL_MISMATCH"));
        assert!(is_protocol_reason("unsupported_protocol"));
        assert!(!is_protocol_reason("AUTH_REJECTED"));
    }
}
