//! Connection configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use gateway_client::{ConnectionConfig, Token};
//!
//! let config = ConnectionConfig::new("wss://gateway.example.com")?
//!     .with_token(Token::new("0f3c...")?)
//!     .with_request_timeout(Duration::from_secs(30))
//!     .with_max_reconnect_attempts(8);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::credentials::{CredentialStore, Credentials, Token};
use crate::error::{Error, Result};
use crate::protocol::{
    CONNECT_TIMEOUT, ClientInfo, DEFAULT_GATEWAY_URL, DEFAULT_TICK_INTERVAL, PROTOCOL_VERSION,
    REQUEST_TIMEOUT,
};

use super::reconnect::{BACKOFF_SCHEDULE, MAX_RECONNECT_ATTEMPTS};

// ============================================================================
// Constants
// ============================================================================

/// Watchdog deadline as a multiple of the tick interval.
pub const HEARTBEAT_TIMEOUT_MULTIPLIER: f64 = 2.5;

/// Degraded checkpoint as a multiple of the tick interval.
pub const HEARTBEAT_DEGRADED_MULTIPLIER: f64 = 1.5;

/// Time allowed for a graceful transport close.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Requests allowed in flight at once.
pub const MAX_PENDING_REQUESTS: usize = 256;

/// Upper bound for every configured duration and per-request timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound for the heartbeat timeout multiplier.
pub const MAX_HEARTBEAT_MULTIPLIER: f64 = 100.0;

// ============================================================================
// ChallengeSigner
// ============================================================================

/// Signs the handshake nonce with a device key.
///
/// The signature travels as `signature` in the `connect` request.
pub trait ChallengeSigner: Send + Sync + fmt::Debug {
    /// Signs `nonce`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credentials`] if the key is unavailable.
    fn sign(&self, nonce: &str) -> Result<String>;
}

// ============================================================================
// ConnectionConfig
// ============================================================================

/// Everything the client needs to establish and keep a session.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Gateway endpoint (`ws://` or `wss://`).
    pub url: Url,

    /// Access token sent in the `connect` request.
    pub token: Option<Token>,

    /// Highest protocol version spoken.
    pub protocol_version: u32,

    /// Lowest protocol version accepted.
    pub min_protocol_version: u32,

    /// Deadline for transport open plus handshake.
    pub connect_timeout: Duration,

    /// Default per-request deadline.
    pub request_timeout: Duration,

    /// Consecutive failed attempts before giving up.
    pub max_reconnect_attempts: u32,

    /// Delays between attempts, capped at the last entry.
    pub backoff: Vec<Duration>,

    /// Watchdog deadline as a multiple of the tick interval.
    pub heartbeat_timeout_multiplier: f64,

    /// Degraded checkpoint as a multiple of the tick interval.
    pub heartbeat_degraded_multiplier: f64,

    /// Tick interval assumed when the gateway advertises none.
    pub default_tick_interval: Duration,

    /// Time allowed for a graceful transport close.
    pub close_grace: Duration,

    /// Requests allowed in flight at once.
    pub max_pending_requests: usize,

    /// Identity announced in the handshake.
    pub client: ClientInfo,

    /// Optional nonce signer.
    pub signer: Option<Arc<dyn ChallengeSigner>>,
}

// ============================================================================
// Constructors
// ============================================================================

impl ConnectionConfig {
    /// Creates a configuration for `url` with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL does not parse.
    pub fn new(url: impl AsRef<str>) -> Result<Self> {
        Ok(Self::with_url(Url::parse(url.as_ref())?))
    }

    /// Creates a configuration for a gateway on the local machine.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the default URL is a constant.
    pub fn local() -> Result<Self> {
        Self::new(DEFAULT_GATEWAY_URL)
    }

    /// Creates a configuration from stored credentials.
    #[must_use]
    pub fn from_credentials(credentials: Credentials) -> Self {
        Self::with_url(credentials.gateway_url).with_token(credentials.token)
    }

    /// Creates a configuration from whatever `store` holds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credentials`] if the store is empty or fails.
    pub fn from_store(store: &dyn CredentialStore) -> Result<Self> {
        store
            .get()?
            .map(Self::from_credentials)
            .ok_or_else(|| Error::credentials("no gateway credentials stored"))
    }

    fn with_url(url: Url) -> Self {
        Self {
            url,
            token: None,
            protocol_version: PROTOCOL_VERSION,
            min_protocol_version: PROTOCOL_VERSION,
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            backoff: BACKOFF_SCHEDULE.to_vec(),
            heartbeat_timeout_multiplier: HEARTBEAT_TIMEOUT_MULTIPLIER,
            heartbeat_degraded_multiplier: HEARTBEAT_DEGRADED_MULTIPLIER,
            default_tick_interval: DEFAULT_TICK_INTERVAL,
            close_grace: CLOSE_GRACE,
            max_pending_requests: MAX_PENDING_REQUESTS,
            client: ClientInfo::default(),
            signer: None,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ConnectionConfig {
    /// Sets the access token.
    #[inline]
    #[must_use]
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    /// Sets the accepted protocol range.
    #[inline]
    #[must_use]
    pub fn with_protocol_range(mut self, min: u32, max: u32) -> Self {
        self.min_protocol_version = min;
        self.protocol_version = max;
        self
    }

    /// Sets the deadline for transport open plus handshake.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the default per-request deadline.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets how many consecutive failures end in `Failed`.
    #[inline]
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the backoff schedule.
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, schedule: Vec<Duration>) -> Self {
        self.backoff = schedule;
        self
    }

    /// Sets the degraded and stale multipliers of the heartbeat watchdog.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_multipliers(mut self, degraded: f64, timeout: f64) -> Self {
        self.heartbeat_degraded_multiplier = degraded;
        self.heartbeat_timeout_multiplier = timeout;
        self
    }

    /// Sets the tick interval assumed when the gateway advertises none.
    #[inline]
    #[must_use]
    pub fn with_default_tick_interval(mut self, interval: Duration) -> Self {
        self.default_tick_interval = interval;
        self
    }

    /// Sets the graceful close allowance.
    #[inline]
    #[must_use]
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Sets the in-flight request cap.
    #[inline]
    #[must_use]
    pub fn with_max_pending_requests(mut self, max: usize) -> Self {
        self.max_pending_requests = max;
        self
    }

    /// Sets the identity announced in the handshake.
    #[inline]
    #[must_use]
    pub fn with_client(mut self, client: ClientInfo) -> Self {
        self.client = client;
        self
    }

    /// Sets the nonce signer.
    #[inline]
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn ChallengeSigner>) -> Self {
        self.signer = Some(signer);
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ConnectionConfig {
    /// Checks the configuration for values the session cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "gateway URL must use ws:// or wss://, got {}://",
                self.url.scheme()
            )));
        }

        if self.min_protocol_version > self.protocol_version {
            return Err(Error::config(format!(
                "protocol range is empty: {}..={}",
                self.min_protocol_version, self.protocol_version
            )));
        }

        if self.connect_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(Error::config("timeouts must be non-zero"));
        }

        let longest = [
            self.connect_timeout,
            self.request_timeout,
            self.default_tick_interval,
            self.close_grace,
        ]
        .into_iter()
        .chain(self.backoff.iter().copied())
        .max()
        .unwrap_or_default();
        if longest > MAX_TIMEOUT {
            return Err(Error::config(format!(
                "durations are capped at {}s, got {}s",
                MAX_TIMEOUT.as_secs(),
                longest.as_secs()
            )));
        }

        if self.backoff.is_empty() {
            return Err(Error::config("backoff schedule is empty"));
        }

        if self.default_tick_interval.is_zero() {
            return Err(Error::config("default tick interval must be non-zero"));
        }

        let degraded = self.heartbeat_degraded_multiplier;
        let timeout = self.heartbeat_timeout_multiplier;
        if !degraded.is_finite()
            || !timeout.is_finite()
            || degraded < 1.0
            || timeout <= degraded
            || timeout > MAX_HEARTBEAT_MULTIPLIER
        {
            return Err(Error::config(format!(
                "heartbeat multipliers must satisfy 1 <= degraded < timeout <= {MAX_HEARTBEAT_MULTIPLIER}, got {degraded} and {timeout}"
            )));
        }

        if self.max_pending_requests == 0 {
            return Err(Error::config("max_pending_requests must be at least 1"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::local().expect("config");

        assert_eq!(config.url.as_str(), "ws://127.0.0.1:18789/");
        assert_eq!(config.protocol_version, 3);
        assert_eq!(config.connect_timeout, Duration::from_millis(15_000));
        assert_eq!(config.request_timeout, Duration::from_millis(60_000));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.backoff.len(), 5);
        assert!(config.token.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = ConnectionConfig::new("wss://gateway.example.com")
            .expect("config")
            .with_token(Token::new("abc").expect("token"))
            .with_protocol_range(2, 3)
            .with_request_timeout(Duration::from_secs(5))
            .with_max_reconnect_attempts(2)
            .with_max_pending_requests(8);

        assert_eq!(config.min_protocol_version, 2);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.max_reconnect_attempts, 2);
        assert_eq!(config.max_pending_requests, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let base = ConnectionConfig::local().expect("config");

        let cases = [
            ConnectionConfig::new("http://gateway.example.com").expect("config"),
            base.clone().with_protocol_range(4, 3),
            base.clone().with_connect_timeout(Duration::ZERO),
            base.clone().with_backoff(Vec::new()),
            base.clone().with_heartbeat_multipliers(2.5, 1.5),
            base.clone().with_heartbeat_multipliers(0.5, 2.5),
            base.clone().with_default_tick_interval(Duration::ZERO),
            base.clone().with_request_timeout(Duration::MAX),
            base.clone().with_connect_timeout(MAX_TIMEOUT + Duration::from_secs(1)),
            base.clone().with_backoff(vec![Duration::from_secs(1), Duration::MAX]),
            base.clone().with_heartbeat_multipliers(1.5, MAX_HEARTBEAT_MULTIPLIER * 2.0),
            base.with_max_pending_requests(0),
        ];

        for config in cases {
            let err = config.validate().expect_err("invalid");
            assert!(matches!(err, Error::Config { .. }), "{err}");
        }
    }

    #[test]
    fn test_unparseable_url() {
        assert!(matches!(ConnectionConfig::new("::nope"), Err(Error::Config { .. })));
    }

    #[test]
    fn test_from_store() {
        let store = MemoryCredentialStore::new();
        assert!(matches!(
            ConnectionConfig::from_store(&store),
            Err(Error::Credentials { .. })
        ));

        let credentials = Credentials::new("ws://10.0.0.2:18789", Token::generate()).expect("credentials");
        store.set(credentials).expect("set");

        let config = ConnectionConfig::from_store(&store).expect("config");
        assert_eq!(config.url.host_str(), Some("10.0.0.2"));
        assert!(config.token.is_some());
    }

    #[test]
    fn test_debug_hides_token() {
        let config = ConnectionConfig::local()
            .expect("config")
            .with_token(Token::new("hunter2").expect("token"));
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
