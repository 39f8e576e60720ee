//! Gateway credentials and the storage collaborator.
//!
//! Secure storage itself (Keychain, Android keystore, OS keyrings) lives in
//! the host application. The client only needs something implementing
//! [`CredentialStore`] to look up the gateway URL and its token.
//!
//! # Example
//!
//! ```ignore
//! use gateway_client::{ConnectionConfig, CredentialStore, Credentials, MemoryCredentialStore, Token};
//!
//! let store = MemoryCredentialStore::new();
//! store.set(Credentials::new("ws://127.0.0.1:18789", Token::generate())?)?;
//!
//! let config = ConnectionConfig::from_store(&store)?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt::{self, Write as _};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Random bytes in a generated token.
const TOKEN_BYTES: usize = 32;

// ============================================================================
// Token
// ============================================================================

/// Gateway access token.
///
/// The value never appears in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Token(String);

impl Token {
    /// Wraps an existing token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credentials`] if the token is empty or contains
    /// whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();

        if value.is_empty() {
            return Err(Error::credentials("token is empty"));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(Error::credentials("token contains whitespace"));
        }

        Ok(Self(value))
    }

    /// Generates a random 256-bit token encoded as 64 lowercase hex chars.
    #[must_use]
    pub fn generate() -> Self {
        let bytes: [u8; TOKEN_BYTES] = rand::random();

        let mut hex = String::with_capacity(TOKEN_BYTES * 2);
        for byte in bytes {
            let _ = write!(hex, "{byte:02x}");
        }

        Self(hex)
    }

    /// Returns the raw token for placing on the wire.
    #[inline]
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

impl TryFrom<String> for Token {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Token> for String {
    fn from(token: Token) -> Self {
        token.0
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Everything needed to reach one gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Gateway endpoint.
    pub gateway_url: Url,
    /// Access token.
    pub token: Token,
}

impl Credentials {
    /// Creates credentials from a URL string and a token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL does not parse.
    pub fn new(gateway_url: &str, token: Token) -> Result<Self> {
        Ok(Self {
            gateway_url: Url::parse(gateway_url)?,
            token,
        })
    }
}

// ============================================================================
// CredentialStore
// ============================================================================

/// Platform credential storage.
pub trait CredentialStore: Send + Sync {
    /// Returns the stored credentials, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credentials`] if the backing store fails.
    fn get(&self) -> Result<Option<Credentials>>;

    /// Replaces the stored credentials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credentials`] if the backing store fails.
    fn set(&self, credentials: Credentials) -> Result<()>;

    /// Removes the stored credentials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credentials`] if the backing store fails.
    fn clear(&self) -> Result<()>;
}

/// Process-local credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<Option<Credentials>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<Credentials>> {
        Ok(self.inner.read().clone())
    }

    fn set(&self, credentials: Credentials) -> Result<()> {
        *self.inner.write() = Some(credentials);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.inner.write() = None;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_token_format() {
        let token = Token::generate();
        assert_eq!(token.expose().len(), 64);
        assert!(token.expose().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(token, Token::generate());
    }

    #[test]
    fn test_token_validation() {
        assert!(Token::new("").is_err());
        assert!(Token::new("has space").is_err());
        assert!(Token::new("abc123").is_ok());
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = Token::new("very-secret").expect("token");
        let credentials = Credentials::new("ws://127.0.0.1:18789", token).expect("credentials");

        let debug = format!("{credentials:?}");
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_token_serde_validates() {
        let token: Token = serde_json::from_str(r#""abc""#).expect("parse");
        assert_eq!(token.expose(), "abc");
        assert!(serde_json::from_str::<Token>(r#""""#).is_err());
    }

    #[test]
    fn test_memory_store_lifecycle() {
        let store = MemoryCredentialStore::new();
        assert_eq!(store.get().expect("get"), None);

        let credentials =
            Credentials::new("wss://gateway.example.com", Token::new("t").expect("token")).expect("credentials");
        store.set(credentials.clone()).expect("set");
        assert_eq!(store.get().expect("get"), Some(credentials));

        store.clear().expect("clear");
        assert_eq!(store.get().expect("get"), None);
    }

    #[test]
    fn test_credentials_wire_names() {
        let credentials =
            Credentials::new("ws://127.0.0.1:18789", Token::new("t").expect("token")).expect("credentials");
        let value = serde_json::to_value(&credentials).expect("serialize");
        assert_eq!(value["gatewayUrl"], "ws://127.0.0.1:18789/");
        assert_eq!(value["token"], "t");
    }
}
