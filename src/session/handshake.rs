//! Handshake sequencer.
//!
//! Pure state machine over inbound frames: waits for `connect.challenge`
//! (or the short `challenge`), answers with the `connect` request, then interprets the reply. The
//! driver owns the transport and the deadline.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::handshake::{is_auth_reason, is_protocol_reason};
use crate::protocol::{
    Auth, CONNECT_METHOD, Challenge, ConnectParams, Frame, HELLO_ERROR, HELLO_OK,
    HelloError, HelloOk, Request, Response, is_challenge_event, parse,
};

use super::config::ConnectionConfig;

// ============================================================================
// HandshakeStep
// ============================================================================

/// What the driver does after feeding a frame to the sequencer.
#[derive(Debug)]
pub(crate) enum HandshakeStep {
    /// Send this frame to the gateway.
    Send(Frame),
    /// Keep waiting.
    Pending,
    /// Handshake succeeded.
    Complete(HelloOk),
}

// ============================================================================
// Handshake
// ============================================================================

#[derive(Debug)]
enum Stage {
    AwaitingChallenge,
    AwaitingHello(RequestId),
    Done,
}

/// One handshake attempt.
pub(crate) struct Handshake<'a> {
    config: &'a ConnectionConfig,
    stage: Stage,
}

impl<'a> Handshake<'a> {
    /// Starts a handshake for `config`.
    pub(crate) fn new(config: &'a ConnectionConfig) -> Self {
        Self {
            config,
            stage: Stage::AwaitingChallenge,
        }
    }

    /// Feeds one raw inbound message.
    ///
    /// # Errors
    ///
    /// Fails the attempt on malformed or out-of-sequence frames and on a
    /// rejected hello.
    pub(crate) fn on_text(&mut self, raw: &str) -> Result<HandshakeStep> {
        self.on_frame(parse(raw)?)
    }

    /// Feeds one decoded inbound frame.
    ///
    /// # Errors
    ///
    /// See [`Handshake::on_text`].
    pub(crate) fn on_frame(&mut self, frame: Frame) -> Result<HandshakeStep> {
        match (&self.stage, frame) {
            (Stage::AwaitingChallenge, Frame::Event(event)) if is_challenge_event(&event.event) => {
                let challenge: Challenge = event.payload_as()?;
                let request = self.connect_request(challenge)?;

                debug!(id = %request.id, "Answering connect challenge");
                self.stage = Stage::AwaitingHello(request.id.clone());
                Ok(HandshakeStep::Send(Frame::Request(request)))
            }

            (Stage::AwaitingHello(_), Frame::Event(event)) if is_challenge_event(&event.event) => {
                Err(Error::invalid_frame("second connect challenge in one handshake"))
            }

            (_, Frame::Event(event)) => {
                trace!(event = %event.event, "Ignoring event during handshake");
                Ok(HandshakeStep::Pending)
            }

            (Stage::AwaitingHello(id), Frame::Response(response)) if response.id == *id => {
                let hello = self.interpret(response)?;
                self.stage = Stage::Done;
                Ok(HandshakeStep::Complete(hello))
            }

            (_, Frame::Response(response)) => Err(Error::invalid_frame(format!(
                "unexpected response {} during handshake",
                response.id
            ))),

            (_, Frame::Request(request)) => Err(Error::invalid_frame(format!(
                "unexpected request {} during handshake",
                request.method
            ))),
        }
    }

    fn connect_request(&self, challenge: Challenge) -> Result<Request> {
        let signature = match &self.config.signer {
            Some(signer) => Some(signer.sign(&challenge.nonce)?),
            None => None,
        };

        let params = ConnectParams {
            min_protocol: self.config.min_protocol_version,
            max_protocol: self.config.protocol_version,
            client: self.config.client.clone(),
            auth: self.config.token.as_ref().map(|token| Auth {
                token: Some(token.expose().to_string()),
            }),
            nonce: challenge.nonce,
            signature,
        };

        Ok(Request::new(CONNECT_METHOD, serde_json::to_value(params)?))
    }

    fn interpret(&self, response: Response) -> Result<HelloOk> {
        if !response.is_ok() {
            let error = response.error.unwrap_or_default();
            let protocol = error
                .details
                .as_ref()
                .and_then(|d| d.get("protocol"))
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok());
            return Err(self.rejection(&error.code, &error.message, protocol));
        }

        if response.payload.get("type").and_then(Value::as_str) == Some(HELLO_ERROR) {
            let hello: HelloError = serde_json::from_value(response.payload)?;
            let message = hello.message.unwrap_or_default();
            return Err(self.rejection(&hello.reason, &message, hello.protocol));
        }

        let hello: HelloOk = serde_json::from_value(response.payload)?;
        if let Some(kind) = hello.kind.as_deref()
            && kind != HELLO_OK
        {
            return Err(Error::invalid_frame(format!("unexpected hello type {kind}")));
        }

        let (min, max) = (self.config.min_protocol_version, self.config.protocol_version);
        if !(min..=max).contains(&hello.protocol) {
            return Err(Error::protocol_mismatch(hello.protocol, min, max));
        }

        Ok(hello)
    }

    fn rejection(&self, code: &str, message: &str, protocol: Option<u32>) -> Error {
        let message = if message.is_empty() { code } else { message };

        if is_protocol_reason(code) {
            return Error::protocol_mismatch(
                protocol.unwrap_or_default(),
                self.config.min_protocol_version,
                self.config.protocol_version,
            );
        }
        if is_auth_reason(code) {
            return Error::auth_rejected(code, message);
        }

        Error::connection_failed(format!("handshake rejected ({code}): {message}"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use serde_json::json;

    use crate::credentials::Token;
    use crate::protocol::{CHALLENGE_EVENT, ErrorShape, Event};
    use crate::session::config::ChallengeSigner;

    fn config() -> ConnectionConfig {
        ConnectionConfig::local()
            .expect("config")
            .with_token(Token::new("secret").expect("token"))
    }

    fn challenge(nonce: &str) -> Frame {
        Frame::Event(Event::new(CHALLENGE_EVENT, json!({ "nonce": nonce, "ts": 1 })))
    }

    fn answer(handshake: &mut Handshake<'_>) -> Request {
        match handshake.on_frame(challenge("n-1")).expect("challenge") {
            HandshakeStep::Send(Frame::Request(request)) => request,
            other => panic!("expected connect request, got {other:?}"),
        }
    }

    #[test]
    fn test_challenge_produces_connect_request() {
        let config = config();
        let mut handshake = Handshake::new(&config);
        let request = answer(&mut handshake);

        assert_eq!(request.method, CONNECT_METHOD);
        let params: ConnectParams = serde_json::from_value(request.params).expect("params");
        assert_eq!(params.nonce, "n-1");
        assert_eq!(params.min_protocol, 3);
        assert_eq!(params.max_protocol, 3);
        assert_eq!(params.auth.and_then(|a| a.token).as_deref(), Some("secret"));
        assert_eq!(params.signature, None);
    }

    #[test]
    fn test_hello_ok_completes() {
        let config = config();
        let mut handshake = Handshake::new(&config);
        let request = answer(&mut handshake);

        let reply = Response::success(
            request.id,
            json!({"type": "hello-ok", "protocol": 3, "policy": {"tickIntervalMs": 15000}}),
        );
        match handshake.on_frame(Frame::Response(reply)).expect("hello") {
            HandshakeStep::Complete(hello) => assert_eq!(hello.tick_interval_ms(), Some(15_000)),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn test_events_before_challenge_are_ignored() {
        let config = config();
        let mut handshake = Handshake::new(&config);

        let tick = Frame::Event(Event::new("tick", json!({"ts": 1})));
        assert!(matches!(handshake.on_frame(tick), Ok(HandshakeStep::Pending)));
        answer(&mut handshake);
    }

    #[test]
    fn test_auth_rejection_as_error_response() {
        let config = config();
        let mut handshake = Handshake::new(&config);
        let request = answer(&mut handshake);

        let reply = Response::failure(request.id, ErrorShape::new("AUTH_REJECTED", "bad token"));
        let err = handshake.on_frame(Frame::Response(reply)).expect_err("rejected");
        assert!(matches!(err, Error::AuthRejected { ref message, .. } if message == "bad token"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_auth_rejection_as_hello_error_payload() {
        let config = config();
        let mut handshake = Handshake::new(&config);
        let request = answer(&mut handshake);

        let reply = Response::success(
            request.id,
            json!({"type": "hello-error", "reason": "INVALID_TOKEN", "message": "expired"}),
        );
        let err = handshake.on_frame(Frame::Response(reply)).expect_err("rejected");
        assert!(matches!(err, Error::AuthRejected { ref code, .. } if code == "INVALID_TOKEN"));
    }

    #[test]
    fn test_protocol_out_of_range() {
        let config = config();
        let mut handshake = Handshake::new(&config);
        let request = answer(&mut handshake);

        let reply = Response::success(request.id, json!({"type": "hello-ok", "protocol": 4}));
        let err = handshake.on_frame(Frame::Response(reply)).expect_err("mismatch");
        assert!(matches!(err, Error::ProtocolMismatch { server: 4, min: 3, max: 3 }));
    }

    #[test]
    fn test_protocol_mismatch_reason() {
        let config = config();
        let mut handshake = Handshake::new(&config);
        let request = answer(&mut handshake);

        let mut shape = ErrorShape::new("PROTOCOL_MISMATCH", "");
        shape.details = Some(json!({"protocol": 2}));
        let err = handshake
            .on_frame(Frame::Response(Response::failure(request.id, shape)))
            .expect_err("mismatch");
        assert!(matches!(err, Error::ProtocolMismatch { server: 2, .. }));
    }

    #[test]
    fn test_other_rejection_is_retryable() {
        let config = config();
        let mut handshake = Handshake::new(&config);
        let request = answer(&mut handshake);

        let reply = Response::failure(request.id, ErrorShape::new("OVERLOADED", "try later"));
        let err = handshake.on_frame(Frame::Response(reply)).expect_err("rejected");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_out_of_sequence_frames() {
        let config = config();

        let mut handshake = Handshake::new(&config);
        let stray = Frame::Response(Response::success(RequestId::new("x"), json!({})));
        assert!(matches!(handshake.on_frame(stray), Err(Error::InvalidFrame { .. })));

        let mut handshake = Handshake::new(&config);
        answer(&mut handshake);
        assert!(matches!(
            handshake.on_frame(challenge("n-2")),
            Err(Error::InvalidFrame { .. })
        ));

        let mut handshake = Handshake::new(&config);
        assert!(matches!(handshake.on_text("{oops"), Err(Error::InvalidFrame { .. })));
    }

    #[test]
    fn test_challenge_without_nonce() {
        let config = config();
        let mut handshake = Handshake::new(&config);

        let bad = Frame::Event(Event::new(CHALLENGE_EVENT, json!({"ts": 1})));
        assert!(matches!(handshake.on_frame(bad), Err(Error::InvalidFrame { .. })));
    }

    #[test]
    fn test_short_challenge_and_protocol_version_field() {
        let config = config();
        let mut handshake = Handshake::new(&config);

        let challenge = r#"{"kind":"event","event":"challenge","payload":{"nonce":"n-9"}}"#;
        let request = match handshake.on_text(challenge).expect("challenge") {
            HandshakeStep::Send(Frame::Request(request)) => request,
            other => panic!("expected connect request, got {other:?}"),
        };

        let hello = format!(
            r#"{{"kind":"response","id":"{}","ok":true,"payload":{{"type":"hello-ok","protocolVersion":3}}}}"#,
            request.id
        );
        match handshake.on_text(&hello).expect("hello") {
            HandshakeStep::Complete(hello) => assert_eq!(hello.protocol, 3),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[derive(Debug)]
    struct Reverse;

    impl ChallengeSigner for Reverse {
        fn sign(&self, nonce: &str) -> Result<String> {
            Ok(nonce.chars().rev().collect())
        }
    }

    #[test]
    fn test_signer_adds_signature() {
        let config = config().with_signer(Arc::new(Reverse));
        let mut handshake = Handshake::new(&config);
        let request = answer(&mut handshake);

        let params: ConnectParams = serde_json::from_value(request.params).expect("params");
        assert_eq!(params.signature.as_deref(), Some("1-n"));
    }
}
