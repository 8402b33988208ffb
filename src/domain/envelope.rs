//! Wire-level message envelope.
//!
//! Every frame exchanged with a peer is a text frame holding one JSON object:
//!
//! ```json
//! {"msg":"normal","method":"greet","uid":"1","params":"hi"}
//! ```
//!
//! `msg` is required and non-empty. `"ping"` and `"pong"` are reserved for the
//! heartbeat; every other value is an application message. `uid` and `params`
//! are opaque to the hub and are passed through untouched.

use serde::{Deserialize, Serialize};

/// `msg` value of the server-to-client liveness check.
pub const PING_KIND: &str = "ping";

/// `msg` value of the client-to-server liveness acknowledgment.
pub const PONG_KIND: &str = "pong";

/// Conventional `msg` value for application messages.
pub const NORMAL_KIND: &str = "normal";

/// Exact bytes of the ping control message sent by the write loop.
pub const PING_FRAME: &str = r#"{"msg":"ping"}"#;

/// Errors raised while decoding an inbound payload.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The payload is not a JSON object of the expected shape.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The payload parsed but `msg` is missing or empty.
    #[error("envelope has an empty msg field")]
    EmptyKind,
}

/// Structured message unit exchanged over a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind (`"ping"`, `"pong"`, `"normal"` or caller-defined).
    #[serde(rename = "msg", default)]
    pub kind: String,
    /// Method name, meaningful only for application messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Caller-assigned correlation token.
    #[serde(default)]
    pub uid: String,
    /// Opaque payload.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Heartbeat acknowledgment; consumed by the connection itself.
    Pong,
    /// Anything else with a non-empty kind; routed to the message handler.
    Message(Envelope),
}

impl Envelope {
    /// Builds an application message of kind `"normal"`.
    #[must_use]
    pub fn normal(
        method: impl Into<String>,
        uid: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        Self {
            kind: NORMAL_KIND.to_string(),
            method: Some(method.into()),
            uid: uid.into(),
            params,
        }
    }

    /// Decodes a raw payload and rejects envelopes with an empty kind.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] if the payload is not a JSON
    /// object of the envelope shape, or [`EnvelopeError::EmptyKind`] if `msg`
    /// is absent or empty.
    pub fn decode(payload: &[u8]) -> Result<Self, EnvelopeError> {
        // Objects only; the derived visitor would also accept a sequence.
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(payload)?;
        let envelope: Self = serde_json::from_value(serde_json::Value::Object(object))?;
        if envelope.kind.is_empty() {
            return Err(EnvelopeError::EmptyKind);
        }
        Ok(envelope)
    }

    /// Serializes the envelope into a text payload.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_json::Error`] if `params` cannot be
    /// serialized.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Returns `true` for the heartbeat acknowledgment kind.
    #[must_use]
    pub fn is_pong(&self) -> bool {
        self.kind == PONG_KIND
    }
}

impl Inbound {
    /// Decodes and classifies a raw inbound payload.
    ///
    /// # Errors
    ///
    /// Propagates [`Envelope::decode`] errors.
    pub fn parse(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope = Envelope::decode(payload)?;
        if envelope.is_pong() {
            Ok(Self::Pong)
        } else {
            Ok(Self::Message(envelope))
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn application_message_round_trips_verbatim() {
        let raw = r#"{"msg":"normal","method":"greet","uid":"1","params":"hi"}"#;
        let Ok(envelope) = Envelope::decode(raw.as_bytes()) else {
            panic!("valid envelope rejected");
        };
        assert_eq!(envelope.method.as_deref(), Some("greet"));
        assert_eq!(envelope.encode().ok().as_deref(), Some(raw));
    }

    #[test]
    fn missing_optional_fields_default() {
        let Ok(envelope) = Envelope::decode(br#"{"msg":"status"}"#) else {
            panic!("valid envelope rejected");
        };
        assert_eq!(envelope.kind, "status");
        assert!(envelope.method.is_none());
        assert!(envelope.uid.is_empty());
        assert!(envelope.params.is_null());
    }

    #[test]
    fn nested_params_are_preserved() {
        let params = json!({"room": "lobby", "tags": [1, 2, {"deep": null}]});
        let envelope = Envelope::normal("join", "abc", params.clone());
        let Ok(text) = envelope.encode() else {
            panic!("encode failed");
        };
        let Ok(decoded) = Envelope::decode(text.as_bytes()) else {
            panic!("decode failed");
        };
        assert_eq!(decoded.params, params);
    }

    #[test]
    fn empty_or_missing_kind_is_rejected() {
        for raw in [r#"{"msg":""}"#, r#"{"uid":"1"}"#, "{}"] {
            assert!(matches!(
                Envelope::decode(raw.as_bytes()),
                Err(EnvelopeError::EmptyKind)
            ));
        }
    }

    #[test]
    fn invalid_json_is_malformed() {
        for raw in [
            "not json",
            r#"{"msg":1}"#,
            "[1,2]",
            r#"["normal"]"#,
            r#"["normal","greet","1","hi"]"#,
            r#""normal""#,
            r#"{"msg":"x""#,
        ] {
            assert!(matches!(
                Envelope::decode(raw.as_bytes()),
                Err(EnvelopeError::Malformed(_))
            ));
        }
    }

    #[test]
    fn pong_is_classified_separately() {
        assert!(matches!(
            Inbound::parse(br#"{"msg":"pong"}"#),
            Ok(Inbound::Pong)
        ));
        assert!(matches!(
            Inbound::parse(br#"{"msg":"ping"}"#),
            Ok(Inbound::Message(_))
        ));
    }

    #[test]
    fn ping_frame_is_a_ping_envelope() {
        let Ok(envelope) = Envelope::decode(PING_FRAME.as_bytes()) else {
            panic!("ping frame must decode");
        };
        assert_eq!(envelope.kind, PING_KIND);
    }
}
