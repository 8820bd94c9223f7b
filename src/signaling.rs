//! JSON signaling protocol spoken with the media ingestion server.
//!
//! ```text
//! client                                  server
//!   ── {"command":"request_offer"} ──────────►
//!   ◄──────── {"command":"offer", id, sdp, candidates?, iceServers?}
//!   ── {"id", "command":"answer", sdp} ──────►
//!   ◄─► {"id", "command":"candidate", candidates:[..]}
//!   ◄──────── {"error": "...", "code": 400}
//! ```

use crate::peer::types::{IceCandidate, RemoteIceServer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;

/// Server assigned session id, echoed back verbatim
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum SessionId {
    Num(u64),
    Text(String),
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionId::Num(n) => write!(f, "{n}"),
            SessionId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn answer(sdp: String) -> Self {
        Self {
            sdp_type: "answer".into(),
            sdp,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OutboundCommand {
    RequestOffer,
    Answer {
        id: SessionId,
        sdp: SessionDescription,
    },
    Candidate {
        id: SessionId,
        candidates: Vec<IceCandidate>,
    },
}

impl OutboundCommand {
    pub fn to_json(&self) -> String {
        // plain data, serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OfferMessage {
    pub id: SessionId,
    pub sdp: SessionDescription,
    pub candidates: Vec<IceCandidate>,
    pub ice_servers: Vec<RemoteIceServer>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Offer(OfferMessage),
    Candidates(Vec<IceCandidate>),
    /// Error shaped reply (`error` field or `code == 400`)
    Error(String),
    /// Anything else; carries the command name for logging
    Other(String),
}

#[derive(Deserialize)]
struct RawOffer {
    id: SessionId,
    sdp: SessionDescription,
    #[serde(default)]
    candidates: Vec<Value>,
    #[serde(default, rename = "iceServers", alias = "ice_servers")]
    ice_servers: Vec<RemoteIceServer>,
}

/// Parses one inbound frame. `Err` means malformed JSON or a malformed offer.
pub fn parse_inbound(text: &str) -> Result<InboundMessage, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| format!("invalid json: {e}"))?;

    if let Some(message) = error_message(&value) {
        return Ok(InboundMessage::Error(message));
    }

    let command = value
        .get("command")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    match command.as_str() {
        "offer" => {
            let raw: RawOffer =
                serde_json::from_value(value).map_err(|e| format!("invalid offer: {e}"))?;
            Ok(InboundMessage::Offer(OfferMessage {
                id: raw.id,
                sdp: raw.sdp,
                candidates: lenient_candidates(raw.candidates),
                ice_servers: raw.ice_servers,
            }))
        }
        "candidate" => {
            let list = value
                .get("candidates")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            Ok(InboundMessage::Candidates(lenient_candidates(list)))
        }
        _ => Ok(InboundMessage::Other(command)),
    }
}

fn error_message(value: &Value) -> Option<String> {
    let error = value.get("error").filter(|e| !e.is_null());
    let code = value.get("code").and_then(Value::as_i64);
    match (error, code) {
        (Some(Value::String(s)), _) => Some(s.clone()),
        (Some(other), _) => Some(other.to_string()),
        (None, Some(400)) => Some(
            value
                .get("reason")
                .or_else(|| value.get("message"))
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| "signaling server returned code 400".into()),
        ),
        _ => None,
    }
}

fn lenient_candidates(values: Vec<Value>) -> Vec<IceCandidate> {
    values
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<IceCandidate>(v) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(error = %e, "skipping malformed remote candidate");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_commands_match_wire_format() {
        assert_eq!(
            OutboundCommand::RequestOffer.to_json(),
            r#"{"command":"request_offer"}"#
        );

        let answer = OutboundCommand::Answer {
            id: SessionId::Num(7),
            sdp: SessionDescription::answer("v=0".into()),
        };
        let v: Value = serde_json::from_str(&answer.to_json()).unwrap();
        assert_eq!(v, json!({"command": "answer", "id": 7, "sdp": {"type": "answer", "sdp": "v=0"}}));
    }

    #[test]
    fn offer_with_bundled_candidates_and_servers() {
        let text = json!({
            "command": "offer",
            "id": 1234,
            "peer_id": 0,
            "sdp": {"type": "offer", "sdp": "v=0\r\n"},
            "candidates": [
                {"candidate": "candidate:0 1 UDP 50 203.0.113.9 10000 typ host", "sdpMLineIndex": 0},
                {"bogus": true}
            ],
            "iceServers": [{"urls": ["turn:203.0.113.9:3478?transport=tcp"], "user_name": "u", "credential": "p"}]
        })
        .to_string();

        match parse_inbound(&text).unwrap() {
            InboundMessage::Offer(offer) => {
                assert_eq!(offer.id, SessionId::Num(1234));
                assert_eq!(offer.sdp.sdp_type, "offer");
                assert_eq!(offer.candidates.len(), 1);
                assert_eq!(offer.ice_servers.len(), 1);
            }
            other => panic!("expected offer, got {other:?}"),
        }
    }

    #[test]
    fn error_shapes() {
        let m = parse_inbound(r#"{"code":400,"error":"bad stream name"}"#).unwrap();
        assert_eq!(m, InboundMessage::Error("bad stream name".into()));

        let m = parse_inbound(r#"{"code":400}"#).unwrap();
        assert!(matches!(m, InboundMessage::Error(_)));

        let m = parse_inbound(r#"{"command":"ping"}"#).unwrap();
        assert_eq!(m, InboundMessage::Other("ping".into()));
    }

    #[test]
    fn malformed_json_is_an_error_not_a_panic() {
        assert!(parse_inbound("{not json").is_err());
        assert!(parse_inbound(r#"{"command":"offer","id":1}"#).is_err());
    }
}
