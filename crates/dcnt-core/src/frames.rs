//! Wire frames accepted from peers and envelopes forwarded to them.
//!
//! Inbound text must be a JSON object of one of three shapes:
//!
//! ```text
//! { "protocols": ["name", ...] }                                   registration
//! { "sdp": <any>, "session_id"?, "remote_id"?, "local_id"? }       session description
//! { "ice": <any>, "session_id"?, "remote_id"?, "local_id"? }       connectivity candidate
//! ```
//!
//! `protocols` is checked first, then `sdp`, then `ice`. Payloads are opaque
//! to the relay and forwarded untouched.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::RelayError;
use crate::ids::SessionId;

/// A parsed inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame {
    /// Subscribe the sender to these protocol names.
    Register {
        /// Peer-chosen rendezvous keys, case-sensitive and unvalidated.
        protocols: Vec<String>,
    },
    /// A signaling message to relay.
    Signal(Signal),
}

/// Signaling payload plus the addressing fields a peer may attach.
#[derive(Clone, Debug, PartialEq)]
pub struct Signal {
    /// Session description or candidate.
    pub payload: Payload,
    /// Relay session id of the target (local senders only).
    pub session_id: Option<SessionId>,
    /// Opaque peer-side identifier of the remote end.
    pub remote_id: Option<Value>,
    /// Opaque peer-side identifier of the local end.
    pub local_id: Option<Value>,
}

/// The opaque signaling payload.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Payload {
    /// Session description.
    #[serde(rename = "sdp")]
    Sdp(Value),
    /// Connectivity candidate.
    #[serde(rename = "ice")]
    Ice(Value),
}

impl Payload {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sdp(_) => "sdp",
            Self::Ice(_) => "ice",
        }
    }
}

impl InboundFrame {
    /// Parse a text frame.
    ///
    /// Malformed JSON, non-object frames and unrecognized shapes are
    /// protocol violations.
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RelayError::ProtocolViolation(format!("malformed JSON: {e}")))?;
        let Value::Object(mut map) = value else {
            return Err(RelayError::ProtocolViolation(
                "frame is not a JSON object".into(),
            ));
        };

        if let Some(protocols) = map.remove("protocols") {
            let protocols: Vec<String> = serde_json::from_value(protocols).map_err(|_| {
                RelayError::ProtocolViolation("`protocols` must be an array of strings".into())
            })?;
            return Ok(Self::Register { protocols });
        }

        let payload = if let Some(sdp) = take_present(&mut map, "sdp") {
            Payload::Sdp(sdp)
        } else if let Some(ice) = take_present(&mut map, "ice") {
            Payload::Ice(ice)
        } else {
            return Err(RelayError::ProtocolViolation("unrecognized frame shape".into()));
        };

        // A non-string target can never name a session.
        let session_id = match take_present(&mut map, "session_id") {
            Some(Value::String(s)) => Some(SessionId::from_raw(s)),
            _ => None,
        };

        Ok(Self::Signal(Signal {
            payload,
            session_id,
            remote_id: take_present(&mut map, "remote_id"),
            local_id: take_present(&mut map, "local_id"),
        }))
    }
}

fn take_present(map: &mut Map<String, Value>, key: &str) -> Option<Value> {
    map.remove(key).filter(|v| !v.is_null())
}

/// A signaling message as forwarded to its target.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Envelope {
    /// Sender's relay session id (remote → local only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Peer-side local identifier, when supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_id: Option<Value>,
    /// Peer-side remote identifier, when supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<Value>,
    /// Origin `ip:port` of a local sender that supplied no `local_id`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// The untouched payload, serialized as `sdp` or `ice`.
    #[serde(flatten)]
    pub payload: Payload,
}

impl Envelope {
    /// Envelope for a local sender's message to a remote peer.
    pub fn to_remote(signal: Signal, origin: &str) -> Self {
        let from = if signal.local_id.is_some() {
            None
        } else {
            Some(origin.to_owned())
        };
        Self {
            session_id: None,
            local_id: signal.local_id,
            remote_id: signal.remote_id,
            from,
            payload: signal.payload,
        }
    }

    /// Envelope for a remote sender's message fanned out to local peers.
    pub fn to_local(signal: Signal, sender: &SessionId) -> Self {
        Self {
            session_id: Some(sender.clone()),
            local_id: signal.local_id,
            remote_id: signal.remote_id,
            from: None,
            payload: signal.payload,
        }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
