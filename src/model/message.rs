//! Signaling message envelope
//!
//! Every frame exchanged with the relay is a JSON text frame of the form
//! `{"event": "offer", "data": {...}}`. The relay only looks at `event`; the
//! `data` body is kept as raw JSON text and re-emitted byte for byte.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

use crate::error::RelayError;

/// The three kinds of negotiation message the relay forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    /// A session description proposing a call.
    Offer,
    /// A session description accepting an offer.
    Answer,
    /// One network path a peer may be reachable on.
    IceCandidate,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
        }
    }

    /// Looks up a kind by its event name on the wire.
    pub fn from_event(event: &str) -> Option<SignalKind> {
        match event {
            "offer" => Some(SignalKind::Offer),
            "answer" => Some(SignalKind::Answer),
            "ice-candidate" => Some(SignalKind::IceCandidate),
            _ => None,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signaling message with an opaque payload.
#[derive(Debug, Clone, Serialize)]
pub struct SignalMessage {
    #[serde(rename = "event")]
    pub kind: SignalKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<RawValue>>,
}

/// Envelope as received, before the event name is checked.
#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default, deserialize_with = "raw_payload")]
    data: Option<Box<RawValue>>,
}

// `Option<Box<RawValue>>` would swallow an explicit `null`; keep it as payload.
fn raw_payload<'de, D>(deserializer: D) -> Result<Option<Box<RawValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    Box::<RawValue>::deserialize(deserializer).map(Some)
}

impl SignalMessage {
    pub fn new(kind: SignalKind, data: Option<Box<RawValue>>) -> SignalMessage {
        SignalMessage { kind, data }
    }

    /// Decodes a text frame.
    ///
    /// ## Returns
    ///
    /// * `Ok(Some(message))` for one of the three signaling kinds.
    /// * `Ok(None)` for a well-formed envelope naming any other event. Those
    ///   have no handler on the relay and are skipped.
    /// * `Err(..)` if the frame is not a JSON object with an `event` field.
    pub fn decode(text: &str) -> Result<Option<SignalMessage>, RelayError> {
        // A derived struct visitor also takes a JSON array (`["offer", {}]`),
        // so only hand objects to it.
        let raw: &RawValue = serde_json::from_str(text)?;
        if !raw.get().trim_start().starts_with('{') {
            return Err(RelayError::NotAnObject);
        }

        let envelope: Envelope = serde_json::from_str(raw.get())?;

        Ok(SignalKind::from_event(&envelope.event).map(|kind| SignalMessage {
            kind,
            data: envelope.data,
        }))
    }

    /// Encodes the message as a text frame.
    pub fn encode(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The payload exactly as the sender wrote it, if any.
    pub fn payload(&self) -> Option<&str> {
        self.data.as_deref().map(RawValue::get)
    }
}
