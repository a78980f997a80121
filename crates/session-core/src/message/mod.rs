//! Signaling messages
//!
//! The structured form of every message exchanged over the signaling channel.
//! The JSON wire form lives in [`codec`].

pub mod codec;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::types::{IceConfig, MediaOptions, Role};

pub use codec::{decode, encode};

/// Raw payload received from or written to the signaling channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// A signaling message
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingMessage {
    Connect(ConnectMessage),
    Offer(OfferMessage),
    Answer { sdp: String },
    Candidate { sdp_fragment: String },
    Ping,
    Pong,
    Stats(Stats),
}

impl SignalingMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Connect(_) => MessageKind::Connect,
            Self::Offer(_) => MessageKind::Offer,
            Self::Answer { .. } => MessageKind::Answer,
            Self::Candidate { .. } => MessageKind::Candidate,
            Self::Ping => MessageKind::Ping,
            Self::Pong => MessageKind::Pong,
            Self::Stats(_) => MessageKind::Stats,
        }
    }
}

/// Message type without its body, as named by the `type` field on the wire
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum MessageKind {
    Connect,
    Offer,
    Answer,
    Candidate,
    Ping,
    Pong,
    Stats,
}

impl MessageKind {
    pub const ALL: [MessageKind; 7] = [
        MessageKind::Connect,
        MessageKind::Offer,
        MessageKind::Answer,
        MessageKind::Candidate,
        MessageKind::Ping,
        MessageKind::Pong,
        MessageKind::Stats,
    ];

    /// The value of the `type` field
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Connect => "connect",
            MessageKind::Offer => "offer",
            MessageKind::Answer => "answer",
            MessageKind::Candidate => "candidate",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
            MessageKind::Stats => "stat",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of the `connect` message sent once the channel opens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectMessage {
    pub role: Role,
    pub channel_id: String,
    pub access_token: Option<String>,
    pub media: MediaOptions,
}

/// Body of an `offer` message sent by the remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferMessage {
    pub client_id: String,
    pub sdp: String,
    pub ice_config: Option<IceConfig>,
}

/// Statistics pushed by the signaling server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub reports: Vec<StatsReport>,
}

/// One statistics report; fields beyond `id`, `type` and `timestamp` are kept as-is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(flatten)]
    pub values: Map<String, Value>,
}

impl StatsReport {
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}
