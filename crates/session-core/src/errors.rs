//! Error types for peerlink-session-core
//!
//! `ConnectionError` is the taxonomy callers see. The adapter-level errors
//! (`TransportError`, `MediaError`) and the codec's `DecodeError` stay inside
//! their layers and are mapped onto `ConnectionError` by the state machine.

use thiserror::Error;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, ConnectionError>;

/// Errors reported by a signaling session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The operation is not allowed while the session is in its current state
    #[error("session is busy")]
    Busy,

    /// The session has already been disconnected
    #[error("session is already disconnected")]
    AlreadyDisconnected,

    /// The session did not reach the connected state before the connect timeout
    #[error("timed out waiting for the session to connect")]
    WaitTimeout,

    /// The session was terminated by a protocol violation or a failed send
    #[error("session terminated")]
    Terminated,

    /// The signaling transport reported an error
    #[error("signaling transport error: {0}")]
    TransportError(String),

    /// The signaling transport closed with an unexpected code
    #[error("signaling transport closed: code {code}, reason {reason:?}")]
    TransportClosed { code: u16, reason: String },

    /// The media engine reported an error
    #[error("media engine error: {0}")]
    MediaEngineError(String),

    /// ICE negotiation failed
    #[error("ICE connection failed")]
    IceFailed,

    /// ICE connectivity was lost or closed
    #[error("ICE connection disconnected")]
    IceDisconnected,

    /// Local capture tracks could not be acquired
    #[error("failed to acquire local capture tracks")]
    CaptureFailed,

    /// The media engine rejected the ICE configuration sent by the remote peer
    #[error("media engine rejected the ICE configuration")]
    ConfigurationRejected,

    /// Several errors occurred while the session was being torn down
    #[error("{}", format_aggregate(.0))]
    Aggregate(Vec<ConnectionError>),
}

fn format_aggregate(errors: &[ConnectionError]) -> String {
    let parts: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    format!("multiple errors: [{}]", parts.join("; "))
}

impl ConnectionError {
    /// Create a transport error
    pub fn transport(detail: impl Into<String>) -> Self {
        Self::TransportError(detail.into())
    }

    /// Create a media engine error
    pub fn media(detail: impl Into<String>) -> Self {
        Self::MediaEngineError(detail.into())
    }

    /// Collapse accumulated teardown errors: none, the single error, or an aggregate
    pub fn collapse(mut errors: Vec<ConnectionError>) -> Option<ConnectionError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(errors)),
        }
    }
}

/// Errors raised by a signaling transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport could not be opened
    #[error("failed to open signaling channel to {url}: {reason}")]
    Open { url: String, reason: String },

    /// The transport is closed and cannot carry messages
    #[error("signaling channel is closed")]
    Closed,

    /// Writing to the transport failed
    #[error("failed to write to signaling channel: {0}")]
    Write(String),
}

/// Errors raised by a media engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    /// The engine could not create a session
    #[error("failed to create media session: {0}")]
    SessionCreation(String),

    /// Local capture could not be started
    #[error("capture error: {0}")]
    Capture(String),

    /// The engine rejected a configuration
    #[error("configuration rejected: {0}")]
    Configuration(String),

    /// A session description operation failed
    #[error("session description error: {0}")]
    SessionDescription(String),

    /// An ICE candidate was rejected
    #[error("ICE candidate error: {0}")]
    Candidate(String),

    /// The media session was closed or released
    #[error("media session is closed")]
    Closed,
}

/// Errors raised while decoding an inbound signaling payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The payload is not a JSON object carrying a string `type` field
    #[error("signaling payload has no message type: {0}")]
    MissingType(String),

    /// The `type` field names a message this client does not know
    #[error("unknown signaling message type {0:?}")]
    UnknownType(String),

    /// The message body does not match its type
    #[error("malformed {kind} message: {detail}")]
    Malformed { kind: String, detail: String },
}

impl DecodeError {
    /// Whether the failure is a protocol violation that must end the session
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingType(_))
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid signaling URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("failed to install logging subscriber: {0}")]
    Logging(String),
}

impl ConfigError {
    /// Create an invalid configuration error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}
