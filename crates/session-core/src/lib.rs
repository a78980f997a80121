//! Signaling session coordination for peer-to-peer media.
//!
//! This crate drives the JSON signaling exchange with a media server over a
//! duplex channel and keeps it in step with the offer/answer and ICE lifecycle
//! of an external media engine. One state machine per connection attempt owns
//! the session state; transports and engines plug in through the traits in
//! [`adapters`].
//!
//! ```text
//! Session ──▶ SessionActor ──▶ SessionMachine (pure)
//!                 │    ▲
//!                 ▼    │ events
//!      SignalingChannel / MediaSession
//! ```

// Error handling
pub mod errors;

// Core types
pub mod types;

// Configuration and logging
pub mod config;
pub mod logging;

// Wire protocol
pub mod message;

// Transport and media engine seams
pub mod adapters;

// Event validity table
pub mod state_table;

// Transition function, teardown and the session actor
pub mod state_machine;

// Caller-facing API
pub mod api;

// Public exports
pub use adapters::{
    MediaEngine, MediaEvent, MediaEventSender, MediaSession, SignalingChannel, SignalingEvent, SignalingEventSender,
    SignalingTransport,
};
#[cfg(feature = "websocket")]
pub use adapters::WebSocketTransport;
pub use api::{Session, SessionEvent, SessionEventHandler};
pub use config::SessionConfig;
pub use errors::{ConfigError, ConnectionError, DecodeError, MediaError, Result, TransportError};
pub use logging::{setup_logging, LoggingConfig};
pub use message::{ConnectMessage, MessageKind, OfferMessage, Payload, SignalingMessage, Stats, StatsReport};
pub use state_machine::{Action, EventType, SessionMachine};
pub use types::{
    AudioCodec, ConnectRequest, IceConfig, IceConnectionState, IceServer, IceTransportPolicy, MediaOptions,
    MediaSignalingState, Role, SessionId, SessionState, VideoCodec,
};

/// Re-export of common types
pub mod prelude {
    pub use super::{
        ConnectRequest, ConnectionError, MediaEngine, MediaOptions, MediaSession, Role, Session, SessionConfig,
        SessionEvent, SessionEventHandler, SessionState, SignalingMessage, SignalingTransport,
    };
}
