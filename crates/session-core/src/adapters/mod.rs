// Adapters for the signaling transport and the media engine
pub mod media;
pub mod signaling;
#[cfg(feature = "websocket")]
pub mod websocket;

// Re-export adapters
pub use media::{MediaEngine, MediaEvent, MediaEventSender, MediaSession};
pub use signaling::{SignalingChannel, SignalingEvent, SignalingEventSender, SignalingTransport};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
