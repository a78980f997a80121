//! Media Engine Adapter
//!
//! Narrow capability traits over the external negotiation engine. The engine
//! owns ICE, DTLS, SRTP and codecs; the session only drives the offer/answer
//! steps and listens to what the engine reports.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::errors::MediaError;
use crate::state_machine::Input;
use crate::types::{IceConfig, IceConnectionState, MediaOptions, MediaSignalingState, Role};

/// Events reported by a media session
///
/// The engine raises the first group on its own. The `*Set`, `AnswerCreated`
/// and `CandidateAdded` variants carry the outcome of asynchronous steps the
/// session started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// A local ICE candidate was gathered
    IceCandidate(String),
    IceConnectionStateChanged(IceConnectionState),
    SignalingStateChanged(MediaSignalingState),
    StreamAdded(String),
    StreamRemoved(String),
    /// The engine failed outside of any requested step
    Error(String),

    RemoteDescriptionSet(Result<(), MediaError>),
    AnswerCreated(Result<String, MediaError>),
    LocalDescriptionSet(Result<(), MediaError>),
    CandidateAdded(Result<(), MediaError>),
}

/// Delivers media events into the owning session's event queue
#[derive(Debug, Clone)]
pub struct MediaEventSender {
    tx: mpsc::UnboundedSender<Input>,
}

impl MediaEventSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { tx }
    }

    /// Deliver an event; returns false once the session is gone
    pub fn send(&self, event: MediaEvent) -> bool {
        self.tx.send(Input::Media(event)).is_ok()
    }

    pub fn ice_candidate(&self, candidate: impl Into<String>) -> bool {
        self.send(MediaEvent::IceCandidate(candidate.into()))
    }

    pub fn ice_connection_state(&self, state: IceConnectionState) -> bool {
        self.send(MediaEvent::IceConnectionStateChanged(state))
    }

    pub fn signaling_state(&self, state: MediaSignalingState) -> bool {
        self.send(MediaEvent::SignalingStateChanged(state))
    }

    pub fn stream_added(&self, stream_id: impl Into<String>) -> bool {
        self.send(MediaEvent::StreamAdded(stream_id.into()))
    }

    pub fn stream_removed(&self, stream_id: impl Into<String>) -> bool {
        self.send(MediaEvent::StreamRemoved(stream_id.into()))
    }

    pub fn error(&self, detail: impl Into<String>) -> bool {
        self.send(MediaEvent::Error(detail.into()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Creates media sessions
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create a session for `role`; the engine reports through `events`
    async fn create_session(
        &self,
        role: Role,
        options: &MediaOptions,
        events: MediaEventSender,
    ) -> Result<Arc<dyn MediaSession>, MediaError>;
}

/// One negotiation with the remote peer
///
/// After [`close`](MediaSession::close) the engine must report
/// `MediaSignalingState::Closed` and `IceConnectionState::Closed`.
#[async_trait]
pub trait MediaSession: Send + Sync {
    /// Start local capture (upstream only)
    async fn acquire_local_tracks(&self) -> Result<(), MediaError>;

    /// Apply the ICE configuration sent by the remote peer
    fn set_configuration(&self, config: &IceConfig) -> Result<(), MediaError>;

    async fn set_remote_description(&self, sdp: String) -> Result<(), MediaError>;

    async fn create_answer(&self) -> Result<String, MediaError>;

    async fn set_local_description(&self, sdp: String) -> Result<(), MediaError>;

    async fn add_ice_candidate(&self, candidate: String) -> Result<(), MediaError>;

    async fn close(&self);
}
