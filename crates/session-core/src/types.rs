//! Core types for peerlink-session-core
//!
//! Identifiers, session state, media options and the ICE configuration the
//! remote peer hands to the media engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Session ID type
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("session-{}", Uuid::new_v4()))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a signaling session
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    SignalingConnecting,
    SignalingConnected,
    MediaReady,
    OfferReceived,
    AnsweringInProgress,
    Answered,
    Connected,
    Disconnecting,
    Terminated,
}

impl SessionState {
    /// States in which no event has any effect
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Terminated)
    }

    /// States between `connect` and `Connected`, excluding teardown
    pub fn is_pre_connected(&self) -> bool {
        matches!(
            self,
            Self::SignalingConnecting
                | Self::SignalingConnected
                | Self::MediaReady
                | Self::OfferReceived
                | Self::AnsweringInProgress
                | Self::Answered
        )
    }

    /// States in which a media engine session exists
    pub fn has_media(&self) -> bool {
        matches!(
            self,
            Self::MediaReady
                | Self::OfferReceived
                | Self::AnsweringInProgress
                | Self::Answered
                | Self::Connected
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Role of the local client in the session
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Publishes local media
    Upstream,
    /// Receives remote media only
    Downstream,
}

impl Role {
    pub fn publishes_media(&self) -> bool {
        matches!(self, Self::Upstream)
    }
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum VideoCodec {
    #[serde(rename = "VP8")]
    Vp8,
    #[serde(rename = "VP9")]
    Vp9,
    #[serde(rename = "H264")]
    H264,
    #[serde(rename = "AV1")]
    Av1,
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum AudioCodec {
    #[serde(rename = "OPUS")]
    Opus,
    #[serde(rename = "PCMU")]
    Pcmu,
}

/// Media options requested when the session starts
///
/// The options are sent once in the `connect` message and never change for the
/// lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaOptions {
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub video_codec: Option<VideoCodec>,
    pub audio_codec: Option<AudioCodec>,
    /// Video bit rate in kbps
    pub video_bit_rate: Option<u32>,
}

impl Default for MediaOptions {
    fn default() -> Self {
        Self {
            video_enabled: true,
            audio_enabled: true,
            video_codec: None,
            audio_codec: None,
            video_bit_rate: None,
        }
    }
}

impl MediaOptions {
    pub fn audio_only() -> Self {
        Self {
            video_enabled: false,
            ..Default::default()
        }
    }

    pub fn with_video_codec(mut self, codec: VideoCodec) -> Self {
        self.video_codec = Some(codec);
        self
    }

    pub fn with_audio_codec(mut self, codec: AudioCodec) -> Self {
        self.audio_codec = Some(codec);
        self
    }

    pub fn with_video_bit_rate(mut self, kbps: u32) -> Self {
        self.video_bit_rate = Some(kbps);
        self
    }

    pub fn without_video(mut self) -> Self {
        self.video_enabled = false;
        self
    }

    pub fn without_audio(mut self) -> Self {
        self.audio_enabled = false;
        self
    }
}

/// ICE transport policy requested by the remote peer
#[derive(Debug, Clone, Copy, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceTransportPolicy {
    #[default]
    All,
    Relay,
}

/// A STUN/TURN server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, credential: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.credential = Some(credential.into());
        self
    }
}

/// ICE configuration carried by an offer and applied once before SDP processing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceConfig {
    pub transport_policy: IceTransportPolicy,
    pub servers: Vec<IceServer>,
}

/// ICE connection state reported by the media engine
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

impl IceConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Completed)
    }
}

/// Offer/answer signaling state reported by the media engine
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum MediaSignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

/// Parameters of one connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub role: Role,
    pub channel_id: String,
    pub access_token: Option<String>,
    pub media: MediaOptions,
    /// Overrides the configured connect timeout
    pub timeout: Option<Duration>,
}

impl ConnectRequest {
    pub fn new(role: Role, channel_id: impl Into<String>) -> Self {
        Self {
            role,
            channel_id: channel_id.into(),
            access_token: None,
            media: MediaOptions::default(),
            timeout: None,
        }
    }

    pub fn upstream(channel_id: impl Into<String>) -> Self {
        Self::new(Role::Upstream, channel_id)
    }

    pub fn downstream(channel_id: impl Into<String>) -> Self {
        Self::new(Role::Downstream, channel_id)
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_media(mut self, media: MediaOptions) -> Self {
        self.media = media;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
