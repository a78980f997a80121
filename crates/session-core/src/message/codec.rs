//! JSON wire codec for signaling messages
//!
//! Every message is a JSON object whose `type` field names the variant.
//! Decoding distinguishes a payload with no usable `type` (fatal to the session)
//! from an unknown type or a malformed body (logged and dropped by the caller).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ConnectMessage, MessageKind, OfferMessage, Payload, SignalingMessage, Stats};
use crate::errors::DecodeError;
use crate::types::{AudioCodec, IceConfig, IceServer, IceTransportPolicy, MediaOptions, Role, VideoCodec};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireMessage {
    Connect(WireConnect),
    Offer(WireOffer),
    Answer {
        sdp: String,
    },
    Candidate {
        sdp: String,
    },
    Ping,
    Pong,
    #[serde(rename = "stat")]
    Stat(Stats),
}

#[derive(Debug, Serialize, Deserialize)]
struct WireConnect {
    role: Role,
    channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    video: Option<MediaField<WireVideo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio: Option<MediaField<WireAudio>>,
}

/// `false` disables a medium, an object enables it with options
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum MediaField<T> {
    Flag(bool),
    Options(T),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireVideo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    codec_type: Option<VideoCodec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bit_rate: Option<u32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireAudio {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    codec_type: Option<AudioCodec>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireOffer {
    client_id: String,
    sdp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    config: Option<WireIceConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ice_transport_policy: Option<IceTransportPolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    ice_servers: Vec<WireIceServer>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireIceServer {
    urls: Urls,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credential: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum Urls {
    One(String),
    Many(Vec<String>),
}

/// Encode a message to its JSON text form
pub fn encode(message: &SignalingMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(&WireMessage::from(message.clone()))
}

/// Decode an inbound text or binary payload
pub fn decode(payload: &Payload) -> Result<SignalingMessage, DecodeError> {
    let value: Value = match payload {
        Payload::Text(text) => serde_json::from_str(text),
        Payload::Binary(bytes) => serde_json::from_slice(bytes),
    }
    .map_err(|e| DecodeError::MissingType(format!("payload is not JSON: {}", e)))?;

    let type_name = value
        .as_object()
        .and_then(|object| object.get("type"))
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::MissingType(truncate(&value.to_string())))?
        .to_string();

    let kind = MessageKind::from_wire(&type_name).ok_or(DecodeError::UnknownType(type_name))?;

    let wire: WireMessage = serde_json::from_value(value).map_err(|e| DecodeError::Malformed {
        kind: kind.to_string(),
        detail: e.to_string(),
    })?;

    Ok(wire.into())
}

fn truncate(text: &str) -> String {
    const LIMIT: usize = 64;
    match text.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

impl From<SignalingMessage> for WireMessage {
    fn from(message: SignalingMessage) -> Self {
        match message {
            SignalingMessage::Connect(connect) => WireMessage::Connect(connect.into()),
            SignalingMessage::Offer(offer) => WireMessage::Offer(WireOffer {
                client_id: offer.client_id,
                sdp: offer.sdp,
                config: offer.ice_config.map(WireIceConfig::from),
            }),
            SignalingMessage::Answer { sdp } => WireMessage::Answer { sdp },
            SignalingMessage::Candidate { sdp_fragment } => WireMessage::Candidate { sdp: sdp_fragment },
            SignalingMessage::Ping => WireMessage::Ping,
            SignalingMessage::Pong => WireMessage::Pong,
            SignalingMessage::Stats(stats) => WireMessage::Stat(stats),
        }
    }
}

impl From<WireMessage> for SignalingMessage {
    fn from(wire: WireMessage) -> Self {
        match wire {
            WireMessage::Connect(connect) => SignalingMessage::Connect(connect.into()),
            WireMessage::Offer(offer) => SignalingMessage::Offer(OfferMessage {
                client_id: offer.client_id,
                sdp: offer.sdp,
                ice_config: offer.config.map(IceConfig::from),
            }),
            WireMessage::Answer { sdp } => SignalingMessage::Answer { sdp },
            WireMessage::Candidate { sdp } => SignalingMessage::Candidate { sdp_fragment: sdp },
            WireMessage::Ping => SignalingMessage::Ping,
            WireMessage::Pong => SignalingMessage::Pong,
            WireMessage::Stat(stats) => SignalingMessage::Stats(stats),
        }
    }
}

impl From<ConnectMessage> for WireConnect {
    fn from(connect: ConnectMessage) -> Self {
        let media = connect.media;
        let video = if media.video_enabled {
            MediaField::Options(WireVideo {
                codec_type: media.video_codec,
                bit_rate: media.video_bit_rate,
            })
        } else {
            MediaField::Flag(false)
        };
        let audio = if media.audio_enabled {
            MediaField::Options(WireAudio {
                codec_type: media.audio_codec,
            })
        } else {
            MediaField::Flag(false)
        };
        Self {
            role: connect.role,
            channel_id: connect.channel_id,
            access_token: connect.access_token,
            video: Some(video),
            audio: Some(audio),
        }
    }
}

impl From<WireConnect> for ConnectMessage {
    fn from(wire: WireConnect) -> Self {
        let mut media = MediaOptions::default();
        match wire.video {
            None => {}
            Some(MediaField::Flag(enabled)) => media.video_enabled = enabled,
            Some(MediaField::Options(video)) => {
                media.video_codec = video.codec_type;
                media.video_bit_rate = video.bit_rate;
            }
        }
        match wire.audio {
            None => {}
            Some(MediaField::Flag(enabled)) => media.audio_enabled = enabled,
            Some(MediaField::Options(audio)) => media.audio_codec = audio.codec_type,
        }
        Self {
            role: wire.role,
            channel_id: wire.channel_id,
            access_token: wire.access_token,
            media,
        }
    }
}

impl From<IceConfig> for WireIceConfig {
    fn from(config: IceConfig) -> Self {
        Self {
            ice_transport_policy: match config.transport_policy {
                IceTransportPolicy::All => None,
                IceTransportPolicy::Relay => Some(IceTransportPolicy::Relay),
            },
            ice_servers: config
                .servers
                .into_iter()
                .map(|server| WireIceServer {
                    urls: Urls::Many(server.urls),
                    username: server.username,
                    credential: server.credential,
                })
                .collect(),
        }
    }
}

impl From<WireIceConfig> for IceConfig {
    fn from(wire: WireIceConfig) -> Self {
        Self {
            transport_policy: wire.ice_transport_policy.unwrap_or_default(),
            servers: wire
                .ice_servers
                .into_iter()
                .map(|server| IceServer {
                    urls: match server.urls {
                        Urls::One(url) => vec![url],
                        Urls::Many(urls) => urls,
                    },
                    username: server.username,
                    credential: server.credential,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::StatsReport;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn text(value: Value) -> Payload {
        Payload::Text(value.to_string())
    }

    fn connect_message() -> SignalingMessage {
        SignalingMessage::Connect(ConnectMessage {
            role: Role::Upstream,
            channel_id: "room1".to_string(),
            access_token: Some("secret".to_string()),
            media: MediaOptions::default()
                .with_video_codec(VideoCodec::Vp8)
                .with_video_bit_rate(500)
                .with_audio_codec(AudioCodec::Opus),
        })
    }

    #[test]
    fn test_connect_wire_shape() {
        let encoded: Value = serde_json::from_str(&encode(&connect_message()).unwrap()).unwrap();
        assert_eq!(
            encoded,
            json!({
                "type": "connect",
                "role": "upstream",
                "channel_id": "room1",
                "access_token": "secret",
                "video": {"codec_type": "VP8", "bit_rate": 500},
                "audio": {"codec_type": "OPUS"}
            })
        );
    }

    #[test]
    fn test_connect_disabled_media_and_no_token() {
        let message = SignalingMessage::Connect(ConnectMessage {
            role: Role::Downstream,
            channel_id: "room2".to_string(),
            access_token: None,
            media: MediaOptions::audio_only(),
        });
        let encoded: Value = serde_json::from_str(&encode(&message).unwrap()).unwrap();
        assert_eq!(encoded["role"], "downstream");
        assert_eq!(encoded["video"], json!(false));
        assert_eq!(encoded["audio"], json!({}));
        assert!(encoded.get("access_token").is_none());
    }

    #[test]
    fn test_round_trip_connect_offer_answer_candidate() {
        let offer = SignalingMessage::Offer(OfferMessage {
            client_id: "c1".to_string(),
            sdp: "v=0\r\n".to_string(),
            ice_config: Some(IceConfig {
                transport_policy: IceTransportPolicy::Relay,
                servers: vec![IceServer::new("turn:turn.example.com:3478").with_credentials("user", "pass")],
            }),
        });
        let answer = SignalingMessage::Answer { sdp: "v=0\r\na=answer\r\n".to_string() };
        let candidate = SignalingMessage::Candidate {
            sdp_fragment: "candidate:1 1 udp 2122260223 192.0.2.1 54400 typ host".to_string(),
        };

        for message in [connect_message(), offer, answer, candidate] {
            let encoded = encode(&message).unwrap();
            assert_eq!(decode(&Payload::Text(encoded)).unwrap(), message);
        }
    }

    #[test]
    fn test_decode_offer_without_config() {
        let decoded = decode(&text(json!({"type": "offer", "client_id": "c1", "sdp": "v=0..."}))).unwrap();
        assert_eq!(
            decoded,
            SignalingMessage::Offer(OfferMessage {
                client_id: "c1".to_string(),
                sdp: "v=0...".to_string(),
                ice_config: None,
            })
        );
    }

    #[test]
    fn test_decode_offer_config_accepts_single_url_string() {
        let decoded = decode(&text(json!({
            "type": "offer",
            "client_id": "c1",
            "sdp": "v=0",
            "config": {
                "iceTransportPolicy": "relay",
                "iceServers": [
                    {"urls": "stun:stun.example.com"},
                    {"urls": ["turn:a.example.com", "turns:b.example.com"], "username": "u", "credential": "p"}
                ]
            }
        })))
        .unwrap();

        let SignalingMessage::Offer(offer) = decoded else {
            panic!("expected offer");
        };
        let config = offer.ice_config.unwrap();
        assert_eq!(config.transport_policy, IceTransportPolicy::Relay);
        assert_eq!(config.servers[0].urls, vec!["stun:stun.example.com".to_string()]);
        assert_eq!(config.servers[1].urls.len(), 2);
        assert_eq!(config.servers[1].username.as_deref(), Some("u"));
    }

    #[test]
    fn test_offer_missing_sdp_is_not_fatal() {
        let err = decode(&text(json!({"type": "offer", "client_id": "c1"}))).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { ref kind, .. } if kind == "offer"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_missing_type_is_fatal() {
        for payload in [
            text(json!({"sdp": "v=0"})),
            text(json!({"type": 5})),
            text(json!(["offer"])),
            Payload::Text("not json".to_string()),
        ] {
            let err = decode(&payload).unwrap_err();
            assert!(err.is_fatal(), "{:?} should be fatal", err);
        }
    }

    #[test]
    fn test_unknown_type_is_not_fatal() {
        let err = decode(&text(json!({"type": "notify", "event_type": "connection.created"}))).unwrap_err();
        assert_eq!(err, DecodeError::UnknownType("notify".to_string()));
    }

    #[test]
    fn test_decode_binary_ping() {
        let decoded = decode(&Payload::Binary(br#"{"type":"ping"}"#.to_vec())).unwrap();
        assert_eq!(decoded, SignalingMessage::Ping);
        assert_eq!(encode(&SignalingMessage::Pong).unwrap(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_decode_stats_keeps_extra_fields() {
        let decoded = decode(&text(json!({
            "type": "stat",
            "reports": [
                {"id": "RTCOutboundRTPVideoStream_1", "type": "outbound-rtp", "timestamp": 1690000000.5, "bytesSent": 1024}
            ]
        })))
        .unwrap();

        let SignalingMessage::Stats(stats) = decoded else {
            panic!("expected stats");
        };
        let report: &StatsReport = &stats.reports[0];
        assert_eq!(report.kind, "outbound-rtp");
        assert_eq!(report.timestamp, Some(1690000000.5));
        assert_eq!(report.value("bytesSent"), Some(&json!(1024)));
        assert!(report.value("id").is_none());
    }

    #[test]
    fn test_stats_without_reports_is_malformed() {
        let err = decode(&text(json!({"type": "stat", "bytes": 3}))).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { ref kind, .. } if kind == "stat"));
    }
}
