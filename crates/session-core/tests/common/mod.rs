//! Mock signaling transport and media engine shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use peerlink_session_core::*;

pub const ANSWER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=answer\r\n";

/// Yield until `condition` holds; panics if it never does
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never held: {}", what);
}

pub fn offer_json(sdp: &str) -> String {
    serde_json::json!({"type": "offer", "client_id": "client-1", "sdp": sdp}).to_string()
}

pub fn config() -> SessionConfig {
    SessionConfig::new("ws://127.0.0.1:5000/signaling").with_connect_timeout(Duration::from_secs(10))
}

// ===== Signaling transport =====

#[derive(Default)]
struct TransportState {
    events: Option<SignalingEventSender>,
    sent: Vec<String>,
    opened: usize,
    close_requests: usize,
    fail_open: bool,
    fail_send: bool,
    manual_open: bool,
    silent_close: bool,
    close_code: Option<u16>,
}

/// Records opened channels and written text
///
/// By default the channel opens immediately and answers a close request with a
/// normal closure (1000).
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_open() -> Self {
        let transport = Self::default();
        transport.state.lock().unwrap().fail_open = true;
        transport
    }

    /// The channel stays in the opening phase until `open_now` is called
    pub fn manual_open(self) -> Self {
        self.state.lock().unwrap().manual_open = true;
        self
    }

    /// Close requests are recorded but the channel never reports `Closed`
    pub fn silent_close(self) -> Self {
        self.state.lock().unwrap().silent_close = true;
        self
    }

    /// Close code reported when the session closes the channel
    pub fn set_close_code(&self, code: u16) {
        self.state.lock().unwrap().close_code = Some(code);
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.state.lock().unwrap().fail_send = fail;
    }

    pub fn events(&self) -> SignalingEventSender {
        self.state
            .lock()
            .unwrap()
            .events
            .clone()
            .expect("channel was never opened")
    }

    pub fn open_now(&self) {
        self.events().opened();
    }

    pub fn inject(&self, text: impl Into<String>) {
        self.events().message(Payload::Text(text.into()));
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub fn close_requests(&self) -> usize {
        self.state.lock().unwrap().close_requests
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|text| {
                let value: serde_json::Value = serde_json::from_str(text).unwrap();
                value["type"].as_str().unwrap().to_string()
            })
            .collect()
    }

    pub fn has_sent(&self, message_type: &str) -> bool {
        self.sent_types().iter().any(|t| t == message_type)
    }
}

impl SignalingTransport for MockTransport {
    fn open(&self, url: &Url, events: SignalingEventSender) -> std::result::Result<Box<dyn SignalingChannel>, TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_open {
            return Err(TransportError::Open {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        state.opened += 1;
        state.events = Some(events.clone());
        if !state.manual_open {
            events.opened();
        }
        Ok(Box::new(MockChannel {
            state: self.state.clone(),
            events,
        }))
    }
}

struct MockChannel {
    state: Arc<Mutex<TransportState>>,
    events: SignalingEventSender,
}

impl SignalingChannel for MockChannel {
    fn send(&self, text: String) -> std::result::Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_send {
            return Err(TransportError::Write("broken pipe".to_string()));
        }
        state.sent.push(text);
        Ok(())
    }

    fn close(&self) {
        let code = {
            let mut state = self.state.lock().unwrap();
            state.close_requests += 1;
            if state.silent_close {
                return;
            }
            state.close_code.unwrap_or(1000)
        };
        self.events.closed(code, "");
    }
}

// ===== Media engine =====

#[derive(Default)]
struct EngineState {
    events: Option<MediaEventSender>,
    calls: Vec<String>,
    fail_create: bool,
    fail_capture: bool,
    reject_configuration: bool,
    fail_remote_description: bool,
    error_on_close: Option<String>,
}

/// Completes every step immediately and records the calls it receives
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<EngineState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_create(self) -> Self {
        self.state.lock().unwrap().fail_create = true;
        self
    }

    pub fn failing_capture(self) -> Self {
        self.state.lock().unwrap().fail_capture = true;
        self
    }

    pub fn rejecting_configuration(self) -> Self {
        self.state.lock().unwrap().reject_configuration = true;
        self
    }

    pub fn failing_remote_description(self) -> Self {
        self.state.lock().unwrap().fail_remote_description = true;
        self
    }

    /// Report an engine error while closing
    pub fn set_error_on_close(&self, detail: &str) {
        self.state.lock().unwrap().error_on_close = Some(detail.to_string());
    }

    pub fn events(&self) -> MediaEventSender {
        self.state
            .lock()
            .unwrap()
            .events
            .clone()
            .expect("media session was never created")
    }

    pub fn has_session(&self) -> bool {
        self.state.lock().unwrap().events.is_some()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: &str) {
        self.state.lock().unwrap().calls.push(call.to_string());
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn create_session(
        &self,
        _role: Role,
        _options: &MediaOptions,
        events: MediaEventSender,
    ) -> std::result::Result<Arc<dyn MediaSession>, MediaError> {
        self.record("create_session");
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(MediaError::SessionCreation("no codecs".to_string()));
        }
        state.events = Some(events.clone());
        Ok(Arc::new(MockMediaSession {
            engine: self.clone(),
            events,
        }))
    }
}

struct MockMediaSession {
    engine: MockEngine,
    events: MediaEventSender,
}

#[async_trait]
impl MediaSession for MockMediaSession {
    async fn acquire_local_tracks(&self) -> std::result::Result<(), MediaError> {
        self.engine.record("acquire_local_tracks");
        if self.engine.state.lock().unwrap().fail_capture {
            return Err(MediaError::Capture("camera busy".to_string()));
        }
        Ok(())
    }

    fn set_configuration(&self, _config: &IceConfig) -> std::result::Result<(), MediaError> {
        self.engine.record("set_configuration");
        if self.engine.state.lock().unwrap().reject_configuration {
            return Err(MediaError::Configuration("relay policy unsupported".to_string()));
        }
        Ok(())
    }

    async fn set_remote_description(&self, _sdp: String) -> std::result::Result<(), MediaError> {
        self.engine.record("set_remote_description");
        if self.engine.state.lock().unwrap().fail_remote_description {
            return Err(MediaError::SessionDescription("bad m-line".to_string()));
        }
        Ok(())
    }

    async fn create_answer(&self) -> std::result::Result<String, MediaError> {
        self.engine.record("create_answer");
        Ok(ANSWER_SDP.to_string())
    }

    async fn set_local_description(&self, _sdp: String) -> std::result::Result<(), MediaError> {
        self.engine.record("set_local_description");
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: String) -> std::result::Result<(), MediaError> {
        self.engine.record("add_ice_candidate");
        Ok(())
    }

    async fn close(&self) {
        self.engine.record("close");
        let error = self.engine.state.lock().unwrap().error_on_close.clone();
        if let Some(detail) = error {
            self.events.error(detail);
        }
        self.events.signaling_state(MediaSignalingState::Closed);
        self.events.ice_connection_state(IceConnectionState::Closed);
    }
}
