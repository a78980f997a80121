//! Connection state machine
//!
//! [`SessionMachine`] is a pure transition function: every input mutates the
//! machine and yields the [`Action`]s an executor must perform. It never touches
//! a transport, an engine or a timer itself, which keeps every ordering of
//! events testable without a runtime.
//!
//! Dispatch is gated the same way for every event:
//! - `Disconnected` / `Terminated`: ignored
//! - `Disconnecting`: fed into teardown convergence
//! - otherwise: checked against [`MASTER_TABLE`](crate::state_table::MASTER_TABLE)
//!   and applied, or treated as a protocol violation

use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use super::teardown::{TeardownLayer, TeardownTracker};
use crate::adapters::{MediaEvent, SignalingEvent};
use crate::api::SessionEvent;
use crate::errors::{ConnectionError, MediaError, Result};
use crate::message::{self, ConnectMessage, Payload, SignalingMessage};
use crate::state_table::{EventKind, MASTER_TABLE};
use crate::types::{
    ConnectRequest, IceConfig, IceConnectionState, MediaOptions, MediaSignalingState, Role, SessionId, SessionState,
};

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum EventType {
    Signaling(SignalingEvent),
    Media(MediaEvent),
    /// An action of the previous batch failed; `skipped` lists the actions of
    /// that batch that were not executed
    ActionFailed {
        failure: ActionFailure,
        skipped: Vec<Action>,
    },
    /// The connect timer expired
    TimerFired,
    /// Teardown did not converge within the teardown deadline
    TeardownTimedOut,
}

/// Why an action could not be executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionFailure {
    ChannelOpen(String),
    MediaSession(String),
    Capture(String),
    Configuration(String),
    Send(String),
}

/// Side effects requested by the state machine, executed in order
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    // Signaling channel
    OpenChannel,
    SendMessage(SignalingMessage),
    CloseChannel,
    ReleaseChannel,

    // Media engine
    CreateMediaSession { role: Role, media: MediaOptions },
    AcquireLocalTracks,
    ApplyConfiguration(IceConfig),
    SetRemoteDescription(String),
    CreateAnswer,
    SetLocalDescription(String),
    AddIceCandidate(String),
    CloseMediaSession,
    ReleaseMediaSession,

    // Timers
    ArmTimer(Duration),
    CancelTimer,
    /// Start the teardown deadline; its duration is executor configuration
    ArmTeardownTimer,

    // Caller completions and observers
    CompleteConnect(Result<()>),
    CompleteDisconnect(Result<()>),
    Notify(SessionEvent),
}

/// Result of processing one event
#[derive(Debug, Clone)]
pub struct ProcessEventResult {
    pub old_state: SessionState,
    pub new_state: SessionState,
    pub actions: Vec<Action>,
}

impl ProcessEventResult {
    pub fn transitioned(&self) -> bool {
        self.old_state != self.new_state
    }
}

/// State machine for one connection attempt
#[derive(Debug)]
pub struct SessionMachine {
    id: SessionId,
    state: SessionState,
    request: Option<ConnectRequest>,
    expected_close_codes: Vec<u16>,

    started: bool,
    released: bool,
    timer_armed: bool,
    connect_pending: bool,
    disconnect_pending: bool,

    /// A channel exists that has not confirmed closure
    channel_open: bool,
    media_created: bool,
    media_signaling_closed: bool,
    ice_closed: bool,
    ice_connected_early: bool,
    answer_sdp: Option<String>,

    teardown: Option<TeardownTracker>,
}

impl SessionMachine {
    pub fn new(id: SessionId, expected_close_codes: Vec<u16>) -> Self {
        Self {
            id,
            state: SessionState::Disconnected,
            request: None,
            expected_close_codes,
            started: false,
            released: false,
            timer_armed: false,
            connect_pending: false,
            disconnect_pending: false,
            channel_open: false,
            media_created: false,
            media_signaling_closed: false,
            ice_closed: false,
            ice_connected_early: false,
            answer_sdp: None,
            teardown: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether teardown has converged and every resource was released
    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn is_timer_armed(&self) -> bool {
        self.timer_armed
    }

    /// Start the connection attempt
    pub fn connect(&mut self, request: ConnectRequest, timeout: Duration) -> Result<Vec<Action>> {
        if self.started || self.state != SessionState::Disconnected {
            return Err(ConnectionError::Busy);
        }

        info!(
            "Connecting session {} as {:?} to channel {}",
            self.id, request.role, request.channel_id
        );

        let mut actions = Vec::new();
        self.started = true;
        self.connect_pending = true;
        self.timer_armed = true;
        self.channel_open = true;
        self.request = Some(request);

        self.enter(SessionState::SignalingConnecting, &mut actions);
        actions.push(Action::ArmTimer(timeout));
        actions.push(Action::OpenChannel);
        Ok(actions)
    }

    /// Start an orderly teardown requested by the caller
    pub fn disconnect(&mut self) -> Result<Vec<Action>> {
        match self.state {
            state if state.is_final() => Err(ConnectionError::AlreadyDisconnected),
            SessionState::Disconnecting => Err(ConnectionError::Busy),
            _ => {
                info!("Disconnect requested for session {} in state {}", self.id, self.state);
                let mut actions = Vec::new();
                self.disconnect_pending = true;
                self.begin_teardown(None, &mut actions);
                Ok(actions)
            }
        }
    }

    /// Check that the caller may write a message in the current state
    pub fn authorize_send(&self) -> Result<()> {
        match self.state {
            state if state.is_final() => Err(ConnectionError::AlreadyDisconnected),
            SessionState::SignalingConnecting | SessionState::Disconnecting => Err(ConnectionError::Busy),
            _ => Ok(()),
        }
    }

    /// Apply one event
    pub fn process_event(&mut self, event: EventType) -> ProcessEventResult {
        let old_state = self.state;
        let mut actions = Vec::new();

        match self.state {
            state if state.is_final() => {
                trace!("Session {} ignoring {:?} in final state {}", self.id, event, state);
            }
            SessionState::Disconnecting => self.on_teardown_event(event, &mut actions),
            _ => self.on_active_event(event, &mut actions),
        }

        ProcessEventResult {
            old_state,
            new_state: self.state,
            actions,
        }
    }

    fn on_active_event(&mut self, event: EventType, actions: &mut Vec<Action>) {
        match event {
            EventType::Signaling(event) => self.on_signaling(event, actions),
            EventType::Media(event) => self.on_media(event, actions),
            EventType::ActionFailed { failure, skipped } => {
                if self.admit(EventKind::ActionFailed, actions) {
                    self.on_action_failed(failure, &skipped, actions);
                }
            }
            EventType::TimerFired => {
                if self.admit(EventKind::TimerFired, actions) {
                    self.on_timer(actions);
                }
            }
            EventType::TeardownTimedOut => {
                debug!("Teardown deadline fired in state {}", self.state);
            }
        }
    }

    fn on_signaling(&mut self, event: SignalingEvent, actions: &mut Vec<Action>) {
        match event {
            SignalingEvent::Opened => {
                if self.admit(EventKind::ChannelOpened, actions) {
                    self.on_channel_opened(actions);
                }
            }
            SignalingEvent::Message(payload) => self.on_inbound(payload, actions),
            SignalingEvent::Closed { code, reason } => {
                if !self.admit(EventKind::ChannelClosed, actions) {
                    return;
                }
                info!("Signaling channel closed in state {}: {} {:?}", self.state, code, reason);
                self.channel_open = false;
                actions.push(self.notify(|session_id| SessionEvent::SignalingDisconnected { session_id }));
                let error = self.close_error(code, reason);
                self.begin_teardown(error, actions);
            }
            SignalingEvent::Error(detail) => {
                if self.admit(EventKind::ChannelError, actions) {
                    error!("Signaling channel error in state {}: {}", self.state, detail);
                    self.begin_teardown(Some(ConnectionError::transport(detail)), actions);
                }
            }
        }
    }

    fn on_channel_opened(&mut self, actions: &mut Vec<Action>) {
        let Some(request) = self.request.clone() else {
            return;
        };

        self.enter(SessionState::SignalingConnected, actions);
        actions.push(self.notify(|session_id| SessionEvent::SignalingConnected { session_id }));

        self.media_created = true;
        self.enter(SessionState::MediaReady, actions);
        actions.push(Action::CreateMediaSession {
            role: request.role,
            media: request.media.clone(),
        });
        if request.role.publishes_media() {
            actions.push(Action::AcquireLocalTracks);
        }
        actions.push(Action::SendMessage(SignalingMessage::Connect(ConnectMessage {
            role: request.role,
            channel_id: request.channel_id,
            access_token: request.access_token,
            media: request.media,
        })));
    }

    fn on_inbound(&mut self, payload: Payload, actions: &mut Vec<Action>) {
        let message = match message::decode(&payload) {
            Ok(message) => message,
            Err(e) if e.is_fatal() => {
                error!("Protocol violation in state {}: {}", self.state, e);
                self.begin_teardown(Some(ConnectionError::Terminated), actions);
                return;
            }
            Err(e) => {
                warn!("Discarding inbound signaling message: {}", e);
                return;
            }
        };

        if !self.admit(EventKind::Inbound(message.kind()), actions) {
            return;
        }
        debug!("Inbound {} in state {}", message.kind(), self.state);
        actions.push(self.notify(|session_id| SessionEvent::Message {
            session_id,
            message: message.clone(),
        }));

        match message {
            SignalingMessage::Offer(offer) => {
                self.enter(SessionState::OfferReceived, actions);
                if let Some(config) = offer.ice_config {
                    actions.push(Action::ApplyConfiguration(config));
                }
                actions.push(Action::SetRemoteDescription(offer.sdp));
            }
            SignalingMessage::Candidate { sdp_fragment } => {
                actions.push(Action::AddIceCandidate(sdp_fragment));
            }
            SignalingMessage::Ping => {
                actions.push(self.notify(|session_id| SessionEvent::Ping { session_id }));
                actions.push(Action::SendMessage(SignalingMessage::Pong));
            }
            SignalingMessage::Stats(stats) => {
                actions.push(self.notify(|session_id| SessionEvent::Stats { session_id, stats }));
            }
            // Outbound-only; the table never admits them
            SignalingMessage::Connect(_) | SignalingMessage::Answer { .. } | SignalingMessage::Pong => {}
        }
    }

    fn on_media(&mut self, event: MediaEvent, actions: &mut Vec<Action>) {
        match event {
            MediaEvent::IceCandidate(candidate) => {
                if self.admit(EventKind::IceCandidate, actions) {
                    actions.push(self.notify(|session_id| SessionEvent::IceCandidate {
                        session_id,
                        candidate: candidate.clone(),
                    }));
                    actions.push(Action::SendMessage(SignalingMessage::Candidate {
                        sdp_fragment: candidate,
                    }));
                }
            }
            MediaEvent::IceConnectionStateChanged(state) => {
                if self.admit(EventKind::IceConnectionStateChanged, actions) {
                    actions.push(self.notify(|session_id| SessionEvent::IceConnectionStateChanged { session_id, state }));
                    self.on_ice_state(state, actions);
                }
            }
            MediaEvent::SignalingStateChanged(state) => {
                if !self.admit(EventKind::MediaSignalingStateChanged, actions) {
                    return;
                }
                if state == MediaSignalingState::Closed {
                    self.media_signaling_closed = true;
                    self.begin_teardown(Some(ConnectionError::media("media signaling closed")), actions);
                } else {
                    debug!("Media signaling state {:?}", state);
                }
            }
            MediaEvent::StreamAdded(stream_id) => {
                if self.admit(EventKind::StreamAdded, actions) {
                    actions.push(self.notify(|session_id| SessionEvent::StreamAdded { session_id, stream_id }));
                }
            }
            MediaEvent::StreamRemoved(stream_id) => {
                if self.admit(EventKind::StreamRemoved, actions) {
                    actions.push(self.notify(|session_id| SessionEvent::StreamRemoved { session_id, stream_id }));
                }
            }
            MediaEvent::Error(detail) => {
                if self.admit(EventKind::MediaError, actions) {
                    error!("Media engine error in state {}: {}", self.state, detail);
                    self.begin_teardown(Some(ConnectionError::media(detail)), actions);
                }
            }
            MediaEvent::RemoteDescriptionSet(result) => {
                if !self.admit(EventKind::RemoteDescriptionSet, actions) {
                    return;
                }
                match result {
                    Ok(()) => {
                        self.enter(SessionState::AnsweringInProgress, actions);
                        actions.push(Action::CreateAnswer);
                    }
                    Err(e) => self.fail_media_step(e, actions),
                }
            }
            MediaEvent::AnswerCreated(result) => {
                if !self.admit(EventKind::AnswerCreated, actions) {
                    return;
                }
                match result {
                    Ok(sdp) => {
                        self.answer_sdp = Some(sdp.clone());
                        actions.push(Action::SetLocalDescription(sdp));
                    }
                    Err(e) => self.fail_media_step(e, actions),
                }
            }
            MediaEvent::LocalDescriptionSet(result) => {
                if !self.admit(EventKind::LocalDescriptionSet, actions) {
                    return;
                }
                if let Err(e) = result {
                    self.fail_media_step(e, actions);
                    return;
                }
                let Some(sdp) = self.answer_sdp.take() else {
                    warn!("Local description set before an answer was created");
                    self.begin_teardown(Some(ConnectionError::Terminated), actions);
                    return;
                };
                self.enter(SessionState::Answered, actions);
                actions.push(Action::SendMessage(SignalingMessage::Answer { sdp }));
                if self.ice_connected_early {
                    self.promote(actions);
                }
            }
            MediaEvent::CandidateAdded(result) => {
                if self.admit(EventKind::CandidateAdded, actions) {
                    if let Err(e) = result {
                        warn!("Media engine rejected a remote candidate: {}", e);
                    }
                }
            }
        }
    }

    fn on_ice_state(&mut self, state: IceConnectionState, actions: &mut Vec<Action>) {
        match state {
            state if state.is_connected() => match self.state {
                SessionState::Answered => self.promote(actions),
                SessionState::Connected => {}
                _ => {
                    debug!("ICE connected in state {}; waiting for the answer", self.state);
                    self.ice_connected_early = true;
                }
            },
            IceConnectionState::Failed => self.begin_teardown(Some(ConnectionError::IceFailed), actions),
            IceConnectionState::Closed => {
                self.ice_closed = true;
                self.begin_teardown(Some(ConnectionError::IceDisconnected), actions);
            }
            IceConnectionState::Disconnected if self.state.is_pre_connected() => {
                self.begin_teardown(Some(ConnectionError::IceDisconnected), actions);
            }
            IceConnectionState::Disconnected => {
                info!("ICE connectivity interrupted; waiting for recovery");
            }
            _ => {}
        }
    }

    fn on_timer(&mut self, actions: &mut Vec<Action>) {
        if !self.timer_armed {
            debug!("Connect timer fired after it was cancelled");
            return;
        }
        self.timer_armed = false;
        warn!("Session {} timed out in state {}", self.id, self.state);
        self.begin_teardown(Some(ConnectionError::WaitTimeout), actions);
    }

    fn on_action_failed(&mut self, failure: ActionFailure, skipped: &[Action], actions: &mut Vec<Action>) {
        for action in skipped {
            match action {
                Action::CompleteConnect(_) => self.connect_pending = true,
                Action::CancelTimer => self.timer_armed = true,
                _ => {}
            }
        }

        error!("Action failed in state {}: {:?}", self.state, failure);
        let error = match failure {
            ActionFailure::ChannelOpen(detail) => {
                self.channel_open = false;
                ConnectionError::transport(detail)
            }
            ActionFailure::MediaSession(detail) => {
                self.media_created = false;
                ConnectionError::media(detail)
            }
            ActionFailure::Capture(_) => ConnectionError::CaptureFailed,
            ActionFailure::Configuration(_) => ConnectionError::ConfigurationRejected,
            ActionFailure::Send(_) => ConnectionError::Terminated,
        };
        self.begin_teardown(Some(error), actions);
    }

    fn fail_media_step(&mut self, error: MediaError, actions: &mut Vec<Action>) {
        error!("Media engine step failed in state {}: {}", self.state, error);
        self.begin_teardown(Some(ConnectionError::media(error.to_string())), actions);
    }

    fn promote(&mut self, actions: &mut Vec<Action>) {
        self.enter(SessionState::Connected, actions);
        if self.timer_armed {
            self.timer_armed = false;
            actions.push(Action::CancelTimer);
        }
        if self.connect_pending {
            self.connect_pending = false;
            actions.push(Action::CompleteConnect(Ok(())));
        }
        actions.push(self.notify(|session_id| SessionEvent::Open { session_id }));
        info!("Session {} connected", self.id);
    }

    /// Check `event` against the state table; an invalid event terminates the session
    fn admit(&mut self, event: EventKind, actions: &mut Vec<Action>) -> bool {
        if MASTER_TABLE.accepts(self.state, event) {
            return true;
        }
        warn!("Protocol violation: {} is not valid in state {}", event, self.state);
        self.begin_teardown(Some(ConnectionError::Terminated), actions);
        false
    }

    fn begin_teardown(&mut self, error: Option<ConnectionError>, actions: &mut Vec<Action>) {
        if let Some(tracker) = self.teardown.as_mut() {
            if let Some(error) = error {
                tracker.record_error(error);
            }
            return;
        }

        info!("Tearing down session {} from {} (error: {:?})", self.id, self.state, error);
        self.enter(SessionState::Disconnecting, actions);

        if self.timer_armed {
            self.timer_armed = false;
            actions.push(Action::CancelTimer);
        }

        let mut tracker = TeardownTracker::new();
        if let Some(error) = error {
            tracker.record_error(error);
        }

        if self.channel_open {
            actions.push(Action::CloseChannel);
        } else {
            tracker.confirm(TeardownLayer::Channel, None);
        }

        if self.media_created {
            actions.push(Action::CloseMediaSession);
            if self.media_signaling_closed {
                tracker.confirm(TeardownLayer::MediaSignaling, None);
            }
            if self.ice_closed {
                tracker.confirm(TeardownLayer::Ice, None);
            }
        } else {
            tracker.confirm(TeardownLayer::MediaSignaling, None);
            tracker.confirm(TeardownLayer::Ice, None);
        }

        self.teardown = Some(tracker);
        self.check_converged(actions);
        if !self.released {
            actions.push(Action::ArmTeardownTimer);
        }
    }

    fn on_teardown_event(&mut self, event: EventType, actions: &mut Vec<Action>) {
        if event == EventType::TeardownTimedOut {
            self.on_teardown_timeout(actions);
            return;
        }

        let (layers, error): (Vec<TeardownLayer>, Option<ConnectionError>) = match event {
            EventType::Signaling(SignalingEvent::Closed { code, reason }) => {
                self.channel_open = false;
                actions.push(self.notify(|session_id| SessionEvent::SignalingDisconnected { session_id }));
                (vec![TeardownLayer::Channel], self.close_error(code, reason))
            }
            EventType::Signaling(SignalingEvent::Error(detail)) => (Vec::new(), Some(ConnectionError::transport(detail))),
            EventType::Media(MediaEvent::SignalingStateChanged(MediaSignalingState::Closed)) => {
                self.media_signaling_closed = true;
                (vec![TeardownLayer::MediaSignaling], None)
            }
            EventType::Media(MediaEvent::IceConnectionStateChanged(IceConnectionState::Closed)) => {
                self.ice_closed = true;
                (vec![TeardownLayer::Ice], None)
            }
            EventType::Media(MediaEvent::Error(detail)) => (Vec::new(), Some(ConnectionError::media(detail))),
            EventType::ActionFailed {
                failure: ActionFailure::ChannelOpen(_),
                ..
            } => {
                self.channel_open = false;
                (vec![TeardownLayer::Channel], None)
            }
            EventType::ActionFailed {
                failure: ActionFailure::MediaSession(_),
                ..
            } => {
                self.media_created = false;
                (vec![TeardownLayer::MediaSignaling, TeardownLayer::Ice], None)
            }
            other => {
                debug!("Discarding {:?} during teardown", other);
                (Vec::new(), None)
            }
        };

        let Some(tracker) = self.teardown.as_mut() else {
            return;
        };
        match layers.first() {
            Some(first) => {
                debug!("{} confirmed closed after {:?}", first, tracker.elapsed());
                tracker.confirm(*first, error);
                for layer in &layers[1..] {
                    tracker.confirm(*layer, None);
                }
            }
            None => {
                if let Some(error) = error {
                    tracker.record_error(error);
                }
            }
        }
        self.check_converged(actions);
    }

    /// Give up on layers that never confirmed closure
    fn on_teardown_timeout(&mut self, actions: &mut Vec<Action>) {
        let Some(tracker) = self.teardown.as_mut() else {
            return;
        };
        let pending = tracker.pending_layers();
        warn!(
            "Teardown of session {} timed out after {:?}; unconfirmed: {:?}",
            self.id,
            tracker.elapsed(),
            pending
        );

        if pending.contains(&TeardownLayer::Channel) {
            tracker.record_error(ConnectionError::transport("signaling channel did not confirm closure"));
        }
        if pending.iter().any(|layer| *layer != TeardownLayer::Channel) {
            tracker.record_error(ConnectionError::media("media session did not confirm closure"));
        }
        for layer in pending {
            tracker.confirm(layer, None);
        }
        self.check_converged(actions);
    }

    fn check_converged(&mut self, actions: &mut Vec<Action>) {
        if self.released {
            return;
        }
        let Some(tracker) = self.teardown.as_mut() else {
            return;
        };
        if !(tracker.is_complete() || tracker.check_complete()) {
            return;
        }
        let elapsed = tracker.elapsed();
        let error = tracker.take_error();
        self.finish(error, elapsed, actions);
    }

    /// Release resources and deliver completions once teardown has converged
    fn finish(&mut self, error: Option<ConnectionError>, elapsed: Duration, actions: &mut Vec<Action>) {
        self.released = true;

        if self.media_created {
            actions.push(Action::ReleaseMediaSession);
        }
        actions.push(Action::ReleaseChannel);

        let final_state = if error.is_some() {
            SessionState::Terminated
        } else {
            SessionState::Disconnected
        };
        self.enter(final_state, actions);

        if let Some(error) = &error {
            actions.push(self.notify(|session_id| SessionEvent::Failure {
                session_id,
                error: error.clone(),
            }));
        }
        if self.connect_pending {
            self.connect_pending = false;
            actions.push(Action::CompleteConnect(Err(error.clone().unwrap_or(ConnectionError::Terminated))));
        }
        if self.disconnect_pending {
            self.disconnect_pending = false;
            actions.push(Action::CompleteDisconnect(match &error {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            }));
        }

        info!("Session {} finished as {} in {:?} (error: {:?})", self.id, final_state, elapsed, error);
        actions.push(self.notify(|session_id| SessionEvent::Closed { session_id, error }));
    }

    fn close_error(&self, code: u16, reason: String) -> Option<ConnectionError> {
        if self.expected_close_codes.contains(&code) {
            None
        } else {
            Some(ConnectionError::TransportClosed { code, reason })
        }
    }

    fn enter(&mut self, state: SessionState, actions: &mut Vec<Action>) {
        if self.state == state {
            return;
        }
        let old_state = self.state;
        self.state = state;
        debug!("Session {} state {} -> {}", self.id, old_state, state);
        actions.push(Action::Notify(SessionEvent::state_changed(self.id.clone(), old_state, state)));
    }

    fn notify(&self, event: impl FnOnce(SessionId) -> SessionEvent) -> Action {
        Action::Notify(event(self.id.clone()))
    }
}
