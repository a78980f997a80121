//! Session actor
//!
//! Each connection attempt runs in one tokio task that owns the
//! [`SessionMachine`], the signaling channel and the media session. Caller
//! commands, adapter events and timer expiry all arrive through one queue, so
//! transitions never run concurrently.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, trace, warn, Instrument};
use url::Url;

use super::machine::{Action, ActionFailure, EventType, SessionMachine};
use crate::adapters::{
    MediaEngine, MediaEvent, MediaEventSender, MediaSession, SignalingChannel, SignalingEvent, SignalingEventSender,
    SignalingTransport,
};
use crate::api::EventDispatcher;
use crate::errors::{ConnectionError, Result};
use crate::message::{self, SignalingMessage};
use crate::types::{ConnectRequest, SessionId, SessionState};

/// Everything queued into a session actor
#[derive(Debug)]
pub(crate) enum Input {
    Signaling(SignalingEvent),
    Media(MediaEvent),
    /// Connect timer expiry, tagged with the generation that armed it
    Timer(u64),
    TeardownTimer,
    Disconnect(oneshot::Sender<Result<()>>),
    Send(SignalingMessage, oneshot::Sender<Result<()>>),
}

/// Collaborators shared by every actor a facade starts
#[derive(Clone)]
pub(crate) struct ActorContext {
    pub url: Url,
    pub transport: Arc<dyn SignalingTransport>,
    pub engine: Arc<dyn MediaEngine>,
    pub dispatcher: EventDispatcher,
    pub expected_close_codes: Vec<u16>,
    pub teardown_timeout: Duration,
}

/// Caller-side handle to a running session actor
#[derive(Debug, Clone)]
pub(crate) struct SessionHandle {
    id: SessionId,
    inputs: mpsc::UnboundedSender<Input>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub async fn disconnect(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.inputs
            .send(Input::Disconnect(tx))
            .map_err(|_| ConnectionError::AlreadyDisconnected)?;
        rx.await.unwrap_or(Err(ConnectionError::AlreadyDisconnected))
    }

    pub async fn send(&self, message: SignalingMessage) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.inputs
            .send(Input::Send(message, tx))
            .map_err(|_| ConnectionError::AlreadyDisconnected)?;
        rx.await.unwrap_or(Err(ConnectionError::AlreadyDisconnected))
    }
}

pub(crate) struct SessionActor {
    machine: SessionMachine,
    inputs: mpsc::UnboundedReceiver<Input>,
    input_tx: mpsc::UnboundedSender<Input>,
    state_tx: watch::Sender<SessionState>,
    context: ActorContext,

    channel: Option<Box<dyn SignalingChannel>>,
    media: Option<Arc<dyn MediaSession>>,

    timer: Option<JoinHandle<()>>,
    timer_generation: u64,
    teardown_timer: Option<JoinHandle<()>>,

    connect_tx: Option<oneshot::Sender<Result<()>>>,
    disconnect_tx: Option<oneshot::Sender<Result<()>>>,
}

impl SessionActor {
    /// Start a fresh session for `request`
    ///
    /// Returns the handle and the receiver of the connect completion.
    pub fn start(
        context: ActorContext,
        request: ConnectRequest,
        timeout: Duration,
    ) -> Result<(SessionHandle, oneshot::Receiver<Result<()>>)> {
        let id = SessionId::new();
        let mut machine = SessionMachine::new(id.clone(), context.expected_close_codes.clone());
        let actions = machine.connect(request, timeout)?;

        let (input_tx, inputs) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(machine.state());
        let (connect_tx, connect_rx) = oneshot::channel();

        let actor = SessionActor {
            machine,
            inputs,
            input_tx: input_tx.clone(),
            state_tx,
            context,
            channel: None,
            media: None,
            timer: None,
            timer_generation: 0,
            teardown_timer: None,
            connect_tx: Some(connect_tx),
            disconnect_tx: None,
        };

        let span = info_span!("session", id = %id);
        tokio::spawn(actor.run(actions).instrument(span));

        let handle = SessionHandle {
            id,
            inputs: input_tx,
            state: state_rx,
        };
        Ok((handle, connect_rx))
    }

    async fn run(mut self, initial: Vec<Action>) {
        info!("Session actor started for {}", self.context.url);
        self.drive(initial).await;

        while !self.machine.is_released() {
            let Some(input) = self.inputs.recv().await else {
                break;
            };

            match input {
                Input::Signaling(event) => self.handle_event(EventType::Signaling(event)).await,
                Input::Media(event) => self.handle_event(EventType::Media(event)).await,
                Input::Timer(generation) => {
                    if generation == self.timer_generation {
                        self.timer = None;
                        self.handle_event(EventType::TimerFired).await;
                    } else {
                        debug!("Ignoring stale connect timer (generation {})", generation);
                    }
                }
                Input::TeardownTimer => {
                    self.teardown_timer = None;
                    self.handle_event(EventType::TeardownTimedOut).await;
                }
                Input::Disconnect(reply) => self.handle_disconnect(reply).await,
                Input::Send(message, reply) => {
                    let _ = reply.send(self.send_message(&message));
                }
            }
        }

        self.cancel_timer();
        if let Some(timer) = self.teardown_timer.take() {
            timer.abort();
        }
        info!("Session actor finished in state {}", self.machine.state());
    }

    async fn handle_event(&mut self, event: EventType) {
        let result = self.machine.process_event(event);
        if result.transitioned() {
            debug!("Transition {} -> {}", result.old_state, result.new_state);
        }
        self.state_tx.send_replace(result.new_state);
        self.drive(result.actions).await;
    }

    async fn handle_disconnect(&mut self, reply: oneshot::Sender<Result<()>>) {
        match self.machine.disconnect() {
            Err(e) => {
                let _ = reply.send(Err(e));
            }
            Ok(actions) => {
                self.disconnect_tx = Some(reply);
                self.state_tx.send_replace(self.machine.state());
                self.drive(actions).await;
            }
        }
    }

    /// Execute a batch; a failed action is fed back before any later input
    async fn drive(&mut self, mut actions: Vec<Action>) {
        loop {
            let mut pending = actions.into_iter();
            let mut failed = None;

            while let Some(action) = pending.next() {
                if let Err(failure) = self.execute_action(action).await {
                    failed = Some((failure, pending.by_ref().collect::<Vec<_>>()));
                    break;
                }
            }

            let Some((failure, skipped)) = failed else {
                return;
            };
            warn!("Action failed: {:?}; skipping {} queued actions", failure, skipped.len());
            let result = self.machine.process_event(EventType::ActionFailed { failure, skipped });
            self.state_tx.send_replace(result.new_state);
            actions = result.actions;
        }
    }

    async fn execute_action(&mut self, action: Action) -> std::result::Result<(), ActionFailure> {
        match &action {
            Action::Notify(_) => trace!("Executing action: {:?}", action),
            _ => debug!("Executing action: {:?}", action),
        }

        match action {
            // Signaling channel
            Action::OpenChannel => {
                let events = SignalingEventSender::new(self.input_tx.clone());
                let channel = self
                    .context
                    .transport
                    .open(&self.context.url, events)
                    .map_err(|e| ActionFailure::ChannelOpen(e.to_string()))?;
                self.channel = Some(channel);
            }
            Action::SendMessage(message) => {
                self.write(&message).map_err(ActionFailure::Send)?;
            }
            Action::CloseChannel => {
                if let Some(channel) = &self.channel {
                    channel.close();
                }
            }
            Action::ReleaseChannel => {
                self.channel = None;
            }

            // Media engine
            Action::CreateMediaSession { role, media } => {
                let events = MediaEventSender::new(self.input_tx.clone());
                let session = self
                    .context
                    .engine
                    .create_session(role, &media, events)
                    .await
                    .map_err(|e| ActionFailure::MediaSession(e.to_string()))?;
                self.media = Some(session);
            }
            Action::AcquireLocalTracks => {
                let media = self.media_session()?;
                media
                    .acquire_local_tracks()
                    .await
                    .map_err(|e| ActionFailure::Capture(e.to_string()))?;
            }
            Action::ApplyConfiguration(config) => {
                self.media_session()?
                    .set_configuration(&config)
                    .map_err(|e| ActionFailure::Configuration(e.to_string()))?;
            }
            Action::SetRemoteDescription(sdp) => {
                let media = self.media_session()?;
                let events = self.media_events();
                tokio::spawn(async move {
                    let result = media.set_remote_description(sdp).await;
                    events.send(MediaEvent::RemoteDescriptionSet(result));
                });
            }
            Action::CreateAnswer => {
                let media = self.media_session()?;
                let events = self.media_events();
                tokio::spawn(async move {
                    let result = media.create_answer().await;
                    events.send(MediaEvent::AnswerCreated(result));
                });
            }
            Action::SetLocalDescription(sdp) => {
                let media = self.media_session()?;
                let events = self.media_events();
                tokio::spawn(async move {
                    let result = media.set_local_description(sdp).await;
                    events.send(MediaEvent::LocalDescriptionSet(result));
                });
            }
            Action::AddIceCandidate(candidate) => {
                let media = self.media_session()?;
                let events = self.media_events();
                tokio::spawn(async move {
                    let result = media.add_ice_candidate(candidate).await;
                    events.send(MediaEvent::CandidateAdded(result));
                });
            }
            Action::CloseMediaSession => {
                if let Some(media) = self.media.clone() {
                    tokio::spawn(async move { media.close().await });
                }
            }
            Action::ReleaseMediaSession => {
                self.media = None;
            }

            // Connect timer
            Action::ArmTimer(duration) => self.arm_timer(duration),
            Action::CancelTimer => self.cancel_timer(),
            Action::ArmTeardownTimer => self.arm_teardown_timer(),

            // Completions and observers
            Action::CompleteConnect(result) => {
                if let Some(tx) = self.connect_tx.take() {
                    let _ = tx.send(result);
                }
            }
            Action::CompleteDisconnect(result) => {
                if let Some(tx) = self.disconnect_tx.take() {
                    let _ = tx.send(result);
                }
            }
            Action::Notify(event) => self.context.dispatcher.dispatch(event),
        }

        Ok(())
    }

    fn media_session(&self) -> std::result::Result<Arc<dyn MediaSession>, ActionFailure> {
        self.media
            .clone()
            .ok_or_else(|| ActionFailure::MediaSession("media session is not available".to_string()))
    }

    fn media_events(&self) -> MediaEventSender {
        MediaEventSender::new(self.input_tx.clone())
    }

    /// Write a message requested by the caller
    fn send_message(&self, message: &SignalingMessage) -> Result<()> {
        self.machine.authorize_send()?;
        self.write(message).map_err(ConnectionError::TransportError)
    }

    fn write(&self, message: &SignalingMessage) -> std::result::Result<(), String> {
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| "signaling channel is not open".to_string())?;
        let text = message::encode(message).map_err(|e| e.to_string())?;
        trace!("Sending {}", text);
        channel.send(text).map_err(|e| e.to_string())
    }

    fn arm_timer(&mut self, duration: Duration) {
        self.cancel_timer();
        let generation = self.timer_generation;
        let inputs = self.input_tx.clone();
        debug!("Arming connect timer for {:?}", duration);
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = inputs.send(Input::Timer(generation));
        }));
    }

    fn arm_teardown_timer(&mut self) {
        if self.teardown_timer.is_some() {
            return;
        }
        let duration = self.context.teardown_timeout;
        let inputs = self.input_tx.clone();
        debug!("Arming teardown deadline for {:?}", duration);
        self.teardown_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = inputs.send(Input::TeardownTimer);
        }));
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        // Invalidates an expiry that is already queued
        self.timer_generation += 1;
    }
}
