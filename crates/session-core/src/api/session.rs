//! Session facade
//!
//! [`Session`] is the caller-facing handle. Every `connect` starts a fresh
//! state machine in its own actor; the facade only keeps a handle to the current
//! one and never touches the channel or the media session directly.

use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

use super::handler::{EventDispatcher, HandlerList, SessionEvent, SessionEventHandler};
use crate::adapters::{MediaEngine, SignalingTransport};
use crate::config::SessionConfig;
use crate::errors::{ConfigError, ConnectionError, Result};
use crate::message::SignalingMessage;
use crate::state_machine::{ActorContext, SessionActor, SessionHandle};
use crate::types::{ConnectRequest, SessionId, SessionState};

/// A signaling session with one remote peer
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use peerlink_session_core::*;
/// # async fn example(engine: Arc<dyn MediaEngine>) -> std::result::Result<(), Box<dyn std::error::Error>> {
/// let config = SessionConfig::new("wss://signal.example.com/ws");
/// let session = Session::new(config, Arc::new(WebSocketTransport::new()), engine)?;
///
/// session.connect(ConnectRequest::upstream("room1")).await?;
/// assert_eq!(session.state(), SessionState::Connected);
///
/// session.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    config: SessionConfig,
    context: ActorContext,
    current: RwLock<Option<SessionHandle>>,
    handlers: HandlerList,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Create a session facade
    ///
    /// Must be called from within a tokio runtime; the observer dispatcher task
    /// is started here.
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn SignalingTransport>,
        engine: Arc<dyn MediaEngine>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let url = config.signaling_url()?;

        let handlers: HandlerList = Arc::new(tokio::sync::RwLock::new(Vec::new()));
        let (events_tx, _) = broadcast::channel(config.event_buffer);
        let dispatcher = EventDispatcher::spawn(handlers.clone(), events_tx.clone());

        let context = ActorContext {
            url,
            transport,
            engine,
            dispatcher,
            expected_close_codes: config.expected_close_codes.clone(),
            teardown_timeout: config.teardown_timeout(),
        };

        Ok(Self {
            config,
            context,
            current: RwLock::new(None),
            handlers,
            events_tx,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connect and wait until the session is connected or has failed
    ///
    /// Fails with `Busy` while a previous connection attempt is still active.
    /// Observers have seen every event up to the completion when this returns.
    pub async fn connect(&self, request: ConnectRequest) -> Result<()> {
        let timeout = request.timeout.unwrap_or_else(|| self.config.connect_timeout());

        let completion = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(handle) = current.as_ref() {
                if !handle.state().is_final() {
                    debug!("Rejecting connect while session {} is {}", handle.id(), handle.state());
                    return Err(ConnectionError::Busy);
                }
            }
            let (handle, completion) = SessionActor::start(self.context.clone(), request, timeout)?;
            *current = Some(handle);
            completion
        };

        // The actor only drops the sender without answering if it died
        let result = completion.await.unwrap_or(Err(ConnectionError::Terminated));
        self.context.dispatcher.flush().await;
        result
    }

    /// Disconnect and wait until teardown has completed
    pub async fn disconnect(&self) -> Result<()> {
        let Some(handle) = self.handle() else {
            return Err(ConnectionError::AlreadyDisconnected);
        };
        let result = handle.disconnect().await;
        self.context.dispatcher.flush().await;
        result
    }

    /// Write a message to the signaling channel
    pub async fn send(&self, message: SignalingMessage) -> Result<()> {
        match self.handle() {
            Some(handle) => handle.send(message).await,
            None => Err(ConnectionError::AlreadyDisconnected),
        }
    }

    /// State of the current session, `Disconnected` before the first connect
    pub fn state(&self) -> SessionState {
        self.handle()
            .map(|handle| handle.state())
            .unwrap_or(SessionState::Disconnected)
    }

    /// Id of the current (or most recent) session
    pub fn session_id(&self) -> Option<SessionId> {
        self.handle().map(|handle| handle.id().clone())
    }

    /// Register a handler; it receives events produced after registration
    pub async fn add_handler(&self, handler: Arc<dyn SessionEventHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    fn handle(&self) -> Option<SessionHandle> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.config.url)
            .field("session_id", &self.session_id())
            .field("state", &self.state())
            .finish()
    }
}
