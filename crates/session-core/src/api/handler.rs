//! Session observers
//!
//! Observers implement [`SessionEventHandler`] or subscribe to the
//! [`SessionEvent`] broadcast. Both are fed by one dispatcher task per
//! [`Session`](super::Session), in the order the state machine produced events.
//!
//! Observers run off the session actor. `Session::connect` and
//! `Session::disconnect` still return only after every event produced before
//! their completion has reached the handlers, so a failed `connect` has already
//! been reported to `on_failure`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tracing::{debug, trace};

use crate::errors::ConnectionError;
use crate::message::{SignalingMessage, Stats};
use crate::types::{IceConnectionState, SessionId, SessionState};

/// Events published to session observers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        session_id: SessionId,
        old_state: SessionState,
        new_state: SessionState,
        timestamp: DateTime<Utc>,
    },
    SignalingConnected {
        session_id: SessionId,
    },
    SignalingDisconnected {
        session_id: SessionId,
    },
    /// The session reached `Connected`
    Open {
        session_id: SessionId,
    },
    /// An inbound message was accepted
    Message {
        session_id: SessionId,
        message: SignalingMessage,
    },
    Ping {
        session_id: SessionId,
    },
    Stats {
        session_id: SessionId,
        stats: Stats,
    },
    IceConnectionStateChanged {
        session_id: SessionId,
        state: IceConnectionState,
    },
    IceCandidate {
        session_id: SessionId,
        candidate: String,
    },
    StreamAdded {
        session_id: SessionId,
        stream_id: String,
    },
    StreamRemoved {
        session_id: SessionId,
        stream_id: String,
    },
    Failure {
        session_id: SessionId,
        error: ConnectionError,
    },
    /// The session finished; `error` is what teardown accumulated
    Closed {
        session_id: SessionId,
        error: Option<ConnectionError>,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            SessionEvent::StateChanged { session_id, .. }
            | SessionEvent::SignalingConnected { session_id }
            | SessionEvent::SignalingDisconnected { session_id }
            | SessionEvent::Open { session_id }
            | SessionEvent::Message { session_id, .. }
            | SessionEvent::Ping { session_id }
            | SessionEvent::Stats { session_id, .. }
            | SessionEvent::IceConnectionStateChanged { session_id, .. }
            | SessionEvent::IceCandidate { session_id, .. }
            | SessionEvent::StreamAdded { session_id, .. }
            | SessionEvent::StreamRemoved { session_id, .. }
            | SessionEvent::Failure { session_id, .. }
            | SessionEvent::Closed { session_id, .. } => session_id,
        }
    }

    pub fn state_changed(session_id: SessionId, old_state: SessionState, new_state: SessionState) -> Self {
        SessionEvent::StateChanged {
            session_id,
            old_state,
            new_state,
            timestamp: Utc::now(),
        }
    }
}

/// Callbacks for session events
///
/// Every method has a no-op default, so handlers implement only what they need.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use peerlink_session_core::{ConnectionError, SessionEventHandler, SessionId};
///
/// struct LogFailures;
///
/// #[async_trait]
/// impl SessionEventHandler for LogFailures {
///     async fn on_failure(&self, session_id: &SessionId, error: &ConnectionError) {
///         eprintln!("{} failed: {}", session_id, error);
///     }
/// }
/// ```
#[async_trait]
pub trait SessionEventHandler: Send + Sync {
    async fn on_state_changed(&self, _session_id: &SessionId, _old_state: SessionState, _new_state: SessionState) {}

    async fn on_signaling_connected(&self, _session_id: &SessionId) {}

    async fn on_signaling_disconnected(&self, _session_id: &SessionId) {}

    /// The session is connected end to end
    async fn on_open(&self, _session_id: &SessionId) {}

    async fn on_message(&self, _session_id: &SessionId, _message: &SignalingMessage) {}

    async fn on_ping(&self, _session_id: &SessionId) {}

    async fn on_stats(&self, _session_id: &SessionId, _stats: &Stats) {}

    async fn on_ice_connection_state_changed(&self, _session_id: &SessionId, _state: IceConnectionState) {}

    async fn on_ice_candidate(&self, _session_id: &SessionId, _candidate: &str) {}

    async fn on_stream_added(&self, _session_id: &SessionId, _stream_id: &str) {}

    async fn on_stream_removed(&self, _session_id: &SessionId, _stream_id: &str) {}

    async fn on_failure(&self, _session_id: &SessionId, _error: &ConnectionError) {}

    /// The session finished, cleanly when `error` is `None`
    async fn on_close(&self, _session_id: &SessionId, _error: Option<&ConnectionError>) {}
}

enum Dispatch {
    Event(SessionEvent),
    /// Answered once everything queued before it was delivered
    Flush(oneshot::Sender<()>),
}

/// Queues events for the dispatcher task
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    tx: mpsc::UnboundedSender<Dispatch>,
}

/// Registered handlers, shared with the dispatcher task
pub(crate) type HandlerList = Arc<RwLock<Vec<Arc<dyn SessionEventHandler>>>>;

impl EventDispatcher {
    /// Start a dispatcher task that broadcasts every event and then calls each handler
    pub(crate) fn spawn(handlers: HandlerList, broadcast_tx: broadcast::Sender<SessionEvent>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Dispatch>();

        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                let event = match item {
                    Dispatch::Event(event) => event,
                    Dispatch::Flush(done) => {
                        let _ = done.send(());
                        continue;
                    }
                };
                trace!("Dispatching {:?}", event);
                // No subscribers is fine
                let _ = broadcast_tx.send(event.clone());

                let handlers = handlers.read().await.clone();
                for handler in handlers {
                    deliver(handler.as_ref(), &event).await;
                }
            }
            debug!("Session event dispatcher stopped");
        });

        Self { tx }
    }

    pub fn dispatch(&self, event: SessionEvent) {
        if self.tx.send(Dispatch::Event(event)).is_err() {
            debug!("Session event dispatcher is gone; dropping event");
        }
    }

    /// Wait until every event dispatched so far has reached the handlers
    pub(crate) async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Dispatch::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn deliver(handler: &dyn SessionEventHandler, event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged {
            session_id,
            old_state,
            new_state,
            ..
        } => handler.on_state_changed(session_id, *old_state, *new_state).await,
        SessionEvent::SignalingConnected { session_id } => handler.on_signaling_connected(session_id).await,
        SessionEvent::SignalingDisconnected { session_id } => handler.on_signaling_disconnected(session_id).await,
        SessionEvent::Open { session_id } => handler.on_open(session_id).await,
        SessionEvent::Message { session_id, message } => handler.on_message(session_id, message).await,
        SessionEvent::Ping { session_id } => handler.on_ping(session_id).await,
        SessionEvent::Stats { session_id, stats } => handler.on_stats(session_id, stats).await,
        SessionEvent::IceConnectionStateChanged { session_id, state } => {
            handler.on_ice_connection_state_changed(session_id, *state).await
        }
        SessionEvent::IceCandidate { session_id, candidate } => handler.on_ice_candidate(session_id, candidate).await,
        SessionEvent::StreamAdded { session_id, stream_id } => handler.on_stream_added(session_id, stream_id).await,
        SessionEvent::StreamRemoved { session_id, stream_id } => handler.on_stream_removed(session_id, stream_id).await,
        SessionEvent::Failure { session_id, error } => handler.on_failure(session_id, error).await,
        SessionEvent::Closed { session_id, error } => handler.on_close(session_id, error.as_ref()).await,
    }
}
