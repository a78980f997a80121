use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::message::MessageKind;
use crate::types::SessionState;

/// Event classification used for table lookups
///
/// Payloads are stripped: an inbound message is keyed by its message kind only,
/// every other event by its source and name.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    // Signaling channel
    ChannelOpened,
    Inbound(MessageKind),
    ChannelClosed,
    ChannelError,

    // Media engine completions
    RemoteDescriptionSet,
    AnswerCreated,
    LocalDescriptionSet,
    CandidateAdded,

    // Media engine notifications
    IceCandidate,
    IceConnectionStateChanged,
    MediaSignalingStateChanged,
    StreamAdded,
    StreamRemoved,
    MediaError,

    // Internal
    ActionFailed,
    TimerFired,
}

impl EventKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::ChannelOpened => "ChannelOpened",
            EventKind::Inbound(kind) => match kind {
                MessageKind::Connect => "Inbound(connect)",
                MessageKind::Offer => "Inbound(offer)",
                MessageKind::Answer => "Inbound(answer)",
                MessageKind::Candidate => "Inbound(candidate)",
                MessageKind::Ping => "Inbound(ping)",
                MessageKind::Pong => "Inbound(pong)",
                MessageKind::Stats => "Inbound(stat)",
            },
            EventKind::ChannelClosed => "ChannelClosed",
            EventKind::ChannelError => "ChannelError",
            EventKind::RemoteDescriptionSet => "RemoteDescriptionSet",
            EventKind::AnswerCreated => "AnswerCreated",
            EventKind::LocalDescriptionSet => "LocalDescriptionSet",
            EventKind::CandidateAdded => "CandidateAdded",
            EventKind::IceCandidate => "IceCandidate",
            EventKind::IceConnectionStateChanged => "IceConnectionStateChanged",
            EventKind::MediaSignalingStateChanged => "MediaSignalingStateChanged",
            EventKind::StreamAdded => "StreamAdded",
            EventKind::StreamRemoved => "StreamRemoved",
            EventKind::MediaError => "MediaError",
            EventKind::ActionFailed => "ActionFailed",
            EventKind::TimerFired => "TimerFired",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Key for looking up transitions in the state table
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct StateKey {
    pub state: SessionState,
    pub event: EventKind,
}

impl StateKey {
    pub fn new(state: SessionState, event: EventKind) -> Self {
        Self { state, event }
    }
}

/// States the table is consulted for; final states and teardown are handled
/// before any lookup.
pub const ACTIVE_STATES: [SessionState; 7] = [
    SessionState::SignalingConnecting,
    SessionState::SignalingConnected,
    SessionState::MediaReady,
    SessionState::OfferReceived,
    SessionState::AnsweringInProgress,
    SessionState::Answered,
    SessionState::Connected,
];

/// Messages this client only ever sends
const OUTBOUND_ONLY: [MessageKind; 3] = [MessageKind::Connect, MessageKind::Answer, MessageKind::Pong];

/// Master state table of valid (state, event) pairs
///
/// An event with no entry for the current state is a protocol violation.
#[derive(Debug, Default)]
pub struct MasterStateTable {
    transitions: HashSet<StateKey>,
    /// Events valid in any active state
    wildcard_transitions: HashSet<EventKind>,
}

/// Type alias for external use
pub type StateTable = MasterStateTable;

impl MasterStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, state: SessionState, event: EventKind) {
        self.transitions.insert(StateKey::new(state, event));
    }

    /// Insert `event` for each of `states`
    pub fn insert_all(&mut self, states: &[SessionState], event: EventKind) {
        for state in states {
            self.insert(*state, event);
        }
    }

    /// Insert an event that is valid in any active state
    pub fn insert_wildcard(&mut self, event: EventKind) {
        self.wildcard_transitions.insert(event);
    }

    pub fn has_transition(&self, key: &StateKey) -> bool {
        if self.transitions.contains(key) {
            return true;
        }
        ACTIVE_STATES.contains(&key.state) && self.wildcard_transitions.contains(&key.event)
    }

    /// Whether `event` is valid in `state`
    pub fn accepts(&self, state: SessionState, event: EventKind) -> bool {
        self.has_transition(&StateKey::new(state, event))
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len() + self.wildcard_transitions.len()
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for key in &self.transitions {
            if !ACTIVE_STATES.contains(&key.state) {
                errors.push(format!("{} has an entry in non-active state {:?}", key.event, key.state));
            }
        }

        for kind in OUTBOUND_ONLY {
            let event = EventKind::Inbound(kind);
            if self.wildcard_transitions.contains(&event) || self.transitions.iter().any(|k| k.event == event) {
                errors.push(format!("outbound-only message {} accepted inbound", kind));
            }
        }

        // Every active state needs a way out
        let has_wildcard_exit = self.wildcard_transitions.contains(&EventKind::ChannelClosed);
        for state in ACTIVE_STATES {
            if !has_wildcard_exit && !self.transitions.iter().any(|k| k.state == state) {
                errors.push(format!("State {:?} has no exit transitions", state));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
