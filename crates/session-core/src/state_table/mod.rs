pub mod types;

pub use types::*;

use once_cell::sync::Lazy;
use std::sync::Arc;

use crate::message::MessageKind;
use crate::types::SessionState;

/// The master state table - single source of truth for which events are valid
pub static MASTER_TABLE: Lazy<Arc<MasterStateTable>> = Lazy::new(|| Arc::new(build_master_table()));

/// Build the complete master state table
fn build_master_table() -> MasterStateTable {
    use SessionState::*;

    let mut table = MasterStateTable::new();

    // Negotiating an offer and everything after it
    let negotiating = [OfferReceived, AnsweringInProgress, Answered, Connected];
    // A media session exists
    let with_media: Vec<SessionState> = ACTIVE_STATES.into_iter().filter(|state| state.has_media()).collect();

    table.insert(SignalingConnecting, EventKind::ChannelOpened);

    // Inbound signaling
    table.insert(MediaReady, EventKind::Inbound(MessageKind::Offer));
    table.insert_all(&negotiating, EventKind::Inbound(MessageKind::Candidate));
    table.insert(Connected, EventKind::Inbound(MessageKind::Ping));
    table.insert(Connected, EventKind::Inbound(MessageKind::Stats));

    // Offer/answer steps
    table.insert(OfferReceived, EventKind::RemoteDescriptionSet);
    table.insert(AnsweringInProgress, EventKind::AnswerCreated);
    table.insert(AnsweringInProgress, EventKind::LocalDescriptionSet);
    table.insert_all(&negotiating, EventKind::CandidateAdded);

    // Engine notifications
    table.insert_all(&with_media, EventKind::IceCandidate);
    table.insert_all(&with_media, EventKind::IceConnectionStateChanged);
    table.insert_all(&with_media, EventKind::MediaSignalingStateChanged);
    table.insert_all(&with_media, EventKind::StreamAdded);
    table.insert_all(&with_media, EventKind::StreamRemoved);

    // Failures and timer expiry are valid wherever the session is active
    table.insert_wildcard(EventKind::ChannelClosed);
    table.insert_wildcard(EventKind::ChannelError);
    table.insert_wildcard(EventKind::MediaError);
    table.insert_wildcard(EventKind::ActionFailed);
    table.insert_wildcard(EventKind::TimerFired);

    if let Err(errors) = table.validate() {
        tracing::error!("Invalid master state table: {:?}", errors);
    }

    tracing::debug!("Built master state table with {} entries", table.transition_count());
    table
}
