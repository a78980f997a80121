//! Signaling Channel Adapter
//!
//! A thin seam over a duplex text transport. The adapter knows nothing about the
//! signaling protocol: it opens a channel, writes text, closes, and reports what
//! the transport observes through a [`SignalingEventSender`].

use tokio::sync::mpsc;
use url::Url;

use crate::errors::TransportError;
use crate::message::Payload;
use crate::state_machine::Input;

/// Lifecycle and traffic reported by a signaling channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    /// The channel is open and can carry messages
    Opened,
    /// A payload arrived from the remote side
    Message(Payload),
    /// The channel closed; reported exactly once per channel
    Closed { code: u16, reason: String },
    /// The transport reported an error
    Error(String),
}

/// Delivers signaling events into the owning session's event queue
///
/// Events sent after the session has finished are dropped.
#[derive(Debug, Clone)]
pub struct SignalingEventSender {
    tx: mpsc::UnboundedSender<Input>,
}

impl SignalingEventSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { tx }
    }

    /// Deliver an event; returns false once the session is gone
    pub fn send(&self, event: SignalingEvent) -> bool {
        self.tx.send(Input::Signaling(event)).is_ok()
    }

    pub fn opened(&self) -> bool {
        self.send(SignalingEvent::Opened)
    }

    pub fn message(&self, payload: impl Into<Payload>) -> bool {
        self.send(SignalingEvent::Message(payload.into()))
    }

    pub fn closed(&self, code: u16, reason: impl Into<String>) -> bool {
        self.send(SignalingEvent::Closed {
            code,
            reason: reason.into(),
        })
    }

    pub fn error(&self, detail: impl Into<String>) -> bool {
        self.send(SignalingEvent::Error(detail.into()))
    }

    /// Whether the receiving session has finished
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Opens signaling channels
pub trait SignalingTransport: Send + Sync {
    /// Start opening a channel to `url`
    ///
    /// The call returns as soon as the attempt has started. The outcome is
    /// reported through `events`: `Opened` on success, or `Error` and `Closed`
    /// on failure. An `Err` return means the attempt could not even start.
    fn open(&self, url: &Url, events: SignalingEventSender) -> Result<Box<dyn SignalingChannel>, TransportError>;
}

/// An open (or opening) signaling channel
pub trait SignalingChannel: Send + Sync {
    /// Queue a text frame for writing
    fn send(&self, text: String) -> Result<(), TransportError>;

    /// Request closure; completion is reported as `SignalingEvent::Closed`
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_wraps_events_in_session_input() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = SignalingEventSender::new(tx);

        assert!(sender.opened());
        assert!(sender.closed(1001, "going away"));

        assert!(matches!(rx.try_recv(), Ok(Input::Signaling(SignalingEvent::Opened))));
        match rx.try_recv() {
            Ok(Input::Signaling(SignalingEvent::Closed { code, reason })) => {
                assert_eq!(code, 1001);
                assert_eq!(reason, "going away");
            }
            other => panic!("unexpected input: {:?}", other),
        }
    }

    #[test]
    fn test_sender_reports_finished_session() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = SignalingEventSender::new(tx);
        drop(rx);

        assert!(sender.is_closed());
        assert!(!sender.message("{\"type\":\"ping\"}"));
    }
}
