//! Teardown convergence
//!
//! Teardown completes once three layers have confirmed closure: the signaling
//! channel, the media engine's offer/answer signaling, and its ICE transport.
//! Confirmations may arrive in any order; errors are kept in arrival order.

use std::fmt;
use std::time::{Duration, Instant};

use crate::errors::ConnectionError;

/// Identifies which layer is confirming closure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownLayer {
    Channel,
    MediaSignaling,
    Ice,
}

impl fmt::Display for TeardownLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownLayer::Channel => f.write_str("signaling channel"),
            TeardownLayer::MediaSignaling => f.write_str("media signaling"),
            TeardownLayer::Ice => f.write_str("ICE transport"),
        }
    }
}

/// Tracks closure confirmations for one teardown
#[derive(Debug)]
pub struct TeardownTracker {
    pub channel_done: bool,
    pub media_signaling_done: bool,
    pub ice_done: bool,
    pub started_at: Instant,
    errors: Vec<ConnectionError>,
    completed: bool,
}

impl TeardownTracker {
    pub fn new() -> Self {
        Self {
            channel_done: false,
            media_signaling_done: false,
            ice_done: false,
            started_at: Instant::now(),
            errors: Vec::new(),
            completed: false,
        }
    }

    /// Record an error without confirming any layer
    pub fn record_error(&mut self, error: ConnectionError) {
        if !self.completed {
            self.errors.push(error);
        }
    }

    /// Confirm a layer; the error is recorded only on the first confirmation
    ///
    /// Returns true when this confirmation completed the teardown.
    pub fn confirm(&mut self, layer: TeardownLayer, error: Option<ConnectionError>) -> bool {
        if self.completed {
            return false;
        }

        let done = match layer {
            TeardownLayer::Channel => &mut self.channel_done,
            TeardownLayer::MediaSignaling => &mut self.media_signaling_done,
            TeardownLayer::Ice => &mut self.ice_done,
        };
        if *done {
            return false;
        }
        *done = true;

        if let Some(error) = error {
            self.errors.push(error);
        }
        self.check_complete()
    }

    /// Mark the teardown complete if every layer has confirmed
    ///
    /// Returns true only on the call that completes it.
    pub fn check_complete(&mut self) -> bool {
        if self.completed || !self.all_done() {
            return false;
        }
        self.completed = true;
        true
    }

    pub fn all_done(&self) -> bool {
        self.channel_done && self.media_signaling_done && self.ice_done
    }

    /// Layers that have not confirmed closure yet
    pub fn pending_layers(&self) -> Vec<TeardownLayer> {
        [
            (TeardownLayer::Channel, self.channel_done),
            (TeardownLayer::MediaSignaling, self.media_signaling_done),
            (TeardownLayer::Ice, self.ice_done),
        ]
        .into_iter()
        .filter(|(_, done)| !done)
        .map(|(layer, _)| layer)
        .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn errors(&self) -> &[ConnectionError] {
        &self.errors
    }

    /// Take the accumulated errors, collapsed into the delivered shape
    pub fn take_error(&mut self) -> Option<ConnectionError> {
        ConnectionError::collapse(std::mem::take(&mut self.errors))
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for TeardownTracker {
    fn default() -> Self {
        Self::new()
    }
}
