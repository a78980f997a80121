//! Caller-facing API: the session facade and its observers

pub mod handler;
pub mod session;

pub use handler::{EventDispatcher, SessionEvent, SessionEventHandler};
pub use session::Session;
