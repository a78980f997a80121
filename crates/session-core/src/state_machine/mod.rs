mod executor;
pub mod machine;
pub mod teardown;

pub use machine::{Action, ActionFailure, EventType, ProcessEventResult, SessionMachine};
pub use teardown::{TeardownLayer, TeardownTracker};

pub(crate) use executor::{ActorContext, Input, SessionActor, SessionHandle};
