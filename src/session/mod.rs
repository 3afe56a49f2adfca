//! Session lifecycle: the active session, the state poller, and the
//! orchestrator that ties the client, tracker and adapter together.

pub mod active;
pub mod gate;
pub mod orchestrator;
pub mod poller;

pub use active::{ActiveSession, SessionLease};
pub use gate::{FetchPermit, StateGate};
pub use orchestrator::Orchestrator;
pub use poller::{PollHandler, PollingScheduler};
