// Session module - Pump pairs, lifecycle state machine
pub mod lifecycle;
pub mod session;
pub mod state;

pub use lifecycle::{Lifecycle, Run, StateReporter};
pub use session::BridgeSession;
pub use state::SessionState;
