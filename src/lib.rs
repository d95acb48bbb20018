//! Serbridge Library
//!
//! Serial-to-TCP bridging and multi-client TCP relaying: a listening bridge
//! that exposes a serial port to one TCP client at a time, a dialing bridge
//! that pushes the port to a remote listener, and a relay that forwards many
//! clients to a fixed upstream target.

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;

pub use crate::domain::error::{BridgeError, BridgeResult, EndpointError};
pub use crate::domain::config::{BridgeConfig, RelayConfig};
pub use crate::core::bridge::{DialBridge, ListenBridge};
pub use crate::core::endpoint::DuplexEndpoint;
pub use crate::core::reconnect::ReconnectPolicy;
pub use crate::core::relay::{ConnectionRegistry, RelayServer};
pub use crate::core::session::{BridgeSession, SessionState};
pub use crate::core::status::{BridgeStatus, ClientStatus, ServerStatus};
pub use crate::infrastructure::serial::{NullDevice, SerialEndpoint};
pub use crate::infrastructure::tcp::TcpEndpoint;
