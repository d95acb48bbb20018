// Relay module - Multi-client TCP relay and its connection registry
pub mod registry;
pub mod server;

pub use registry::{ConnectionId, ConnectionRegistry, RegistryEntry, Reservation};
pub use server::RelayServer;
