// Core module - Forwarding engine, sessions and the three topologies
pub mod bridge;
pub mod endpoint;
pub mod link;
pub mod pump;
pub mod reconnect;
pub mod relay;
pub mod session;
pub mod status;
