// TCP module - TCP connection endpoint
pub mod endpoint;

pub use endpoint::{TcpEndpoint, NETWORK_READ_TIMEOUT, NETWORK_WRITE_TIMEOUT, RELAY_READ_TIMEOUT};
