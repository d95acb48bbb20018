use crate::core::session::SessionState;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Snapshot of a listening bridge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeStatus {
    pub state: SessionState,
    pub is_running: bool,
    pub serial_port: String,
    pub serial_open: bool,
    pub listen_address: String,
    pub network_listening: bool,
    pub has_client: bool,
    /// Address of the client currently bound to the serial port
    pub client_address: Option<String>,
    /// Consecutive serial reconnect failures
    pub reconnect_attempts: u32,
}

/// Snapshot of a dialing bridge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientStatus {
    pub state: SessionState,
    pub is_running: bool,
    pub serial_port: String,
    pub serial_open: bool,
    pub remote_address: String,
    pub network_connected: bool,
    /// Consecutive failed dials since the last successful connection
    pub reconnect_attempts: u32,
}

/// Snapshot of a relay server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerStatus {
    pub state: SessionState,
    pub is_running: bool,
    pub listen_address: String,
    pub active_connections: usize,
    pub max_connections: usize,
    pub target_host: String,
    pub target_port: u16,
    pub connections: Vec<ConnectionInfo>,
}

/// One relayed client as seen by the registry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionInfo {
    pub id: String,
    pub client_address: String,
    pub target_address: String,
    pub created_at: SystemTime,
}

impl ServerStatus {
    pub fn at_capacity(&self) -> bool {
        self.active_connections >= self.max_connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_status_json() {
        let status = ServerStatus {
            state: SessionState::Active,
            is_running: true,
            listen_address: "127.0.0.1:8080".to_string(),
            active_connections: 2,
            max_connections: 2,
            target_host: "localhost".to_string(),
            target_port: 8081,
            connections: Vec::new(),
        };
        assert!(status.at_capacity());

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"active_connections\":2"));
        let parsed: ServerStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, status);
    }
}
