use crate::cli::args::OutputFormat;
use crate::core::status::{BridgeStatus, ClientStatus, ConnectionInfo, ServerStatus};
use serde::Serialize;
use std::io::{self, Write};
use tabled::{Table, Tabled};

/// Output writer trait for different formats
pub trait OutputWriter {
    fn write_bridge_status(&self, status: &BridgeStatus) -> Result<(), OutputError>;
    fn write_client_status(&self, status: &ClientStatus) -> Result<(), OutputError>;
    fn write_server_status(&self, status: &ServerStatus) -> Result<(), OutputError>;
    fn write_ports(&self, ports: &[PortEntry]) -> Result<(), OutputError>;
    fn write_message(&self, message: &str) -> Result<(), OutputError>;
    fn write_error(&self, error: &str) -> Result<(), OutputError>;
}

/// Output formatting errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<OutputError> for crate::domain::error::BridgeError {
    fn from(err: OutputError) -> Self {
        Self::Output(err.to_string())
    }
}

/// A serial port found on this machine
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PortEntry {
    pub name: String,
    pub kind: String,
}

impl From<&serialport::SerialPortInfo> for PortEntry {
    fn from(info: &serialport::SerialPortInfo) -> Self {
        let kind = match &info.port_type {
            serialport::SerialPortType::UsbPort(usb) => match &usb.product {
                Some(product) => format!("usb ({})", product),
                None => format!("usb {:04x}:{:04x}", usb.vid, usb.pid),
            },
            serialport::SerialPortType::PciPort => "pci".to_string(),
            serialport::SerialPortType::BluetoothPort => "bluetooth".to_string(),
            serialport::SerialPortType::Unknown => "unknown".to_string(),
        };
        Self {
            name: info.port_name.clone(),
            kind,
        }
    }
}

/// Console output writer
pub struct ConsoleWriter {
    format: OutputFormat,
}

impl ConsoleWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn render_bridge_status(&self, status: &BridgeStatus) -> Result<String, OutputError> {
        Ok(match self.format {
            OutputFormat::Text => {
                let mut out = String::new();
                out.push_str(&format!("Bridge: {}\n", status.state));
                out.push_str(&format!(
                    "  Serial: {} ({})\n",
                    status.serial_port,
                    open_text(status.serial_open)
                ));
                out.push_str(&format!(
                    "  Network: {} ({})\n",
                    status.listen_address,
                    if status.network_listening { "listening" } else { "not listening" }
                ));
                out.push_str(&format!(
                    "  Client: {}\n",
                    status.client_address.as_deref().unwrap_or("none")
                ));
                out.push_str(&format!("  Reconnect attempts: {}", status.reconnect_attempts));
                out
            }
            OutputFormat::Json => serde_json::to_string_pretty(status)?,
            OutputFormat::Table => Table::new([BridgeRow::from(status)]).to_string(),
        })
    }

    pub fn render_client_status(&self, status: &ClientStatus) -> Result<String, OutputError> {
        Ok(match self.format {
            OutputFormat::Text => {
                let mut out = String::new();
                out.push_str(&format!("Dial bridge: {}\n", status.state));
                out.push_str(&format!(
                    "  Serial: {} ({})\n",
                    status.serial_port,
                    open_text(status.serial_open)
                ));
                out.push_str(&format!(
                    "  Remote: {} ({})\n",
                    status.remote_address,
                    if status.network_connected { "connected" } else { "disconnected" }
                ));
                out.push_str(&format!("  Reconnect attempts: {}", status.reconnect_attempts));
                out
            }
            OutputFormat::Json => serde_json::to_string_pretty(status)?,
            OutputFormat::Table => Table::new([ClientRow::from(status)]).to_string(),
        })
    }

    pub fn render_server_status(&self, status: &ServerStatus) -> Result<String, OutputError> {
        Ok(match self.format {
            OutputFormat::Text => {
                let mut out = String::new();
                out.push_str(&format!("Relay: {}\n", status.state));
                out.push_str(&format!("  Listening: {}\n", status.listen_address));
                out.push_str(&format!(
                    "  Target: {}:{}\n",
                    status.target_host, status.target_port
                ));
                out.push_str(&format!(
                    "  Connections: {}/{}",
                    status.active_connections, status.max_connections
                ));
                for connection in &status.connections {
                    out.push_str(&format!(
                        "\n    {} {} -> {}",
                        connection.id, connection.client_address, connection.target_address
                    ));
                }
                out
            }
            OutputFormat::Json => serde_json::to_string_pretty(status)?,
            OutputFormat::Table => {
                let summary = Table::new([ServerRow::from(status)]).to_string();
                if status.connections.is_empty() {
                    summary
                } else {
                    let rows: Vec<ConnectionRow> =
                        status.connections.iter().map(ConnectionRow::from).collect();
                    format!("{}\n{}", summary, Table::new(rows))
                }
            }
        })
    }

    pub fn render_ports(&self, ports: &[PortEntry]) -> Result<String, OutputError> {
        Ok(match self.format {
            OutputFormat::Text => {
                if ports.is_empty() {
                    "No serial ports found".to_string()
                } else {
                    let mut out = "Available serial ports:".to_string();
                    for port in ports {
                        out.push_str(&format!("\n  {} ({})", port.name, port.kind));
                    }
                    out
                }
            }
            OutputFormat::Json => serde_json::to_string_pretty(ports)?,
            OutputFormat::Table => {
                let rows: Vec<PortRow> = ports.iter().map(PortRow::from).collect();
                Table::new(rows).to_string()
            }
        })
    }

    /// Print a configuration document: TOML for text and table, JSON otherwise
    pub fn write_config<T: Serialize>(&self, toml_text: &str, config: &T) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => self.print(&serde_json::to_string_pretty(config)?),
            _ => self.print(toml_text.trim_end()),
        }
    }

    fn print(&self, text: &str) -> Result<(), OutputError> {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{}", text)?;
        handle.flush()?;
        Ok(())
    }
}

impl OutputWriter for ConsoleWriter {
    fn write_bridge_status(&self, status: &BridgeStatus) -> Result<(), OutputError> {
        self.print(&self.render_bridge_status(status)?)
    }

    fn write_client_status(&self, status: &ClientStatus) -> Result<(), OutputError> {
        self.print(&self.render_client_status(status)?)
    }

    fn write_server_status(&self, status: &ServerStatus) -> Result<(), OutputError> {
        self.print(&self.render_server_status(status)?)
    }

    fn write_ports(&self, ports: &[PortEntry]) -> Result<(), OutputError> {
        self.print(&self.render_ports(ports)?)
    }

    fn write_message(&self, message: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({ "message": message });
                self.print(&output.to_string())
            }
            _ => self.print(message),
        }
    }

    fn write_error(&self, error: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({ "error": error });
                eprintln!("{}", output);
            }
            _ => eprintln!("Error: {}", error),
        }
        Ok(())
    }
}

fn open_text(open: bool) -> &'static str {
    if open {
        "open"
    } else {
        "closed"
    }
}

/// Table row for a listening bridge
#[derive(Tabled)]
struct BridgeRow {
    state: String,
    serial: String,
    listen: String,
    client: String,
    reconnects: u32,
}

impl From<&BridgeStatus> for BridgeRow {
    fn from(status: &BridgeStatus) -> Self {
        Self {
            state: status.state.to_string(),
            serial: format!("{} ({})", status.serial_port, open_text(status.serial_open)),
            listen: status.listen_address.clone(),
            client: status.client_address.clone().unwrap_or_else(|| "-".to_string()),
            reconnects: status.reconnect_attempts,
        }
    }
}

/// Table row for a dialing bridge
#[derive(Tabled)]
struct ClientRow {
    state: String,
    serial: String,
    remote: String,
    connected: bool,
    reconnects: u32,
}

impl From<&ClientStatus> for ClientRow {
    fn from(status: &ClientStatus) -> Self {
        Self {
            state: status.state.to_string(),
            serial: format!("{} ({})", status.serial_port, open_text(status.serial_open)),
            remote: status.remote_address.clone(),
            connected: status.network_connected,
            reconnects: status.reconnect_attempts,
        }
    }
}

/// Table row for a relay server
#[derive(Tabled)]
struct ServerRow {
    state: String,
    listen: String,
    target: String,
    connections: String,
}

impl From<&ServerStatus> for ServerRow {
    fn from(status: &ServerStatus) -> Self {
        Self {
            state: status.state.to_string(),
            listen: status.listen_address.clone(),
            target: format!("{}:{}", status.target_host, status.target_port),
            connections: format!("{}/{}", status.active_connections, status.max_connections),
        }
    }
}

/// Table row for one relayed connection
#[derive(Tabled)]
struct ConnectionRow {
    id: String,
    client: String,
    target: String,
}

impl From<&ConnectionInfo> for ConnectionRow {
    fn from(connection: &ConnectionInfo) -> Self {
        Self {
            id: connection.id.clone(),
            client: connection.client_address.clone(),
            target: connection.target_address.clone(),
        }
    }
}

/// Table row for a serial port
#[derive(Tabled)]
struct PortRow {
    name: String,
    kind: String,
}

impl From<&PortEntry> for PortRow {
    fn from(port: &PortEntry) -> Self {
        Self {
            name: port.name.clone(),
            kind: port.kind.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::SessionState;

    fn bridge_status() -> BridgeStatus {
        BridgeStatus {
            state: SessionState::Active,
            is_running: true,
            serial_port: "/dev/ttyUSB0".to_string(),
            serial_open: true,
            listen_address: "0.0.0.0:8080".to_string(),
            network_listening: true,
            has_client: true,
            client_address: Some("10.0.0.5:50000".to_string()),
            reconnect_attempts: 0,
        }
    }

    #[test]
    fn test_bridge_status_text() {
        let writer = ConsoleWriter::new(OutputFormat::Text);
        let text = writer.render_bridge_status(&bridge_status()).unwrap();
        assert!(text.starts_with("Bridge: Active"));
        assert!(text.contains("/dev/ttyUSB0 (open)"));
        assert!(text.contains("Client: 10.0.0.5:50000"));
    }

    #[test]
    fn test_bridge_status_json() {
        let writer = ConsoleWriter::new(OutputFormat::Json);
        let json = writer.render_bridge_status(&bridge_status()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["serial_open"], true);
        assert_eq!(value["client_address"], "10.0.0.5:50000");
    }

    #[test]
    fn test_ports_table() {
        let writer = ConsoleWriter::new(OutputFormat::Table);
        let ports = vec![PortEntry {
            name: "/dev/ttyACM0".to_string(),
            kind: "usb".to_string(),
        }];
        let table = writer.render_ports(&ports).unwrap();
        assert!(table.contains("/dev/ttyACM0"));
        assert!(table.contains("name"));

        let text = ConsoleWriter::new(OutputFormat::Text).render_ports(&[]).unwrap();
        assert_eq!(text, "No serial ports found");
    }

    #[test]
    fn test_server_status_lists_connections() {
        let status = ServerStatus {
            state: SessionState::Active,
            is_running: true,
            listen_address: "0.0.0.0:8080".to_string(),
            active_connections: 1,
            max_connections: 10,
            target_host: "localhost".to_string(),
            target_port: 8081,
            connections: vec![ConnectionInfo {
                id: "abc".to_string(),
                client_address: "10.0.0.9:4000".to_string(),
                target_address: "localhost:8081".to_string(),
                created_at: std::time::SystemTime::UNIX_EPOCH,
            }],
        };
        let text = ConsoleWriter::new(OutputFormat::Text)
            .render_server_status(&status)
            .unwrap();
        assert!(text.contains("Connections: 1/10"));
        assert!(text.contains("abc 10.0.0.9:4000 -> localhost:8081"));
    }
}
