use crate::domain::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Device path that selects the in-memory null device instead of real hardware.
pub const NULL_DEVICE: &str = "/dev/null";

/// Baud rates accepted by the serial side.
pub const SUPPORTED_BAUD_RATES: [u32; 13] = [
    300, 600, 1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600,
];

/// Serial-to-TCP bridge configuration (listen and dial topologies)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    /// Serial device settings
    #[serde(default)]
    pub serial: SerialConfig,
    /// Listen address for the listening bridge, remote address for the dialing bridge
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Serial port settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: ParityConfig,
    #[serde(default)]
    pub flow_control: FlowControlConfig,
}

/// Parity configuration
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParityConfig {
    #[default]
    None,
    Odd,
    Even,
    Mark,
    Space,
}

/// Flow control configuration
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowControlConfig {
    #[default]
    None,
    RtsCts,
    XonXoff,
}

/// TCP side of a serial bridge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// TCP relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    /// Where the relay accepts clients
    #[serde(default = "default_relay_server")]
    pub server: HostPort,
    /// Upstream every client is forwarded to
    #[serde(default = "default_relay_target")]
    pub target: HostPort,
    #[serde(default)]
    pub clients: ClientsConfig,
}

/// A host and port pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

/// Relay client limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientsConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Connect timeout used when dialing the target
    #[serde(default = "default_connection_timeout", with = "duration_format")]
    pub connection_timeout: Duration,
    /// How often dead relay entries are swept
    #[serde(default = "default_sweep_interval", with = "duration_format")]
    pub sweep_interval: Duration,
}

// Default value functions
fn default_serial_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_listen_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_relay_server() -> HostPort {
    HostPort::new("0.0.0.0", 8080)
}

fn default_relay_target() -> HostPort {
    HostPort::new("localhost", 8081)
}

fn default_max_connections() -> usize {
    10
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(30)
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: ParityConfig::None,
            flow_control: FlowControlConfig::None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            bind_address: default_bind_address(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: default_relay_server(),
            target: default_relay_target(),
            clients: ClientsConfig::default(),
        }
    }
}

impl Default for ClientsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connection_timeout: default_connection_timeout(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port` form accepted by `TcpStream::connect` and `TcpListener::bind`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl SerialConfig {
    pub fn is_null_device(&self) -> bool {
        self.port == NULL_DEVICE
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.port.is_empty() {
            return Err(BridgeError::config("serial port cannot be empty"));
        }
        if !SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            return Err(BridgeError::config(format!(
                "invalid baud rate: {}",
                self.baud_rate
            )));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(BridgeError::config(format!(
                "data bits must be between 5 and 8, got: {}",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(BridgeError::config(format!(
                "stop bits must be 1 or 2, got: {}",
                self.stop_bits
            )));
        }
        Ok(())
    }
}

impl NetworkConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind_address, self.listen_port)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.listen_port == 0 {
            return Err(BridgeError::config(
                "listen port must be between 1 and 65535, got: 0",
            ));
        }
        if self.bind_address.is_empty() {
            return Err(BridgeError::config("bind address cannot be empty"));
        }
        Ok(())
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> BridgeResult<()> {
        self.serial.validate()?;
        self.network.validate()
    }
}

impl RelayConfig {
    pub fn validate(&self) -> BridgeResult<()> {
        for (name, endpoint) in [("server", &self.server), ("target", &self.target)] {
            if endpoint.host.is_empty() {
                return Err(BridgeError::config(format!("{} host cannot be empty", name)));
            }
            if endpoint.port == 0 {
                return Err(BridgeError::config(format!(
                    "{} port must be between 1 and 65535, got: 0",
                    name
                )));
            }
        }
        if self.clients.max_connections < 1 {
            return Err(BridgeError::config("max connections must be at least 1"));
        }
        if self.clients.connection_timeout.is_zero() {
            return Err(BridgeError::config("connection timeout must be positive"));
        }
        if self.clients.sweep_interval.is_zero() {
            return Err(BridgeError::config("sweep interval must be positive"));
        }
        Ok(())
    }
}

impl std::fmt::Display for ParityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParityConfig::None => "none",
            ParityConfig::Odd => "odd",
            ParityConfig::Even => "even",
            ParityConfig::Mark => "mark",
            ParityConfig::Space => "space",
        };
        f.write_str(name)
    }
}

impl std::fmt::Display for FlowControlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FlowControlConfig::None => "none",
            FlowControlConfig::RtsCts => "rts_cts",
            FlowControlConfig::XonXoff => "xon_xoff",
        };
        f.write_str(name)
    }
}

/// Parses durations written as `<integer><unit>` with unit one of `ms`, `s`, `m`, `h`.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{}' is missing a unit", text))?;
    let (digits, unit) = text.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{}'", text))?;

    let scale = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{}' out of range", text))
    };
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => scale(60),
        "h" => scale(3600),
        other => Err(format!("unknown duration unit '{}' in '{}'", other, text)),
    }
}

/// Inverse of [`parse_duration`], picking the largest exact unit.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }
    let secs = duration.as_secs();
    if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

mod duration_format {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
