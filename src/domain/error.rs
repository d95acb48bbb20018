use thiserror::Error;

/// Failures reported by a single byte endpoint (serial device or TCP socket)
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("Endpoint is already open")]
    AlreadyOpen,

    #[error("Endpoint is not open")]
    NotOpen,

    #[error("Failed to open endpoint: {cause}")]
    OpenFailed { cause: String },

    #[error("Peer closed the connection")]
    Closed,

    #[error("No data within the read deadline")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EndpointError {
    /// Whether the error only means "nothing happened yet".
    pub fn is_transient(&self) -> bool {
        matches!(self, EndpointError::Timeout)
    }
}

/// Serbridge unified error type
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge is already running")]
    AlreadyRunning,

    #[error("Failed to open {endpoint}: {source}")]
    OpenFailure {
        endpoint: String,
        #[source]
        source: EndpointError,
    },

    #[error("Failed to bind listener on {address}: {source}")]
    BindFailure {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Gave up connecting to {target} after {attempts} retries")]
    ExhaustedRetries { target: String, attempts: u32 },

    #[error("Connection limit of {max} reached")]
    CapacityExceeded { max: usize },

    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output error: {0}")]
    Output(String),
}

impl BridgeError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
