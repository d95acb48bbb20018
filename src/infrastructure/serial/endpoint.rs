use crate::core::endpoint::{DuplexEndpoint, EndpointKind};
use crate::domain::config::{FlowControlConfig, ParityConfig, SerialConfig};
use crate::domain::error::EndpointError;
use crate::infrastructure::serial::null_device::NullDevice;
use async_trait::async_trait;
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Driver read timeout; bounds how long a pending read can delay a close
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(100);

const READ_BUFFER_SIZE: usize = 1024;

type PortHandle = Arc<Mutex<Box<dyn SerialPort>>>;

enum Backend {
    /// Separate handles so a blocking read never holds up a write
    Hardware { reader: PortHandle, writer: PortHandle },
    Null,
}

/// A serial device as a [`DuplexEndpoint`].
///
/// Hardware I/O is blocking and runs on the blocking thread pool. The
/// `/dev/null` port selects a [`NullDevice`] instead.
pub struct SerialEndpoint {
    config: SerialConfig,
    backend: RwLock<Option<Backend>>,
    null_device: NullDevice,
    open: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl SerialEndpoint {
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            backend: RwLock::new(None),
            null_device: NullDevice::new(),
            open: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Handle to the in-memory device backing a `/dev/null` port
    pub fn null_device(&self) -> Option<NullDevice> {
        self.config.is_null_device().then(|| self.null_device.clone())
    }

    fn open_hardware(&self) -> Result<Backend, EndpointError> {
        let builder = port_builder(&self.config)?;
        let reader = builder.open().map_err(|e| EndpointError::OpenFailed {
            cause: format!("{}: {}", self.config.port, e),
        })?;
        let writer = reader.try_clone().map_err(|e| EndpointError::OpenFailed {
            cause: format!("{}: cannot clone handle: {}", self.config.port, e),
        })?;
        Ok(Backend::Hardware {
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
        })
    }

    fn fail(&self, reason: impl Into<String>) {
        self.open.store(false, Ordering::SeqCst);
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(reason.into());
        }
    }

    async fn handles(&self) -> Result<Option<(PortHandle, PortHandle)>, EndpointError> {
        match self.backend.read().await.as_ref() {
            None => Err(EndpointError::NotOpen),
            Some(Backend::Null) => Ok(None),
            Some(Backend::Hardware { reader, writer }) => {
                Ok(Some((Arc::clone(reader), Arc::clone(writer))))
            }
        }
    }
}

/// Translate the configured line settings into a driver builder
fn port_builder(config: &SerialConfig) -> Result<serialport::SerialPortBuilder, EndpointError> {
    let unsupported = |what: String| EndpointError::OpenFailed {
        cause: format!("{}: {}", config.port, what),
    };

    let data_bits = match config.data_bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        8 => serialport::DataBits::Eight,
        other => return Err(unsupported(format!("invalid data bits: {}", other))),
    };

    let stop_bits = match config.stop_bits {
        1 => serialport::StopBits::One,
        2 => serialport::StopBits::Two,
        other => return Err(unsupported(format!("invalid stop bits: {}", other))),
    };

    let parity = match config.parity {
        ParityConfig::None => serialport::Parity::None,
        ParityConfig::Odd => serialport::Parity::Odd,
        ParityConfig::Even => serialport::Parity::Even,
        other @ (ParityConfig::Mark | ParityConfig::Space) => {
            return Err(unsupported(format!("{} parity is not supported by the driver", other)))
        }
    };

    let flow_control = match config.flow_control {
        FlowControlConfig::None => serialport::FlowControl::None,
        FlowControlConfig::RtsCts => serialport::FlowControl::Hardware,
        FlowControlConfig::XonXoff => serialport::FlowControl::Software,
    };

    Ok(serialport::new(config.port.as_str(), config.baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(flow_control)
        .timeout(SERIAL_READ_TIMEOUT))
}

#[async_trait]
impl DuplexEndpoint for SerialEndpoint {
    fn identity(&self) -> String {
        self.config.port.clone()
    }

    fn kind(&self) -> EndpointKind {
        EndpointKind::Serial
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<(), EndpointError> {
        let mut backend = self.backend.write().await;
        if self.is_open() {
            return Err(EndpointError::AlreadyOpen);
        }

        let opened = if self.config.is_null_device() {
            Backend::Null
        } else {
            self.open_hardware().map_err(|e| {
                self.fail(e.to_string());
                e
            })?
        };

        *backend = Some(opened);
        self.open.store(true, Ordering::SeqCst);
        info!(
            "Serial port {} opened ({} baud, {}{}{})",
            self.config.port,
            self.config.baud_rate,
            self.config.data_bits,
            parity_letter(self.config.parity),
            self.config.stop_bits
        );
        Ok(())
    }

    async fn read(&self) -> Result<Vec<u8>, EndpointError> {
        if !self.is_open() {
            return Err(EndpointError::NotOpen);
        }
        let (reader, _) = match self.handles().await? {
            None => return Ok(self.null_device.take_read().unwrap_or_default()),
            Some(handles) => handles,
        };

        let result = tokio::task::spawn_blocking(move || {
            let mut port = reader
                .lock()
                .map_err(|_| std::io::Error::new(ErrorKind::Other, "serial reader poisoned"))?;
            let mut buffer = vec![0u8; READ_BUFFER_SIZE];
            let n = port.read(&mut buffer)?;
            buffer.truncate(n);
            Ok::<_, std::io::Error>(buffer)
        })
        .await
        .map_err(|e| std::io::Error::new(ErrorKind::Other, e));

        match result.and_then(|inner| inner) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::TimedOut => Err(EndpointError::Timeout),
            Err(e) => {
                debug!("Serial read on {} failed: {}", self.config.port, e);
                self.fail(e.to_string());
                Err(map_io(e))
            }
        }
    }

    async fn write(&self, data: &[u8]) -> Result<(), EndpointError> {
        if !self.is_open() {
            return Err(EndpointError::NotOpen);
        }
        let (_, writer) = match self.handles().await? {
            None => {
                self.null_device.record_write(data);
                return Ok(());
            }
            Some(handles) => handles,
        };

        let payload = data.to_vec();
        let result = tokio::task::spawn_blocking(move || {
            let mut port = writer
                .lock()
                .map_err(|_| std::io::Error::new(ErrorKind::Other, "serial writer poisoned"))?;
            port.write_all(&payload)?;
            port.flush()
        })
        .await
        .map_err(|e| std::io::Error::new(ErrorKind::Other, e));

        match result.and_then(|inner| inner) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::TimedOut => Err(EndpointError::Timeout),
            Err(e) => {
                debug!("Serial write on {} failed: {}", self.config.port, e);
                self.fail(e.to_string());
                Err(map_io(e))
            }
        }
    }

    async fn close(&self) {
        let mut backend = self.backend.write().await;
        self.open.store(false, Ordering::SeqCst);
        if backend.take().is_some() {
            debug!("Serial port {} closed", self.config.port);
        }
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|last| last.clone())
    }
}

/// A vanished device reads as `Closed` so link policies can reopen it.
fn map_io(error: std::io::Error) -> EndpointError {
    match error.kind() {
        ErrorKind::BrokenPipe
        | ErrorKind::NotConnected
        | ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset => EndpointError::Closed,
        _ => EndpointError::Io(error),
    }
}

fn parity_letter(parity: ParityConfig) -> char {
    match parity {
        ParityConfig::None => 'N',
        ParityConfig::Odd => 'O',
        ParityConfig::Even => 'E',
        ParityConfig::Mark => 'M',
        ParityConfig::Space => 'S',
    }
}
