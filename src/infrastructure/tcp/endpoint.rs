use crate::core::endpoint::{DuplexEndpoint, EndpointKind};
use crate::domain::error::EndpointError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Read deadline for bridge clients
pub const NETWORK_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Read deadline for relay legs
pub const RELAY_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Longest a peer may leave a write unacknowledged before it counts as gone
pub const NETWORK_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

const READ_BUFFER_SIZE: usize = 4096;

/// One TCP connection as a [`DuplexEndpoint`].
///
/// The stream is split so a read and a write can be in flight at the same
/// time; each half sits behind its own lock. Accepted connections cannot be
/// reopened once closed, dialed ones reconnect to the same address.
///
/// A write to a peer that stopped reading gives up after the write timeout,
/// and [`DuplexEndpoint::close`] interrupts any read or write in flight
/// before it takes the locks.
pub struct TcpEndpoint {
    identity: String,
    dial: Option<DialTarget>,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    peer: std::sync::Mutex<Option<SocketAddr>>,
    open: AtomicBool,
    read_timeout: Duration,
    write_timeout: Duration,
    closing: std::sync::Mutex<CancellationToken>,
    last_error: std::sync::Mutex<Option<String>>,
}

#[derive(Debug, Clone)]
struct DialTarget {
    address: String,
    connect_timeout: Duration,
}

impl TcpEndpoint {
    /// Wrap a connection that was accepted by a listener
    pub fn from_stream(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        let identity = peer
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown peer".to_string());
        set_nodelay(&stream, &identity);
        let (reader, writer) = stream.into_split();

        let endpoint = Self::empty(identity, None);
        Self {
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            peer: std::sync::Mutex::new(peer),
            open: AtomicBool::new(true),
            ..endpoint
        }
    }

    /// An unopened endpoint that dials `address` on [`DuplexEndpoint::open`]
    pub fn dialer(address: impl Into<String>, connect_timeout: Duration) -> Self {
        let address = address.into();
        Self::empty(
            address.clone(),
            Some(DialTarget {
                address,
                connect_timeout,
            }),
        )
    }

    /// Dial `address` and return the open endpoint
    pub async fn connect(
        address: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Arc<Self>, EndpointError> {
        let endpoint = Arc::new(Self::dialer(address, connect_timeout));
        endpoint.open().await?;
        Ok(endpoint)
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Remote address of the current connection
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer.lock().ok().and_then(|peer| *peer)
    }

    /// Check whether the peer is still there without consuming any bytes.
    ///
    /// A leg whose reader is busy is reported alive; only an observed EOF or
    /// socket error counts as dead.
    pub async fn probe_alive(&self) -> bool {
        if !self.is_open() {
            return false;
        }
        let mut guard = match self.reader.try_lock() {
            Ok(guard) => guard,
            Err(_) => return true,
        };
        let reader = match guard.as_mut() {
            Some(reader) => reader,
            None => return false,
        };

        let mut byte = [0u8; 1];
        let probe = tokio::time::timeout(Duration::ZERO, reader.peek(&mut byte)).await;
        match probe {
            Ok(Ok(0)) => {
                self.fail("peer closed the connection");
                false
            }
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                self.fail(e.to_string());
                false
            }
            Err(_) => true,
        }
    }

    fn empty(identity: String, dial: Option<DialTarget>) -> Self {
        Self {
            identity,
            dial,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            peer: std::sync::Mutex::new(None),
            open: AtomicBool::new(false),
            read_timeout: NETWORK_READ_TIMEOUT,
            write_timeout: NETWORK_WRITE_TIMEOUT,
            closing: std::sync::Mutex::new(CancellationToken::new()),
            last_error: std::sync::Mutex::new(None),
        }
    }

    /// Token fired by `close` for the current connection
    fn closing(&self) -> CancellationToken {
        match self.closing.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn rearm_closing(&self) {
        let fresh = CancellationToken::new();
        match self.closing.lock() {
            Ok(mut token) => *token = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
    }

    async fn read_locked(&self) -> Result<Vec<u8>, EndpointError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(EndpointError::NotOpen)?;
        if !self.is_open() {
            return Err(EndpointError::NotOpen);
        }

        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        match tokio::time::timeout(self.read_timeout, reader.read(&mut buffer)).await {
            Err(_) => Err(EndpointError::Timeout),
            Ok(Ok(0)) => {
                self.fail("peer closed the connection");
                Err(EndpointError::Closed)
            }
            Ok(Ok(n)) => {
                buffer.truncate(n);
                Ok(buffer)
            }
            Ok(Err(e)) => Err(self.map_io(e)),
        }
    }

    async fn write_locked(&self, data: &[u8]) -> Result<(), EndpointError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(EndpointError::NotOpen)?;
        if !self.is_open() {
            return Err(EndpointError::Closed);
        }
        writer.write_all(data).await.map_err(|e| self.map_io(e))
    }

    fn fail(&self, reason: impl Into<String>) {
        self.open.store(false, Ordering::SeqCst);
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(reason.into());
        }
    }

    fn map_io(&self, error: std::io::Error) -> EndpointError {
        self.fail(error.to_string());
        match error.kind() {
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::UnexpectedEof => EndpointError::Closed,
            _ => EndpointError::Io(error),
        }
    }
}

fn set_nodelay(stream: &TcpStream, identity: &str) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY on {}: {}", identity, e);
    }
}

#[async_trait]
impl DuplexEndpoint for TcpEndpoint {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn kind(&self) -> EndpointKind {
        EndpointKind::Tcp
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<(), EndpointError> {
        if self.is_open() {
            return Err(EndpointError::AlreadyOpen);
        }
        let target = self.dial.as_ref().ok_or_else(|| EndpointError::OpenFailed {
            cause: format!("accepted connection from {} cannot be reopened", self.identity),
        })?;

        let stream = tokio::time::timeout(target.connect_timeout, TcpStream::connect(&target.address))
            .await
            .map_err(|_| EndpointError::OpenFailed {
                cause: format!("connection timeout to {}", target.address),
            })?
            .map_err(|e| EndpointError::OpenFailed {
                cause: format!("failed to connect to {}: {}", target.address, e),
            })?;

        set_nodelay(&stream, &self.identity);
        if let Ok(mut peer) = self.peer.lock() {
            *peer = stream.peer_addr().ok();
        }
        let (reader, writer) = stream.into_split();
        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);
        self.rearm_closing();
        self.open.store(true, Ordering::SeqCst);
        debug!("TCP connection established to {}", target.address);
        Ok(())
    }

    async fn read(&self) -> Result<Vec<u8>, EndpointError> {
        let closing = self.closing();
        tokio::select! {
            _ = closing.cancelled() => Err(EndpointError::Closed),
            result = self.read_locked() => result,
        }
    }

    async fn write(&self, data: &[u8]) -> Result<(), EndpointError> {
        let closing = self.closing();
        tokio::select! {
            _ = closing.cancelled() => Err(EndpointError::Closed),
            result = tokio::time::timeout(self.write_timeout, self.write_locked(data)) => match result {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Write to {} stalled for {:?}", self.identity, self.write_timeout);
                    self.fail("write stalled, peer is not reading");
                    Err(EndpointError::Closed)
                }
            },
        }
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        // Wakes any read or write still holding a half
        self.closing().cancel();
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            // Best effort FIN; the socket is released when both halves drop
            let _ = writer.shutdown().await;
        }
        self.reader.lock().await.take();
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|last| last.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair() -> (TcpEndpoint, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (TcpEndpoint::from_stream(server), client)
    }

    #[tokio::test]
    async fn test_read_and_write() {
        let (endpoint, mut client) = pair().await;
        assert!(endpoint.is_open());
        assert!(endpoint.peer_addr().is_some());

        client.write_all(b"hello").await.unwrap();
        let data = endpoint.read().await.unwrap();
        assert_eq!(data, b"hello");

        endpoint.write(b"world").await.unwrap();
        let mut buffer = [0u8; 5];
        client.read_exact(&mut buffer).await.unwrap();
        assert_eq!(&buffer, b"world");
    }

    #[tokio::test]
    async fn test_idle_read_times_out() {
        let (endpoint, _client) = pair().await;
        let endpoint = endpoint.with_read_timeout(Duration::from_millis(20));
        assert!(matches!(endpoint.read().await, Err(EndpointError::Timeout)));
        assert!(endpoint.is_open());
    }

    #[tokio::test]
    async fn test_peer_close_reported() {
        let (endpoint, client) = pair().await;
        drop(client);

        assert!(matches!(endpoint.read().await, Err(EndpointError::Closed)));
        assert!(!endpoint.is_open());
        assert!(endpoint.last_error().is_some());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_observable() {
        let (endpoint, mut client) = pair().await;
        endpoint.close().await;
        endpoint.close().await;
        assert!(!endpoint.is_open());

        let mut buffer = [0u8; 1];
        let n = client.read(&mut buffer).await.unwrap();
        assert_eq!(n, 0);
        assert!(matches!(endpoint.open().await, Err(EndpointError::OpenFailed { .. })));
    }

    /// Keep writing 64KiB chunks until the endpoint refuses
    fn flood(endpoint: Arc<TcpEndpoint>) -> tokio::task::JoinHandle<Result<(), EndpointError>> {
        tokio::spawn(async move {
            let chunk = vec![0x55u8; 64 * 1024];
            loop {
                if let Err(e) = endpoint.write(&chunk).await {
                    break Err::<(), EndpointError>(e);
                }
            }
        })
    }

    #[tokio::test]
    async fn test_close_interrupts_write_to_stalled_peer() {
        let (endpoint, _client) = pair().await;
        let endpoint = Arc::new(endpoint.with_write_timeout(Duration::from_secs(30)));
        let writer = flood(endpoint.clone());

        // Let the socket buffers fill so the writer parks inside write_all
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!writer.is_finished());

        tokio::time::timeout(Duration::from_secs(1), endpoint.close())
            .await
            .expect("close blocked behind a stalled write");
        let outcome = tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, Err(EndpointError::Closed)));
        assert!(!endpoint.is_open());
    }

    #[tokio::test]
    async fn test_stalled_write_times_out_as_closed() {
        let (endpoint, _client) = pair().await;
        let endpoint = Arc::new(endpoint.with_write_timeout(Duration::from_millis(100)));

        let outcome = tokio::time::timeout(Duration::from_secs(3), flood(endpoint.clone()))
            .await
            .expect("write never gave up")
            .unwrap();
        assert!(matches!(outcome, Err(EndpointError::Closed)));
        assert!(!endpoint.is_open());
        assert!(endpoint.last_error().unwrap().contains("stalled"));
    }

    #[tokio::test]
    async fn test_probe_does_not_consume() {
        let (endpoint, mut client) = pair().await;
        assert!(endpoint.probe_alive().await);

        client.write_all(b"x").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(endpoint.probe_alive().await);
        assert_eq!(endpoint.read().await.unwrap(), b"x");

        drop(client);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!endpoint.probe_alive().await);
    }

    #[tokio::test]
    async fn test_dialer_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let endpoint = TcpEndpoint::connect(addr, Duration::from_secs(1)).await.unwrap();
        let _first = listener.accept().await.unwrap();
        assert!(matches!(endpoint.open().await, Err(EndpointError::AlreadyOpen)));

        endpoint.close().await;
        endpoint.open().await.unwrap();
        let _second = listener.accept().await.unwrap();
        assert!(endpoint.is_open());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = TcpEndpoint::connect(addr, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(EndpointError::OpenFailed { .. })));
    }
}
