use crate::domain::error::EndpointError;
use async_trait::async_trait;

/// Kind of resource behind an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Serial,
    Tcp,
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointKind::Serial => write!(f, "serial"),
            EndpointKind::Tcp => write!(f, "tcp"),
        }
    }
}

/// A byte source and sink with an explicit open/closed lifecycle.
///
/// `read` never blocks longer than the endpoint's own deadline. An empty
/// result means nothing is available right now; [`EndpointError::Timeout`]
/// means the deadline passed and [`EndpointError::Closed`] means the peer is
/// gone. Reads and writes may run concurrently from two tasks; `open`,
/// `close` and reconnects are serialized by the owning [`Link`].
///
/// [`Link`]: crate::core::link::Link
#[async_trait]
pub trait DuplexEndpoint: Send + Sync {
    /// Device path or socket address
    fn identity(&self) -> String;

    fn kind(&self) -> EndpointKind;

    fn is_open(&self) -> bool;

    /// Fails with [`EndpointError::AlreadyOpen`] when already open
    async fn open(&self) -> Result<(), EndpointError>;

    async fn read(&self) -> Result<Vec<u8>, EndpointError>;

    async fn write(&self, data: &[u8]) -> Result<(), EndpointError>;

    /// Idempotent
    async fn close(&self);

    /// Last failure observed on this endpoint, if any
    fn last_error(&self) -> Option<String>;
}
