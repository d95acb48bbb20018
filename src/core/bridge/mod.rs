// Bridge module - Serial-to-TCP bridges, listening and dialing
pub mod dial;
pub mod listen;

pub use dial::DialBridge;
pub use listen::ListenBridge;

use crate::core::endpoint::DuplexEndpoint;
use crate::core::link::{Link, LossPolicy};
use crate::core::reconnect::ReconnectPolicy;
use crate::infrastructure::serial::SerialEndpoint;
use std::sync::Arc;

/// The serial side of a bridge: reopened in place whenever it fails
pub(crate) fn serial_link(serial: &Arc<SerialEndpoint>, policy: ReconnectPolicy) -> Arc<Link> {
    let endpoint: Arc<dyn DuplexEndpoint> = serial.clone();
    Arc::new(Link::with_endpoint("serial", endpoint, LossPolicy::Reconnect(policy)))
}
