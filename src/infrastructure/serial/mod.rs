// Serial module - Serial device endpoint and the in-memory test device
pub mod endpoint;
pub mod null_device;

pub use endpoint::SerialEndpoint;
pub use null_device::NullDevice;
