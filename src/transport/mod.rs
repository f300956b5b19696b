//! The engine only needs [`Transport`]: a read with timeout and a write.
//! Opening the device and claiming its interface is the adapter's job.

use std::time::Duration;

use async_trait::async_trait;

pub mod mock;
mod probe;
#[cfg(feature = "usb")]
pub mod usb;

pub use probe::{
    AlternateSetting, ClaimedInterface, EndpointDescriptor, EndpointDirection, EndpointKind,
    InterfaceDescriptor, ProbeError, VENDOR_CLASS, probe_configuration,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Nothing arrived before the deadline. Not fatal.
    #[error("read timed out")]
    Timeout,
    #[error("device disconnected: {0}")]
    Disconnected(String),
    #[error("transfer failed: {0}")]
    Io(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Read one packet of at most `max_len` bytes.
    async fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    async fn write(&self, packet: &[u8]) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
