//! In-memory transport for driving a [`crate::Keyboard`] without hardware.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::{Transport, TransportError};
use crate::framing::FRAME_TERMINATOR;

enum Inbound {
    Packet(Vec<u8>),
    Fail(String),
    Unplug(String),
}

/// Host side of the in-memory link. Hand it to the keyboard.
pub struct MockTransport {
    inbound: tokio::sync::Mutex<UnboundedReceiver<Inbound>>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    unplugged: Arc<AtomicBool>,
    closed: AtomicBool,
}

/// Device side of the in-memory link, kept by the test.
#[derive(Clone)]
pub struct MockDevice {
    inbound: UnboundedSender<Inbound>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    unplugged: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new() -> (Self, MockDevice) {
        let (tx, rx) = mpsc::unbounded_channel();
        let written = Arc::new(Mutex::new(Vec::new()));
        let unplugged = Arc::new(AtomicBool::new(false));

        let transport = Self {
            inbound: tokio::sync::Mutex::new(rx),
            written: Arc::clone(&written),
            unplugged: Arc::clone(&unplugged),
            closed: AtomicBool::new(false),
        };
        let device = MockDevice {
            inbound: tx,
            written,
            unplugged,
        };

        (transport, device)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl MockDevice {
    /// Queue a raw inbound packet.
    pub fn send_packet(&self, packet: impl Into<Vec<u8>>) {
        let _ = self.inbound.send(Inbound::Packet(packet.into()));
    }

    /// Queue one packet carrying `frames`, each followed by the terminator.
    pub fn send_frames(&self, frames: &[&[u8]]) {
        let mut packet = Vec::new();
        for frame in frames {
            packet.extend_from_slice(frame);
            packet.push(FRAME_TERMINATOR);
        }
        self.send_packet(packet);
    }

    /// Make the next read fail with a non-fatal [`TransportError::Io`].
    pub fn fail_read(&self, message: &str) {
        let _ = self.inbound.send(Inbound::Fail(message.to_owned()));
    }

    /// Simulate the cable being pulled.
    pub fn unplug(&self, reason: &str) {
        self.unplugged.store(true, Ordering::SeqCst);
        let _ = self.inbound.send(Inbound::Unplug(reason.to_owned()));
    }

    /// Every packet the host has written so far, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Disconnected("transport closed".into()));
        }

        let mut inbound = self.inbound.lock().await;
        match tokio::time::timeout(timeout, inbound.recv()).await {
            Err(_) => Err(TransportError::Timeout),
            Ok(Some(Inbound::Packet(mut packet))) => {
                packet.truncate(max_len);
                Ok(packet)
            }
            Ok(Some(Inbound::Fail(message))) => Err(TransportError::Io(message)),
            Ok(Some(Inbound::Unplug(reason))) => Err(TransportError::Disconnected(reason)),
            Ok(None) => Err(TransportError::Disconnected("mock device dropped".into())),
        }
    }

    async fn write(&self, packet: &[u8]) -> Result<(), TransportError> {
        if self.unplugged.load(Ordering::SeqCst) || self.is_closed() {
            return Err(TransportError::Disconnected("write after unplug".into()));
        }
        self.written.lock().push(packet.to_vec());
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::MockTransport;
    use crate::transport::{Transport, TransportError};

    #[tokio::test(start_paused = true)]
    async fn read_times_out_then_delivers() {
        let (transport, device) = MockTransport::new();

        assert_eq!(
            transport.read(64, Duration::from_millis(10)).await,
            Err(TransportError::Timeout)
        );

        device.send_frames(&[&[0, 0]]);
        assert_eq!(
            transport.read(64, Duration::from_millis(10)).await,
            Ok(vec![0, 0, 0xFE])
        );
    }

    #[tokio::test]
    async fn injected_failure_affects_one_read() {
        let (transport, device) = MockTransport::new();

        device.fail_read("stall");
        device.send_packet(vec![0x00, 0x03, 0xFE]);

        assert_eq!(
            transport.read(64, Duration::from_secs(1)).await,
            Err(TransportError::Io("stall".into()))
        );
        assert_eq!(
            transport.read(64, Duration::from_secs(1)).await,
            Ok(vec![0x00, 0x03, 0xFE])
        );
        transport.write(&[2]).await.expect("still plugged in");
    }

    #[tokio::test]
    async fn unplug_fails_reads_and_writes() {
        let (transport, device) = MockTransport::new();
        transport.write(&[0]).await.expect("plugged in");

        device.unplug("cable pulled");

        assert_eq!(
            transport.read(64, Duration::from_secs(1)).await,
            Err(TransportError::Disconnected("cable pulled".into()))
        );
        assert!(transport.write(&[0]).await.is_err());
        assert_eq!(device.written(), vec![vec![0]]);
    }
}
