use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::command::{Command, CommandError, CommandSet};
use crate::config::{KeyboardConfig, Timings};
use crate::engine::{Action, ConnectionState, FirmwareVersion, LinkState, ProtocolEngine};
use crate::event::Event;
use crate::framing::PACKET_SIZE;
use crate::transport::{Transport, TransportError};
#[cfg(feature = "usb")]
use crate::transport::usb::{UsbTransport, UsbTransportError};

/// Broadcast channel capacity for keyboard events.
const EVENT_CHANNEL_CAPACITY: usize = 256;
/// Pause after a non-fatal read error before reading again.
const READ_ERROR_BACKOFF: std::time::Duration = std::time::Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum KeyboardError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[cfg(feature = "usb")]
    #[error(transparent)]
    Usb(#[from] UsbTransportError),
    #[error("keyboard is already connected")]
    AlreadyConnected,
    #[error("keyboard is not connected")]
    NotConnected,
    #[error("pairing aborted: {reason}")]
    PairingAborted { reason: String },
}

struct Shared {
    engine: Mutex<ProtocolEngine>,
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<Event>,
    timings: Timings,
    decode_task: Mutex<Option<JoinHandle<()>>>,
    layer_request: Mutex<Option<JoinHandle<()>>>,
}

/// A live-training connection to one keyboard.
///
/// Subscribe before calling [`Keyboard::connect`] to observe
/// [`Event::Paired`]. The transport must already have its interface claimed;
/// closing it on [`Keyboard::disconnect`] is the only lifecycle call made.
pub struct Keyboard {
    shared: Arc<Shared>,
}

impl Keyboard {
    pub fn new(config: KeyboardConfig, transport: Arc<dyn Transport>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let timings = config.timings;

        Self {
            shared: Arc::new(Shared {
                engine: Mutex::new(ProtocolEngine::new(config)),
                transport,
                events,
                timings,
                decode_task: Mutex::new(None),
                layer_request: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    /// Start the decode loop and retry `CMD_PAIR` until the user presses the
    /// pairing key.
    ///
    /// Resolves once paired. Fails with [`KeyboardError::PairingAborted`] if
    /// the device goes away first.
    pub async fn connect(&self) -> Result<(), KeyboardError> {
        let generation = {
            let mut engine = self.shared.engine.lock();
            if engine.state().connected {
                return Err(KeyboardError::AlreadyConnected);
            }
            engine.connect();
            engine.begin_pairing();
            engine.generation()
        };

        let decode = tokio::spawn(decode_loop(Arc::clone(&self.shared), generation));
        if let Some(previous) = self.shared.decode_task.lock().replace(decode) {
            previous.abort();
        }

        info!("attempting to pair, press the pairing key on the keyboard");
        loop {
            let pair = self
                .shared
                .engine
                .lock()
                .encode_in(CommandSet::Current, Command::Pair, &[])?;
            if let Err(err) = self.shared.write(&pair).await {
                self.shared.report_write_failure(Command::Pair, err);
            }

            tokio::time::sleep(self.shared.timings.pair_retry_interval()).await;

            let engine = self.shared.engine.lock();
            if !engine.state().connected {
                let reason = engine
                    .disconnect_reason()
                    .unwrap_or("connection closed")
                    .to_owned();
                return Err(KeyboardError::PairingAborted { reason });
            }
            if !engine.awaiting_pairing() {
                break;
            }
        }

        info!("paired");
        Ok(())
    }

    /// Close the transport and end both loops. A later [`Keyboard::connect`]
    /// starts from a clean state.
    pub async fn disconnect(&self) -> Result<(), KeyboardError> {
        self.shared.end_connection("disconnected by host");
        if let Some(task) = self.shared.decode_task.lock().take() {
            task.abort();
        }
        self.shared.transport.close().await?;
        Ok(())
    }

    /// Send `command` using the table negotiated for this connection.
    pub async fn send_command(&self, command: Command, params: &[u8]) -> Result<(), KeyboardError> {
        self.shared.send_command(command, params).await
    }

    pub fn is_connected(&self) -> bool {
        self.shared.engine.lock().state().connected
    }

    pub fn is_paired(&self) -> bool {
        self.shared.engine.lock().state().paired
    }

    pub fn is_legacy(&self) -> bool {
        self.shared.engine.lock().state().legacy_mode
    }

    pub fn link_state(&self) -> LinkState {
        self.shared.engine.lock().state().link_state()
    }

    pub fn current_layer(&self) -> u8 {
        self.shared.engine.lock().state().current_layer
    }

    pub fn is_key_active(&self, index: usize) -> bool {
        let engine = self.shared.engine.lock();
        engine.state().active_keys.get(index).copied().unwrap_or(false)
    }

    pub fn active_keys(&self) -> Vec<bool> {
        self.shared.engine.lock().state().active_keys.clone()
    }

    pub fn firmware_version(&self) -> Option<FirmwareVersion> {
        self.shared.engine.lock().state().firmware_version.clone()
    }

    /// Snapshot of the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.engine.lock().state().clone()
    }

    pub fn config(&self) -> KeyboardConfig {
        self.shared.engine.lock().config().clone()
    }
}

#[cfg(feature = "usb")]
impl Keyboard {
    /// Open the first USB device matching the config's selector and pair
    /// with it. Events emitted before this returns are not observable.
    pub async fn connect_usb(config: impl Into<KeyboardConfig>) -> Result<Self, KeyboardError> {
        let config = config.into();
        let transport = UsbTransport::open(&config.usb_selector)?;
        let keyboard = Self::new(config, Arc::new(transport));
        keyboard.connect().await?;
        Ok(keyboard)
    }
}

impl Drop for Keyboard {
    fn drop(&mut self) {
        self.shared.end_connection("keyboard dropped");
        if let Some(task) = self.shared.decode_task.lock().take() {
            task.abort();
        }
    }
}

impl Shared {
    fn is_live(&self, generation: u64) -> bool {
        self.engine.lock().is_live(generation)
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn write(&self, packet: &[u8]) -> Result<(), TransportError> {
        trace!(?packet, "writing packet");
        self.transport.write(packet).await
    }

    async fn send_command(&self, command: Command, params: &[u8]) -> Result<(), KeyboardError> {
        let packet = {
            let engine = self.engine.lock();
            if !engine.state().connected {
                return Err(KeyboardError::NotConnected);
            }
            engine.encode(command, params)?
        };

        debug!(%command, "sending command");
        self.write(&packet).await?;
        Ok(())
    }

    fn report_write_failure(&self, command: Command, err: TransportError) {
        match err {
            TransportError::Disconnected(reason) => self.end_connection(reason),
            other => warn!(%command, error = %other, "failed to send command"),
        }
    }

    /// Flip `connected` off, cancel the pending layer request and notify
    /// subscribers. Only the first call per connection has any effect.
    fn end_connection(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let was_connected = self.engine.lock().disconnect(reason.clone());
        if let Some(task) = self.layer_request.lock().take() {
            task.abort();
        }

        if was_connected {
            info!(%reason, "keyboard disconnected");
            self.emit(Event::Disconnected { reason });
        }
    }

    async fn apply(self: &Arc<Self>, actions: Vec<Action>, generation: u64) {
        for action in actions {
            match action {
                Action::Emit(event) => self.emit(event),
                Action::Send { command, params } => {
                    match self.send_command(command, &params).await {
                        Ok(()) => {}
                        Err(KeyboardError::Transport(err)) => {
                            self.report_write_failure(command, err)
                        }
                        Err(err) => warn!(%command, error = %err, "failed to send command"),
                    }
                }
                Action::ScheduleLayerRequest => self.schedule_layer_request(generation),
            }
        }
    }

    /// Request the active layer once the post-pairing delay has passed,
    /// unless connection `generation` has ended by then.
    fn schedule_layer_request(self: &Arc<Self>, generation: u64) {
        // Holding the slot keeps `end_connection` from clearing it between the
        // liveness check and the store.
        let mut slot = self.layer_request.lock();
        if !self.is_live(generation) {
            trace!(generation, "connection ended, not requesting layer");
            return;
        }

        let shared = Arc::clone(self);
        let delay = self.timings.layer_request_delay();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !shared.is_live(generation) {
                return;
            }
            match shared.send_command(Command::GetLayer, &[]).await {
                Ok(()) => {}
                Err(KeyboardError::Transport(err)) => {
                    shared.report_write_failure(Command::GetLayer, err)
                }
                Err(err) => warn!(error = %err, "failed to request active layer"),
            }
        });

        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }
}

async fn decode_loop(shared: Arc<Shared>, generation: u64) {
    debug!(generation, "decode loop started");

    while shared.is_live(generation) {
        let packet = match shared
            .transport
            .read(PACKET_SIZE, shared.timings.read_timeout())
            .await
        {
            Ok(packet) => packet,
            Err(TransportError::Timeout) => {
                trace!("read timed out, keeping the connection alive");
                continue;
            }
            Err(TransportError::Disconnected(reason)) => {
                if shared.is_live(generation) {
                    shared.end_connection(reason);
                }
                break;
            }
            Err(err) => {
                warn!(error = %err, "read failed");
                tokio::time::sleep(READ_ERROR_BACKOFF).await;
                continue;
            }
        };

        let actions = {
            let mut engine = shared.engine.lock();
            if !engine.is_live(generation) {
                break;
            }
            engine.handle_packet(&packet)
        };
        shared.apply(actions, generation).await;
    }

    debug!("decode loop stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{Keyboard, KeyboardError};
    use crate::command::{Command, CommandError, CommandSet};
    use crate::config::Timings;
    use crate::event::Event;
    use crate::preset::Preset;
    use crate::transport::mock::MockTransport;

    #[tokio::test(start_paused = true)]
    async fn send_command_requires_connection() {
        let (transport, _device) = MockTransport::new();
        let keyboard = Keyboard::new(Preset::ErgodoxEz.config(), Arc::new(transport));

        let err = keyboard.send_command(Command::GetLayer, &[]).await.unwrap_err();
        assert!(matches!(err, KeyboardError::NotConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn legacy_keyboard_rejects_live_training() {
        let (transport, device) = MockTransport::new();
        let keyboard = Keyboard::new(Preset::ErgodoxEz.config(), Arc::new(transport));

        device.send_frames(&[&[0x00, 0x04, 0x00], &[0x00, 0x00]]);
        keyboard.connect().await.expect("pairs");
        assert!(keyboard.is_legacy());

        let err = keyboard
            .send_command(Command::LiveTraining, &[2])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KeyboardError::Command(CommandError::InvalidCommand {
                command: Command::LiveTraining,
                set: CommandSet::Legacy,
            })
        ));

        keyboard
            .send_command(Command::LandingPage, &[])
            .await
            .expect("legacy knows landing page");
        assert_eq!(device.written().last(), Some(&vec![1]));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_twice_is_rejected() {
        let (transport, device) = MockTransport::new();
        let keyboard = Keyboard::new(Preset::ErgodoxEz.config(), Arc::new(transport));

        device.send_frames(&[&[0x00, 0x00]]);
        keyboard.connect().await.expect("pairs");

        assert!(matches!(
            keyboard.connect().await,
            Err(KeyboardError::AlreadyConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn drop_notifies_subscribers() {
        let (transport, device) = MockTransport::new();
        let keyboard = Keyboard::new(Preset::ErgodoxEz.config(), Arc::new(transport));
        let mut events = keyboard.subscribe();

        device.send_frames(&[&[0x00, 0x00]]);
        keyboard.connect().await.expect("pairs");
        drop(keyboard);

        let mut last = None;
        while let Ok(Ok(event)) =
            tokio::time::timeout(Duration::from_secs(1), events.recv()).await
        {
            last = Some(event);
        }
        assert_eq!(
            last,
            Some(Event::Disconnected {
                reason: "keyboard dropped".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_layer_request_is_dropped_after_reconnect() {
        let (transport, device) = MockTransport::new();
        let config = Preset::ErgodoxEz.config().with_timings(Timings {
            layer_request_delay_ms: 5000,
            ..Timings::default()
        });
        let keyboard = Keyboard::new(config, Arc::new(transport));
        let layer_requests = || device.written().iter().filter(|p| p.as_slice() == [2]).count();

        device.send_frames(&[&[0x00, 0x00]]);
        keyboard.connect().await.expect("first pairing");
        let first = keyboard.shared.engine.lock().generation();
        keyboard.shared.end_connection("unplugged");

        device.send_frames(&[&[0x00, 0x00]]);
        keyboard.connect().await.expect("second pairing");
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(layer_requests(), 1);

        // A decode pass from the first connection finishing late.
        keyboard.shared.schedule_layer_request(first);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(layer_requests(), 1);
        assert!(keyboard.is_paired());
    }
}
