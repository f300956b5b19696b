//! Connection state and frame interpretation.
//!
//! [`ProtocolEngine`] is synchronous: it consumes inbound packets, mutates the
//! [`ConnectionState`] it owns, and returns the [`Action`]s the caller must
//! carry out (emit an event, write a command, schedule the layer request).
//! [`crate::Keyboard`] drives it from the async decode and pairing loops.

use tracing::{debug, info, trace, warn};

use crate::command::{Command, CommandError, CommandSet, EventCode};
use crate::config::KeyboardConfig;
use crate::event::Event;
use crate::framing::{STATUS_OK, encode_command, split_frames};
use crate::utf8::decode_permissive;

/// Version announcement sent by current firmware while unpaired.
const VERSION_ANNOUNCEMENT: u8 = 0x01;
/// Version announcement sent by firmware using the legacy numbering.
const LEGACY_VERSION_ANNOUNCEMENT: u8 = 0x04;
/// `CMD_LIVE_TRAINING` parameter that turns key reporting on.
const LIVE_TRAINING_ENABLE: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub layout_id: String,
    pub revision_id: Option<String>,
}

impl FirmwareVersion {
    fn parse(text: &str) -> Self {
        match text.split_once('/') {
            Some((layout, revision)) => Self {
                layout_id: layout.to_owned(),
                revision_id: Some(revision.to_owned()),
            },
            None => Self {
                layout_id: text.to_owned(),
                revision_id: None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Pairing,
    Paired,
}

/// Per-connection protocol state. Reset on every connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    pub paired: bool,
    pub legacy_mode: bool,
    pub current_layer: u8,
    pub active_keys: Vec<bool>,
    pub firmware_version: Option<FirmwareVersion>,
}

impl ConnectionState {
    pub fn new(key_count: usize) -> Self {
        Self {
            connected: false,
            paired: false,
            legacy_mode: false,
            current_layer: 0,
            active_keys: vec![false; key_count],
            firmware_version: None,
        }
    }

    pub fn command_set(&self) -> CommandSet {
        CommandSet::for_legacy_mode(self.legacy_mode)
    }

    pub fn link_state(&self) -> LinkState {
        match (self.connected, self.paired) {
            (false, _) => LinkState::Disconnected,
            (true, false) => LinkState::Pairing,
            (true, true) => LinkState::Paired,
        }
    }
}

/// Side effect requested by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Emit(Event),
    Send { command: Command, params: Vec<u8> },
    /// Request `CMD_GET_LAYER` once the post-pairing delay has passed.
    ScheduleLayerRequest,
}

pub struct ProtocolEngine {
    config: KeyboardConfig,
    state: ConnectionState,
    disconnect_reason: Option<String>,
    generation: u64,
}

impl ProtocolEngine {
    pub fn new(config: KeyboardConfig) -> Self {
        let state = ConnectionState::new(config.key_count);
        Self {
            config,
            state,
            disconnect_reason: None,
            generation: 0,
        }
    }

    pub fn config(&self) -> &KeyboardConfig {
        &self.config
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn command_set(&self) -> CommandSet {
        self.state.command_set()
    }

    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnect_reason.as_deref()
    }

    /// Counter bumped by every [`ProtocolEngine::connect`].
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether `generation` names the connection that is currently live.
    pub fn is_live(&self, generation: u64) -> bool {
        self.state.connected && self.generation == generation
    }

    /// Start a fresh connection. Any state from a previous one is discarded.
    pub fn connect(&mut self) {
        self.state = ConnectionState::new(self.config.key_count);
        self.state.connected = true;
        self.disconnect_reason = None;
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn begin_pairing(&mut self) {
        let pairing = self.config.pairing_key;
        if let Some(key) = self.state.active_keys.get_mut(pairing.key_index) {
            *key = false;
        }
        self.state.current_layer = pairing.layer;
    }

    pub fn awaiting_pairing(&self) -> bool {
        self.state.connected && !self.state.paired
    }

    /// Mark the connection as lost. Returns `false` if it already was.
    pub fn disconnect(&mut self, reason: impl Into<String>) -> bool {
        if !self.state.connected {
            return false;
        }
        self.state.connected = false;
        self.disconnect_reason = Some(reason.into());
        true
    }

    /// Encode `command` using the table that matches the negotiated mode.
    pub fn encode(&self, command: Command, params: &[u8]) -> Result<Vec<u8>, CommandError> {
        self.encode_in(self.command_set(), command, params)
    }

    pub fn encode_in(
        &self,
        set: CommandSet,
        command: Command,
        params: &[u8],
    ) -> Result<Vec<u8>, CommandError> {
        let code = set.command_code(command)?;
        Ok(encode_command(code, params))
    }

    pub fn handle_packet(&mut self, packet: &[u8]) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.state.connected {
            return actions;
        }

        for frame in split_frames(packet) {
            self.handle_frame(&frame, &mut actions);
        }

        actions
    }

    fn handle_frame(&mut self, frame: &[u8], actions: &mut Vec<Action>) {
        let Some(&status) = frame.first() else {
            trace!("ignoring empty frame");
            return;
        };
        if status != STATUS_OK {
            trace!(status, "ignoring frame with error status");
            return;
        }
        let Some(&event) = frame.get(1) else {
            if self.state.paired {
                unknown(frame, actions);
            } else {
                trace!(?frame, "ignoring short frame");
            }
            return;
        };

        if self.state.paired {
            self.handle_paired_frame(event, frame, actions);
        } else {
            self.handle_unpaired_frame(event, frame, actions);
        }
    }

    fn handle_unpaired_frame(&mut self, event: u8, frame: &[u8], actions: &mut Vec<Action>) {
        // Pairing acknowledgement is always numbered per the current table.
        if CommandSet::Current.event_for_code(event) == Some(EventCode::Paired) {
            self.state.paired = true;
            info!(legacy = self.state.legacy_mode, "keyboard paired");
            actions.push(Action::Emit(Event::Paired));
            if !self.state.legacy_mode {
                actions.push(Action::Send {
                    command: Command::LiveTraining,
                    params: vec![LIVE_TRAINING_ENABLE],
                });
            }
            actions.push(Action::ScheduleLayerRequest);
            return;
        }

        match event {
            VERSION_ANNOUNCEMENT | LEGACY_VERSION_ANNOUNCEMENT => {
                if event == LEGACY_VERSION_ANNOUNCEMENT && !self.state.legacy_mode {
                    info!("firmware uses legacy command numbering");
                    self.state.legacy_mode = true;
                }

                let payload = frame.get(2..frame.len() - 1).unwrap_or_default();
                let version = FirmwareVersion::parse(&decode_permissive(payload));
                debug!(
                    layout_id = %version.layout_id,
                    revision_id = ?version.revision_id,
                    "firmware version announced"
                );
                actions.push(Action::Emit(Event::VersionAnnounced {
                    layout_id: version.layout_id.clone(),
                    revision_id: version.revision_id.clone(),
                }));
                self.state.firmware_version = Some(version);
            }
            _ => trace!(event, "ignoring event before pairing"),
        }
    }

    fn handle_paired_frame(&mut self, event: u8, frame: &[u8], actions: &mut Vec<Action>) {
        match self.command_set().event_for_code(event) {
            Some(EventCode::KeyDown) => self.handle_key(frame, true, actions),
            Some(EventCode::KeyUp) => self.handle_key(frame, false, actions),
            Some(EventCode::Layer) => match frame.get(2) {
                Some(&layer) => {
                    debug!(from = self.state.current_layer, to = layer, "layer changed");
                    self.state.current_layer = layer;
                    actions.push(Action::Emit(Event::LayerChanged { layer }));
                }
                None => unknown(frame, actions),
            },
            Some(EventCode::LiveTraining) => {
                debug!("live training");
                actions.push(Action::Emit(Event::LiveTraining));
            }
            Some(EventCode::Paired) | None => unknown(frame, actions),
        }
    }

    fn handle_key(&mut self, frame: &[u8], down: bool, actions: &mut Vec<Action>) {
        let (Some(&col), Some(&row)) = (frame.get(2), frame.get(3)) else {
            unknown(frame, actions);
            return;
        };
        let Some(index) = self.config.resolve_key_index(col, row) else {
            warn!(col, row, "key event for a position with no key");
            unknown(frame, actions);
            return;
        };
        let Some(slot) = self.state.active_keys.get_mut(index) else {
            unknown(frame, actions);
            return;
        };

        *slot = down;
        debug!(col, row, index, down, "key press");
        actions.push(Action::Emit(if down {
            Event::KeyDown { col, row, index }
        } else {
            Event::KeyUp { col, row, index }
        }));
    }
}

fn unknown(frame: &[u8], actions: &mut Vec<Action>) {
    warn!(?frame, "unknown command");
    actions.push(Action::Emit(Event::Unknown {
        bytes: frame.to_vec(),
    }));
}

#[cfg(test)]
mod tests {
    use super::{Action, FirmwareVersion, LinkState, ProtocolEngine};
    use crate::command::{Command, CommandError, CommandSet};
    use crate::event::Event;
    use crate::preset::Preset;

    fn connected_engine() -> ProtocolEngine {
        let mut engine = ProtocolEngine::new(Preset::ErgodoxEz.config());
        engine.connect();
        engine.begin_pairing();
        engine
    }

    fn paired_engine() -> ProtocolEngine {
        let mut engine = connected_engine();
        engine.handle_packet(&[0x00, 0x00, 0xFE]);
        engine
    }

    #[test]
    fn pairing_ack_triggers_live_training_and_layer_request() {
        let mut engine = connected_engine();
        assert_eq!(engine.state().link_state(), LinkState::Pairing);

        let actions = engine.handle_packet(&[0x00, 0x00, 0x01, 0x02, 0x03, 0xFE]);

        assert_eq!(
            actions,
            vec![
                Action::Emit(Event::Paired),
                Action::Send {
                    command: Command::LiveTraining,
                    params: vec![2],
                },
                Action::ScheduleLayerRequest,
            ]
        );
        assert!(engine.state().paired);
        assert!(engine.state().active_keys.iter().all(|k| !k));
        assert_eq!(engine.state().link_state(), LinkState::Paired);
    }

    #[test]
    fn repeated_pairing_ack_is_reported_without_redoing_setup() {
        let mut engine = paired_engine();
        let actions = engine.handle_packet(&[0x00, 0x00, 0xFE, 0x00, 0x00, 0xFE]);

        assert_eq!(
            actions,
            vec![
                Action::Emit(Event::Unknown {
                    bytes: vec![0x00, 0x00],
                }),
                Action::Emit(Event::Unknown {
                    bytes: vec![0x00, 0x00],
                }),
            ]
        );
        assert!(engine.state().paired);
    }

    #[test]
    fn frame_without_event_byte_is_unknown_once_paired() {
        let mut engine = connected_engine();
        assert!(engine.handle_packet(&[0x00, 0xFE]).is_empty());

        engine.handle_packet(&[0x00, 0x00, 0xFE]);
        assert_eq!(
            engine.handle_packet(&[0x00, 0xFE, 0xFE]),
            vec![Action::Emit(Event::Unknown { bytes: vec![0x00] })]
        );
    }

    #[test]
    fn legacy_announcement_switches_tables_and_skips_live_training() {
        let mut engine = connected_engine();
        let mut packet = vec![0x00, 0x04];
        packet.extend_from_slice(b"abc/def");
        packet.extend_from_slice(&[0x00, 0xFE, 0x00, 0x00, 0xFE]);

        let actions = engine.handle_packet(&packet);

        assert!(engine.state().legacy_mode);
        assert_eq!(engine.command_set(), CommandSet::Legacy);
        assert_eq!(
            actions,
            vec![
                Action::Emit(Event::VersionAnnounced {
                    layout_id: "abc".into(),
                    revision_id: Some("def".into()),
                }),
                Action::Emit(Event::Paired),
                Action::ScheduleLayerRequest,
            ]
        );
        assert_eq!(
            engine.encode(Command::LiveTraining, &[2]),
            Err(CommandError::InvalidCommand {
                command: Command::LiveTraining,
                set: CommandSet::Legacy,
            })
        );
        assert_eq!(engine.encode(Command::GetLayer, &[]), Ok(vec![2]));
    }

    #[test]
    fn current_announcement_keeps_current_table() {
        let mut engine = connected_engine();
        let mut packet = vec![0x00, 0x01];
        packet.extend_from_slice(b"Xqv/5ZzB!");
        packet.push(0xFE);

        engine.handle_packet(&packet);

        assert!(!engine.state().legacy_mode);
        assert_eq!(
            engine.state().firmware_version,
            Some(FirmwareVersion {
                layout_id: "Xqv".into(),
                revision_id: Some("5ZzB".into()),
            })
        );
    }

    #[test]
    fn legacy_announcement_after_pairing_does_not_change_mode() {
        let mut engine = paired_engine();
        let actions = engine.handle_packet(&[0x00, 0x04, b'a', 0xFE]);

        assert!(!engine.state().legacy_mode);
        assert_eq!(
            actions,
            vec![Action::Emit(Event::Unknown {
                bytes: vec![0x00, 0x04, b'a'],
            })]
        );
    }

    #[test]
    fn key_down_then_up_tracks_active_keys() {
        let mut engine = paired_engine();

        let down = engine.handle_packet(&[0x00, 17, 1, 7, 0xFE]);
        assert_eq!(
            down,
            vec![Action::Emit(Event::KeyDown {
                col: 1,
                row: 7,
                index: 45,
            })]
        );
        assert!(engine.state().active_keys[45]);

        let up = engine.handle_packet(&[0x00, 18, 1, 7, 0xFE]);
        assert_eq!(
            up,
            vec![Action::Emit(Event::KeyUp {
                col: 1,
                row: 7,
                index: 45,
            })]
        );
        assert!(!engine.state().active_keys[45]);
    }

    #[test]
    fn key_events_are_ignored_before_pairing() {
        let mut engine = connected_engine();
        let actions = engine.handle_packet(&[0x00, 17, 0, 0, 0xFE]);

        assert!(actions.is_empty());
        assert!(!engine.state().active_keys[0]);
    }

    #[test]
    fn unmapped_key_position_is_reported_as_unknown() {
        let mut engine = paired_engine();
        let actions = engine.handle_packet(&[0x00, 17, 5, 0, 0xFE, 0x00, 17, 9, 9, 0xFE]);

        assert_eq!(
            actions,
            vec![
                Action::Emit(Event::Unknown {
                    bytes: vec![0x00, 17, 5, 0],
                }),
                Action::Emit(Event::Unknown {
                    bytes: vec![0x00, 17, 9, 9],
                }),
            ]
        );
        assert!(engine.state().active_keys.iter().all(|k| !k));
    }

    #[test]
    fn legacy_key_codes_are_used_in_legacy_mode() {
        let mut engine = connected_engine();
        engine.handle_packet(&[0x00, 0x04, 0x00, 0xFE, 0x00, 0x00, 0xFE]);

        let actions = engine.handle_packet(&[0x00, 0x01, 0, 0, 0xFE, 0x00, 0x03, 4, 0xFE]);

        assert_eq!(
            actions,
            vec![
                Action::Emit(Event::KeyDown {
                    col: 0,
                    row: 0,
                    index: 0,
                }),
                Action::Emit(Event::LayerChanged { layer: 4 }),
            ]
        );
        assert_eq!(engine.state().current_layer, 4);
    }

    #[test]
    fn layer_and_live_training_events() {
        let mut engine = paired_engine();
        let actions = engine.handle_packet(&[0x00, 0x02, 3, 0xFE, 0x00, 0x03, 0xFE]);

        assert_eq!(
            actions,
            vec![
                Action::Emit(Event::LayerChanged { layer: 3 }),
                Action::Emit(Event::LiveTraining),
            ]
        );
        assert_eq!(engine.state().current_layer, 3);
    }

    #[test]
    fn non_zero_status_frames_are_ignored() {
        let mut engine = paired_engine();
        let actions = engine.handle_packet(&[0x01, 17, 0, 0, 0xFE, 0x00, 0x7F, 0xFE]);

        assert_eq!(
            actions,
            vec![Action::Emit(Event::Unknown {
                bytes: vec![0x00, 0x7F],
            })]
        );
    }

    #[test]
    fn disconnected_engine_ignores_packets() {
        let mut engine = connected_engine();
        assert!(engine.disconnect("unplugged"));
        assert!(!engine.disconnect("again"));
        assert_eq!(engine.disconnect_reason(), Some("unplugged"));

        assert!(engine.handle_packet(&[0x00, 0x00, 0xFE]).is_empty());
        assert!(!engine.state().paired);
    }

    #[test]
    fn reconnect_discards_previous_state() {
        let mut engine = paired_engine();
        engine.handle_packet(&[0x00, 17, 0, 0, 0xFE]);
        engine.disconnect("unplugged");

        engine.connect();

        assert!(engine.state().connected);
        assert!(!engine.state().paired);
        assert!(!engine.state().active_keys[0]);
        assert_eq!(engine.disconnect_reason(), None);
    }

    #[test]
    fn each_connect_starts_a_new_generation() {
        let mut engine = connected_engine();
        let first = engine.generation();
        assert!(engine.is_live(first));

        engine.disconnect("unplugged");
        assert!(!engine.is_live(first));

        engine.connect();
        assert!(!engine.is_live(first));
        assert!(engine.is_live(engine.generation()));
    }
}
