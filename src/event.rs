/// Notification delivered to [`crate::Keyboard`] subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The user acknowledged pairing on the device.
    Paired,
    KeyDown {
        col: u8,
        row: u8,
        index: usize,
    },
    KeyUp {
        col: u8,
        row: u8,
        index: usize,
    },
    LayerChanged {
        layer: u8,
    },
    LiveTraining,
    /// Firmware identified its physical layout before pairing completed.
    VersionAnnounced {
        layout_id: String,
        revision_id: Option<String>,
    },
    /// A frame the host could not interpret. Diagnostic only.
    Unknown {
        bytes: Vec<u8>,
    },
    Disconnected {
        reason: String,
    },
}
