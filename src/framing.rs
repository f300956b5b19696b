//! Inbound packets carry one or more commands, each closed by
//! [`FRAME_TERMINATOR`]. Outbound packets are a bare command byte followed by
//! its parameters.

/// Size of a single interrupt/bulk read from the keyboard.
pub const PACKET_SIZE: usize = 64;
/// `-2` as a signed byte.
pub const FRAME_TERMINATOR: u8 = 0xFE;
/// Status byte of a frame the host should interpret.
pub const STATUS_OK: u8 = 0x00;

/// Split one raw read into the frames it contains.
///
/// Each terminator closes the current frame, even an empty one. Bytes after
/// the last terminator are dropped; the device never spreads a command over
/// two packets.
pub fn split_frames(buffer: &[u8]) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    let mut current = Vec::new();

    for &b in buffer {
        if b == FRAME_TERMINATOR {
            frames.push(core::mem::take(&mut current));
        } else {
            current.push(b);
        }
    }

    frames
}

pub fn encode_command(code: u8, params: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(params.len() + 1);
    out.push(code);
    out.extend_from_slice(params);
    out
}
