//! Rust client for the Oryx live-training protocol spoken by Ergodox-style
//! keyboards over their vendor USB interface.
//!
//! The recommended API surface is:
//! - [`Keyboard`] to pair with a device and stream key and layer events
//! - [`KeyboardConfig`] and [`Preset`] to describe a keyboard model
//! - [`transport`] for USB and in-memory I/O adapters
//!
//! [`ProtocolEngine`] exposes the synchronous frame interpreter for callers
//! that drive their own I/O.

mod command;
mod config;
mod engine;
mod event;
/// Packet splitting and command encoding for the vendor endpoint.
pub mod framing;
mod keyboard;
mod preset;
/// Transport adapters for reaching a keyboard's vendor interface.
pub mod transport;
mod utf8;

/// Symbolic commands and events with their per-firmware wire codes.
pub use command::{Command, CommandError, CommandSet, EventCode};
/// Keyboard description used by [`Keyboard`] and [`ProtocolEngine`].
pub use config::{
    ConfigError, DeviceFilter, KeyIndexTranslator, KeyboardConfig, NO_KEY, PairingKey, Timings,
};
/// Synchronous frame interpreter and the connection state it owns.
pub use engine::{Action, ConnectionState, FirmwareVersion, LinkState, ProtocolEngine};
/// Notification delivered to [`Keyboard::subscribe`] receivers.
pub use event::Event;
/// Async keyboard connection and the errors its operations return.
pub use keyboard::{Keyboard, KeyboardError};
/// Built-in keyboard models, convertible into [`KeyboardConfig`].
pub use preset::Preset;
/// Lenient UTF-8 decoding used for firmware version strings.
pub use utf8::decode_permissive;
