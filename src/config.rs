//! Per-device configuration: key layout, pairing key and USB selector.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

/// Layout cell with no physical key behind it.
pub const NO_KEY: i32 = -1;

/// Maps a `(col, row)` matrix position to a flat key index, overriding the
/// layout table.
pub type KeyIndexTranslator = Arc<dyn Fn(u8, u8) -> Option<usize> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid keyboard config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("key layout map is empty")]
    EmptyLayout,
    #[error("pairing key index {key_index} is outside the {key_count} configured keys")]
    PairingKeyOutOfRange { key_index: usize, key_count: usize },
}

/// USB vendor/product pair used to pick the keyboard during enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub struct DeviceFilter {
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Key the user presses to acknowledge pairing on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PairingKey {
    pub layer: u8,
    pub key_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Delay between `CMD_PAIR` retries while unpaired.
    pub pair_retry_ms: u64,
    /// Delay before asking for the active layer once paired, so a held
    /// momentary-layer key can be released first.
    pub layer_request_delay_ms: u64,
    /// Upper bound on a single inbound read.
    pub read_timeout_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            pair_retry_ms: 1000,
            layer_request_delay_ms: 200,
            read_timeout_ms: 1000,
        }
    }
}

impl Timings {
    pub fn pair_retry_interval(&self) -> Duration {
        Duration::from_millis(self.pair_retry_ms)
    }

    pub fn layer_request_delay(&self) -> Duration {
        Duration::from_millis(self.layer_request_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Clone, Deserialize)]
pub struct KeyboardConfig {
    /// Number of physical keys; sizes the active-key table.
    pub key_count: usize,
    /// `key_layout_map[col][row]` is the flat key index, or [`NO_KEY`].
    pub key_layout_map: Vec<Vec<i32>>,
    #[serde(skip)]
    pub key_index_translator: Option<KeyIndexTranslator>,
    pub pairing_key: PairingKey,
    pub usb_selector: DeviceFilter,
    #[serde(default)]
    pub timings: Timings,
}

impl fmt::Debug for KeyboardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyboardConfig")
            .field("key_count", &self.key_count)
            .field("key_layout_map", &self.key_layout_map)
            .field("key_index_translator", &self.key_index_translator.is_some())
            .field("pairing_key", &self.pairing_key)
            .field("usb_selector", &self.usb_selector)
            .field("timings", &self.timings)
            .finish()
    }
}

impl KeyboardConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_translator<F>(mut self, translator: F) -> Self
    where
        F: Fn(u8, u8) -> Option<usize> + Send + Sync + 'static,
    {
        self.key_index_translator = Some(Arc::new(translator));
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_layout_map.iter().all(Vec::is_empty) {
            return Err(ConfigError::EmptyLayout);
        }

        if self.pairing_key.key_index >= self.key_count {
            return Err(ConfigError::PairingKeyOutOfRange {
                key_index: self.pairing_key.key_index,
                key_count: self.key_count,
            });
        }

        Ok(())
    }

    /// Flat key index for a matrix position, or `None` for empty cells,
    /// positions outside the layout and indices beyond `key_count`.
    pub fn resolve_key_index(&self, col: u8, row: u8) -> Option<usize> {
        let index = match &self.key_index_translator {
            Some(translate) => translate(col, row)?,
            None => {
                let cell = *self
                    .key_layout_map
                    .get(col as usize)?
                    .get(row as usize)?;
                usize::try_from(cell).ok()?
            }
        };

        (index < self.key_count).then_some(index)
    }
}
