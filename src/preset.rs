//! Built-in keyboard presets.

use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::config::{DeviceFilter, KeyboardConfig, PairingKey, Timings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter)]
pub enum Preset {
    #[strum(serialize = "ergodox-ez")]
    ErgodoxEz,
}

impl Preset {
    pub fn config(self) -> KeyboardConfig {
        match self {
            Self::ErgodoxEz => ergodox_ez(),
        }
    }
}

impl From<Preset> for KeyboardConfig {
    fn from(value: Preset) -> Self {
        value.config()
    }
}

const ERGODOX_LAYOUT: [&[i32]; 6] = [
    &[0, 1, 2, 3, 4, 5, 6, 38, 39, 40, 41, 42, 43, 44],
    &[7, 8, 9, 10, 11, 12, 13, 45, 46, 47, 48, 49, 50, 51],
    &[14, 15, 16, 17, 18, 19, -1, -1, 52, 53, 54, 55, 56, 57],
    &[20, 21, 22, 23, 24, 25, 26, 58, 59, 60, 61, 62, 63, 64],
    &[27, 28, 29, 30, 31, -1, -1, -1, -1, 65, 66, 67, 68, 69],
    &[-1, 37, 36, 35, 34, 32, 33, 70, 71, 72, 75, 74, 73],
];

fn ergodox_ez() -> KeyboardConfig {
    KeyboardConfig {
        key_count: 76,
        key_layout_map: ERGODOX_LAYOUT.iter().map(|col| col.to_vec()).collect(),
        key_index_translator: None,
        pairing_key: PairingKey {
            layer: 0,
            key_index: 6,
        },
        usb_selector: DeviceFilter {
            vendor_id: 0xFEED,
            product_id: 0x1307,
        },
        timings: Timings::default(),
    }
}
