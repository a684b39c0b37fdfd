//! Fixed 9-byte frames understood by the strip firmware, hex encoded.
//!
//! ```text
//! brightness: 7e 00 01 <0x00-0x64> 00 00 00 00 ef
//! color:      7e 00 03 <0x80-0x86> 03 00 00 00 ef
//! ```

use crate::screen::color::PaletteCode;

pub const MAX_BRIGHTNESS: u8 = 0x64;

/// Brightness frame. Levels above 100 are clamped.
pub fn brightness_payload(level: u8) -> String {
    format!("7e0001{:02X}00000000ef", level.min(MAX_BRIGHTNESS))
}

pub fn color_payload(code: PaletteCode) -> String {
    format!("7e0003{:02X}03000000ef", code.byte())
}
