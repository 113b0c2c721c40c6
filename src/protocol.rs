/*!
 # Wire protocol and color palette

 Frame construction for the lamp's fixed 9-byte command format and the
 color palette (built-in colors plus a persisted list of custom colors).

 Every frame starts with `0x7e` and ends with `0xef`. All frames are
 written to a single GATT characteristic without requesting a response.
*/

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Length of every command frame
pub const FRAME_LEN: usize = 9;

/// No-op frame used as keep-alive ping
pub const KEEP_ALIVE_FRAME: [u8; FRAME_LEN] = [0x7e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xef];

/// Frame turning the lamp off (black color frame)
pub const POWER_OFF_FRAME: [u8; FRAME_LEN] = [0x7e, 0x00, 0x05, 0x03, 0x00, 0x00, 0x00, 0x00, 0xef];

/// Builds the color-set frame for an RGB triple
pub fn color_frame(red: u8, green: u8, blue: u8) -> [u8; FRAME_LEN] {
    [0x7e, 0x00, 0x05, 0x03, red, green, blue, 0x00, 0xef]
}

/// Builds the brightness frame for a 0-100 percentage, clamping larger values
pub fn brightness_frame(percent: u8) -> [u8; FRAME_LEN] {
    [0x7e, 0x00, 0x01, percent.min(100), 0x00, 0x00, 0x00, 0x00, 0xef]
}

/// Parses a `#rrggbb` (or `rrggbb`) hex string into an RGB triple
pub fn parse_hex(hex: &str) -> Option<(u8, u8, u8)> {
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let r = u8::from_str_radix(&digits[0..2], 16).ok()?;
    let g = u8::from_str_radix(&digits[2..4], 16).ok()?;
    let b = u8::from_str_radix(&digits[4..6], 16).ok()?;
    Some((r, g, b))
}

/// A named lamp color with its ready-to-send command frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Color {
    /// Display name, unique within the palette
    pub name: String,
    /// `#rrggbb` hex code
    pub hex: String,
    /// Color-set frame encoding this color
    pub command: [u8; FRAME_LEN],
}

impl Color {
    /// Builds a color from a name and hex code
    pub fn new(name: &str, hex: &str) -> Result<Color> {
        let (r, g, b) = parse_hex(hex).ok_or_else(|| Error::InvalidColor(hex.to_string()))?;
        Ok(Color {
            name: name.to_string(),
            hex: format!("#{r:02x}{g:02x}{b:02x}"),
            command: color_frame(r, g, b),
        })
    }
}

/// On-disk shape of one custom color entry
#[derive(Debug, Serialize, Deserialize)]
struct CustomColorEntry {
    name: String,
    hex: String,
}

/// Built-in palette: (name, hex). Names are the identity keys used by
/// schedule entries, so they stay stable across releases.
const BUILTIN_COLORS: [(&str, &str); 8] = [
    ("Piros", "#ff0000"),
    ("Zöld", "#00ff00"),
    ("Kék", "#0000ff"),
    ("Sárga", "#ffff00"),
    ("Cian", "#00ffff"),
    ("Lila", "#800080"),
    ("Narancs", "#ffa500"),
    ("Fehér", "#ffffff"),
];

/// The merged color palette: built-in colors followed by custom ones.
///
/// Custom colors live in a flat JSON array of `{name, hex}` objects and are
/// merged in at load time. Names must be unique across the whole palette.
pub struct Palette {
    colors: Vec<Color>,
    builtin_count: usize,
    store_path: Option<PathBuf>,
}

impl Palette {
    /// Palette with only the built-in colors, no backing store
    pub fn builtin() -> Palette {
        let colors = BUILTIN_COLORS
            .iter()
            .map(|(name, hex)| Color::new(name, hex).expect("built-in colors are valid"))
            .collect::<Vec<_>>();
        let builtin_count = colors.len();
        Palette {
            colors,
            builtin_count,
            store_path: None,
        }
    }

    /// Loads the palette, merging custom colors from `path`.
    ///
    /// A missing or corrupt store yields the built-in palette; individual
    /// entries with duplicate names or unparsable hex codes are skipped.
    pub fn load(path: PathBuf) -> Palette {
        let mut palette = Palette::builtin();
        palette.store_path = Some(path.clone());

        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => {
                debug!("No custom color store at {}", path.display());
                return palette;
            }
        };
        let entries: Vec<CustomColorEntry> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Custom color store {} is corrupt: {}", path.display(), e);
                return palette;
            }
        };

        for entry in entries {
            if palette.find(&entry.name).is_some() {
                warn!("Skipping duplicate custom color '{}'", entry.name);
                continue;
            }
            match Color::new(&entry.name, &entry.hex) {
                Ok(color) => palette.colors.push(color),
                Err(e) => warn!("Skipping custom color '{}': {}", entry.name, e),
            }
        }
        palette
    }

    /// All colors, built-in first
    pub fn colors(&self) -> &[Color] {
        &self.colors
    }

    /// Looks a color up by name
    pub fn find(&self, name: &str) -> Option<&Color> {
        self.colors.iter().find(|c| c.name == name)
    }

    /// Name of the first palette color, used as the default schedule color
    pub fn first_color_name(&self) -> Option<&str> {
        self.colors.first().map(|c| c.name.as_str())
    }

    /// Adds a custom color and persists the custom list.
    ///
    /// Rejects names already present in the merged palette.
    pub fn add_custom(&mut self, name: &str, hex: &str) -> Result<()> {
        if self.find(name).is_some() {
            return Err(Error::DuplicateColor(name.to_string()));
        }
        let color = Color::new(name, hex)?;
        self.colors.push(color);
        self.save()
    }

    /// Removes a custom color by name and persists the custom list.
    pub fn remove_custom(&mut self, name: &str) -> Result<()> {
        let idx = self
            .colors
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| Error::UnknownColor(name.to_string()))?;
        if idx < self.builtin_count {
            return Err(Error::BuiltinColor(name.to_string()));
        }
        self.colors.remove(idx);
        self.save()
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.store_path else {
            return Ok(());
        };
        let entries: Vec<CustomColorEntry> = self.colors[self.builtin_count..]
            .iter()
            .map(|c| CustomColorEntry {
                name: c.name.clone(),
                hex: c.hex.clone(),
            })
            .collect();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_frame_encodes_rgb() {
        assert_eq!(
            color_frame(0xff, 0xa5, 0x00),
            [0x7e, 0x00, 0x05, 0x03, 0xff, 0xa5, 0x00, 0x00, 0xef]
        );
    }

    #[test]
    fn brightness_frame_clamps_to_100() {
        let frame = brightness_frame(100);
        assert_eq!(frame[3], 0x64);
        assert_eq!(brightness_frame(250)[3], 0x64);
        assert_eq!(brightness_frame(0)[3], 0x00);
    }

    #[test]
    fn power_off_is_black_color_frame() {
        assert_eq!(POWER_OFF_FRAME, color_frame(0, 0, 0));
    }

    #[test]
    fn keep_alive_is_noop_frame() {
        assert_eq!(KEEP_ALIVE_FRAME[0], 0x7e);
        assert_eq!(KEEP_ALIVE_FRAME[8], 0xef);
        assert!(KEEP_ALIVE_FRAME[1..8].iter().all(|&b| b == 0));
    }

    #[test]
    fn parse_hex_accepts_prefix_and_rejects_garbage() {
        assert_eq!(parse_hex("#ff0000"), Some((255, 0, 0)));
        assert_eq!(parse_hex("00ff00"), Some((0, 255, 0)));
        assert_eq!(parse_hex("#12345"), None);
        assert_eq!(parse_hex("zzzzzz"), None);
    }

    #[test]
    fn builtin_palette_has_eight_colors() {
        let palette = Palette::builtin();
        assert_eq!(palette.colors().len(), 8);
        let red = palette.find("Piros").unwrap();
        assert_eq!(red.hex, "#ff0000");
        assert_eq!(red.command, color_frame(255, 0, 0));
    }

    #[test]
    fn duplicate_custom_color_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut palette = Palette::load(dir.path().join("custom_colors.json"));
        palette.add_custom("Türkiz", "#40e0d0").unwrap();
        assert!(matches!(
            palette.add_custom("Türkiz", "#30d0c0"),
            Err(Error::DuplicateColor(_))
        ));
        // also rejected against built-in names
        assert!(matches!(
            palette.add_custom("Piros", "#aa0000"),
            Err(Error::DuplicateColor(_))
        ));
        assert_eq!(
            palette.colors().iter().filter(|c| c.name == "Türkiz").count(),
            1
        );
    }

    #[test]
    fn custom_colors_round_trip_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom_colors.json");
        let mut palette = Palette::load(path.clone());
        palette.add_custom("Türkiz", "#40e0d0").unwrap();

        let reloaded = Palette::load(path);
        let color = reloaded.find("Türkiz").unwrap();
        assert_eq!(color.hex, "#40e0d0");
        assert_eq!(color.command, color_frame(0x40, 0xe0, 0xd0));
    }

    #[test]
    fn builtin_colors_cannot_be_removed() {
        let mut palette = Palette::builtin();
        assert!(matches!(
            palette.remove_custom("Piros"),
            Err(Error::BuiltinColor(_))
        ));
    }
}
