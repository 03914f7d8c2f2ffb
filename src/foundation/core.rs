use serde::{Deserialize, Serialize};

use crate::foundation::error::{SupercutError, SupercutResult};

/// Output canvas dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Canvas {
    /// Create a validated canvas; both sides must be non-zero and even (yuv420p output).
    pub fn new(width: u32, height: u32) -> SupercutResult<Self> {
        let canvas = Self { width, height };
        canvas.validate()?;
        Ok(canvas)
    }

    pub fn validate(self) -> SupercutResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(SupercutError::validation(
                "canvas width/height must be non-zero",
            ));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            return Err(SupercutError::validation(format!(
                "canvas {}x{} must have even sides (required for yuv420p output)",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Straight-alpha RGBA8 color.
///
/// Deserializes from `"#RRGGBB"`, `"#RRGGBBAA"` or an `[r, g, b]` / `[r, g, b, a]` array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const WHITE: Self = Self::rgb(255, 255, 255);
    pub const BLACK: Self = Self::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// `#rrggbb`, alpha dropped (SVG fill syntax).
    pub fn hex_rgb(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// `0xRRGGBB`, the form ffmpeg color options accept.
    pub fn ffmpeg_rgb(self) -> String {
        format!("0x{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// Alpha in `0.0..=1.0`.
    pub fn alpha_f32(self) -> f32 {
        f32::from(self.a) / 255.0
    }

    pub fn parse_hex(s: &str) -> SupercutResult<Self> {
        let s = s.trim();
        let s = s.strip_prefix('#').unwrap_or(s);

        fn hex_byte(s: &str, at: usize) -> SupercutResult<u8> {
            let pair = s
                .get(at..at + 2)
                .ok_or_else(|| SupercutError::validation(format!("invalid hex color \"{s}\"")))?;
            u8::from_str_radix(pair, 16)
                .map_err(|_| SupercutError::validation(format!("invalid hex byte \"{pair}\"")))
        }

        match s.len() {
            6 => Ok(Self::rgb(hex_byte(s, 0)?, hex_byte(s, 2)?, hex_byte(s, 4)?)),
            8 => Ok(Self {
                r: hex_byte(s, 0)?,
                g: hex_byte(s, 2)?,
                b: hex_byte(s, 4)?,
                a: hex_byte(s, 6)?,
            }),
            _ => Err(SupercutError::validation(
                "hex color must be #RRGGBB or #RRGGBBAA (case-insensitive)",
            )),
        }
    }
}

impl Serialize for Rgba8 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        [self.r, self.g, self.b, self.a].serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Rgba8 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Hex(String),
            Arr(Vec<u8>),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Hex(s) => Self::parse_hex(&s).map_err(serde::de::Error::custom),
            Repr::Arr(v) => match v.as_slice() {
                [r, g, b] => Ok(Self::rgb(*r, *g, *b)),
                [r, g, b, a] => Ok(Self {
                    r: *r,
                    g: *g,
                    b: *b,
                    a: *a,
                }),
                _ => Err(serde::de::Error::custom(
                    "rgba array must have len 3 ([r,g,b]) or 4 ([r,g,b,a])",
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canvas_rejects_odd_and_zero_sides() {
        assert!(Canvas::new(1920, 1080).is_ok());
        assert!(Canvas::new(0, 1080).is_err());
        assert!(Canvas::new(1921, 1080).is_err());
    }

    #[test]
    fn color_parses_hex_and_arrays() {
        let c: Rgba8 = serde_json::from_str("\"#FF8000\"").unwrap();
        assert_eq!(c, Rgba8::rgb(255, 128, 0));
        let c: Rgba8 = serde_json::from_str("\"10203040\"").unwrap();
        assert_eq!(c.a, 0x40);
        let c: Rgba8 = serde_json::from_str("[1,2,3]").unwrap();
        assert_eq!(c, Rgba8::rgb(1, 2, 3));
        assert!(serde_json::from_str::<Rgba8>("[1,2]").is_err());
        assert!(serde_json::from_str::<Rgba8>("\"#12\"").is_err());
    }

    #[test]
    fn color_formats_for_svg_and_ffmpeg() {
        let c = Rgba8::rgb(0xAB, 0x01, 0xFF);
        assert_eq!(c.hex_rgb(), "#ab01ff");
        assert_eq!(c.ffmpeg_rgb(), "0xAB01FF");
    }
}
