use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An RGBA color packed as `0xRRGGBBAA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(u32);

impl Color {
    /// Default group color (#4A99EF, opaque).
    pub const DEFAULT: Color = Color(0x4A99_EFFF);

    #[must_use]
    pub const fn from_packed(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn from_rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self(((r as u32) << 24) | ((g as u32) << 16) | ((b as u32) << 8) | a as u32)
    }

    #[must_use]
    pub const fn packed(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn red(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    #[must_use]
    pub const fn green(&self) -> u8 {
        (self.0 >> 16) as u8
    }

    #[must_use]
    pub const fn blue(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    #[must_use]
    pub const fn alpha(&self) -> u8 {
        self.0 as u8
    }

    /// Parses `#RRGGBB` or `#RRGGBBAA` (leading `#` optional).
    pub fn parse_hex(s: &str) -> Option<Self> {
        let hex = s.strip_prefix('#').unwrap_or(s);
        match hex.len() {
            6 => u32::from_str_radix(hex, 16).ok().map(|v| Self((v << 8) | 0xFF)),
            8 => u32::from_str_radix(hex, 16).ok().map(Self),
            _ => None,
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:08X}", self.0)
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_hex(s).ok_or_else(|| format!("invalid color: {s}"))
    }
}
