use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Pixel layout of a buffer.
///
/// Only the per-pixel byte width matters to the pool; channel order and
/// color space are the renderer's business.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// 32-bit ARGB, 4 bytes per pixel
    #[default]
    Argb8888,
    /// 16-bit RGB, 2 bytes per pixel
    Rgb565,
    /// 8-bit alpha mask, 1 byte per pixel
    Alpha8,
}

impl PixelFormat {
    /// Bytes occupied by a single pixel
    #[inline]
    pub const fn bytes_per_pixel(self) -> u64 {
        match self {
            PixelFormat::Argb8888 => 4,
            PixelFormat::Rgb565 => 2,
            PixelFormat::Alpha8 => 1,
        }
    }

    /// Lowercase name used in config strings and metric labels
    pub const fn as_str(self) -> &'static str {
        match self {
            PixelFormat::Argb8888 => "argb8888",
            PixelFormat::Rgb565 => "rgb565",
            PixelFormat::Alpha8 => "alpha8",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "argb8888" | "argb" => Ok(PixelFormat::Argb8888),
            "rgb565" => Ok(PixelFormat::Rgb565),
            "alpha8" | "a8" => Ok(PixelFormat::Alpha8),
            other => Err(Error::InvalidArgument(format!(
                "unknown pixel format: {}",
                other
            ))),
        }
    }
}
