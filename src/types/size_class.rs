use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::types::PixelFormat;

/// Declared `(width, height)` that pooled requests are rounded up to.
///
/// Size classes are the keys of the bucket map, so they are small,
/// `Copy` and hashable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SizeClass {
    width: u32,
    height: u32,
}

impl SizeClass {
    /// Create a new size class
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Whether a `width x height` request can be served by this class
    #[inline]
    pub const fn fits(&self, width: u32, height: u32) -> bool {
        self.width >= width && self.height >= height
    }

    /// Byte size of one buffer of this class in the given format.
    ///
    /// Returns `None` on overflow.
    #[inline]
    pub fn byte_size(&self, format: PixelFormat) -> Option<u64> {
        byte_size(self.width, self.height, format)
    }
}

/// `width * height * bytes_per_pixel`, checked.
#[inline]
pub fn byte_size(width: u32, height: u32, format: PixelFormat) -> Option<u64> {
    (width as u64)
        .checked_mul(height as u64)?
        .checked_mul(format.bytes_per_pixel())
}

impl fmt::Debug for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SizeClass({}x{})", self.width, self.height)
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for SizeClass {
    fn from((width, height): (u32, u32)) -> Self {
        Self::new(width, height)
    }
}

impl FromStr for SizeClass {
    type Err = Error;

    /// Parse `WxH`, e.g. `800x600`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| Error::InvalidArgument(format!("expected WxH, got {:?}", s)))?;
        let width = w
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("invalid width in {:?}", s)))?;
        let height = h
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("invalid height in {:?}", s)))?;
        Ok(Self::new(width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits() {
        let class = SizeClass::new(800, 800);
        assert!(class.fits(700, 800));
        assert!(class.fits(800, 800));
        assert!(class.fits(0, 0));
        assert!(!class.fits(801, 10));
        assert!(!class.fits(10, 801));
    }

    #[test]
    fn test_byte_size() {
        let class = SizeClass::new(800, 800);
        assert_eq!(class.byte_size(PixelFormat::Argb8888), Some(800 * 800 * 4));
        assert_eq!(class.byte_size(PixelFormat::Alpha8), Some(800 * 800));
        assert_eq!(
            byte_size(u32::MAX, u32::MAX, PixelFormat::Argb8888),
            None
        );
    }

    #[test]
    fn test_parse() {
        assert_eq!("640x480".parse::<SizeClass>().unwrap(), SizeClass::new(640, 480));
        assert_eq!(" 32X16 ".parse::<SizeClass>().unwrap(), SizeClass::new(32, 16));
        assert!("640".parse::<SizeClass>().is_err());
        assert!("axb".parse::<SizeClass>().is_err());
    }
}
