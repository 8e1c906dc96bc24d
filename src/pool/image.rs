//! Owned pixel buffer handed out by the pool.

use std::fmt;

use crate::error::{Error, Result};
use crate::types::{byte_size, PixelFormat};

/// A zero-initialized pixel buffer of fixed dimensions.
///
/// The pool never resizes an image: a pooled image keeps the dimensions of
/// the size class it was allocated for, even when it serves a smaller
/// request.
pub struct Image {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Image {
    /// Allocate a zeroed image.
    ///
    /// Allocation failure is reported instead of aborting, so callers can
    /// surface out-of-memory to their own caller.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let len = byte_size(width, height, format)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or(Error::SizeOverflow { width, height })?;

        let mut data = Vec::new();
        data.try_reserve_exact(len)?;
        data.resize(len, 0);

        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Size of the pixel data in bytes
    #[inline]
    pub fn byte_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Whether this image can serve a `width x height` request in `format`
    #[inline]
    pub fn satisfies(&self, width: u32, height: u32, format: PixelFormat) -> bool {
        self.format == format && self.width >= width && self.height >= height
    }

    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Address of the pixel storage, stable for the image's lifetime.
    ///
    /// Useful to tell whether two handles share the same recycled buffer.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    /// Zero the pixel data
    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}
