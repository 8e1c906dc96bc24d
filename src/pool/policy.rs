use crate::error::{Error, Result};
use crate::types::SizeClass;

/// Static pool configuration: declared size classes, how many buffers each
/// class may keep, and the global byte budget.
///
/// Class order matters. Selection walks the classes in declaration order and
/// the first one that fits wins, so callers should list them smallest first.
#[derive(Debug, Clone)]
pub struct PoolPolicy {
    classes: Vec<SizeClass>,
    max_copies: Vec<u32>,
    max_cache_bytes: u64,
}

impl PoolPolicy {
    /// Create a policy from parallel lists of size classes and copy limits.
    pub fn new<C, M>(size_classes: C, max_copies: M, max_cache_bytes: u64) -> Result<Self>
    where
        C: IntoIterator<Item = (u32, u32)>,
        M: IntoIterator<Item = u32>,
    {
        let classes: Vec<SizeClass> = size_classes.into_iter().map(SizeClass::from).collect();
        let max_copies: Vec<u32> = max_copies.into_iter().collect();

        if classes.len() != max_copies.len() {
            return Err(Error::InvalidPolicy(format!(
                "{} size classes but {} copy limits",
                classes.len(),
                max_copies.len()
            )));
        }

        Ok(Self {
            classes,
            max_copies,
            max_cache_bytes,
        })
    }

    /// Pick the first declared class that can hold a `width x height` image.
    ///
    /// Returns the class index alongside the class. `None` means the request
    /// can never be pooled at this size.
    pub fn select_bucket(&self, width: u32, height: u32) -> Option<(usize, SizeClass)> {
        self.classes
            .iter()
            .enumerate()
            .find(|(_, class)| class.fits(width, height))
            .map(|(idx, class)| (idx, *class))
    }

    /// Maximum simultaneous buffers for the class at `idx`
    #[inline]
    pub fn max_copies(&self, idx: usize) -> u32 {
        self.max_copies.get(idx).copied().unwrap_or(0)
    }

    #[inline]
    pub fn max_cache_bytes(&self) -> u64 {
        self.max_cache_bytes
    }

    #[inline]
    pub fn size_classes(&self) -> &[SizeClass] {
        &self.classes
    }
}
