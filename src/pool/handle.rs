use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::pool::bucket::{Bucket, SlotId};
use crate::pool::image_pool::Shared;
use crate::pool::Image;

/// Callback fired once when a handle lets go of its image.
pub type ReleaseCallback = Box<dyn FnOnce(&Image) + Send + 'static>;

/// Claim on a bucket slot, valid for the epoch it was taken in.
pub(crate) struct Lease {
    pub(crate) bucket: Arc<Mutex<Bucket>>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) slot: SlotId,
    pub(crate) epoch: u64,
}

impl Lease {
    /// Return the image to its slot, unless the pool was disposed since.
    fn give_back(self, mut image: Image) {
        let metrics = &self.shared.metrics;
        let mut bucket = self.bucket.lock();
        if self.shared.epoch() != self.epoch {
            metrics.inc(&metrics.stale_releases);
            debug!(
                "Stale release for class {} (epoch {} < {}), dropping buffer",
                bucket.class(),
                self.epoch,
                self.shared.epoch()
            );
            return;
        }

        image.clear();
        if bucket.offer(self.slot, image) {
            metrics.inc(&metrics.returns);
        } else {
            debug!("Slot {} of class {} is gone, dropping buffer", self.slot, bucket.class());
        }
    }

    /// Give up the slot for good and refund its bytes.
    fn vacate(self) {
        let metrics = &self.shared.metrics;
        let mut bucket = self.bucket.lock();
        if self.shared.epoch() != self.epoch {
            return;
        }
        if let Some(bytes) = bucket.vacate(self.slot) {
            metrics.uncharge(bytes);
            metrics.inc(&metrics.detached);
        }
    }
}

/// Caller-side ownership of one image.
///
/// Dropping the handle (or calling [`release`](Self::release)) fires the
/// release callback and, for a pooled image, hands the buffer back to its
/// bucket. Release is idempotent and may happen on any thread.
pub struct PooledImage {
    image: Option<Image>,
    lease: Option<Lease>,
    on_release: Option<ReleaseCallback>,
}

impl PooledImage {
    pub(crate) fn pooled(image: Image, lease: Lease, on_release: Option<ReleaseCallback>) -> Self {
        Self {
            image: Some(image),
            lease: Some(lease),
            on_release,
        }
    }

    pub(crate) fn unpooled(image: Image, on_release: Option<ReleaseCallback>) -> Self {
        Self {
            image: Some(image),
            lease: None,
            on_release,
        }
    }

    /// The image, until the handle is released.
    #[inline]
    pub fn image(&self) -> Option<&Image> {
        self.image.as_ref()
    }

    /// Mutable access to the image, until the handle is released.
    #[inline]
    pub fn image_mut(&mut self) -> Option<&mut Image> {
        self.image.as_mut()
    }

    /// Whether the image came from a bucket slot
    #[inline]
    pub fn is_pooled(&self) -> bool {
        self.lease.is_some()
    }

    #[inline]
    pub fn is_released(&self) -> bool {
        self.image.is_none()
    }

    /// Epoch of the pool this image was leased in, if pooled
    pub fn epoch(&self) -> Option<u64> {
        self.lease.as_ref().map(|l| l.epoch)
    }

    /// Release the image. Calling this more than once has no effect.
    pub fn release(&mut self) {
        let Some(image) = self.image.take() else {
            return;
        };

        // Runs before any bucket lock is taken, so it may use the pool.
        if let Some(callback) = self.on_release.take() {
            callback(&image);
        }

        if let Some(lease) = self.lease.take() {
            lease.give_back(image);
        }
    }

    /// Take the image out of the pool for good.
    ///
    /// A pooled image gives up its slot and its bytes are refunded to the
    /// budget. The release callback still fires. Returns `None` if the
    /// handle was already released.
    pub fn detach(mut self) -> Option<Image> {
        let image = self.image.take()?;

        if let Some(callback) = self.on_release.take() {
            callback(&image);
        }

        if let Some(lease) = self.lease.take() {
            lease.vacate();
        }

        Some(image)
    }
}

impl Drop for PooledImage {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for PooledImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledImage")
            .field("image", &self.image)
            .field("pooled", &self.is_pooled())
            .field("epoch", &self.epoch())
            .finish()
    }
}
