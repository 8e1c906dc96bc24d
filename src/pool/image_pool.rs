use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::error::Result;
use crate::metrics::{PoolMetrics, PoolStats};
use crate::pool::bucket::Bucket;
use crate::pool::handle::{Lease, ReleaseCallback};
use crate::pool::helper::get_buffered_image;
use crate::pool::{Image, PoolPolicy, PooledImage};
use crate::types::{PixelFormat, SizeClass};

/// State shared between the pool and its outstanding handles.
pub(crate) struct Shared {
    pub(crate) policy: PoolPolicy,
    pub(crate) metrics: PoolMetrics,
    epoch: AtomicU64,
}

impl Shared {
    #[inline]
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}

/// Size-classed pool of recyclable images bounded by a byte budget.
///
/// Each size class gets its own bucket behind its own lock, created on the
/// first request that maps to it. Requests that no class fits, or that find
/// their bucket full or the budget spent, are served by a plain allocation
/// that is never recycled.
///
/// Share the pool as `Arc<ImagePool>`; handles may be released on any
/// thread.
pub struct ImagePool {
    shared: Arc<Shared>,
    buckets: RwLock<FxHashMap<SizeClass, Arc<Mutex<Bucket>>>>,
}

impl ImagePool {
    /// Create an empty pool.
    pub fn new(policy: PoolPolicy) -> Self {
        Self {
            shared: Arc::new(Shared {
                policy,
                metrics: PoolMetrics::new(),
                epoch: AtomicU64::new(0),
            }),
            buckets: RwLock::new(FxHashMap::default()),
        }
    }

    #[inline]
    pub fn policy(&self) -> &PoolPolicy {
        &self.shared.policy
    }

    /// Current generation; bumped by every [`dispose`](Self::dispose).
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.shared.epoch()
    }

    /// Number of buckets created so far
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        self.shared
            .metrics
            .snapshot(self.epoch(), self.policy().max_cache_bytes())
    }

    /// Get an image of at least `width x height`.
    #[inline]
    pub fn acquire(&self, width: u32, height: u32, format: PixelFormat) -> Result<PooledImage> {
        self.acquire_inner(width, height, format, None)
    }

    /// Get an image of at least `width x height`, running `on_release` once
    /// when the handle lets go of it.
    ///
    /// The callback sees the image before it goes back to its bucket, so a
    /// pooled acquire made from inside the callback cannot reuse that buffer
    /// and may miss.
    pub fn acquire_with<F>(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        on_release: F,
    ) -> Result<PooledImage>
    where
        F: FnOnce(&Image) + Send + 'static,
    {
        self.acquire_inner(width, height, format, Some(Box::new(on_release)))
    }

    fn acquire_inner(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        on_release: Option<ReleaseCallback>,
    ) -> Result<PooledImage> {
        let metrics = &self.shared.metrics;

        let Some((idx, class)) = self.policy().select_bucket(width, height) else {
            metrics.inc(&metrics.too_big_for_pool);
            debug!("No size class fits {}x{}, allocating unpooled", width, height);
            return self.unpooled(width, height, format, on_release);
        };

        let bucket = self.bucket(idx, class);
        let leased = {
            let mut guard = bucket.lock();
            get_buffered_image(
                &mut guard,
                width,
                height,
                format,
                metrics,
                self.policy().max_cache_bytes(),
            )?
            // Read under the bucket lock so dispose cannot slip in between.
            .map(|leased| (leased, self.shared.epoch()))
        };

        match leased {
            Some((leased, epoch)) => {
                let lease = Lease {
                    bucket,
                    shared: self.shared.clone(),
                    slot: leased.slot,
                    epoch,
                };
                Ok(PooledImage::pooled(leased.image, lease, on_release))
            }
            None => self.unpooled(width, height, format, on_release),
        }
    }

    fn unpooled(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        on_release: Option<ReleaseCallback>,
    ) -> Result<PooledImage> {
        let image = Image::new(width, height, format)?;
        let metrics = &self.shared.metrics;
        metrics.inc(&metrics.unpooled_allocations);
        Ok(PooledImage::unpooled(image, on_release))
    }

    /// Get or lazily create the bucket for a size class.
    fn bucket(&self, idx: usize, class: SizeClass) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.read().get(&class) {
            return bucket.clone();
        }

        let mut buckets = self.buckets.write();
        buckets
            .entry(class)
            .or_insert_with(|| {
                let max_copies = self.policy().max_copies(idx);
                debug!("Creating bucket for class {} (max_copies={})", class, max_copies);
                Arc::new(Mutex::new(Bucket::new(class, max_copies)))
            })
            .clone()
    }

    /// Empty every bucket and start a new epoch.
    ///
    /// All bucket locks are held while the epoch changes, so once this
    /// returns no release from an earlier epoch can put a buffer back.
    /// Images already handed out stay valid for their holders.
    pub fn dispose(&self) {
        let buckets = self.buckets.read();
        let mut guards: Vec<_> = buckets.values().map(|b| b.lock()).collect();

        let epoch = self.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let freed: u64 = guards.iter_mut().map(|b| b.clear()).sum();

        let metrics = &self.shared.metrics;
        metrics.reset_allocated();
        metrics.inc(&metrics.disposes);
        drop(guards);

        info!(
            "Disposed image pool: {} buckets cleared, {} bytes freed, epoch now {}",
            buckets.len(),
            freed,
            epoch
        );
    }

    /// Drop idle buffers to give memory back, keeping those on loan.
    ///
    /// Returns the number of bytes freed.
    pub fn trim(&self) -> u64 {
        let metrics = &self.shared.metrics;
        let freed: u64 = self
            .buckets
            .read()
            .values()
            .map(|bucket| {
                let mut bucket = bucket.lock();
                let freed = bucket.trim_idle();
                bucket.prune();
                metrics.uncharge(freed);
                freed
            })
            .sum();

        if freed > 0 {
            info!("Trimmed {} idle bytes from image pool", freed);
        }
        freed
    }
}

impl std::fmt::Debug for ImagePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePool")
            .field("policy", self.policy())
            .field("epoch", &self.epoch())
            .field("buckets", &self.bucket_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const ARGB: PixelFormat = PixelFormat::Argb8888;
    const CLASS_800: u64 = 800 * 800 * 4;

    fn pool(classes: &[(u32, u32)], copies: &[u32], budget: u64) -> ImagePool {
        ImagePool::new(
            PoolPolicy::new(classes.iter().copied(), copies.iter().copied(), budget).unwrap(),
        )
    }

    fn dims(img: &PooledImage) -> (u32, u32) {
        let image = img.image().unwrap();
        (image.width(), image.height())
    }

    fn ptr(img: &PooledImage) -> *const u8 {
        img.image().unwrap().as_ptr()
    }

    #[test]
    fn test_rounds_up_to_class() {
        let pool = pool(&[(64, 64), (256, 128)], &[2, 2], u64::MAX);

        let a = pool.acquire(10, 64, ARGB).unwrap();
        assert_eq!(dims(&a), (64, 64));

        let b = pool.acquire(65, 100, ARGB).unwrap();
        assert_eq!(dims(&b), (256, 128));
        assert!(a.is_pooled() && b.is_pooled());
        assert_eq!(pool.bucket_count(), 2);
    }

    #[test]
    fn test_recycles_same_buffer() {
        let pool = pool(&[(128, 128)], &[1], u64::MAX);

        let first = pool.acquire(100, 100, ARGB).unwrap();
        let addr = ptr(&first);
        drop(first);

        let second = pool.acquire(128, 1, ARGB).unwrap();
        assert_eq!(ptr(&second), addr);
        assert_eq!(pool.stats().hits, 1);
    }

    #[test]
    fn test_budget_enforced() {
        let pool = pool(&[(800, 800)], &[4], CLASS_800);

        let first = pool.acquire(800, 800, ARGB).unwrap();
        let second = pool.acquire(800, 800, ARGB).unwrap();

        assert!(first.is_pooled());
        assert!(!second.is_pooled());
        assert_ne!(ptr(&first), ptr(&second));
        // Fallback keeps the requested size
        assert_eq!(dims(&second), (800, 800));

        let stats = pool.stats();
        assert_eq!(stats.allocated_bytes, CLASS_800);
        assert_eq!(stats.pool_misses, 1);
        assert_eq!(stats.too_big_for_pool_count, 0);
    }

    #[test]
    fn test_miss_fallback_uses_requested_size() {
        let pool = pool(&[(64, 64)], &[1], u64::MAX);

        let _held = pool.acquire(64, 64, ARGB).unwrap();
        let miss = pool.acquire(30, 20, ARGB).unwrap();
        assert!(!miss.is_pooled());
        assert_eq!(dims(&miss), (30, 20));
    }

    #[test]
    fn test_too_big_counted_once_per_request() {
        let pool = pool(&[(64, 64)], &[1], u64::MAX);

        let big = pool.acquire(65, 10, ARGB).unwrap();
        assert!(!big.is_pooled());
        assert_eq!(dims(&big), (65, 10));
        let _ = pool.acquire(10, 1000, ARGB).unwrap();
        assert_eq!(pool.stats().too_big_for_pool_count, 2);

        // In-class misses never count as too big
        let _held = pool.acquire(64, 64, ARGB).unwrap();
        let _miss = pool.acquire(64, 64, ARGB).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.too_big_for_pool_count, 2);
        assert_eq!(stats.pool_misses, 1);
        assert_eq!(stats.unpooled_allocations, 3);
        assert_eq!(pool.bucket_count(), 1);
    }

    #[test]
    fn test_dispose_resets() {
        let pool = pool(&[(32, 32)], &[2], u64::MAX);

        drop(pool.acquire(32, 32, ARGB).unwrap());
        assert_eq!(pool.stats().allocated_bytes, 32 * 32 * 4);

        pool.dispose();
        assert_eq!(pool.stats().allocated_bytes, 0);
        assert_eq!(pool.epoch(), 1);

        // Nothing resident survives, so this is a fresh allocation
        let fresh = pool.acquire(32, 32, ARGB).unwrap();
        assert_eq!(pool.stats().hits, 0);
        assert_eq!(pool.stats().pooled_allocations, 2);
        assert_eq!(fresh.epoch(), Some(1));
    }

    #[test]
    fn test_stale_release_is_ignored() {
        let pool = pool(&[(32, 32)], &[1], u64::MAX);

        let old = pool.acquire(32, 32, ARGB).unwrap();
        let old_addr = ptr(&old);
        pool.dispose();

        let fresh = pool.acquire(32, 32, ARGB).unwrap();
        assert!(fresh.is_pooled());
        let fresh_addr = ptr(&fresh);
        drop(fresh);

        // Releasing the pre-dispose handle must not resurrect its buffer
        drop(old);
        let stats = pool.stats();
        assert_eq!(stats.stale_releases, 1);
        assert_eq!(stats.allocated_bytes, 32 * 32 * 4);

        let again = pool.acquire(32, 32, ARGB).unwrap();
        assert_eq!(ptr(&again), fresh_addr);
        assert_ne!(ptr(&again), old_addr);
    }

    #[test]
    fn test_stale_detach_leaves_budget() {
        let pool = pool(&[(32, 32)], &[2], u64::MAX);

        let old = pool.acquire(32, 32, ARGB).unwrap();
        pool.dispose();
        let _fresh = pool.acquire(32, 32, ARGB).unwrap();

        assert!(old.detach().is_some());
        assert_eq!(pool.stats().allocated_bytes, 32 * 32 * 4);
        assert_eq!(pool.stats().detached, 0);
    }

    #[test]
    fn test_trim_frees_idle_only() {
        let pool = pool(&[(16, 16)], &[2], u64::MAX);

        let idle = pool.acquire(16, 16, ARGB).unwrap();
        let _loaned = pool.acquire(16, 16, ARGB).unwrap();
        drop(idle);
        assert_eq!(pool.stats().allocated_bytes, 2 * 16 * 16 * 4);

        assert_eq!(pool.trim(), 16 * 16 * 4);
        assert_eq!(pool.stats().allocated_bytes, 16 * 16 * 4);
        assert_eq!(pool.trim(), 0);
    }

    #[test]
    fn test_formats_share_bucket_without_mixing() {
        let pool = pool(&[(16, 16)], &[2], u64::MAX);

        let argb = pool.acquire(16, 16, ARGB).unwrap();
        drop(argb);

        let alpha = pool.acquire(16, 16, PixelFormat::Alpha8).unwrap();
        assert!(alpha.is_pooled());
        assert_eq!(alpha.image().unwrap().format(), PixelFormat::Alpha8);
        assert_eq!(pool.stats().hits, 0);
        assert_eq!(pool.stats().allocated_bytes, 16 * 16 * 4 + 16 * 16);
    }

    #[test]
    fn test_empty_policy() {
        let pool = pool(&[], &[], u64::MAX);
        let img = pool.acquire(1, 1, ARGB).unwrap();
        assert!(!img.is_pooled());
        assert_eq!(pool.stats().too_big_for_pool_count, 1);
        assert_eq!(pool.bucket_count(), 0);
    }

    #[test]
    fn test_alloc_failure_propagates() {
        let pool = pool(&[], &[], u64::MAX);
        assert!(pool.acquire(u32::MAX, u32::MAX, ARGB).is_err());
    }

    #[test]
    fn test_unmeasurable_class_falls_back() {
        let pool = pool(&[(u32::MAX, u32::MAX)], &[1], 1 << 20);

        let img = pool.acquire(1, 1, ARGB).unwrap();
        assert!(!img.is_pooled());
        assert_eq!(dims(&img), (1, 1));

        let stats = pool.stats();
        assert_eq!(stats.pool_misses, 1);
        assert_eq!(stats.too_big_for_pool_count, 0);
        assert_eq!(stats.allocated_bytes, 0);
    }

    #[test]
    fn test_pooled_alloc_failure_rolls_back() {
        let class = SizeClass::new(1 << 31, 1 << 31);
        let pool = pool(&[(1 << 31, 1 << 31)], &[1], u64::MAX);

        let err = pool.acquire(1, 1, PixelFormat::Alpha8).unwrap_err();
        assert!(matches!(err, crate::error::Error::Alloc(_)));
        assert_eq!(pool.stats().allocated_bytes, 0);
        assert_eq!(pool.stats().unpooled_allocations, 0);

        let bucket = pool.buckets.read().get(&class).cloned().unwrap();
        assert_eq!(bucket.lock().occupied_count(), 0);
    }

    #[test]
    fn test_scenario_800() {
        let pool = pool(&[(800, 800)], &[1], 2 * CLASS_800);

        let first = pool.acquire(700, 800, ARGB).unwrap();
        assert_eq!(dims(&first), (800, 800));
        assert_eq!(pool.stats().allocated_bytes, CLASS_800);
        let first_addr = ptr(&first);
        drop(first);

        let second = pool.acquire(699, 800, ARGB).unwrap();
        assert_eq!(ptr(&second), first_addr);
        drop(second);

        pool.dispose();
        assert_eq!(pool.stats().allocated_bytes, 0);

        let third = pool.acquire(700, 800, ARGB).unwrap();
        assert!(third.is_pooled());
        assert_eq!(pool.stats().hits, 1);
        assert_eq!(pool.stats().pooled_allocations, 2);
        assert_eq!(pool.stats().allocated_bytes, CLASS_800);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = Arc::new(pool(&[(64, 64), (128, 128)], &[3, 2], 3 * 64 * 64 * 4 + 128 * 128 * 4));
        let budget = pool.policy().max_cache_bytes();

        let workers: Vec<_> = (0..8)
            .map(|t| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for i in 0..500u32 {
                        let w = 1 + (i * 7 + t) % 128;
                        let mut img = pool.acquire(w, w, ARGB).unwrap();
                        img.image_mut().unwrap().pixels_mut()[0] = 1;
                        assert!(pool.stats().allocated_bytes <= budget);
                        if i % 3 == 0 {
                            img.release();
                        }
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        let stats = pool.stats();
        assert!(stats.allocated_bytes <= budget);
        assert_eq!(stats.too_big_for_pool_count, 0);
        assert_eq!(
            stats.hits + stats.pooled_allocations + stats.unpooled_allocations,
            8 * 500
        );
    }

    #[test]
    fn test_cross_thread_release_and_dispose() {
        let pool = Arc::new(pool(&[(32, 32)], &[4], 4 * 32 * 32 * 4));
        let (tx, rx) = crossbeam::channel::bounded::<PooledImage>(16);

        let releaser = thread::spawn(move || {
            for img in rx {
                drop(img);
            }
        });

        for i in 0..200 {
            tx.send(pool.acquire(32, 32, ARGB).unwrap()).unwrap();
            if i % 50 == 49 {
                pool.dispose();
            }
        }
        drop(tx);
        releaser.join().unwrap();

        let stats = pool.stats();
        assert!(stats.allocated_bytes <= 4 * 32 * 32 * 4);
        assert_eq!(stats.disposes, 4);
        assert_eq!(stats.epoch, 4);
    }
}
