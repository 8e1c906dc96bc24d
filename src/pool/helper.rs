//! Allocation algorithm for a single bucket.
//!
//! Runs with the bucket lock held. The budget ledger is shared by every
//! bucket of the pool and is only ever charged through a compare-and-swap,
//! so two buckets allocating at once cannot overshoot `max_cache_bytes`.

use tracing::debug;

use crate::error::Result;
use crate::metrics::PoolMetrics;
use crate::pool::bucket::{Bucket, SlotId};
use crate::pool::Image;
use crate::types::PixelFormat;

/// Where a pooled buffer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// An idle buffer was recycled
    Reused,
    /// A new buffer was allocated into a free slot
    Allocated,
}

/// A buffer on loan from a bucket slot.
#[derive(Debug)]
pub struct Leased {
    pub slot: SlotId,
    pub image: Image,
    pub source: Source,
}

/// Find or create a pooled buffer for a `width x height` request.
///
/// Returns `Ok(None)` on a pool miss (bucket full or budget exhausted). The
/// caller decides what to do about a miss; this function never allocates
/// outside the bucket. Allocation failure propagates as an error and leaves
/// the budget as it was.
pub fn get_buffered_image(
    bucket: &mut Bucket,
    width: u32,
    height: u32,
    format: PixelFormat,
    metrics: &PoolMetrics,
    max_cache_bytes: u64,
) -> Result<Option<Leased>> {
    if let Some((slot, image)) = bucket.try_take_reusable(width, height, format) {
        metrics.inc(&metrics.hits);
        return Ok(Some(Leased {
            slot,
            image,
            source: Source::Reused,
        }));
    }

    if let Some(leased) = allocate_into(bucket, format, metrics, max_cache_bytes)? {
        return Ok(Some(leased));
    }

    // Another bucket may have freed budget since the first attempt.
    let pruned = bucket.prune();
    if let Some(leased) = allocate_into(bucket, format, metrics, max_cache_bytes)? {
        return Ok(Some(leased));
    }

    debug!(
        "Pool miss for {}x{} in class {} ({} occupied of {}, {} pruned, {} of {} bytes)",
        width,
        height,
        bucket.class(),
        bucket.occupied_count(),
        bucket.max_copies(),
        pruned,
        metrics.allocated_bytes(),
        max_cache_bytes
    );
    metrics.inc(&metrics.pool_misses);
    Ok(None)
}

/// Allocate a class-sized buffer into a new slot if capacity and budget allow.
fn allocate_into(
    bucket: &mut Bucket,
    format: PixelFormat,
    metrics: &PoolMetrics,
    max_cache_bytes: u64,
) -> Result<Option<Leased>> {
    if !bucket.has_capacity() {
        return Ok(None);
    }

    // A class too large to even measure can never fit the budget.
    let class = bucket.class();
    let Some(bytes) = class.byte_size(format) else {
        return Ok(None);
    };

    if !metrics.try_charge(bytes, max_cache_bytes) {
        return Ok(None);
    }

    let image = match Image::new(class.width(), class.height(), format) {
        Ok(image) => image,
        Err(e) => {
            metrics.uncharge(bytes);
            return Err(e);
        }
    };

    match bucket.insert_leased(bytes) {
        Some(slot) => {
            metrics.inc(&metrics.pooled_allocations);
            Ok(Some(Leased {
                slot,
                image,
                source: Source::Allocated,
            }))
        }
        None => {
            metrics.uncharge(bytes);
            Ok(None)
        }
    }
}
