//! Pool counters and their reporting formats.
//!
//! Counters are lock-free atomics owned by a single pool. Readers take a
//! [`PoolStats`] snapshot which may be slightly stale but never blocks the
//! acquire/release paths.

mod server;

pub use server::run_metrics_server;

use std::sync::atomic::{AtomicU64, Ordering};

/// Relaxed ordering for counters (eventual visibility is fine for metrics).
const RELAXED: Ordering = Ordering::Relaxed;

/// Counters for one pool.
///
/// `allocated_bytes` is the exception: it doubles as the budget ledger, so
/// charges go through a compare-and-swap loop instead of a blind add.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Bytes held by occupied slots (resident or on loan).
    allocated_bytes: AtomicU64,

    /// Requests no declared size class could hold
    pub too_big_for_pool: AtomicU64,

    /// Requests served from a resident buffer
    pub hits: AtomicU64,
    /// New pooled buffers allocated into a slot
    pub pooled_allocations: AtomicU64,
    /// In-class requests turned away for capacity or budget
    pub pool_misses: AtomicU64,
    /// Buffers allocated outside any bucket (too big or missed)
    pub unpooled_allocations: AtomicU64,

    /// Buffers put back into their slot
    pub returns: AtomicU64,
    /// Releases that arrived after a dispose
    pub stale_releases: AtomicU64,
    /// Pooled buffers taken out of the pool for good
    pub detached: AtomicU64,
    /// Calls to dispose
    pub disposes: AtomicU64,
}

impl PoolMetrics {
    /// Create a new metrics instance with all counters at zero.
    pub const fn new() -> Self {
        Self {
            allocated_bytes: AtomicU64::new(0),
            too_big_for_pool: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            pooled_allocations: AtomicU64::new(0),
            pool_misses: AtomicU64::new(0),
            unpooled_allocations: AtomicU64::new(0),
            returns: AtomicU64::new(0),
            stale_releases: AtomicU64::new(0),
            detached: AtomicU64::new(0),
            disposes: AtomicU64::new(0),
        }
    }

    /// Increment a counter.
    #[inline]
    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, RELAXED);
    }

    /// Get counter value.
    #[inline]
    pub fn get(&self, counter: &AtomicU64) -> u64 {
        counter.load(RELAXED)
    }

    /// Current bytes charged against the budget.
    #[inline]
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes.load(Ordering::Acquire)
    }

    /// Charge `bytes` against the budget if it stays within `limit`.
    ///
    /// Returns `false` and leaves the ledger untouched otherwise.
    pub fn try_charge(&self, bytes: u64, limit: u64) -> bool {
        self.allocated_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(bytes).filter(|&next| next <= limit)
            })
            .is_ok()
    }

    /// Give `bytes` back to the budget.
    #[inline]
    pub fn uncharge(&self, bytes: u64) {
        // Saturate rather than wrap if a caller ever double-uncharges.
        let _ = self
            .allocated_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    /// Zero the budget ledger. Only valid while every bucket is locked.
    #[inline]
    pub(crate) fn reset_allocated(&self) {
        self.allocated_bytes.store(0, Ordering::Release);
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self, epoch: u64, max_cache_bytes: u64) -> PoolStats {
        PoolStats {
            allocated_bytes: self.allocated_bytes(),
            too_big_for_pool_count: self.too_big_for_pool.load(RELAXED),
            hits: self.hits.load(RELAXED),
            pooled_allocations: self.pooled_allocations.load(RELAXED),
            pool_misses: self.pool_misses.load(RELAXED),
            unpooled_allocations: self.unpooled_allocations.load(RELAXED),
            returns: self.returns.load(RELAXED),
            stale_releases: self.stale_releases.load(RELAXED),
            detached: self.detached.load(RELAXED),
            disposes: self.disposes.load(RELAXED),
            epoch,
            max_cache_bytes,
        }
    }
}

/// Point-in-time snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub allocated_bytes: u64,
    pub too_big_for_pool_count: u64,

    pub hits: u64,
    pub pooled_allocations: u64,
    pub pool_misses: u64,
    pub unpooled_allocations: u64,

    pub returns: u64,
    pub stale_releases: u64,
    pub detached: u64,
    pub disposes: u64,

    pub epoch: u64,
    pub max_cache_bytes: u64,
}

impl PoolStats {
    /// Fraction of acquires served from a recycled buffer (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.pooled_allocations + self.unpooled_allocations;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Budget utilization (0.0 to 1.0).
    pub fn utilization(&self) -> f64 {
        if self.max_cache_bytes == 0 {
            0.0
        } else {
            self.allocated_bytes as f64 / self.max_cache_bytes as f64
        }
    }

    /// Format as `key:value` lines, grouped in sections.
    pub fn to_info_string(&self) -> String {
        let mut out = String::with_capacity(512);

        out.push_str("# Memory\r\n");
        out.push_str(&format!("allocated_bytes:{}\r\n", self.allocated_bytes));
        out.push_str(&format!("max_cache_bytes:{}\r\n", self.max_cache_bytes));
        out.push_str(&format!("utilization:{:.4}\r\n", self.utilization()));
        out.push_str("\r\n");

        out.push_str("# Acquire\r\n");
        out.push_str(&format!("hits:{}\r\n", self.hits));
        out.push_str(&format!("pooled_allocations:{}\r\n", self.pooled_allocations));
        out.push_str(&format!("pool_misses:{}\r\n", self.pool_misses));
        out.push_str(&format!(
            "too_big_for_pool_count:{}\r\n",
            self.too_big_for_pool_count
        ));
        out.push_str(&format!(
            "unpooled_allocations:{}\r\n",
            self.unpooled_allocations
        ));
        out.push_str(&format!("hit_rate:{:.4}\r\n", self.hit_rate()));
        out.push_str("\r\n");

        out.push_str("# Release\r\n");
        out.push_str(&format!("returns:{}\r\n", self.returns));
        out.push_str(&format!("stale_releases:{}\r\n", self.stale_releases));
        out.push_str(&format!("detached:{}\r\n", self.detached));
        out.push_str(&format!("disposes:{}\r\n", self.disposes));
        out.push_str(&format!("epoch:{}\r\n", self.epoch));
        out.push_str("\r\n");

        out
    }

    /// Format in the Prometheus text exposition format.
    pub fn to_prometheus_string(&self) -> String {
        let mut out = String::with_capacity(1024);

        let gauges = [
            ("image_pool_allocated_bytes", "Bytes held by pooled buffers", self.allocated_bytes),
            ("image_pool_max_cache_bytes", "Configured byte budget", self.max_cache_bytes),
            ("image_pool_epoch", "Current pool generation", self.epoch),
        ];
        for (name, help, value) in gauges {
            out.push_str(&format!("# HELP {} {}\n", name, help));
            out.push_str(&format!("# TYPE {} gauge\n", name));
            out.push_str(&format!("{} {}\n", name, value));
        }

        let counters = [
            ("image_pool_hits_total", "Acquires served from a recycled buffer", self.hits),
            ("image_pool_pooled_allocations_total", "Buffers allocated into a slot", self.pooled_allocations),
            ("image_pool_misses_total", "In-class acquires refused for capacity or budget", self.pool_misses),
            ("image_pool_too_big_total", "Acquires matching no size class", self.too_big_for_pool_count),
            ("image_pool_unpooled_allocations_total", "Buffers allocated outside the pool", self.unpooled_allocations),
            ("image_pool_returns_total", "Buffers returned to their slot", self.returns),
            ("image_pool_stale_releases_total", "Releases from a disposed epoch", self.stale_releases),
            ("image_pool_detached_total", "Pooled buffers detached by callers", self.detached),
            ("image_pool_disposes_total", "Pool disposals", self.disposes),
        ];
        for (name, help, value) in counters {
            out.push_str(&format!("# HELP {} {}\n", name, help));
            out.push_str(&format!("# TYPE {} counter\n", name));
            out.push_str(&format!("{} {}\n", name, value));
        }

        out
    }
}
