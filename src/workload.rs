//! Producer/consumer soak workload.
//!
//! Producers acquire images of varying sizes and hand them to a consumer
//! thread over a bounded channel. The consumer releases them, so every
//! pooled buffer travels back to its bucket from a different thread than
//! the one that acquired it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use crate::metrics::PoolStats;
use crate::pool::{ImagePool, PooledImage};
use crate::types::PixelFormat;

/// Every Nth request is larger than any size class.
const OVERSIZE_EVERY: usize = 16;

/// Workload shape.
#[derive(Debug, Clone)]
pub struct Workload {
    pub producers: usize,
    pub iterations: usize,
    pub max_in_flight: usize,
    pub dispose_every: usize,
    pub format: PixelFormat,
}

impl From<&Config> for Workload {
    fn from(config: &Config) -> Self {
        Self {
            producers: config.producers.max(1),
            iterations: config.iterations,
            max_in_flight: config.max_in_flight.max(1),
            dispose_every: config.dispose_every,
            format: config.format,
        }
    }
}

/// Outcome of a workload run.
#[derive(Debug, Clone)]
pub struct WorkloadReport {
    pub acquired: u64,
    pub pooled: u64,
    pub released: u64,
    pub elapsed: Duration,
    pub stats: PoolStats,
}

impl WorkloadReport {
    /// Acquires per second over the whole run
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.acquired as f64 / secs
        }
    }
}

/// Pick the request size for a producer's `n`th acquire.
///
/// Walks the declared classes round-robin and shaves a few pixels off each
/// so that requests land inside, not exactly on, a class.
fn request_size(pool: &ImagePool, producer: usize, n: usize) -> (u32, u32) {
    let classes = pool.policy().size_classes();
    let Some(largest) = classes.iter().max_by_key(|c| (c.width(), c.height())) else {
        return (64, 64);
    };

    if n % OVERSIZE_EVERY == OVERSIZE_EVERY - 1 {
        return (largest.width().saturating_add(1), largest.height());
    }

    let class = classes[(producer + n) % classes.len()];
    let shave = ((n * 31 + producer * 7) % 16) as u32;
    (
        class.width().saturating_sub(shave).max(1),
        class.height().saturating_sub(shave / 2).max(1),
    )
}

/// Run the workload to completion on dedicated threads.
pub fn run_workload(pool: Arc<ImagePool>, workload: &Workload) -> Result<WorkloadReport> {
    let start = Instant::now();
    let (tx, rx) = channel::bounded::<PooledImage>(workload.max_in_flight);
    let released = Arc::new(AtomicU64::new(0));

    let consumer = {
        let released = released.clone();
        thread::spawn(move || {
            for mut img in rx {
                img.release();
                released.fetch_add(1, Ordering::Relaxed);
            }
        })
    };

    let producers: Vec<_> = (0..workload.producers)
        .map(|producer| {
            let pool = pool.clone();
            let tx = tx.clone();
            let workload = workload.clone();
            thread::spawn(move || -> Result<(u64, u64)> {
                let mut acquired = 0;
                let mut pooled = 0;

                for n in 0..workload.iterations {
                    let (width, height) = request_size(&pool, producer, n);
                    let mut img = pool.acquire(width, height, workload.format)?;
                    if let Some(pixels) = img.image_mut().map(|i| i.pixels_mut()) {
                        if let Some(first) = pixels.first_mut() {
                            *first = producer as u8;
                        }
                    }

                    acquired += 1;
                    if img.is_pooled() {
                        pooled += 1;
                    }
                    if tx.send(img).is_err() {
                        warn!("Consumer hung up, producer {} stopping", producer);
                        break;
                    }

                    if producer == 0
                        && workload.dispose_every > 0
                        && (n + 1) % workload.dispose_every == 0
                    {
                        pool.dispose();
                    }
                }

                debug!("Producer {} done: {} acquired, {} pooled", producer, acquired, pooled);
                Ok((acquired, pooled))
            })
        })
        .collect();
    drop(tx);

    let mut acquired = 0;
    let mut pooled = 0;
    let mut first_err = None;
    for handle in producers {
        match handle.join() {
            Ok(Ok((a, p))) => {
                acquired += a;
                pooled += p;
            }
            Ok(Err(e)) => {
                first_err.get_or_insert(e);
            }
            Err(_) => warn!("Producer thread panicked"),
        }
    }
    if consumer.join().is_err() {
        warn!("Consumer thread panicked");
    }
    if let Some(e) = first_err {
        return Err(e);
    }

    Ok(WorkloadReport {
        acquired,
        pooled,
        released: released.load(Ordering::Relaxed),
        elapsed: start.elapsed(),
        stats: pool.stats(),
    })
}
