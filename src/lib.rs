pub mod config;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod types;
pub mod workload;

pub use config::Config;
pub use error::{Error, Result};
pub use metrics::PoolStats;
pub use pool::{Image, ImagePool, PoolPolicy, PooledImage};
pub use types::{PixelFormat, SizeClass};
