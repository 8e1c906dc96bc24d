//! Size-classed image pooling.
//!
//! Requests are rounded up to the first declared size class that fits and
//! served from that class's bucket. Buffers go back to their bucket when the
//! handle is dropped or released, and a global byte budget caps what the
//! pool keeps alive.

pub mod bucket;
mod handle;
pub mod helper;
mod image;
mod image_pool;
mod policy;

pub use handle::{PooledImage, ReleaseCallback};
pub use image::Image;
pub use image_pool::ImagePool;
pub use policy::PoolPolicy;
