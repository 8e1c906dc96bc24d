mod format;
mod size_class;

pub use format::PixelFormat;
pub use size_class::{byte_size, SizeClass};
