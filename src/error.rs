use std::collections::TryReserveError;
use std::fmt;
use std::io;

/// Unified error type for image pool operations
#[derive(Debug)]
pub enum Error {
    /// The backing pixel buffer could not be allocated
    Alloc(TryReserveError),

    /// Requested dimensions overflow the addressable byte size
    SizeOverflow { width: u32, height: u32 },

    /// Size classes and per-class copy limits do not line up
    InvalidPolicy(String),

    /// Invalid argument type or value (configuration parsing)
    InvalidArgument(String),

    /// I/O error from the metrics endpoint
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Alloc(e) => write!(f, "Allocation failed: {}", e),
            Error::SizeOverflow { width, height } => {
                write!(f, "Image size overflow: {}x{}", width, height)
            }
            Error::InvalidPolicy(msg) => write!(f, "Invalid pool policy: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Alloc(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TryReserveError> for Error {
    fn from(e: TryReserveError) -> Self {
        Error::Alloc(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Result type alias for image pool operations
pub type Result<T> = std::result::Result<T, Error>;
