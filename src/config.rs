use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use clap::Parser;

use crate::error::{Error, Result};
use crate::pool::PoolPolicy;
use crate::types::{PixelFormat, SizeClass};

/// Copies kept per class when a spec omits `:copies`.
const DEFAULT_COPIES: u32 = 1;

/// A size class together with its copy limit, written `WxH[:copies]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClassSpec {
    pub class: SizeClass,
    pub max_copies: u32,
}

impl FromStr for SizeClassSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (class, copies) = match s.trim().split_once(':') {
            Some((class, copies)) => {
                let copies = copies.trim().parse().map_err(|_| {
                    Error::InvalidArgument(format!("invalid copy count in {:?}", s))
                })?;
                (class, copies)
            }
            None => (s, DEFAULT_COPIES),
        };

        Ok(Self {
            class: class.parse()?,
            max_copies: copies,
        })
    }
}

impl fmt::Display for SizeClassSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.max_copies)
    }
}

/// image-pool - soak driver for the size-classed image pool
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Size classes in selection order (comma-separated WxH[:copies])
    #[arg(
        long = "size-class",
        value_delimiter = ',',
        default_value = "256x256:4,512x512:2,1024x1024:1"
    )]
    pub size_classes: Vec<SizeClassSpec>,

    /// Global byte budget in MiB
    #[arg(long, default_value = "64")]
    pub max_cache_mb: u64,

    /// Pixel format requested by the workload
    #[arg(long, default_value = "argb8888")]
    pub format: PixelFormat,

    // === Workload settings ===

    /// Producer threads acquiring images
    #[arg(short, long, default_value = "4")]
    pub producers: usize,

    /// Acquires per producer
    #[arg(short, long, default_value = "10000")]
    pub iterations: usize,

    /// Images queued for release before producers block
    #[arg(long, default_value = "16")]
    pub max_in_flight: usize,

    /// Dispose the pool every N acquires per producer (0 = never)
    #[arg(long, default_value = "0")]
    pub dispose_every: usize,

    /// Stats log interval in milliseconds
    #[arg(long, default_value = "1000")]
    pub stats_interval_ms: u64,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    pub metrics_bind: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Parse configuration from command line arguments
    pub fn parse_args() -> Self {
        Config::parse()
    }

    /// Byte budget
    pub fn max_cache_bytes(&self) -> u64 {
        self.max_cache_mb.saturating_mul(1024 * 1024)
    }

    /// Build the pool policy described by this configuration
    pub fn policy(&self) -> Result<PoolPolicy> {
        PoolPolicy::new(
            self.size_classes
                .iter()
                .map(|s| (s.class.width(), s.class.height())),
            self.size_classes.iter().map(|s| s.max_copies),
            self.max_cache_bytes(),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            size_classes: vec![
                SizeClassSpec {
                    class: SizeClass::new(256, 256),
                    max_copies: 4,
                },
                SizeClassSpec {
                    class: SizeClass::new(512, 512),
                    max_copies: 2,
                },
                SizeClassSpec {
                    class: SizeClass::new(1024, 1024),
                    max_copies: 1,
                },
            ],
            max_cache_mb: 64,
            format: PixelFormat::Argb8888,
            producers: 4,
            iterations: 10_000,
            max_in_flight: 16,
            dispose_every: 0,
            stats_interval_ms: 1000,
            metrics_bind: None,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spec() {
        let spec: SizeClassSpec = "800x600:3".parse().unwrap();
        assert_eq!(spec.class, SizeClass::new(800, 600));
        assert_eq!(spec.max_copies, 3);

        let spec: SizeClassSpec = "64x64".parse().unwrap();
        assert_eq!(spec.max_copies, DEFAULT_COPIES);
        assert_eq!(spec.to_string(), "64x64:1");

        assert!("64x64:many".parse::<SizeClassSpec>().is_err());
        assert!("64:2".parse::<SizeClassSpec>().is_err());
    }

    #[test]
    fn test_cli_matches_default() {
        let parsed = Config::try_parse_from(["image-pool"]).unwrap();
        let default = Config::default();
        assert_eq!(parsed.size_classes, default.size_classes);
        assert_eq!(parsed.max_cache_bytes(), 64 * 1024 * 1024);
        assert_eq!(parsed.format, default.format);
        assert_eq!(parsed.metrics_bind, None);
    }

    #[test]
    fn test_cli_overrides() {
        let parsed = Config::try_parse_from([
            "image-pool",
            "--size-class",
            "32x32:8,800x800",
            "--max-cache-mb",
            "2",
            "--format",
            "alpha8",
            "--metrics-bind",
            "127.0.0.1:9100",
        ])
        .unwrap();

        let policy = parsed.policy().unwrap();
        assert_eq!(
            policy.size_classes(),
            &[SizeClass::new(32, 32), SizeClass::new(800, 800)]
        );
        assert_eq!(policy.max_copies(0), 8);
        assert_eq!(policy.max_copies(1), 1);
        assert_eq!(policy.max_cache_bytes(), 2 * 1024 * 1024);
        assert_eq!(parsed.format, PixelFormat::Alpha8);
        assert!(parsed.metrics_bind.is_some());
    }

    #[test]
    fn test_cli_rejects_bad_class() {
        assert!(Config::try_parse_from(["image-pool", "--size-class", "wide"]).is_err());
    }
}
