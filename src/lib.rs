//! arnscan resolves glob-style resource locators into live cloud resources.
//!
//! ```ignore
//! use arnscan::{Config, Scanner};
//! use futures::StreamExt;
//!
//! let scanner = Scanner::from_config(&Config::load()?)?;
//! let mut scan = scanner.scan_str("arn:aws:sqs:us-east-1:*:queue/*")?;
//! while let Some(queue) = scan.next().await {
//!     println!("{}", queue?.arn());
//! }
//! ```

pub mod aws;
pub mod config;
pub mod dump;
pub mod error;
pub mod fieldpath;
pub mod locator;
pub mod matcher;
pub mod resource;

/// Version injected at compile time via ARNSCAN_VERSION env var (set by CI/CD),
/// or the package version for local builds.
pub const VERSION: &str = match option_env!("ARNSCAN_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};

pub use config::Config;
pub use error::{ApiError, ErrorClass, ScanError};
pub use fieldpath::FieldPath;
pub use locator::{Component, Locator, Scan, ScanOptions, Scanner};
pub use resource::{MetricQuery, Registry, ResourceInstance, TagMap, TagValue};
