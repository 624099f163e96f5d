//! imgrelay Core - Foundational Types
//!
//! Error taxonomy, configuration, progress reporting and image
//! classification records shared by the runtime engine and the CLI.

pub mod classification;
pub mod config;
pub mod error;
pub mod progress;

// Re-export commonly used types
pub use classification::{ClassificationCache, ImageInfo, InstallationRecord};
pub use config::{LogLevel, RelayConfig};
pub use error::{RelayError, Result};
pub use progress::{ImageStatus, MemorySink, NullSink, ProgressReport, ProgressSink, WriterSink};

/// imgrelay version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
