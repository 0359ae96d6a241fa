//! # ioslog-core - Core Domain Types
//!
//! Foundation crate for the unified iOS device log aggregator. Provides the
//! pure pieces of the pipeline: domain types, the vis escape decoder, source
//! classification, multiline syslog reassembly, error handling, and logging
//! setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on
//! external crates (serde, thiserror, regex, the tracing stack).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`LogLine`] - A decoded log line tagged with its source
//! - [`SourceKind`] - Origin of a line (SystemLog, NativeDebugger, ManagedRuntime, RemoteConsole)
//! - [`SourceSelection`] - A primary/fallback source pair
//! - [`APP_LOG_MARKER`] - The `flutter:` application-output marker
//!
//! ### Vis Decoding (`vis`)
//! - [`vis::decode()`] - Resolve 7-bit-safe syslog escapes back to UTF-8
//!
//! ### Source Classification (`classifier`)
//! - [`SourceQuery`] - Explicit classification inputs (no ambient globals)
//! - [`classify()`] - Pure primary/fallback decision table
//!
//! ### Multiline Reassembly (`reassembler`)
//! - [`SyslogReassembler`] - Idle/Printing state machine grouping
//!   continuation lines under their header
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Setup-time error enum with recoverable classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use ioslog_core::prelude::*;
//! ```

pub mod classifier;
pub mod error;
pub mod logging;
pub mod reassembler;
pub mod types;
pub mod vis;

/// Prelude for common imports used throughout all ioslog crates
pub mod prelude {
    pub use super::error::{Error, Result};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use classifier::{classify, SourceQuery, CI_DEBUGGER_OS_MAJOR, UNIFIED_LOGGING_OS_MAJOR};
pub use error::{Error, Result};
pub use reassembler::SyslogReassembler;
pub use types::{
    is_app_line, strip_marker, LogLine, SourceKind, SourceRole, SourceSelection, APP_LOG_MARKER,
};
