//! # ioslog-reader - Deduplicating Device Log Aggregation
//!
//! Multiplexes several independently-failing log sources — the OS syslog
//! relay, an attached native debugger, the managed runtime's event channel,
//! and the vendor's unified remote console — into one ordered, duplicate-free
//! broadcast stream of text lines.
//!
//! Depends on [`ioslog_core`] for the pure pieces (vis decoding, source
//! classification, multiline reassembly) and on tokio for the runtime.
//!
//! ## Public API
//!
//! ### Session (`session`)
//! - [`AggregatorSession`] - One app run: lazy source start on first
//!   subscription, dedup across primary/fallback, idempotent dispose
//! - [`SessionConfig`] - Explicit device state plus capture commands
//! - [`LogStreamError`] / [`LogResult`] - Broadcast item types
//!
//! ### Sources (`sources`)
//! - [`ProcessCommand`] / [`ProcessSource`] - Process-backed capture
//! - [`AttachedSlot`] / [`ProvidedStream`] - Two-phase debugger/runtime attach
//! - [`sources::runtime::extract_log_text()`] - VM-Service event extraction
//!
//! ### Admission (`dedup`)
//! - [`DedupFilter`] - The pure per-line admit policy
//!
//! ## Usage
//!
//! ```no_run
//! use ioslog_core::SourceQuery;
//! use ioslog_reader::{AggregatorSession, SessionConfig};
//!
//! # async fn demo() {
//! let query = SourceQuery { os_major_version: 17, ..SourceQuery::default() };
//! let session = AggregatorSession::new(SessionConfig::new("Runner", query));
//! let mut lines = session.log_lines(); // starts the selected sources
//! while let Ok(Ok(line)) = lines.recv().await {
//!     println!("{}", line.text);
//! }
//! # }
//! ```

pub mod dedup;
pub mod session;
pub mod sources;

// Public API re-exports
pub use dedup::DedupFilter;
pub use session::{AggregatorSession, LogResult, LogStreamError, SessionConfig};
pub use sources::{AttachedSlot, ProcessCommand, ProcessSource, ProvidedStream, SourceEvent};

/// Re-exported from `ioslog_core` for convenience. Canonical import:
/// `ioslog_core::SourceQuery`.
pub use ioslog_core::{classify, LogLine, SourceKind, SourceQuery, SourceSelection};
