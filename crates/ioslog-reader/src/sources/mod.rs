//! Log line sources.
//!
//! Every source is an independently-failing producer of decoded text lines
//! that feeds the session's single admission channel. Two shapes exist:
//!
//! - [`ProcessSource`] — owns an OS capture process (System-Log and
//!   Remote-Console variants); lines are read from its stdout.
//! - [`AttachedSlot`] — a placeholder for a connection that does not exist
//!   yet at session start (Native-Debugger and Managed-Runtime variants);
//!   the collaborator hands over a live line stream later.

mod attach;
mod process;
pub mod runtime;

pub use attach::{AttachedSlot, ProvidedStream};
pub use process::{ProcessCommand, ProcessSource};

use ioslog_core::SourceKind;
use tokio::sync::mpsc;

/// Lifecycle events a source feeds into the admission channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// A decoded logical line.
    Line(String),
    /// The source failed mid-stream. Fatal to the aggregated view.
    Error(String),
    /// Clean end of stream; the other sources keep running.
    Done,
}

/// Sender half of the admission channel, shared by all sources.
pub type EventTx = mpsc::Sender<(SourceKind, SourceEvent)>;
