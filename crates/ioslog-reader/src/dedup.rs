//! Per-line admission policy for the deduplicating aggregator.
//!
//! Primary and fallback sources race: either may surface an application
//! line first, and there is no cross-source ordering to lean on, so
//! suppression is by content. Fallback lines are emitted optimistically
//! and remembered; when the primary later produces identical text, that
//! duplicate is dropped. Once the primary has proven itself by producing
//! any application line, the fallback is silenced entirely.

use std::collections::VecDeque;

use ioslog_core::prelude::*;
use ioslog_core::types::{is_app_line, SourceKind, SourceRole, SourceSelection};

/// Admission state machine. Mutated only from the session's single
/// admission task, so it needs no locking of its own.
#[derive(Debug, Default)]
pub struct DedupFilter {
    /// Set once the primary source has produced an application line.
    primary_saw_app_line: bool,
    /// Application lines the fallback has emitted that the primary has not
    /// yet matched. FIFO uniqueness buffer: grows only while the primary is
    /// unproven, shrinks only by removal-on-match, never by expiry.
    pending_fallback_lines: VecDeque<String>,
}

impl DedupFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `line` from `source` reaches the output stream under
    /// the given selection. `true` means emit.
    pub fn admit(&mut self, selection: &SourceSelection, source: SourceKind, line: &str) -> bool {
        // Single trusted source: nothing to deduplicate. The line must
        // still come from that source; nothing else runs under this
        // selection, so anything else here is a stale producer.
        if selection.fallback.is_none() {
            return source == selection.primary;
        }

        match selection.role_of(source) {
            Some(SourceRole::Primary) => {
                if is_app_line(line) && !self.primary_saw_app_line {
                    debug!("{} confirmed live, fallback will be silenced", source);
                    self.primary_saw_app_line = true;
                }
                if let Some(pos) = self
                    .pending_fallback_lines
                    .iter()
                    .position(|pending| pending == line)
                {
                    // The fallback beat us to this line; suppress the dup.
                    self.pending_fallback_lines.remove(pos);
                    trace!("suppressed duplicate from {}: {}", source, line);
                    return false;
                }
                true
            }
            Some(SourceRole::Fallback) => {
                if self.primary_saw_app_line {
                    trace!("fallback {} silenced: {}", source, line);
                    return false;
                }
                if !is_app_line(line) {
                    // Fallback noise never matches primary text anyway.
                    return false;
                }
                if !self.pending_fallback_lines.iter().any(|p| p == line) {
                    self.pending_fallback_lines.push_back(line.to_string());
                }
                true
            }
            // Not part of the current selection.
            None => false,
        }
    }

    /// Whether the primary source has produced an application line yet.
    pub fn primary_confirmed(&self) -> bool {
        self.primary_saw_app_line
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending_fallback_lines.len()
    }
}
