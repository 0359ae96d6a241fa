//! Domain types for the aggregated device log stream

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix Flutter prepends to application `print()` output on iOS.
///
/// Lines carrying this marker are the ones worth de-duplicating across
/// sources; everything else is OS or tooling noise that only the primary
/// source is trusted for.
pub const APP_LOG_MARKER: &str = "flutter:";

/// Check whether a line is application output (carries the `flutter:` marker).
pub fn is_app_line(line: &str) -> bool {
    line.starts_with(APP_LOG_MARKER)
}

/// Strip the `flutter: ` marker from an application line, if present.
///
/// Returns `None` for lines that do not carry the marker.
pub fn strip_marker(line: &str) -> Option<&str> {
    line.strip_prefix(APP_LOG_MARKER).map(str::trim_start)
}

// ─────────────────────────────────────────────────────────
// Source identity
// ─────────────────────────────────────────────────────────

/// The backend a log line came from.
///
/// Fixed, closed set. `RemoteConsole` is only used for devices reachable
/// through the vendor's managed transport with a new enough toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    /// The OS system log daemon (idevicesyslog-style capture process).
    SystemLog,
    /// An attached native debugger (lldb-style) relaying app stdout.
    NativeDebugger,
    /// The Dart VM's own event/log channel.
    ManagedRuntime,
    /// The vendor's unified remote console for managed devices.
    RemoteConsole,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::SystemLog => "syslog",
            SourceKind::NativeDebugger => "debugger",
            SourceKind::ManagedRuntime => "runtime",
            SourceKind::RemoteConsole => "remote-console",
        };
        f.write_str(name)
    }
}

// ─────────────────────────────────────────────────────────
// Log lines
// ─────────────────────────────────────────────────────────

/// A single decoded unit of output: text plus the source that produced it.
///
/// Ephemeral — emitted once on the broadcast stream and forgotten, except
/// for the duplicate-suppression window kept by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    pub text: String,
    pub source: SourceKind,
}

impl LogLine {
    pub fn new(source: SourceKind, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source,
        }
    }

    /// Whether this line is application output (see [`APP_LOG_MARKER`]).
    pub fn is_app_line(&self) -> bool {
        is_app_line(&self.text)
    }
}

// ─────────────────────────────────────────────────────────
// Source selection
// ─────────────────────────────────────────────────────────

/// Which role a running source plays in the current selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    Primary,
    Fallback,
}

/// The primary/fallback pair chosen by the classifier.
///
/// Cheap to re-derive: this is a pure function of current device state, so
/// callers query it fresh rather than caching it (debugger attachment and
/// runtime connection change over a session's lifetime).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSelection {
    pub primary: SourceKind,
    pub fallback: Option<SourceKind>,
}

impl SourceSelection {
    /// A selection with both a primary and a fallback source.
    pub fn with_fallback(primary: SourceKind, fallback: SourceKind) -> Self {
        Self {
            primary,
            fallback: Some(fallback),
        }
    }

    /// A selection with no fallback (single trusted source, no dedup needed).
    pub fn only(primary: SourceKind) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }

    /// Whether `kind` participates in this selection at all.
    pub fn includes(&self, kind: SourceKind) -> bool {
        self.role_of(kind).is_some()
    }

    /// The role `kind` plays in this selection, if any.
    pub fn role_of(&self, kind: SourceKind) -> Option<SourceRole> {
        if kind == self.primary {
            Some(SourceRole::Primary)
        } else if self.fallback == Some(kind) {
            Some(SourceRole::Fallback)
        } else {
            None
        }
    }
}

impl fmt::Display for SourceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fallback {
            Some(fb) => write!(f, "{} (fallback {})", self.primary, fb),
            None => write!(f, "{} (no fallback)", self.primary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_app_line() {
        assert!(is_app_line("flutter: hello"));
        assert!(is_app_line("flutter:no space"));
        assert!(!is_app_line(" flutter: leading space"));
        assert!(!is_app_line("Runner[123] <Notice>: flutter: hello"));
    }

    #[test]
    fn test_strip_marker() {
        assert_eq!(strip_marker("flutter: hello"), Some("hello"));
        assert_eq!(strip_marker("flutter:hello"), Some("hello"));
        assert_eq!(strip_marker("syslog noise"), None);
    }

    #[test]
    fn test_log_line_is_app_line() {
        let line = LogLine::new(SourceKind::SystemLog, "flutter: hi");
        assert!(line.is_app_line());

        let noise = LogLine::new(SourceKind::SystemLog, "kernel: wifi up");
        assert!(!noise.is_app_line());
    }

    #[test]
    fn test_selection_roles() {
        let sel =
            SourceSelection::with_fallback(SourceKind::NativeDebugger, SourceKind::ManagedRuntime);
        assert_eq!(
            sel.role_of(SourceKind::NativeDebugger),
            Some(SourceRole::Primary)
        );
        assert_eq!(
            sel.role_of(SourceKind::ManagedRuntime),
            Some(SourceRole::Fallback)
        );
        assert_eq!(sel.role_of(SourceKind::SystemLog), None);
        assert!(sel.includes(SourceKind::ManagedRuntime));
        assert!(!sel.includes(SourceKind::RemoteConsole));
    }

    #[test]
    fn test_selection_without_fallback() {
        let sel = SourceSelection::only(SourceKind::SystemLog);
        assert_eq!(sel.fallback, None);
        assert_eq!(sel.role_of(SourceKind::SystemLog), Some(SourceRole::Primary));
        assert!(!sel.includes(SourceKind::ManagedRuntime));
    }

    #[test]
    fn test_source_kind_display() {
        assert_eq!(SourceKind::SystemLog.to_string(), "syslog");
        assert_eq!(SourceKind::RemoteConsole.to_string(), "remote-console");
    }
}
