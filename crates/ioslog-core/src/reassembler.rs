//! Multiline syslog message reassembly.
//!
//! The system log prints one header line per logical message and emits any
//! continuation lines bare, so a multiline `print()` arrives as a header
//! followed by raw text. This module tracks the header of the app we care
//! about, strips it, and passes continuation lines through until another
//! process's header shows up.
//!
//! Exclusive to the System-Log source; the other sources emit one physical
//! line per logical line.

use regex::Regex;
use std::sync::OnceLock;

/// Looser pattern matching any app's syslog header, e.g.
/// `installd(libsystem_info.dylib)[46] <Notice>: `.
///
/// Load-bearing: it decides when a multiline block ends, so it must match
/// real process-name conventions (optional parenthesized library suffix,
/// bracketed pid, angle-bracketed level).
fn any_header_regex() -> &'static Regex {
    static ANY_HEADER: OnceLock<Regex> = OnceLock::new();
    ANY_HEADER.get_or_init(|| {
        Regex::new(r"^\s*\S+(\([^)]*\))?\[\d+\] <[A-Za-z]+>: ").expect("valid any-header regex")
    })
}

/// Reassembler states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for a header from the tracked app.
    Idle,
    /// Inside a (possibly multiline) message from the tracked app.
    Printing,
}

/// Per-source stateful line handler grouping continuation lines of a
/// multiline log message with their header line.
///
/// Feed physical lines in arrival order; each call yields at most one
/// logical line. Lines from other processes are dropped silently — an
/// unparseable shape is "not from the tracked app", never an error.
#[derive(Debug)]
pub struct SyslogReassembler {
    tracked_header: Regex,
    state: State,
}

impl SyslogReassembler {
    /// Create a reassembler tracking `app_name`.
    ///
    /// The default iOS runner process name is always tracked alongside the
    /// given app name, since the process tag depends on how the app was
    /// built.
    pub fn new(app_name: &str) -> Self {
        let pattern = format!(
            r"^\s*(?:Runner|{})(\([^)]*\))?\[\d+\] <[A-Za-z]+>: ",
            regex::escape(app_name)
        );
        Self {
            tracked_header: Regex::new(&pattern).expect("valid tracked-header regex"),
            state: State::Idle,
        }
    }

    /// Feed one physical line; returns the logical line to emit, if any.
    pub fn feed(&mut self, line: &str) -> Option<String> {
        // A tracked header always (re)starts a message, ending any prior
        // multiline block.
        if let Some(m) = self.tracked_header.find(line) {
            self.state = State::Printing;
            return Some(line[m.end()..].to_string());
        }

        match self.state {
            State::Printing => {
                if any_header_regex().is_match(line) {
                    // Some other process's header: the tracked message is
                    // over and this line is not ours.
                    self.state = State::Idle;
                    None
                } else {
                    Some(line.to_string())
                }
            }
            State::Idle => None,
        }
    }
}
