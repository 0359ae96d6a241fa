//! Log source selection.
//!
//! Decides, from current device and session state, which log source is
//! authoritative (primary) and which one runs as a speculative fallback.
//! The decision is a pure function of its inputs and is cheap, so callers
//! re-evaluate it on every query instead of caching: debugger attachment
//! and runtime connection change while a session is running.

use serde::{Deserialize, Serialize};

use crate::types::{SourceKind, SourceSelection};

/// First OS major version whose unified logging no longer reaches the
/// legacy syslog relay for app output.
pub const UNIFIED_LOGGING_OS_MAJOR: u32 = 13;

/// First OS major version on which CI runs prefer the debugger with a
/// syslog fallback (the debugger path is flaky under CI).
pub const CI_DEBUGGER_OS_MAJOR: u32 = 16;

/// Inputs to [`classify`].
///
/// All state is passed explicitly — no ambient tool-version globals — so
/// selection is deterministic and directly testable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceQuery {
    /// Device is reachable through the vendor's modern managed transport
    /// rather than the legacy cable-sync protocol.
    pub managed_connectivity: bool,
    /// The installed vendor toolchain is new enough to provide a unified
    /// remote console for managed devices.
    pub remote_console_available: bool,
    /// Wireless (network) connection rather than a cable.
    pub wirelessly_connected: bool,
    /// Device OS major version.
    pub os_major_version: u32,
    /// A native debugger is currently attached to the app process.
    pub debugger_attached: bool,
    /// The managed runtime's event channel is already connected.
    pub runtime_connected: bool,
    /// Running under the continuous-integration variant of the toolchain.
    pub ci_variant: bool,
}

/// Map current device state to a primary/fallback source pair.
///
/// The decision table, first match wins:
///
/// 1. Managed transport, unified remote console available → `RemoteConsole`
///    with `ManagedRuntime` fallback.
/// 2. Managed transport without remote console, wireless → `ManagedRuntime`
///    only (syslog is unreliable over wireless).
/// 3. Managed transport without remote console, wired → `SystemLog` with
///    `ManagedRuntime` fallback.
/// 4. OS < [`UNIFIED_LOGGING_OS_MAJOR`] → `SystemLog` only.
/// 5. CI variant on OS ≥ [`CI_DEBUGGER_OS_MAJOR`] → `NativeDebugger` with
///    `SystemLog` fallback.
/// 6. Runtime connected and no debugger attached → `ManagedRuntime` with
///    `NativeDebugger` fallback.
/// 7. Otherwise (a debugger is attached or expected to attach) →
///    `NativeDebugger` with `ManagedRuntime` fallback.
///
/// The CI rule (5) deliberately outranks rules 6 and 7: a CI run gets the
/// debugger/syslog pairing even when the runtime is already connected.
pub fn classify(query: &SourceQuery) -> SourceSelection {
    if query.managed_connectivity {
        if query.remote_console_available {
            return SourceSelection::with_fallback(
                SourceKind::RemoteConsole,
                SourceKind::ManagedRuntime,
            );
        }
        if query.wirelessly_connected {
            return SourceSelection::only(SourceKind::ManagedRuntime);
        }
        return SourceSelection::with_fallback(SourceKind::SystemLog, SourceKind::ManagedRuntime);
    }

    if query.os_major_version < UNIFIED_LOGGING_OS_MAJOR {
        return SourceSelection::only(SourceKind::SystemLog);
    }

    if query.ci_variant && query.os_major_version >= CI_DEBUGGER_OS_MAJOR {
        return SourceSelection::with_fallback(SourceKind::NativeDebugger, SourceKind::SystemLog);
    }

    if query.runtime_connected && !query.debugger_attached {
        return SourceSelection::with_fallback(
            SourceKind::ManagedRuntime,
            SourceKind::NativeDebugger,
        );
    }

    SourceSelection::with_fallback(SourceKind::NativeDebugger, SourceKind::ManagedRuntime)
}
