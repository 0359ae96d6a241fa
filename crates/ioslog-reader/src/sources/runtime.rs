//! Managed-runtime (VM Service) log event extraction.
//!
//! The Dart VM's event channel delivers structured JSON rather than plain
//! text. Collaborators forwarding raw stream events to the aggregator use
//! this module to pull the printable log text out of `Logging` events; all
//! other event kinds carry no log text and are dropped.
//!
//! Accepted shapes: a bare stream event object, or a full JSON-RPC
//! `streamNotify` notification wrapping one.

use serde_json::Value;

/// Extract the log text from one VM-Service stream-event JSON document.
///
/// Returns `None` for non-`Logging` events, malformed JSON, or records
/// without a printable message — silently, since unparseable input is
/// "not a log line", never an error.
pub fn extract_log_text(event_json: &str) -> Option<String> {
    let value: Value = serde_json::from_str(event_json).ok()?;
    let event = unwrap_notification(&value);

    if event.get("kind").and_then(Value::as_str) != Some("Logging") {
        return None;
    }

    let log_record = event.get("logRecord")?;
    let message = extract_value_as_string(log_record.get("message")?)?;

    // Prefix with the logger name when one is set, matching how the
    // runtime's own console rendering tags scoped loggers.
    match log_record.get("loggerName").and_then(extract_value_as_string) {
        Some(name) if !name.is_empty() => Some(format!("[{}] {}", name, message)),
        _ => Some(message),
    }
}

/// Peel a JSON-RPC `streamNotify` wrapper down to its event object.
fn unwrap_notification(value: &Value) -> &Value {
    if value.get("method").and_then(Value::as_str) == Some("streamNotify") {
        if let Some(event) = value.pointer("/params/event") {
            return event;
        }
    }
    value
}

/// Extract `valueAsString` from a VM Service `InstanceRef` object.
///
/// The `InstanceRef` format is `{"type": "@Instance", "valueAsString": "..."}`.
/// Returns `None` if the field is absent or its value is JSON `null`.
fn extract_value_as_string(value: &Value) -> Option<String> {
    value
        .get("valueAsString")
        .and_then(Value::as_str)
        .map(str::to_owned)
}
