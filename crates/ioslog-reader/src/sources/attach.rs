//! Two-phase attachable sources.
//!
//! The native debugger and the managed runtime do not exist yet when a
//! session starts — the debugger attaches during launch and the runtime
//! channel connects once the app is up. Each gets an [`AttachedSlot`]: the
//! slot's forwarder task starts immediately, parks until the collaborator
//! provides the live stream, then pumps lines into the admission channel.
//!
//! Providing a stream to a slot that was never started (the source was not
//! selected) is a no-op by construction: no slot exists to receive it.

use tokio::sync::{mpsc, oneshot};

use ioslog_core::prelude::*;
use ioslog_core::SourceKind;

use super::{EventTx, SourceEvent};

/// The live stream a collaborator hands to a slot.
pub enum ProvidedStream {
    /// Already-decoded text lines, one per logical line.
    Lines(mpsc::Receiver<String>),
    /// Raw VM-Service stream-event JSON; log text is extracted and
    /// non-log events are dropped (see [`super::runtime`]).
    VmEvents(mpsc::Receiver<String>),
}

/// A started-but-not-yet-connected log source.
pub struct AttachedSlot {
    kind: SourceKind,
    handle_tx: Option<oneshot::Sender<ProvidedStream>>,
}

impl AttachedSlot {
    /// Start the slot's forwarder task and return the handle used to
    /// provide the live stream later.
    pub fn start(kind: SourceKind, event_tx: EventTx) -> Self {
        let (handle_tx, handle_rx) = oneshot::channel::<ProvidedStream>();
        tokio::spawn(Self::forward(kind, handle_rx, event_tx));
        Self {
            kind,
            handle_tx: Some(handle_tx),
        }
    }

    /// Hand the slot its live stream. Subsequent calls are no-ops.
    pub fn provide(&mut self, stream: ProvidedStream) {
        match self.handle_tx.take() {
            Some(tx) => {
                debug!("Attaching live stream to {} slot", self.kind);
                // Ignore send error — the forwarder is gone if the session
                // was already disposed.
                let _ = tx.send(stream);
            }
            None => debug!("{} slot already attached, ignoring", self.kind),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Forwarder task: wait for the stream handle, then pump lines until
    /// the collaborator hangs up.
    async fn forward(
        kind: SourceKind,
        handle_rx: oneshot::Receiver<ProvidedStream>,
        event_tx: EventTx,
    ) {
        let Ok(stream) = handle_rx.await else {
            // Slot dropped without ever being attached.
            trace!("{} slot torn down before attach", kind);
            return;
        };

        match stream {
            ProvidedStream::Lines(mut rx) => {
                while let Some(line) = rx.recv().await {
                    if event_tx.send((kind, SourceEvent::Line(line))).await.is_err() {
                        return;
                    }
                }
            }
            ProvidedStream::VmEvents(mut rx) => {
                while let Some(event_json) = rx.recv().await {
                    let Some(line) = super::runtime::extract_log_text(&event_json) else {
                        continue;
                    };
                    if event_tx.send((kind, SourceEvent::Line(line))).await.is_err() {
                        return;
                    }
                }
            }
        }

        debug!("{} stream ended", kind);
        let _ = event_tx.send((kind, SourceEvent::Done)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn next_event(
        rx: &mut mpsc::Receiver<(SourceKind, SourceEvent)>,
    ) -> (SourceKind, SourceEvent) {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_lines_flow_after_attach() {
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let mut slot = AttachedSlot::start(SourceKind::NativeDebugger, event_tx);

        let (line_tx, line_rx) = mpsc::channel(16);
        slot.provide(ProvidedStream::Lines(line_rx));

        line_tx.send("flutter: hello".to_string()).await.unwrap();
        let (kind, event) = next_event(&mut event_rx).await;
        assert_eq!(kind, SourceKind::NativeDebugger);
        assert_eq!(event, SourceEvent::Line("flutter: hello".to_string()));

        drop(line_tx);
        let (_, event) = next_event(&mut event_rx).await;
        assert_eq!(event, SourceEvent::Done);
    }

    #[tokio::test]
    async fn test_second_provide_is_ignored() {
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let mut slot = AttachedSlot::start(SourceKind::ManagedRuntime, event_tx);

        let (line_tx, line_rx) = mpsc::channel(16);
        slot.provide(ProvidedStream::Lines(line_rx));

        let (orphan_tx, orphan_rx) = mpsc::channel(16);
        slot.provide(ProvidedStream::Lines(orphan_rx));

        // The ignored stream is dropped on the spot, so its sender fails.
        assert!(orphan_tx.send("ignored".to_string()).await.is_err());
        line_tx.send("kept".to_string()).await.unwrap();

        let (_, event) = next_event(&mut event_rx).await;
        assert_eq!(event, SourceEvent::Line("kept".to_string()));
    }

    #[tokio::test]
    async fn test_vm_events_are_extracted() {
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let mut slot = AttachedSlot::start(SourceKind::ManagedRuntime, event_tx);

        let (json_tx, json_rx) = mpsc::channel(16);
        slot.provide(ProvidedStream::VmEvents(json_rx));

        // A non-Logging event is dropped, a Logging event yields its text.
        json_tx
            .send(r#"{"kind":"IsolateStart","isolate":{}}"#.to_string())
            .await
            .unwrap();
        json_tx
            .send(
                r#"{"kind":"Logging","logRecord":{"message":{"type":"@Instance","valueAsString":"flutter: from vm"},"level":800}}"#
                    .to_string(),
            )
            .await
            .unwrap();

        let (kind, event) = next_event(&mut event_rx).await;
        assert_eq!(kind, SourceKind::ManagedRuntime);
        assert_eq!(event, SourceEvent::Line("flutter: from vm".to_string()));
    }

    #[tokio::test]
    async fn test_unattached_slot_drop_is_silent() {
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let slot = AttachedSlot::start(SourceKind::NativeDebugger, event_tx);
        drop(slot);

        // The forwarder exits without emitting anything; channel closes.
        let next = tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
            .await
            .expect("forwarder should exit promptly");
        assert!(next.is_none());
    }
}
