//! The deduplicating aggregator session.
//!
//! One [`AggregatorSession`] coordinates one app run: it owns the broadcast
//! output stream, starts whichever sources the classifier selects, and
//! routes every line through the admission policy before republishing it.
//!
//! Lifecycle is `Idle` (constructed, nothing running) → `Active` (first
//! subscriber arrived, sources started) → `Disposed` (terminal). All line
//! admission happens on one dedicated task, so the dedup state needs no
//! locking; everything that crosses tasks goes over channels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc};

use ioslog_core::classifier::{classify, SourceQuery};
use ioslog_core::prelude::*;
use ioslog_core::types::{LogLine, SourceKind, SourceSelection};

use crate::dedup::DedupFilter;
use crate::sources::{
    AttachedSlot, EventTx, ProcessCommand, ProcessSource, ProvidedStream, SourceEvent,
};

/// Broadcast capacity. Late or slow subscribers simply miss lines; nothing
/// is buffered for an absent listener.
const OUTPUT_CAPACITY: usize = 1024;

/// Admission channel capacity, shared by all running sources.
const ADMISSION_CAPACITY: usize = 256;

/// A source failed mid-stream. Broadcast to every subscriber, after which
/// the output stream closes: a hard error on any one source is fatal to the
/// aggregated view.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{source_kind} log stream failed: {message}")]
pub struct LogStreamError {
    pub source_kind: SourceKind,
    pub message: String,
}

/// Item type of the aggregated output stream.
pub type LogResult = std::result::Result<LogLine, LogStreamError>;

/// Configuration for one aggregator session.
///
/// Everything the classifier needs is passed explicitly (spec'd device
/// state, no ambient globals). The capture commands are whatever the device
/// layer uses to reach the syslog relay / remote console; a `None` command
/// means that source contributes nothing even if selected.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Process name of the tracked app, used by the syslog reassembler.
    pub app_name: String,
    /// Device/session state for source classification. The
    /// `debugger_attached` and `runtime_connected` fields seed the live
    /// flags and can change afterwards via the session's setters.
    pub query: SourceQuery,
    /// Command launching the system-log capture process.
    pub syslog_command: Option<ProcessCommand>,
    /// Command launching the unified remote console for managed devices.
    pub remote_console_command: Option<ProcessCommand>,
}

impl SessionConfig {
    pub fn new(app_name: impl Into<String>, query: SourceQuery) -> Self {
        Self {
            app_name: app_name.into(),
            query,
            syslog_command: None,
            remote_console_command: None,
        }
    }
}

/// Session lifecycle states.
enum State {
    Idle,
    Active(ActiveSources),
    Disposed,
}

/// Everything owned while the session is live.
struct ActiveSources {
    processes: Vec<ProcessSource>,
    debugger: Option<AttachedSlot>,
    runtime: Option<AttachedSlot>,
    /// Kept so the admission channel stays open for late attaches; dropped
    /// on dispose, which lets the admission task drain and finish.
    event_tx: EventTx,
}

struct Inner {
    app_name: String,
    static_query: SourceQuery,
    debugger_attached: AtomicBool,
    runtime_connected: AtomicBool,
    syslog_command: Option<ProcessCommand>,
    remote_console_command: Option<ProcessCommand>,
    state: Mutex<State>,
    /// `None` once disposed, closing the stream for all subscribers.
    output_tx: Mutex<Option<broadcast::Sender<LogResult>>>,
}

/// The live object coordinating one app run.
///
/// At most one session should exist per running application instance.
/// Cloning is shallow: clones share the same session.
#[derive(Clone)]
pub struct AggregatorSession {
    inner: Arc<Inner>,
}

impl AggregatorSession {
    pub fn new(config: SessionConfig) -> Self {
        let (output_tx, _) = broadcast::channel(OUTPUT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                app_name: config.app_name,
                debugger_attached: AtomicBool::new(config.query.debugger_attached),
                runtime_connected: AtomicBool::new(config.query.runtime_connected),
                static_query: config.query,
                syslog_command: config.syslog_command,
                remote_console_command: config.remote_console_command,
                state: Mutex::new(State::Idle),
                output_tx: Mutex::new(Some(output_tx)),
            }),
        }
    }

    /// Subscribe to the aggregated output stream.
    ///
    /// The first subscription starts the underlying sources (lazy start);
    /// later subscribers share the same stream and replay nothing. After
    /// dispose, the returned receiver is already closed.
    pub fn log_lines(&self) -> broadcast::Receiver<LogResult> {
        {
            let mut state = self.inner.state.lock().expect("session state lock");
            if matches!(*state, State::Idle) {
                self.activate(&mut state);
            }
        }
        match self.inner.output_sender() {
            Some(tx) => tx.subscribe(),
            None => closed_receiver(),
        }
    }

    /// The selection for the current device state, re-derived on every call.
    pub fn current_selection(&self) -> SourceSelection {
        classify(&self.inner.query())
    }

    /// Hand the session a live native-debugger line stream.
    ///
    /// Implies the debugger is attached. No-op if the debugger source is
    /// not part of the active selection.
    pub fn provide_debugger_lines(&self, lines: mpsc::Receiver<String>) {
        self.inner
            .debugger_attached
            .store(true, Ordering::Release);
        self.provide(SourceKind::NativeDebugger, ProvidedStream::Lines(lines));
    }

    /// Hand the session a live managed-runtime stream of decoded lines.
    pub fn provide_runtime_lines(&self, lines: mpsc::Receiver<String>) {
        self.inner.runtime_connected.store(true, Ordering::Release);
        self.provide(SourceKind::ManagedRuntime, ProvidedStream::Lines(lines));
    }

    /// Hand the session a live managed-runtime stream of raw VM-Service
    /// event JSON; log text is extracted and other events are dropped.
    pub fn provide_runtime_events(&self, events: mpsc::Receiver<String>) {
        self.inner.runtime_connected.store(true, Ordering::Release);
        self.provide(SourceKind::ManagedRuntime, ProvidedStream::VmEvents(events));
    }

    /// Record a debugger attach/detach without providing a stream.
    pub fn set_debugger_attached(&self, attached: bool) {
        self.inner.debugger_attached.store(attached, Ordering::Release);
    }

    /// Record runtime connection state without providing a stream.
    pub fn set_runtime_connected(&self, connected: bool) {
        self.inner.runtime_connected.store(connected, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        matches!(
            *self.inner.state.lock().expect("session state lock"),
            State::Active(_)
        )
    }

    pub fn is_disposed(&self) -> bool {
        matches!(
            *self.inner.state.lock().expect("session state lock"),
            State::Disposed
        )
    }

    /// Terminate the session. Idempotent.
    ///
    /// Cancels all source subscriptions and kills owned capture processes;
    /// process teardown is asynchronous best effort.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    // ─────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────

    /// Idle → Active: classify, start selected sources, spawn the
    /// admission task. Called with the state lock held; nothing here
    /// blocks or awaits.
    fn activate(&self, state: &mut MutexGuard<'_, State>) {
        let selection = self.current_selection();
        info!(
            "Starting log session for {}: source selection {}",
            self.inner.app_name, selection
        );

        let (event_tx, event_rx) = mpsc::channel(ADMISSION_CAPACITY);
        let mut active = ActiveSources {
            processes: Vec::new(),
            debugger: None,
            runtime: None,
            event_tx: event_tx.clone(),
        };

        // The system log runs independent of any attached app process, so
        // it is started eagerly at activation whenever the selection
        // includes it in either role.
        self.start_capture(
            &mut active,
            SourceKind::SystemLog,
            &selection,
            self.inner.syslog_command.as_ref(),
            event_tx.clone(),
        );
        self.start_capture(
            &mut active,
            SourceKind::RemoteConsole,
            &selection,
            self.inner.remote_console_command.as_ref(),
            event_tx.clone(),
        );

        if selection.includes(SourceKind::NativeDebugger) {
            active.debugger = Some(AttachedSlot::start(SourceKind::NativeDebugger, event_tx.clone()));
        }
        if selection.includes(SourceKind::ManagedRuntime) {
            active.runtime = Some(AttachedSlot::start(SourceKind::ManagedRuntime, event_tx));
        }

        tokio::spawn(admission_loop(Arc::clone(&self.inner), event_rx));
        **state = State::Active(active);
    }

    /// Start a process-backed capture if `kind` is selected and a command
    /// is configured. A spawn failure means this source contributes
    /// nothing for the rest of the session; the others keep running.
    fn start_capture(
        &self,
        active: &mut ActiveSources,
        kind: SourceKind,
        selection: &SourceSelection,
        command: Option<&ProcessCommand>,
        event_tx: EventTx,
    ) {
        if !selection.includes(kind) {
            return;
        }
        let Some(command) = command else {
            debug!("no capture command configured for {}", kind);
            return;
        };
        match ProcessSource::spawn(kind, command, &self.inner.app_name, event_tx) {
            Ok(source) => active.processes.push(source),
            Err(e) => warn!("{} capture unavailable: {}", kind, e),
        }
    }

    fn provide(&self, kind: SourceKind, stream: ProvidedStream) {
        let mut state = self.inner.state.lock().expect("session state lock");
        if let State::Active(active) = &mut *state {
            let slot = match kind {
                SourceKind::NativeDebugger => active.debugger.as_mut(),
                SourceKind::ManagedRuntime => active.runtime.as_mut(),
                _ => None,
            };
            if let Some(slot) = slot {
                slot.provide(stream);
                return;
            }
        }
        debug!("{} stream provided but source not active; ignoring", kind);
    }

    /// Test hook: push a raw source event into the admission channel.
    #[cfg(test)]
    fn inject_event(&self, kind: SourceKind, event: SourceEvent) {
        let state = self.inner.state.lock().expect("session state lock");
        if let State::Active(active) = &*state {
            active
                .event_tx
                .try_send((kind, event))
                .expect("admission channel has capacity in tests");
        } else {
            panic!("inject_event requires an active session");
        }
    }
}

impl Inner {
    /// Live classifier inputs: static device facts plus the current
    /// debugger/runtime flags.
    fn query(&self) -> SourceQuery {
        SourceQuery {
            debugger_attached: self.debugger_attached.load(Ordering::Acquire),
            runtime_connected: self.runtime_connected.load(Ordering::Acquire),
            ..self.static_query
        }
    }

    fn output_sender(&self) -> Option<broadcast::Sender<LogResult>> {
        self.output_tx.lock().expect("output lock").clone()
    }

    fn dispose(&self) {
        // Poison-tolerant: dispose also runs from Drop.
        {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            match std::mem::replace(&mut *state, State::Disposed) {
                State::Active(mut active) => {
                    info!("Disposing log session for {}", self.app_name);
                    for process in active.processes.iter_mut() {
                        process.stop();
                    }
                    // Dropping `active` tears down the attach slots and the
                    // admission sender; the admission task drains and exits.
                }
                State::Idle => debug!("log session disposed before activation"),
                State::Disposed => {}
            }
        }
        // Closes the output stream for every subscriber.
        if let Ok(mut output) = self.output_tx.lock() {
            *output = None;
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Last clone gone: make sure capture processes get the kill signal.
        self.dispose();
    }
}

/// The single-task event loop that owns all dedup state.
///
/// Roles are re-derived from a fresh classification per line, since
/// debugger attachment and runtime connection may have changed since the
/// sources were started.
async fn admission_loop(inner: Arc<Inner>, mut event_rx: mpsc::Receiver<(SourceKind, SourceEvent)>) {
    let mut filter = DedupFilter::new();

    while let Some((kind, event)) = event_rx.recv().await {
        match event {
            SourceEvent::Line(text) => {
                let selection = classify(&inner.query());
                if !filter.admit(&selection, kind, &text) {
                    continue;
                }
                let Some(tx) = inner.output_sender() else { break };
                if tx.send(Ok(LogLine::new(kind, text))).is_err() {
                    // Broadcast with zero receivers: the consumer cancelled.
                    debug!("last subscriber gone, disposing session");
                    inner.dispose();
                    break;
                }
            }
            SourceEvent::Error(message) => {
                error!("{} source failed mid-stream: {}", kind, message);
                if let Some(tx) = inner.output_sender() {
                    let _ = tx.send(Err(LogStreamError {
                        source_kind: kind,
                        message,
                    }));
                }
                inner.dispose();
                break;
            }
            // Clean end of one source; the others keep contributing.
            SourceEvent::Done => debug!("{} source finished", kind),
        }
    }

    debug!("admission loop ended");
}

fn closed_receiver() -> broadcast::Receiver<LogResult> {
    let (tx, rx) = broadcast::channel(1);
    drop(tx);
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::broadcast::error::RecvError;

    fn sh(script: &str) -> ProcessCommand {
        ProcessCommand::new("sh", ["-c", script])
    }

    async fn next_line(rx: &mut broadcast::Receiver<LogResult>) -> LogLine {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("line within timeout")
            .expect("stream open")
            .expect("no stream error")
    }

    fn attached_only_config() -> SessionConfig {
        // Non-managed, modern OS, nothing connected yet: selection is
        // debugger primary with runtime fallback.
        SessionConfig::new(
            "Runner",
            SourceQuery {
                os_major_version: 17,
                ..SourceQuery::default()
            },
        )
    }

    #[tokio::test]
    async fn test_lazy_start_and_unfiltered_syslog() {
        // OS 12, non-managed: syslog only, no fallback, no dedup.
        let mut config = SessionConfig::new(
            "App",
            SourceQuery {
                os_major_version: 12,
                ..SourceQuery::default()
            },
        );
        config.syslog_command = Some(sh(
            "printf 'App[7] <Notice>: flutter: hi\\nApp[7] <Notice>: not marked\\n'",
        ));
        let session = AggregatorSession::new(config);
        assert_eq!(
            session.current_selection(),
            SourceSelection::only(SourceKind::SystemLog)
        );
        assert!(!session.is_active());

        let mut rx = session.log_lines();
        assert!(session.is_active());

        // Both lines arrive, marker or not — no fallback means no dedup.
        let first = next_line(&mut rx).await;
        assert_eq!(first, LogLine::new(SourceKind::SystemLog, "flutter: hi"));
        let second = next_line(&mut rx).await;
        assert_eq!(second, LogLine::new(SourceKind::SystemLog, "not marked"));

        session.dispose();
    }

    #[tokio::test]
    async fn test_selection_reflects_live_state() {
        let session = AggregatorSession::new(attached_only_config());
        assert_eq!(
            session.current_selection().primary,
            SourceKind::NativeDebugger
        );

        // Runtime connects, debugger still absent: primary flips.
        session.set_runtime_connected(true);
        assert_eq!(
            session.current_selection(),
            SourceSelection::with_fallback(SourceKind::ManagedRuntime, SourceKind::NativeDebugger)
        );

        // Debugger attaches: back to the default pairing.
        session.set_debugger_attached(true);
        assert_eq!(
            session.current_selection().primary,
            SourceKind::NativeDebugger
        );
    }

    #[tokio::test]
    async fn test_fallback_then_primary_dedup() {
        let session = AggregatorSession::new(attached_only_config());
        let mut rx = session.log_lines();

        let (debugger_tx, debugger_rx) = mpsc::channel(16);
        let (runtime_tx, runtime_rx) = mpsc::channel(16);
        session.provide_debugger_lines(debugger_rx);
        session.provide_runtime_lines(runtime_rx);

        // Fallback (runtime) wins the race: emitted optimistically.
        runtime_tx.send("flutter: hello".to_string()).await.unwrap();
        let line = next_line(&mut rx).await;
        assert_eq!(
            line,
            LogLine::new(SourceKind::ManagedRuntime, "flutter: hello")
        );

        // Primary replays the identical text: suppressed. The next line we
        // see must be the sentinel that follows it on the same source.
        debugger_tx.send("flutter: hello".to_string()).await.unwrap();
        debugger_tx.send("flutter: done".to_string()).await.unwrap();
        let line = next_line(&mut rx).await;
        assert_eq!(line, LogLine::new(SourceKind::NativeDebugger, "flutter: done"));

        session.dispose();
    }

    #[tokio::test]
    async fn test_fallback_silenced_after_primary_proves_itself() {
        let session = AggregatorSession::new(attached_only_config());
        let mut rx = session.log_lines();

        let (debugger_tx, debugger_rx) = mpsc::channel(16);
        let (runtime_tx, runtime_rx) = mpsc::channel(16);
        session.provide_debugger_lines(debugger_rx);
        session.provide_runtime_lines(runtime_rx);

        debugger_tx.send("flutter: first".to_string()).await.unwrap();
        let line = next_line(&mut rx).await;
        assert_eq!(line.text, "flutter: first");

        // Primary is confirmed; fallback output never surfaces again.
        runtime_tx.send("flutter: late".to_string()).await.unwrap();
        debugger_tx.send("flutter: second".to_string()).await.unwrap();
        let line = next_line(&mut rx).await;
        assert_eq!(line, LogLine::new(SourceKind::NativeDebugger, "flutter: second"));

        session.dispose();
    }

    #[tokio::test]
    async fn test_mid_stream_error_closes_output_for_all() {
        let session = AggregatorSession::new(attached_only_config());
        let mut rx = session.log_lines();
        let mut rx2 = session.log_lines();

        session.inject_event(
            SourceKind::ManagedRuntime,
            SourceEvent::Error("channel reset".to_string()),
        );

        let err = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("error within timeout")
            .expect("stream still delivers the error item")
            .expect_err("must be the stream error");
        assert_eq!(err.source_kind, SourceKind::ManagedRuntime);
        assert_eq!(err.message, "channel reset");

        // After the error item the stream is closed, for every subscriber.
        loop {
            match rx2.recv().await {
                Ok(Err(_)) => continue,
                Err(RecvError::Closed) => break,
                other => panic!("expected closed stream, got {:?}", other),
            }
        }
        assert!(session.is_disposed());
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_and_closes_stream() {
        let session = AggregatorSession::new(attached_only_config());
        let mut rx = session.log_lines();

        session.dispose();
        session.dispose();
        assert!(session.is_disposed());

        loop {
            match rx.recv().await {
                Err(RecvError::Closed) => break,
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => continue,
            }
        }

        // Subscribing after dispose yields an already-closed receiver, and
        // does not restart anything.
        let mut rx = session.log_lines();
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
        assert!(session.is_disposed());
    }

    #[tokio::test]
    async fn test_provide_is_noop_when_source_not_selected() {
        // OS 12: only the system log is selected; attach hooks must be
        // silently ignored.
        let config = SessionConfig::new(
            "App",
            SourceQuery {
                os_major_version: 12,
                ..SourceQuery::default()
            },
        );
        let session = AggregatorSession::new(config);
        let mut rx = session.log_lines();

        let (debugger_tx, debugger_rx) = mpsc::channel(16);
        session.provide_debugger_lines(debugger_rx);
        // The receiver was dropped, not wired up: the hook was a no-op.
        assert!(debugger_tx.send("flutter: ignored".to_string()).await.is_err());

        session.inject_event(
            SourceKind::SystemLog,
            SourceEvent::Line("flutter: real".to_string()),
        );
        let line = next_line(&mut rx).await;
        assert_eq!(line, LogLine::new(SourceKind::SystemLog, "flutter: real"));

        session.dispose();
    }

    #[tokio::test]
    async fn test_eager_syslog_as_ci_fallback() {
        // CI on OS 16: debugger primary, syslog fallback. The syslog
        // capture starts at activation even though it is only the fallback,
        // and its marked lines surface optimistically.
        let mut config = SessionConfig::new(
            "Runner",
            SourceQuery {
                os_major_version: 16,
                ci_variant: true,
                ..SourceQuery::default()
            },
        );
        config.syslog_command = Some(sh(
            "printf 'Runner[1] <Notice>: flutter: from syslog\\nRunner[1] <Notice>: unmarked noise\\n'",
        ));
        let session = AggregatorSession::new(config);
        assert_eq!(
            session.current_selection(),
            SourceSelection::with_fallback(SourceKind::NativeDebugger, SourceKind::SystemLog)
        );

        let mut rx = session.log_lines();

        // Only the marked line comes through; fallback noise is dropped.
        let line = next_line(&mut rx).await;
        assert_eq!(
            line,
            LogLine::new(SourceKind::SystemLog, "flutter: from syslog")
        );

        // The primary replaying the same text is suppressed.
        let (debugger_tx, debugger_rx) = mpsc::channel(16);
        session.provide_debugger_lines(debugger_rx);
        debugger_tx
            .send("flutter: from syslog".to_string())
            .await
            .unwrap();
        debugger_tx.send("flutter: next".to_string()).await.unwrap();
        let line = next_line(&mut rx).await;
        assert_eq!(line, LogLine::new(SourceKind::NativeDebugger, "flutter: next"));

        session.dispose();
    }
}
