//! Process-backed log sources.
//!
//! Spawns and owns the OS log-capture process (an idevicesyslog-style relay
//! for the System-Log source, a devicectl-style console for the
//! Remote-Console source) and turns its stdout into [`SourceEvent`]s.
//!
//! The `Child` handle is moved into a dedicated wait task that reaps the
//! process, so the real exit is always observed. `ProcessSource` retains a
//! oneshot kill channel for teardown and an atomic flag for synchronous
//! `has_exited()` checks.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

use ioslog_core::prelude::*;
use ioslog_core::reassembler::SyslogReassembler;
use ioslog_core::{vis, SourceKind};

use super::{EventTx, SourceEvent};

/// The program and arguments used to launch a capture process.
///
/// The concrete capture mechanism belongs to the device layer; this crate
/// only needs something it can spawn that prints log lines to stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// A running OS log-capture process feeding one source of the aggregator.
pub struct ProcessSource {
    kind: SourceKind,
    pid: Option<u32>,
    /// One-shot sender that tells the wait task to kill the process.
    /// Consumed on first use (or on drop).
    kill_tx: Option<oneshot::Sender<()>>,
    /// Set to `true` by the wait task once the child has exited.
    exited: Arc<AtomicBool>,
}

impl ProcessSource {
    /// Spawn the capture process for `kind` and start pumping its stdout
    /// into `event_tx`.
    ///
    /// System-Log output additionally goes through the vis decoder and the
    /// multiline reassembler tracking `app_name`; other kinds pass lines
    /// through verbatim.
    pub fn spawn(
        kind: SourceKind,
        command: &ProcessCommand,
        app_name: &str,
        event_tx: EventTx,
    ) -> Result<Self> {
        info!(
            "Starting {} capture: {} {}",
            kind,
            command.program,
            command.args.join(" ")
        );

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true) // cleanup on drop
            .spawn()
            .map_err(|e| Error::source_spawn(kind, e.to_string()))?;

        let pid = child.id();
        debug!("{} capture process started with PID: {:?}", kind, pid);

        let stdout = child.stdout.take().expect("stdout was configured");
        let pipeline = match kind {
            SourceKind::SystemLog => Some(SyslogReassembler::new(app_name)),
            _ => None,
        };
        tokio::spawn(Self::stdout_reader(kind, stdout, pipeline, event_tx.clone()));

        let stderr = child.stderr.take().expect("stderr was configured");
        tokio::spawn(Self::stderr_reader(kind, stderr));

        let exited = Arc::new(AtomicBool::new(false));
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        // The wait task owns `child` and emits Done when it is reaped.
        tokio::spawn(Self::wait_for_exit(
            kind,
            child,
            kill_rx,
            event_tx,
            Arc::clone(&exited),
        ));

        Ok(Self {
            kind,
            pid,
            kill_tx: Some(kill_tx),
            exited,
        })
    }

    /// Read stdout lines, run them through the per-kind pipeline, and emit
    /// `SourceEvent::Line` for each logical line.
    ///
    /// A read error is a mid-stream source failure and is emitted as
    /// `SourceEvent::Error`; EOF is left to the wait task to report.
    async fn stdout_reader(
        kind: SourceKind,
        stdout: tokio::process::ChildStdout,
        mut pipeline: Option<SyslogReassembler>,
        tx: EventTx,
    ) {
        let mut reader = BufReader::new(stdout).lines();

        loop {
            match reader.next_line().await {
                Ok(Some(raw)) => {
                    trace!("{} raw: {}", kind, raw);
                    let logical = match pipeline.as_mut() {
                        Some(reassembler) => reassembler.feed(&vis::decode(&raw)),
                        None => Some(raw),
                    };
                    let Some(line) = logical else { continue };
                    if tx.send((kind, SourceEvent::Line(line))).await.is_err() {
                        debug!("{} admission channel closed", kind);
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("{} stdout read failed: {}", kind, e);
                    let _ = tx.send((kind, SourceEvent::Error(e.to_string()))).await;
                    return;
                }
            }
        }

        debug!("{} stdout reader finished", kind);
    }

    /// Drain stderr so the child never blocks on a full pipe. Capture tools
    /// print status chatter here; it is not log data.
    async fn stderr_reader(kind: SourceKind, stderr: tokio::process::ChildStderr) {
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            trace!("{} stderr: {}", kind, line);
        }
    }

    /// Background task: owns `child`, waits for it to exit, emits Done.
    ///
    /// Two ways the task can end: the process exits naturally, or `kill_rx`
    /// fires and we kill it first.
    async fn wait_for_exit(
        kind: SourceKind,
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        event_tx: EventTx,
        exited: Arc<AtomicBool>,
    ) {
        tokio::select! {
            result = child.wait() => match result {
                Ok(status) => debug!("{} capture exited with status: {:?}", kind, status),
                Err(e) => error!("Error waiting for {} capture: {}", kind, e),
            },
            _ = kill_rx => {
                debug!("Kill signal received, terminating {} capture", kind);
                if let Err(e) = child.kill().await {
                    error!("Failed to kill {} capture: {}", kind, e);
                }
                let _ = child.wait().await;
            }
        }

        exited.store(true, Ordering::Release);
        let _ = event_tx.send((kind, SourceEvent::Done)).await;
    }

    /// Request termination of the capture process.
    ///
    /// Asynchronous best effort: the wait task performs the kill and reap.
    pub fn stop(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            debug!("Stopping {} capture (pid {:?})", self.kind, self.pid);
            // Ignore send error — the wait task may have exited naturally.
            let _ = tx.send(());
        }
    }

    /// Non-blocking check backed by the wait task's atomic flag.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }
}

impl Drop for ProcessSource {
    fn drop(&mut self) {
        if !self.has_exited() {
            // kill_on_drop(true) on the Child is the final safety net if
            // the wait task never sees this signal.
            if let Some(tx) = self.kill_tx.take() {
                let _ = tx.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ioslog_core::SourceKind;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn sh(script: &str) -> ProcessCommand {
        ProcessCommand::new("sh", ["-c", script])
    }

    /// Drain every event until all source tasks hang up. Line/Done ordering
    /// across the reader and wait tasks is not guaranteed, so tests assert
    /// on the collected set.
    async fn drain(mut rx: mpsc::Receiver<(SourceKind, SourceEvent)>) -> Vec<(SourceKind, SourceEvent)> {
        let mut events = Vec::new();
        loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) => return events,
                Err(_) => panic!("timed out waiting for source events"),
            }
        }
    }

    fn lines_of(events: &[(SourceKind, SourceEvent)]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|(_, e)| match e {
                SourceEvent::Line(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_spawn_failure_returns_error() {
        let (tx, _rx) = mpsc::channel(16);
        let result = ProcessSource::spawn(
            SourceKind::SystemLog,
            &ProcessCommand::new("/nonexistent/ioslog-capture", Vec::<String>::new()),
            "Runner",
            tx,
        );
        assert!(matches!(result, Err(Error::SourceSpawn { .. })));
    }

    #[tokio::test]
    async fn test_syslog_lines_are_reassembled_and_decoded() {
        let (tx, rx) = mpsc::channel(16);
        let script = r#"printf 'Runner[1] <Notice>: flutter: caf\\303\\251\nbare continuation line\nOtherApp[2] <Notice>: dropped\n'"#;
        let _source = ProcessSource::spawn(SourceKind::SystemLog, &sh(script), "Runner", tx)
            .expect("spawn sh");

        let events = drain(rx).await;
        assert!(events.iter().all(|(kind, _)| *kind == SourceKind::SystemLog));
        // Header stripped and vis-decoded, continuation passed through,
        // foreign header dropped.
        assert_eq!(
            lines_of(&events),
            vec!["flutter: caf\u{00e9}", "bare continuation line"]
        );
    }

    #[tokio::test]
    async fn test_remote_console_passes_lines_through() {
        let (tx, rx) = mpsc::channel(16);
        let _source = ProcessSource::spawn(
            SourceKind::RemoteConsole,
            &sh("printf 'flutter: one\\nplain two\\n'"),
            "Runner",
            tx,
        )
        .expect("spawn sh");

        let events = drain(rx).await;
        assert!(events.iter().all(|(kind, _)| *kind == SourceKind::RemoteConsole));
        assert_eq!(lines_of(&events), vec!["flutter: one", "plain two"]);
    }

    #[tokio::test]
    async fn test_stop_kills_long_running_process() {
        let (tx, rx) = mpsc::channel(16);
        let mut source =
            ProcessSource::spawn(SourceKind::RemoteConsole, &sh("sleep 60"), "Runner", tx)
                .expect("spawn sh");

        assert!(!source.has_exited());
        source.stop();

        let events = drain(rx).await;
        assert_eq!(events, vec![(SourceKind::RemoteConsole, SourceEvent::Done)]);
        assert!(source.has_exited());
    }

    #[tokio::test]
    async fn test_done_emitted_exactly_once() {
        let (tx, rx) = mpsc::channel(16);
        let _source =
            ProcessSource::spawn(SourceKind::RemoteConsole, &sh("exit 0"), "Runner", tx)
                .expect("spawn sh");

        let events = drain(rx).await;
        let done_count = events
            .iter()
            .filter(|(_, e)| *e == SourceEvent::Done)
            .count();
        assert_eq!(done_count, 1);
    }
}
