//! ioslog - tail a device's aggregated log stream.
//!
//! This is the binary entry point. All logic lives in the library crates;
//! this just wires a capture command into a session and prints the
//! aggregated lines.

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;

use ioslog_core::SourceQuery;
use ioslog_reader::{AggregatorSession, ProcessCommand, SessionConfig};

/// Tail the unified log stream of an iOS device app
#[derive(Parser, Debug)]
#[command(name = "ioslog")]
#[command(about = "Tail the unified log stream of an iOS device app", long_about = None)]
struct Args {
    /// Command that captures the device syslog (e.g. "idevicesyslog -u <udid>")
    #[arg(long, value_name = "CMD")]
    syslog: Option<String>,

    /// Command that captures the unified remote console on managed devices
    #[arg(long, value_name = "CMD")]
    remote_console: Option<String>,

    /// Process name of the app to track
    #[arg(long, default_value = "Runner")]
    app_name: String,

    /// Device OS major version
    #[arg(long, default_value_t = 17)]
    os_major: u32,

    /// Device uses the vendor's managed transport
    #[arg(long)]
    managed: bool,

    /// Toolchain provides a unified remote console for managed devices
    #[arg(long)]
    remote_console_available: bool,

    /// Device is connected wirelessly
    #[arg(long)]
    wireless: bool,

    /// Running under the CI toolchain variant
    #[arg(long)]
    ci: bool,
}

/// Split a shell-ish command string on whitespace. Quoting is not
/// supported; pass paths without spaces.
fn parse_command(raw: &str) -> Option<ProcessCommand> {
    let mut parts = raw.split_whitespace();
    let program = parts.next()?;
    Some(ProcessCommand::new(program, parts.map(str::to_owned)))
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    ioslog_core::logging::init()?;

    let query = SourceQuery {
        managed_connectivity: args.managed,
        remote_console_available: args.remote_console_available,
        wirelessly_connected: args.wireless,
        os_major_version: args.os_major,
        ci_variant: args.ci,
        ..SourceQuery::default()
    };

    let mut config = SessionConfig::new(args.app_name, query);
    config.syslog_command = args.syslog.as_deref().and_then(parse_command);
    config.remote_console_command = args.remote_console.as_deref().and_then(parse_command);

    let session = AggregatorSession::new(config);
    tracing::info!("source selection: {}", session.current_selection());

    let mut lines = session.log_lines();
    loop {
        tokio::select! {
            result = lines.recv() => match result {
                Ok(Ok(line)) => println!("{}", line.text),
                Ok(Err(e)) => {
                    eprintln!("log stream failed: {e}");
                    break;
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("dropped {} lines (slow consumer)", missed);
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                session.dispose();
                break;
            }
        }
    }

    Ok(())
}
