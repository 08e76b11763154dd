//! Interactive front-end for a long-lived session server.
//!
//! The shell forwards each command line to the server over [`cmdshell_ipc`],
//! handles secret entry and confirmations locally, and renders the
//! notifications the server pushes while the user types.

pub mod config;
pub mod console;
pub mod dispatcher;
pub mod error;
pub mod launcher;
pub mod line_input;
pub mod log;
pub mod progress;
pub mod prompt;
pub mod reboot;
pub mod shell;
pub mod signal;
pub mod state;
pub mod terminal;

#[cfg(test)]
mod test_utils;

pub use config::Args;
pub use error::ShellError;
pub use prompt::LineOutcome;

use cmdshell_ipc::SessionChannel;
use crate::console::TerminalConsole;
use crate::launcher::LaunchConfig;
use crate::line_input::{LineSource, PipedLineReader, TerminalLineReader};
use crate::shell::Shell;
use crate::signal::SignalHandler;
use crate::terminal::RawModeGuard;
use std::sync::Arc;
use tracing::{info, warn};

/// Run the shell until the user leaves. The caller restarts the binary on
/// [`LineOutcome::Reboot`].
pub async fn run(args: Args) -> Result<LineOutcome, ShellError> {
    let endpoint = args.endpoint();
    info!(%endpoint, "starting shell");
    let channel = SessionChannel::new(
        cmdshell_ipc::platform_transport(&endpoint),
        args.channel_config(),
    );

    match launcher::ensure_server(
        &channel,
        args.server_command.as_deref(),
        &LaunchConfig::default(),
    )
    .await
    {
        Ok(()) => {}
        Err(e @ ShellError::Launch { .. }) => return Err(e),
        // The read loop keeps probing and picks the server up once it appears.
        Err(e) => warn!("{e}"),
    }

    let signals = SignalHandler::start().map_err(ShellError::Terminal)?;
    let mut raw_mode = RawModeGuard::new().map_err(ShellError::Terminal)?;
    let console = Arc::new(TerminalConsole::new(raw_mode.is_enabled()));

    let mut input: Box<dyn LineSource> = if raw_mode.is_enabled() {
        Box::new(TerminalLineReader::spawn(Arc::clone(&console)).map_err(ShellError::Terminal)?)
    } else {
        Box::new(PipedLineReader::stdin(signals.interrupts()))
    };

    let mut shell = Shell::new(
        Arc::clone(&channel),
        console,
        args.shell_config(),
        args.dispatcher_config(),
    );
    shell.connect().await;
    let outcome = shell.run(input.as_mut(), signals.shutdown_token()).await;

    channel.shutdown();
    raw_mode.restore();
    info!(?outcome, "shell finished");
    Ok(outcome)
}
