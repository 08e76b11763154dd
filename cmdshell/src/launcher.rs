//! Starting the server when nobody is listening.

use crate::error::ShellError;
use crate::prompt::split_words;
use cmdshell_ipc::SessionChannel;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Connection attempts after starting the server.
    pub attempts: u32,
    /// Wait before the first attempt; doubles after each failure.
    pub initial_backoff: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            attempts: 6,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// Make sure a server answers on the channel, starting `server_command` if needed.
pub async fn ensure_server(
    channel: &SessionChannel,
    server_command: Option<&str>,
    config: &LaunchConfig,
) -> Result<(), ShellError> {
    match channel.retry_connection().await {
        Ok(()) => return Ok(()),
        Err(e) if !e.is_disconnect() => return Err(e.into()),
        Err(e) => debug!("server not reachable: {e}"),
    }

    let unavailable = || ShellError::ServerUnavailable {
        endpoint: channel.endpoint(),
    };
    let Some(command) = server_command else {
        return Err(unavailable());
    };
    spawn_server(command)?;

    let mut backoff = config.initial_backoff;
    for attempt in 1..=config.attempts {
        tokio::time::sleep(backoff).await;
        match channel.retry_connection().await {
            Ok(()) => {
                info!(attempt, "server is up");
                return Ok(());
            }
            Err(e) => debug!(attempt, "server not up yet: {e}"),
        }
        backoff = backoff.saturating_mul(2);
    }
    Err(unavailable())
}

/// Start the server detached from the terminal.
fn spawn_server(command: &str) -> Result<(), ShellError> {
    let launch_error = |source| ShellError::Launch {
        command: command.to_string(),
        source,
    };

    let words = split_words(command);
    let Some((program, args)) = words.split_first() else {
        return Err(launch_error(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty server command",
        )));
    };

    let child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(launch_error)?;
    info!(pid = child.id(), program = %program, "started server");
    Ok(())
}
