//! Start a fresh copy of the shell after the server was updated.

use crate::error::ShellError;
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use tracing::info;

fn command_for(exe: &Path, args: impl IntoIterator<Item = OsString>) -> Command {
    let mut cmd = Command::new(exe);
    cmd.args(args);
    cmd
}

fn launch_error(cmd: &Command, source: std::io::Error) -> ShellError {
    ShellError::Launch {
        command: cmd.get_program().to_string_lossy().into_owned(),
        source,
    }
}

/// Replace the current process with the same binary and arguments.
///
/// Only returns on failure.
#[cfg(unix)]
pub fn reexec() -> ShellError {
    use std::os::unix::process::CommandExt;

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(source) => {
            return ShellError::Launch {
                command: "current executable".to_string(),
                source,
            };
        }
    };
    let mut cmd = command_for(&exe, std::env::args_os().skip(1));
    info!(exe = %exe.display(), "restarting shell");
    let error = cmd.exec();
    launch_error(&cmd, error)
}

/// Run the same binary and arguments as a child, then exit with its status.
#[cfg(not(unix))]
pub fn reexec() -> ShellError {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(source) => {
            return ShellError::Launch {
                command: "current executable".to_string(),
                source,
            };
        }
    };
    let mut cmd = command_for(&exe, std::env::args_os().skip(1));
    info!(exe = %exe.display(), "restarting shell");
    match cmd.status() {
        Ok(status) => std::process::exit(status.code().unwrap_or(1)),
        Err(error) => launch_error(&cmd, error),
    }
}
