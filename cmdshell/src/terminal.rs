//! Terminal mode handling.

use std::io::{self, IsTerminal};

/// Check if both stdin and stdout are terminals.
pub fn is_tty() -> bool {
    io::stdin().is_terminal() && io::stdout().is_terminal()
}

/// Raw terminal mode guard that restores terminal state on drop.
///
/// Raw mode disables the terminal's own echo and line buffering, so the shell
/// draws every character itself and can hide secrets. Dropping the guard
/// restores echo on every exit path, panics included.
pub struct RawModeGuard {
    enabled: bool,
}

impl RawModeGuard {
    /// Enter raw mode. If stdin is not a TTY this is a no-op.
    pub fn new() -> io::Result<Self> {
        if !is_tty() {
            return Ok(Self { enabled: false });
        }
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self { enabled: true })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Leave raw mode now instead of at drop.
    pub fn restore(&mut self) {
        if std::mem::take(&mut self.enabled) {
            let _ = crossterm::terminal::disable_raw_mode();
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.restore();
    }
}
