use crate::config::Level;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

/// Overrides `--log-level` with a full filter directive.
pub const LOG_ENV_VAR: &str = "CMDSHELL_LOG";

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn filter(level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from(level).into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy()
}

/// Send tracing output to `path`.
///
/// The terminal belongs to the prompt, so logs never go to stdout or stderr.
pub fn init_tracing(level: Level, path: &Path) -> io::Result<()> {
    let file = open_log_file(path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true);

    // A subscriber installed earlier (e.g. by a test harness) wins.
    let _ = tracing_subscriber::registry()
        .with(filter(level))
        .with(file_layer)
        .try_init();
    Ok(())
}
