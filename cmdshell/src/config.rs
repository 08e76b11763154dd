//! Command line and environment configuration.

use crate::dispatcher::DispatcherConfig;
use crate::shell::ShellConfig;
use clap::Parser;
use cmdshell_ipc::ChannelConfig;
use cmdshell_ipc::paths::{Endpoint, runtime_dir};
use std::path::PathBuf;
use std::time::Duration;
use tracing::level_filters::LevelFilter;

const LOG_FILE_NAME: &str = "shell.log";

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Level {
    Silent,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> LevelFilter {
        match level {
            Level::Silent => LevelFilter::OFF,
            Level::Error => LevelFilter::ERROR,
            Level::Warn => LevelFilter::WARN,
            Level::Info => LevelFilter::INFO,
            Level::Debug => LevelFilter::DEBUG,
            Level::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    #[arg(
        long,
        env = "CMDSHELL_SOCKET",
        help = "Socket or pipe the server listens on.",
        long_help = "Socket (Unix) or named pipe (Windows) the server listens on. Defaults to the per-user runtime directory."
    )]
    pub socket: Option<PathBuf>,

    #[arg(
        long,
        env = "CMDSHELL_SERVER",
        help = "Command that starts the server when it is not running."
    )]
    pub server_command: Option<String>,

    #[arg(
        long,
        env = "CMDSHELL_LOG_FILE",
        help = "Where to write logs. Defaults to shell.log in the runtime directory."
    )]
    pub log_file: Option<PathBuf>,

    #[arg(long, help = "Minimum level of logged events.", default_value_t, value_enum)]
    pub log_level: Level,

    #[arg(
        long,
        help = "How long to wait for the server's first prompt.",
        value_parser = humantime::parse_duration,
        default_value = "20s"
    )]
    pub ready_timeout: Duration,

    #[arg(
        long,
        help = "Minimum time between connection probes while idle.",
        value_parser = humantime::parse_duration,
        default_value = "5s"
    )]
    pub retry_interval: Duration,

    #[arg(
        long,
        help = "Give up on a command whose response takes longer than this.",
        value_parser = humantime::parse_duration
    )]
    pub command_timeout: Option<Duration>,

    #[arg(long, help = "Do not print the welcome banner.")]
    pub no_welcome: bool,
}

impl Args {
    pub fn endpoint(&self) -> Endpoint {
        match &self.socket {
            Some(path) => Endpoint::new(path),
            None => Endpoint::default_for_user(),
        }
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| runtime_dir().join(LOG_FILE_NAME))
    }

    pub fn shell_config(&self) -> ShellConfig {
        ShellConfig {
            ready_timeout: self.ready_timeout,
            retry_interval: self.retry_interval,
            show_welcome: !self.no_welcome,
            ..Default::default()
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            command_timeout: self.command_timeout,
            ..Default::default()
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig::default()
    }
}
