use cmdshell_ipc::ChannelError;
use miette::Diagnostic;
use thiserror::Error;

/// A command that is not valid in the current session or prompt state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Already logged in. Please log out first.")]
    AlreadyLoggedIn,
    #[error("Please log out first.")]
    SignupWhileLoggedIn,
    #[error("Not logged in.")]
    NotLoggedIn,
}

/// Input the user has to correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UserError {
    #[error("New passwords differ, please try again")]
    PasswordMismatch,
    #[error("empty secret ignored")]
    EmptySecret,
}

#[derive(Debug, Error, Diagnostic)]
pub enum ShellError {
    #[error(transparent)]
    #[diagnostic(code(cmdshell::channel))]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    #[diagnostic(code(cmdshell::state))]
    State(#[from] StateError),

    #[error(transparent)]
    #[diagnostic(code(cmdshell::input))]
    User(#[from] UserError),

    #[error("Server seems irresponsive")]
    #[diagnostic(
        code(cmdshell::server_unavailable),
        help("check that the server is running and listening on {endpoint}")
    )]
    ServerUnavailable { endpoint: String },

    #[error("failed to start `{command}`")]
    #[diagnostic(code(cmdshell::launch))]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("terminal error: {0}")]
    #[diagnostic(code(cmdshell::terminal))]
    Terminal(#[source] std::io::Error),
}

impl ShellError {
    /// Whether the error means the server went away.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ShellError::Channel(e) if e.is_disconnect())
    }
}
