//! Prompt state machine.
//!
//! Decides how each submitted line is consumed: forwarded to the server as a
//! command, collected as a secret, or taken as a yes/no answer. The active
//! state lives in [`ShellState`] so the notification dispatcher can read it;
//! only this module changes it.

use crate::console::Console;
use crate::error::{ShellError, StateError, UserError};
use crate::line_input::{LineEvent, LineSource};
use crate::state::ShellState;
use async_trait::async_trait;
use cmdshell_ipc::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_PROMPT: &str = "cmdshell> ";
pub const CONFIRMATION_RETRY: &str = "Please enter: [y]es/[n]o: ";

/// Terminal width assumed for `--client-width` when it is unknown.
const DEFAULT_CLIENT_WIDTH: u16 = 80;
/// Terminal width assumed for path display hints when it is unknown.
const DEFAULT_HINT_WIDTH: u16 = 75;

const ANSWER_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptState {
    #[default]
    Command,
    LoginPassword,
    NewPassword,
    PasswordConfirm,
    ConfirmDeletion,
}

impl PromptState {
    pub fn default_prompt(self) -> &'static str {
        match self {
            PromptState::Command => DEFAULT_PROMPT,
            PromptState::LoginPassword => "Password:",
            PromptState::NewPassword => "New Password:",
            PromptState::PasswordConfirm => "Retype New Password:",
            PromptState::ConfirmDeletion => "Are you sure to delete? ",
        }
    }

    /// Input typed in this state is neither echoed nor kept in history.
    pub fn is_secret(self) -> bool {
        matches!(
            self,
            PromptState::LoginPassword | PromptState::NewPassword | PromptState::PasswordConfirm
        )
    }
}

/// What the read loop should do after a line was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Continue,
    Exit,
    /// Exit and start the same binary again.
    Reboot,
}

/// Everything the state machine needs from the rest of the shell.
#[async_trait]
pub trait ShellBackend: Send {
    /// Forward a command line to the server and show its output.
    async fn execute(&mut self, command: &str) -> Result<StatusCode, ShellError>;

    async fn is_logged_in(&mut self) -> Result<bool, ShellError>;

    fn client_id(&self) -> Option<String>;

    fn terminal_width(&self) -> Option<u16>;

    fn set_server_updating(&mut self, updating: bool);

    fn print(&mut self, text: &str);

    fn print_error(&mut self, text: &str);

    fn clear_screen(&mut self);

    fn history(&self) -> Vec<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LinkConfirmation {
    Confirm(String),
    Cancel(String),
}

/// Secrets and command prefixes collected across several lines.
#[derive(Debug, Default)]
struct PendingSecret {
    login_name: Option<String>,
    link: Option<LinkConfirmation>,
    signup_line: Option<String>,
    passwd_line: Option<String>,
    new_password: Option<SecretString>,
}

pub struct PromptStateMachine {
    shared: Arc<ShellState>,
    pending: PendingSecret,
}

impl PromptStateMachine {
    pub fn new(shared: Arc<ShellState>) -> Self {
        Self {
            shared,
            pending: PendingSecret::default(),
        }
    }

    pub fn state(&self) -> PromptState {
        self.shared.prompt_state()
    }

    /// Account name captured for the pending login, signup or link confirmation.
    pub fn login_name(&self) -> Option<&str> {
        self.pending.login_name.as_deref()
    }

    /// Back to command mode, dropping every pending secret.
    pub fn interrupt(&mut self) {
        if self.state() != PromptState::Command {
            debug!(from = ?self.state(), "prompt interrupted");
        }
        self.return_to_command();
    }

    fn enter(&self, state: PromptState) {
        debug!(?state, "prompt state");
        self.shared.set_prompt_state(state);
    }

    fn return_to_command(&mut self) {
        self.pending = PendingSecret::default();
        self.shared.set_prompt_state(PromptState::Command);
    }

    fn outcome(&self) -> LineOutcome {
        if !self.shared.exit_requested() {
            LineOutcome::Continue
        } else if self.shared.reboot_requested() {
            LineOutcome::Reboot
        } else {
            LineOutcome::Exit
        }
    }

    pub async fn handle_line(&mut self, line: &str, backend: &mut dyn ShellBackend) -> LineOutcome {
        match self.state() {
            PromptState::Command => self.handle_command(line, backend).await,
            PromptState::LoginPassword => self.handle_login_secret(line, backend).await,
            PromptState::NewPassword => self.handle_new_password(line),
            PromptState::PasswordConfirm => self.handle_password_confirm(line, backend).await,
            PromptState::ConfirmDeletion => {
                // `ask_confirmation` reads its own answers; this question was abandoned.
                debug!("dropping stale confirmation prompt");
                self.return_to_command();
                self.handle_command(line, backend).await;
            }
        }
        self.outcome()
    }

    async fn handle_login_secret(&mut self, line: &str, backend: &mut dyn ShellBackend) {
        if line.is_empty() {
            debug!("{}", UserError::EmptySecret);
            return;
        }

        let secret = quote_secret(line);
        let login_name = self.pending.login_name.take().unwrap_or_default();
        let command = match self.pending.link.take() {
            Some(LinkConfirmation::Confirm(link)) => {
                format!("confirm {link} {login_name} {secret}")
            }
            Some(LinkConfirmation::Cancel(link)) => format!("confirmcancel {link} {secret}"),
            None => match backend.client_id() {
                Some(id) => format!("login -v --clientID={id} {login_name} {secret}"),
                None => format!("login -v {login_name} {secret}"),
            },
        };

        self.return_to_command();
        run(backend, &command).await;
    }

    fn handle_new_password(&mut self, line: &str) {
        if line.is_empty() {
            debug!("{}", UserError::EmptySecret);
            return;
        }
        self.pending.new_password = Some(SecretString::from(line.to_string()));
        self.enter(PromptState::PasswordConfirm);
    }

    async fn handle_password_confirm(&mut self, line: &str, backend: &mut dyn ShellBackend) {
        if line.is_empty() {
            debug!("{}", UserError::EmptySecret);
            return;
        }

        let matches = self
            .pending
            .new_password
            .as_ref()
            .is_some_and(|new| new.expose_secret() == line);
        if !matches {
            backend.print_error(&UserError::PasswordMismatch.to_string());
            self.return_to_command();
            return;
        }

        let secret = quote_secret(line);
        let command = match (self.pending.signup_line.take(), self.pending.passwd_line.take()) {
            (Some(signup_line), _) => format!("{signup_line} {secret}"),
            (None, Some(passwd_line)) => format!("{passwd_line} {secret} {secret}"),
            (None, None) => {
                self.return_to_command();
                return;
            }
        };

        self.return_to_command();
        run(backend, &command).await;
    }

    async fn handle_command(&mut self, line: &str, backend: &mut dyn ShellBackend) {
        let words = split_words(line);
        let Some(name) = words.first().map(String::as_str) else {
            return;
        };

        let rest = line
            .trim_start()
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest.trim())
            .unwrap_or_default();
        let cols = backend.terminal_width().unwrap_or(DEFAULT_CLIENT_WIDTH);
        let command = join_command(name, &format!("--client-width={cols}"), rest);
        // Everything after the command name, client width included.
        let tail = join_command("", &format!("--client-width={cols}"), rest);

        let has = |flag: &str| words.iter().skip(1).any(|w| w == flag);
        let help = has("--help");
        let args = discard_flags(&words);

        match name {
            "exit" | "quit" => {
                if !has("--only-shell")
                    && run(backend, &command).await == Some(StatusCode::ConfirmNo)
                {
                    return;
                }
                if !help && !has("--only-server") {
                    self.shared.request_exit(false);
                }
            }
            "update" => {
                backend.set_server_updating(true);
                match run(backend, &command).await {
                    Some(StatusCode::RestartRequired) => {
                        backend.print("The server has been updated. This shell will restart.");
                        self.shared.request_exit(true);
                    }
                    Some(StatusCode::InvalidState) => {}
                    _ if words.len() == 1 => backend.set_server_updating(false),
                    _ => {}
                }
            }
            "history" => {
                if help {
                    backend.print(" Prints commands history");
                } else {
                    let history = backend.history();
                    for (i, entry) in history.iter().enumerate() {
                        backend.print(&format!("{:>4}  {entry}", i + 1));
                    }
                }
            }
            "passwd" if !help => {
                match logged_in(backend).await {
                    Some(true) => {}
                    Some(false) => {
                        backend.print_error(&StateError::NotLoggedIn.to_string());
                        return;
                    }
                    None => return,
                }
                if args.len() == 1 {
                    self.pending.passwd_line = Some(command);
                    self.enter(PromptState::NewPassword);
                } else {
                    run(backend, &command).await;
                }
            }
            "login" if !help => {
                match logged_in(backend).await {
                    Some(true) => {
                        backend.print_error(&StateError::AlreadyLoggedIn.to_string());
                        return;
                    }
                    Some(false) => {}
                    None => return,
                }
                let interactive = (args.len() == 2 || (args.len() == 3 && args[2].is_empty()))
                    && args[1].contains('@');
                if interactive {
                    self.pending.login_name = Some(args[1].clone());
                    self.enter(PromptState::LoginPassword);
                } else {
                    let command = match backend.client_id() {
                        Some(id) => format!("login --clientID={id}{tail}"),
                        None => command,
                    };
                    run(backend, &command).await;
                }
            }
            "signup" if !help => {
                match logged_in(backend).await {
                    Some(true) => {
                        backend.print_error(&StateError::SignupWhileLoggedIn.to_string());
                        return;
                    }
                    Some(false) => {}
                    None => return,
                }
                if args.len() == 2 {
                    self.pending.login_name = Some(args[1].clone());
                    self.pending.signup_line = Some(command);
                    self.enter(PromptState::NewPassword);
                } else {
                    run(backend, &command).await;
                }
            }
            "confirm" if !help => {
                if args.len() == 3 {
                    self.pending.link = Some(LinkConfirmation::Confirm(args[1].clone()));
                    self.pending.login_name = Some(args[2].clone());
                    self.enter(PromptState::LoginPassword);
                } else {
                    run(backend, &command).await;
                }
            }
            "confirmcancel" if !help => {
                if args.len() == 2 {
                    self.pending.link = Some(LinkConfirmation::Cancel(args[1].clone()));
                    self.enter(PromptState::LoginPassword);
                } else {
                    run(backend, &command).await;
                }
            }
            "clear" if !help => backend.clear_screen(),
            "transfers" | "sync" | "du" | "mediainfo" | "backup" => {
                let command = match path_display_size(name, &command, backend.terminal_width()) {
                    Some(size) => format!("{name} --path-display-size={size}{tail}"),
                    None => command,
                };
                run(backend, &command).await;
            }
            "get" | "put" | "reload" => {
                let command = match backend.client_id() {
                    Some(id) => format!("{name} --clientID={id}{tail}"),
                    None => command,
                };
                run(backend, &command).await;
            }
            _ => {
                run(backend, &command).await;
            }
        }
    }
}

/// Run a command, reporting failures to the user. `None` when it never completed.
async fn run(backend: &mut dyn ShellBackend, command: &str) -> Option<StatusCode> {
    match backend.execute(command).await {
        Ok(status) => Some(status),
        Err(e) => {
            backend.print_error(&e.to_string());
            None
        }
    }
}

/// Login state, or `None` after reporting why it could not be queried.
async fn logged_in(backend: &mut dyn ShellBackend) -> Option<bool> {
    match backend.is_logged_in().await {
        Ok(logged_in) => Some(logged_in),
        Err(e) => {
            backend.print_error(&e.to_string());
            None
        }
    }
}

/// `first + " " + middle + " " + rest`, skipping empty parts.
fn join_command(first: &str, middle: &str, rest: &str) -> String {
    let mut command = first.to_string();
    for part in [middle, rest] {
        if !part.is_empty() {
            command.push(' ');
            command.push_str(part);
        }
    }
    command
}

/// Width hint for commands that print paths in columns.
fn path_display_size(name: &str, command: &str, width: Option<u16>) -> Option<i64> {
    if command.contains("path-display-size") {
        return None;
    }
    let w = i64::from(width.unwrap_or(DEFAULT_HINT_WIDTH));
    let size = match name {
        "transfers" | "sync" => (w - 46) / 2,
        "du" if command.contains("--versions") => w - 13 - 11,
        "du" => w - 13,
        "mediainfo" => w - 28,
        "backup" => (w - 21) / 2,
        _ => return None,
    };
    Some(size.max(0))
}

/// Interpret a yes/no answer.
pub fn parse_confirmation(line: &str) -> Option<bool> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Ask a yes/no question in the middle of a command.
///
/// Interrupts and end of input count as "no". The previous prompt state is
/// restored afterwards.
pub async fn ask_confirmation(
    shared: &ShellState,
    question: &str,
    input: &mut dyn LineSource,
    console: &dyn Console,
) -> bool {
    let previous = shared.prompt_state();
    shared.set_prompt_state(PromptState::ConfirmDeletion);
    input.set_secret(false);

    let mut prompt = if question.trim().is_empty() {
        PromptState::ConfirmDeletion.default_prompt().to_string()
    } else {
        question.to_string()
    };
    let answer = loop {
        console.show_prompt(&prompt, true);
        match input.next_line(ANSWER_POLL).await {
            LineEvent::Line(line) => match parse_confirmation(&line) {
                Some(answer) => break answer,
                None => prompt = CONFIRMATION_RETRY.to_string(),
            },
            LineEvent::Timeout => continue,
            LineEvent::Interrupted | LineEvent::Eof => break false,
        }
    };

    console.hide_prompt();
    shared.set_prompt_state(previous);
    answer
}

/// Quote a secret as one command word.
pub fn quote_secret(secret: &str) -> String {
    let mut quoted = String::with_capacity(secret.len() + 2);
    quoted.push('"');
    for c in secret.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Split a line into words. Quotes group words and are removed; `""` yields an
/// empty word.
pub fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

/// Drop option words (`-x`, `--flag=value`), keeping a lone `-`.
fn discard_flags(words: &[String]) -> Vec<String> {
    words
        .iter()
        .filter(|w| !(w.len() > 1 && w.starts_with('-')))
        .cloned()
        .collect()
}
