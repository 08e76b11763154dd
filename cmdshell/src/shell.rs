//! The interactive read loop.
//!
//! Pulls lines from a [`LineSource`], feeds them to the prompt state machine
//! and keeps the session channel alive while the user is idle.

use crate::console::{Console, centered};
use crate::dispatcher::{DispatcherConfig, NotificationDispatcher};
use crate::error::ShellError;
use crate::line_input::{LineEvent, LineSource};
use crate::prompt::{self, LineOutcome, PromptStateMachine, ShellBackend};
use crate::state::ShellState;
use async_trait::async_trait;
use cmdshell_ipc::{Question, ResponseHandler, SessionChannel, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const WELCOME: &str = "Welcome to cmdshell";
const WELCOME_HINT: &str = "Type \"help\" to list the available commands.";

#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// How long to wait for the server's first prompt.
    pub ready_timeout: Duration,
    /// Minimum time between two liveness probes while idle.
    pub retry_interval: Duration,
    /// How long one read waits before the loop does its housekeeping.
    pub poll_interval: Duration,
    pub show_welcome: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(20),
            retry_interval: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            show_welcome: true,
        }
    }
}

pub struct Shell {
    channel: Arc<SessionChannel>,
    console: Arc<dyn Console>,
    shared: Arc<ShellState>,
    dispatcher: Arc<NotificationDispatcher>,
    machine: PromptStateMachine,
    config: ShellConfig,
}

impl Shell {
    pub fn new(
        channel: Arc<SessionChannel>,
        console: Arc<dyn Console>,
        config: ShellConfig,
        dispatcher_config: DispatcherConfig,
    ) -> Self {
        let shared = Arc::new(ShellState::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::clone(&shared),
            Arc::clone(&console),
            dispatcher_config,
        ));
        Self {
            machine: PromptStateMachine::new(Arc::clone(&shared)),
            channel,
            console,
            shared,
            dispatcher,
            config,
        }
    }

    pub fn shared(&self) -> Arc<ShellState> {
        Arc::clone(&self.shared)
    }

    pub fn channel(&self) -> &Arc<SessionChannel> {
        &self.channel
    }

    /// Subscribe to server notifications and wait for the first prompt.
    ///
    /// Returns whether the server announced itself in time. The shell still
    /// runs when it did not; commands that reach the server keep working.
    pub async fn connect(&self) -> bool {
        if let Err(e) = self
            .channel
            .register_for_state_changes(true, self.dispatcher.clone())
            .await
        {
            warn!("could not register for state changes: {e}");
        }

        let ready = self
            .channel
            .wait_for_server_ready(self.config.ready_timeout)
            .await;
        if !ready {
            self.console.print_error(
                &ShellError::ServerUnavailable {
                    endpoint: self.channel.endpoint(),
                }
                .to_string(),
            );
        }
        ready
    }

    fn print_welcome(&self) {
        let width = usize::from(self.console.width().unwrap_or(75).saturating_sub(1));
        self.console.print(&centered(WELCOME, width));
        self.console.print(&centered(WELCOME_HINT, width));
    }

    async fn reregister(&self) {
        if !self.channel.registration_required() {
            return;
        }
        match self
            .channel
            .register_for_state_changes(true, self.dispatcher.clone())
            .await
        {
            Ok(true) => info!("re-registered for state changes"),
            Ok(false) => {}
            Err(e) => debug!("re-registration failed: {e}"),
        }
    }

    fn liveness_check_due(&self, last_retry: Instant, partial: &str) -> bool {
        last_retry.elapsed() >= self.config.retry_interval
            && !self.shared.exit_requested()
            && !self.channel.is_server_updating()
            && !is_exit_prefix(partial)
    }

    /// Run until the user leaves, input ends or `shutdown` fires.
    pub async fn run(
        &mut self,
        input: &mut dyn LineSource,
        shutdown: CancellationToken,
    ) -> LineOutcome {
        if self.config.show_welcome {
            self.print_welcome();
        }
        let mut last_retry = Instant::now();

        loop {
            if self.shared.exit_requested() {
                if self.shared.reboot_requested() {
                    input.wait_for_key().await;
                    return LineOutcome::Reboot;
                }
                return LineOutcome::Exit;
            }

            let state = self.shared.prompt_state();
            input.set_secret(state.is_secret());
            self.console
                .show_prompt(&self.shared.prompt_text(), !state.is_secret());

            let event = tokio::select! {
                event = input.next_line(self.config.poll_interval) => event,
                _ = shutdown.cancelled() => {
                    debug!("shutdown requested");
                    return LineOutcome::Exit;
                }
            };

            match event {
                LineEvent::Timeout => {
                    if self.liveness_check_due(last_retry, &input.partial_line()) {
                        last_retry = Instant::now();
                        match self.channel.retry_connection().await {
                            Ok(()) => self.reregister().await,
                            Err(e) => debug!("server still unreachable: {e}"),
                        }
                    }
                }
                LineEvent::Interrupted => {
                    self.machine.interrupt();
                    input.reset();
                }
                LineEvent::Eof => return LineOutcome::Exit,
                LineEvent::Line(line) => {
                    self.console.hide_prompt();
                    self.shared.clear_last_message();
                    if !line.trim().is_empty() {
                        self.shared.reset_progress();
                    }

                    let mut backend = ChannelBackend {
                        channel: &self.channel,
                        console: self.console.as_ref(),
                        shared: &self.shared,
                        input: &mut *input,
                    };
                    let outcome = self.machine.handle_line(&line, &mut backend).await;
                    if outcome != LineOutcome::Continue {
                        return outcome;
                    }
                    self.reregister().await;
                }
            }
        }
    }
}

/// A partial line that is on its way to becoming `exit` or `quit`.
fn is_exit_prefix(partial: &str) -> bool {
    let partial = partial.trim();
    !partial.is_empty()
        && ["exit", "quit"]
            .iter()
            .any(|word| word.starts_with(partial) || partial.starts_with(word))
}

/// [`ShellBackend`] over the live session channel and terminal.
struct ChannelBackend<'a> {
    channel: &'a SessionChannel,
    console: &'a dyn Console,
    shared: &'a ShellState,
    input: &'a mut dyn LineSource,
}

#[async_trait]
impl ShellBackend for ChannelBackend<'_> {
    async fn execute(&mut self, command: &str) -> Result<StatusCode, ShellError> {
        let mut answers = InteractiveAnswers {
            console: self.console,
            shared: self.shared,
            input: &mut *self.input,
        };
        let outcome = self.channel.execute(command, &mut answers).await?;
        if !outcome.output.is_empty() {
            self.console.write(&outcome.output);
        }
        Ok(outcome.status)
    }

    async fn is_logged_in(&mut self) -> Result<bool, ShellError> {
        Ok(self.channel.is_logged_in().await?)
    }

    fn client_id(&self) -> Option<String> {
        self.channel.client_id()
    }

    fn terminal_width(&self) -> Option<u16> {
        self.console.width()
    }

    fn set_server_updating(&mut self, updating: bool) {
        if updating {
            self.channel.mark_server_updating();
        } else {
            self.channel.unmark_server_updating();
        }
    }

    fn print(&mut self, text: &str) {
        self.console.print(text);
    }

    fn print_error(&mut self, text: &str) {
        self.console.print_error(text);
    }

    fn clear_screen(&mut self) {
        self.console.clear_screen();
    }

    fn history(&self) -> Vec<String> {
        self.input.history()
    }
}

/// Answers server questions by asking the user.
struct InteractiveAnswers<'a> {
    console: &'a dyn Console,
    shared: &'a ShellState,
    input: &'a mut dyn LineSource,
}

impl InteractiveAnswers<'_> {
    async fn read_text(&mut self, question: &str) -> String {
        self.input.set_secret(false);
        self.console.show_prompt(question, true);
        let answer = loop {
            match self.input.next_line(Duration::from_secs(1)).await {
                LineEvent::Line(line) => break line,
                LineEvent::Timeout => continue,
                LineEvent::Interrupted | LineEvent::Eof => break String::new(),
            }
        };
        self.console.hide_prompt();
        answer
    }
}

#[async_trait]
impl ResponseHandler for InteractiveAnswers<'_> {
    async fn answer(&mut self, question: Question) -> String {
        match question {
            Question::Confirmation(text) => {
                let yes =
                    prompt::ask_confirmation(self.shared, &text, &mut *self.input, self.console)
                        .await;
                let answer = if yes { "yes" } else { "no" };
                answer.to_string()
            }
            Question::Text(text) => self.read_text(&text).await,
        }
    }

    fn partial_output(&mut self, text: &str, is_error: bool) {
        if is_error {
            self.console.print_error(text);
        } else {
            self.console.write(text);
        }
    }
}
