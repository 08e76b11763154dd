//! Fakes shared by the unit tests.

use crate::console::Console;
use crate::error::ShellError;
use crate::line_input::{LineEvent, LineSource};
use crate::prompt::ShellBackend;
use async_trait::async_trait;
use cmdshell_ipc::{ChannelError, StatusCode, TransportError};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Backend that records what the state machine asks of it.
#[derive(Debug, Default)]
pub struct FakeBackend {
    pub commands: Vec<String>,
    /// Popped once per executed command; `Ok` when empty.
    pub statuses: VecDeque<StatusCode>,
    pub logged_in: bool,
    pub client_id: Option<String>,
    pub width: Option<u16>,
    pub printed: Vec<String>,
    pub errors: Vec<String>,
    pub cleared: usize,
    pub updating: bool,
    /// Every server call fails as if the server were down.
    pub disconnected: bool,
    pub history: Vec<String>,
}

impl FakeBackend {
    fn down() -> ShellError {
        ChannelError::from(TransportError::ConnectRefused {
            endpoint: "fake".to_string(),
        })
        .into()
    }
}

#[async_trait]
impl ShellBackend for FakeBackend {
    async fn execute(&mut self, command: &str) -> Result<StatusCode, ShellError> {
        if self.disconnected {
            return Err(Self::down());
        }
        self.commands.push(command.to_string());
        Ok(self.statuses.pop_front().unwrap_or(StatusCode::Ok))
    }

    async fn is_logged_in(&mut self) -> Result<bool, ShellError> {
        if self.disconnected {
            return Err(Self::down());
        }
        Ok(self.logged_in)
    }

    fn client_id(&self) -> Option<String> {
        self.client_id.clone()
    }

    fn terminal_width(&self) -> Option<u16> {
        self.width
    }

    fn set_server_updating(&mut self, updating: bool) {
        self.updating = updating;
    }

    fn print(&mut self, text: &str) {
        self.printed.push(text.to_string());
    }

    fn print_error(&mut self, text: &str) {
        self.errors.push(text.to_string());
    }

    fn clear_screen(&mut self) {
        self.cleared += 1;
    }

    fn history(&self) -> Vec<String> {
        self.history.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Text(String),
    Error(String),
    Prompt(String, bool),
    PromptUpdate(String),
    HidePrompt,
    Progress(String, bool),
    Clear,
}

/// Console that keeps everything written to it.
#[derive(Debug, Default)]
pub struct RecordingConsole {
    outputs: Mutex<Vec<Output>>,
}

impl RecordingConsole {
    fn push(&self, output: Output) {
        self.outputs.lock().unwrap().push(output);
    }

    pub fn outputs(&self) -> Vec<Output> {
        self.outputs.lock().unwrap().clone()
    }

    /// Non-blank text writes, without their trailing newline.
    pub fn printed_lines(&self) -> Vec<String> {
        self.outputs()
            .into_iter()
            .filter_map(|output| match output {
                Output::Text(text) => {
                    let line = text.strip_suffix('\n').unwrap_or(&text).to_string();
                    (!line.is_empty()).then_some(line)
                }
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.outputs()
            .into_iter()
            .filter_map(|output| match output {
                Output::Error(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Prompts shown, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.outputs()
            .into_iter()
            .filter_map(|output| match output {
                Output::Prompt(text, _) => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl Console for RecordingConsole {
    fn write(&self, text: &str) {
        self.push(Output::Text(text.to_string()));
    }

    fn print_error(&self, line: &str) {
        self.push(Output::Error(line.to_string()));
    }

    fn show_prompt(&self, prompt: &str, echo: bool) {
        self.push(Output::Prompt(prompt.to_string(), echo));
    }

    fn update_prompt(&self, prompt: &str) {
        self.push(Output::PromptUpdate(prompt.to_string()));
    }

    fn hide_prompt(&self) {
        self.push(Output::HidePrompt);
    }

    fn progress(&self, line: &str, finished: bool) {
        self.push(Output::Progress(line.to_string(), finished));
    }

    fn clear_screen(&self) {
        self.push(Output::Clear);
    }

    fn width(&self) -> Option<u16> {
        Some(80)
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    Line(String),
    /// Nothing typed for this long, then a timeout.
    Idle(Duration),
    Interrupt,
    /// Text typed but not submitted; stays the partial line until the next step.
    Partial(String),
}

/// Line source that replays a script, then reports end of input.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    steps: VecDeque<Step>,
    partial: String,
    pub secret_flags: Vec<bool>,
    pub keys_waited: usize,
    history: Vec<String>,
}

impl ScriptedInput {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(lines.into_iter().map(|l| Step::Line(l.to_string())))
    }
}

#[async_trait]
impl LineSource for ScriptedInput {
    async fn next_line(&mut self, timeout: Duration) -> LineEvent {
        loop {
            match self.steps.pop_front() {
                None => return LineEvent::Eof,
                Some(Step::Line(line)) => {
                    self.partial.clear();
                    self.history.push(line.clone());
                    return LineEvent::Line(line);
                }
                Some(Step::Idle(idle)) => {
                    let waited = idle.min(timeout);
                    tokio::time::sleep(waited).await;
                    if let Some(rest) = idle.checked_sub(waited).filter(|d| !d.is_zero()) {
                        self.steps.push_front(Step::Idle(rest));
                    }
                    return LineEvent::Timeout;
                }
                Some(Step::Interrupt) => {
                    self.partial.clear();
                    return LineEvent::Interrupted;
                }
                Some(Step::Partial(text)) => self.partial = text,
            }
        }
    }

    fn set_secret(&mut self, secret: bool) {
        self.secret_flags.push(secret);
    }

    fn partial_line(&self) -> String {
        self.partial.clone()
    }

    fn reset(&mut self) {
        self.partial.clear();
    }

    fn history(&self) -> Vec<String> {
        self.history.clone()
    }

    async fn wait_for_key(&mut self) {
        self.keys_waited += 1;
    }
}
