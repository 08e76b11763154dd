//! State shared between the read loop and the notification dispatcher.
//!
//! Everything lives behind one mutex, held only for the handful of
//! instructions that touch it.

use crate::progress::{ProgressLine, ProgressRenderer};
use crate::prompt::PromptState;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Inner {
    prompt_state: PromptState,
    /// Prompt pushed by the server, shown in command mode.
    custom_prompt: Option<String>,
    exit_requested: bool,
    reboot_requested: bool,
    server_logging_in: bool,
    resume_banner_shown: bool,
    last_message: Option<String>,
    /// A partial progress line is on screen without a trailing newline.
    partial_progress: bool,
    progress: ProgressRenderer,
}

#[derive(Debug, Default)]
pub struct ShellState {
    inner: Mutex<Inner>,
}

impl ShellState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn prompt_state(&self) -> PromptState {
        self.lock().prompt_state
    }

    pub(crate) fn set_prompt_state(&self, state: PromptState) {
        self.lock().prompt_state = state;
    }

    /// Text of the prompt for the current state.
    pub fn prompt_text(&self) -> String {
        let inner = self.lock();
        match (inner.prompt_state, &inner.custom_prompt) {
            (PromptState::Command, Some(custom)) => custom.clone(),
            (state, _) => state.default_prompt().to_string(),
        }
    }

    pub fn set_custom_prompt(&self, text: impl Into<String>) {
        self.lock().custom_prompt = Some(text.into());
    }

    pub fn request_exit(&self, reboot: bool) {
        let mut inner = self.lock();
        inner.exit_requested = true;
        inner.reboot_requested |= reboot;
    }

    pub fn exit_requested(&self) -> bool {
        self.lock().exit_requested
    }

    pub fn reboot_requested(&self) -> bool {
        self.lock().reboot_requested
    }

    pub fn set_logging_in(&self, logging_in: bool) {
        self.lock().server_logging_in = logging_in;
    }

    pub fn is_logging_in(&self) -> bool {
        self.lock().server_logging_in
    }

    /// True the first time only.
    pub fn take_resume_banner(&self) -> bool {
        let mut inner = self.lock();
        !std::mem::replace(&mut inner.resume_banner_shown, true)
    }

    /// Remember `message` and report whether it differs from the previous one.
    pub fn is_new_message(&self, message: &str) -> bool {
        let mut inner = self.lock();
        if inner.last_message.as_deref() == Some(message) {
            return false;
        }
        inner.last_message = Some(message.to_string());
        true
    }

    pub fn clear_last_message(&self) {
        self.lock().last_message = None;
    }

    pub fn set_partial_progress(&self, shown: bool) {
        self.lock().partial_progress = shown;
    }

    /// Whether a partial progress line is showing; clears the mark.
    pub fn take_partial_progress(&self) -> bool {
        std::mem::take(&mut self.lock().partial_progress)
    }

    pub fn render_progress(
        &self,
        completed: i64,
        total: i64,
        title: Option<&str>,
    ) -> Option<ProgressLine> {
        self.lock().progress.render(completed, total, title)
    }

    pub fn reset_progress(&self) {
        self.lock().progress.reset();
    }
}
