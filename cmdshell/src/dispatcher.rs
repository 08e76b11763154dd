//! Routes push notifications from the server to the console and shell state.

use crate::console::{Console, centered};
use crate::prompt::PromptState;
use crate::state::ShellState;
use async_trait::async_trait;
use cmdshell_ipc::{
    NotificationEvent, NotificationHandler, PROGRESS_COMPLETE, ProtocolError, SessionChannel,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const RESTART_PROMPT: &str =
    "RESTART REQUIRED BY SERVER (due to an update). Press any key to continue.";

const LOGGING_IN_NOTICE: &str = "Server is still trying to log in. Still, some commands are available.\nType \"help\", to list them.";
const RESUMING_BANNER: &str = "Resuming session ... ";

/// Removed from broadcast messages before display.
const MESSAGE_MARKER: &str = "%mega-%";
/// Messages starting with this are printed without centering.
const RAW_MESSAGE_PREFIX: &str = "-----";

/// Width assumed when the terminal size is unknown.
const FALLBACK_WIDTH: u16 = 75;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Time given to the server to come back before showing the restart prompt.
    pub restart_grace: Duration,
    /// Pause after a record with an unknown tag.
    pub unrecognized_pause: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            restart_grace: Duration::from_secs(3),
            unrecognized_pause: Duration::from_secs(1),
        }
    }
}

pub struct NotificationDispatcher {
    shared: Arc<ShellState>,
    console: Arc<dyn Console>,
    config: DispatcherConfig,
    unrecognized: AtomicUsize,
}

impl NotificationDispatcher {
    pub fn new(shared: Arc<ShellState>, console: Arc<dyn Console>, config: DispatcherConfig) -> Self {
        Self {
            shared,
            console,
            config,
            unrecognized: AtomicUsize::new(0),
        }
    }

    /// Number of records with unknown tags seen so far.
    pub fn unrecognized_count(&self) -> usize {
        self.unrecognized.load(Ordering::Relaxed)
    }

    fn width(&self) -> usize {
        let width = self.console.width().unwrap_or(FALLBACK_WIDTH);
        usize::from(width.saturating_sub(1).max(1))
    }

    fn print_centered(&self, text: &str) {
        self.console.print(&centered(text, self.width()));
    }

    fn broadcast(&self, raw: &str, after_progress: bool) {
        if !self.shared.is_new_message(raw) {
            debug!("repeated message dropped");
            return;
        }
        let contents = raw.replace(MESSAGE_MARKER, "");
        if raw.starts_with(RAW_MESSAGE_PREFIX) {
            self.console.print(&format!("\n{contents}"));
        } else {
            if after_progress {
                self.console.write("\n");
            }
            self.print_centered(&contents);
        }
    }

    async fn restart(&self, channel: &SessionChannel) {
        info!("server requested a restart");
        self.shared.request_exit(true);
        channel.mark_server_updating();

        tokio::time::sleep(self.config.restart_grace).await;
        self.shared.set_custom_prompt(RESTART_PROMPT);
        self.console.show_prompt(RESTART_PROMPT, true);
    }
}

#[async_trait]
impl NotificationHandler for NotificationDispatcher {
    async fn handle(&self, event: NotificationEvent, channel: &SessionChannel) {
        let after_progress = match &event {
            NotificationEvent::Progress { .. } => false,
            _ => self.shared.take_partial_progress(),
        };

        match event {
            NotificationEvent::PromptChanged(text) => {
                if self.shared.is_logging_in() {
                    self.print_centered(LOGGING_IN_NOTICE);
                }
                self.shared.set_custom_prompt(text);
                channel.mark_server_ready();
                if self.shared.prompt_state() == PromptState::Command {
                    self.console.update_prompt(&self.shared.prompt_text());
                }
            }
            NotificationEvent::TransferEnded { direction, path } => {
                if after_progress {
                    self.console.write("\n");
                }
                self.console
                    .print(&format!("{} finished: {path}", direction.label()));
            }
            NotificationEvent::LoggingEnded => self.shared.set_logging_in(false),
            NotificationEvent::LoggingStarted => {
                self.shared.set_logging_in(true);
                if self.shared.take_resume_banner() {
                    self.print_centered(RESUMING_BANNER);
                }
            }
            NotificationEvent::BroadcastMessage(text) => self.broadcast(&text, after_progress),
            NotificationEvent::ClientIdAssigned(id) => channel.set_client_id(id),
            NotificationEvent::Progress {
                received,
                total,
                title,
            } => {
                self.shared
                    .set_partial_progress(received != PROGRESS_COMPLETE);
                if let Some(line) = self
                    .shared
                    .render_progress(received, total, title.as_deref())
                {
                    self.console
                        .progress(&line.format(self.width()), line.finished);
                }
            }
            NotificationEvent::Acknowledged => {}
            NotificationEvent::RestartRequested => self.restart(channel).await,
            NotificationEvent::Unrecognized(raw) => {
                if after_progress {
                    self.console.write("\n");
                }
                let count = self.unrecognized.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(count, "{}", ProtocolError::UnrecognizedTag(raw));
                tokio::time::sleep(self.config.unrecognized_pause).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{Output, RecordingConsole};
    use cmdshell_ipc::{ChannelConfig, TransferDirection, memory::MemoryTransport};
    use pretty_assertions::assert_eq;

    struct Fixture {
        dispatcher: NotificationDispatcher,
        shared: Arc<ShellState>,
        console: Arc<RecordingConsole>,
        channel: Arc<SessionChannel>,
    }

    fn fixture() -> Fixture {
        let shared = Arc::new(ShellState::new());
        let console = Arc::new(RecordingConsole::default());
        let (transport, _server) = MemoryTransport::pair();
        let channel = SessionChannel::new(transport, ChannelConfig::default());
        let dispatcher = NotificationDispatcher::new(
            Arc::clone(&shared),
            console.clone(),
            DispatcherConfig::default(),
        );
        Fixture {
            dispatcher,
            shared,
            console,
            channel,
        }
    }

    impl Fixture {
        async fn send(&self, event: NotificationEvent) {
            self.dispatcher.handle(event, &self.channel).await;
        }
    }

    #[tokio::test]
    async fn test_repeated_message_prints_once() {
        let f = fixture();
        f.send(NotificationEvent::BroadcastMessage("hello".into()))
            .await;
        f.send(NotificationEvent::BroadcastMessage("hello".into()))
            .await;
        f.send(NotificationEvent::BroadcastMessage("other".into()))
            .await;

        let printed = |f: &Fixture| -> Vec<String> {
            f.console
                .printed_lines()
                .iter()
                .map(|line| line.trim().to_string())
                .collect()
        };
        assert_eq!(printed(&f), vec!["hello", "other"]);

        // A submitted line clears the memory.
        f.shared.clear_last_message();
        f.send(NotificationEvent::BroadcastMessage("other".into()))
            .await;
        assert_eq!(printed(&f), vec!["hello", "other", "other"]);
    }

    #[tokio::test]
    async fn test_message_marker_and_raw_prefix() {
        let f = fixture();
        f.send(NotificationEvent::BroadcastMessage("%mega-%hi".into()))
            .await;
        f.send(NotificationEvent::BroadcastMessage("-----\nraw text".into()))
            .await;

        let lines = f.console.printed_lines();
        assert_eq!(lines[0].trim(), "hi");
        assert_eq!(lines[1], "\n-----\nraw text");
    }

    #[tokio::test]
    async fn test_prompt_marks_server_ready() {
        let f = fixture();
        f.send(NotificationEvent::PromptChanged("cloud:/> ".into()))
            .await;

        assert!(f.channel.is_server_ready());
        assert_eq!(f.shared.prompt_text(), "cloud:/> ");
        assert_eq!(
            f.console.outputs(),
            vec![Output::PromptUpdate("cloud:/> ".into())]
        );
    }

    #[tokio::test]
    async fn test_prompt_not_redrawn_during_secret_entry() {
        let f = fixture();
        f.shared.set_prompt_state(PromptState::LoginPassword);
        f.send(NotificationEvent::PromptChanged("cloud:/> ".into()))
            .await;

        assert!(f.console.outputs().is_empty());
        assert_eq!(f.shared.prompt_text(), "Password:");
    }

    #[tokio::test]
    async fn test_login_banner_and_notice() {
        let f = fixture();
        f.send(NotificationEvent::LoggingStarted).await;
        f.send(NotificationEvent::LoggingStarted).await;
        f.send(NotificationEvent::PromptChanged("> ".into())).await;
        f.send(NotificationEvent::LoggingEnded).await;
        f.send(NotificationEvent::PromptChanged("> ".into())).await;

        let lines = f.console.printed_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].trim(), RESUMING_BANNER.trim());
        assert!(lines[1].contains("still trying to log in"));
        assert!(!f.shared.is_logging_in());
    }

    #[tokio::test]
    async fn test_client_id_assignment() {
        let f = fixture();
        f.send(NotificationEvent::ClientIdAssigned("12".into()))
            .await;
        assert_eq!(f.channel.client_id().as_deref(), Some("12"));
    }

    #[tokio::test]
    async fn test_transfer_end_after_partial_progress() {
        let f = fixture();
        f.send(NotificationEvent::Progress {
            received: 50,
            total: 100,
            title: None,
        })
        .await;
        f.send(NotificationEvent::TransferEnded {
            direction: TransferDirection::Download,
            path: "/a.txt".into(),
        })
        .await;

        let outputs = f.console.outputs();
        assert!(matches!(&outputs[0], Output::Progress(line, false) if line.starts_with("TRANSFERRING")));
        assert_eq!(outputs[1], Output::Text("\n".into()));
        assert_eq!(outputs[2], Output::Text("Download finished: /a.txt\n".into()));
    }

    #[tokio::test]
    async fn test_completed_progress_needs_no_newline() {
        let f = fixture();
        f.send(NotificationEvent::Progress {
            received: PROGRESS_COMPLETE,
            total: 100,
            title: Some("UPLOADING".into()),
        })
        .await;
        f.send(NotificationEvent::TransferEnded {
            direction: TransferDirection::Upload,
            path: "b".into(),
        })
        .await;

        let outputs = f.console.outputs();
        assert!(matches!(&outputs[0], Output::Progress(line, true) if line.contains("100.00 %")));
        assert_eq!(outputs[1], Output::Text("Upload finished: b\n".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_sets_flags_and_prompt() {
        let f = fixture();
        let started = tokio::time::Instant::now();
        f.send(NotificationEvent::RestartRequested).await;

        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(f.shared.exit_requested());
        assert!(f.shared.reboot_requested());
        assert!(f.channel.is_server_updating());
        assert_eq!(f.shared.prompt_text(), RESTART_PROMPT);
        assert_eq!(
            f.console.outputs(),
            vec![Output::Prompt(RESTART_PROMPT.into(), true)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_tag_pauses() {
        let f = fixture();
        let started = tokio::time::Instant::now();
        f.send(NotificationEvent::Unrecognized("bogus:1".into()))
            .await;
        f.send(NotificationEvent::Acknowledged).await;

        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(f.dispatcher.unrecognized_count(), 1);
        assert!(!f.shared.exit_requested());
    }
}
