//! Session channel: the shell's single handle on the server.
//!
//! Commands run synchronously from the caller's point of view, each on its own
//! connection, so concurrent callers never see each other's frames. Push
//! notifications arrive on a separate long-lived subscription connection that a
//! background task drains into a [`NotificationHandler`].
//!
//! Connection flags live behind one `std::sync::Mutex` that is only held for
//! the few instructions that read or write them, never across an `.await`.

use crate::codec::{
    FRAME_DELIMITER, LOGGED_IN_QUERY, NotificationEvent, RECORD_DELIMITER, REGISTER_LISTENER,
    RETRY_CONNECTION, ResponseFrame, StatusCode, encode_request,
};
use crate::error::{ChannelError, TransportError};
use crate::transport::{Connection, Transport};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Tuning knobs of the session channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// How long one receive on the subscription waits before looping.
    pub poll_interval: Duration,
    /// Upper bound on the wait for each response frame. `None` waits forever,
    /// which is what long transfers need.
    pub command_timeout: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            command_timeout: None,
        }
    }
}

/// Final result of a command exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub status: StatusCode,
    pub output: String,
}

/// A question the server asks in the middle of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Question {
    /// Expects a yes/no style answer.
    Confirmation(String),
    /// Expects free text.
    Text(String),
}

/// Caller-side hooks for one command exchange.
#[async_trait]
pub trait ResponseHandler: Send {
    /// Produce the answer sent back to the server.
    async fn answer(&mut self, question: Question) -> String;

    /// Output streamed before the final frame.
    fn partial_output(&mut self, _text: &str, _is_error: bool) {}
}

/// Declines every question. Used for internal commands.
pub struct DeclineQuestions;

#[async_trait]
impl ResponseHandler for DeclineQuestions {
    async fn answer(&mut self, question: Question) -> String {
        match question {
            Question::Confirmation(_) => "no".to_string(),
            Question::Text(_) => String::new(),
        }
    }
}

/// Consumer of decoded push notifications.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, event: NotificationEvent, channel: &SessionChannel);
}

#[derive(Debug, Default)]
struct ConnectionState {
    /// The last connection attempt succeeded.
    open: bool,
    /// A `prompt:` record has been received.
    server_ready: bool,
    /// The server is restarting on purpose; disconnects are expected.
    server_updating: bool,
    /// A subscription is believed to be alive.
    registered: bool,
    /// The last subscription attempt failed or the subscription died.
    registration_failed: bool,
    client_id: Option<String>,
}

pub struct SessionChannel {
    transport: Arc<dyn Transport>,
    config: ChannelConfig,
    state: Mutex<ConnectionState>,
    ready: Notify,
    subscription: Mutex<Option<JoinHandle<()>>>,
}

impl SessionChannel {
    pub fn new(transport: Arc<dyn Transport>, config: ChannelConfig) -> Arc<Self> {
        Arc::new(Self {
            transport,
            config,
            state: Mutex::new(ConnectionState::default()),
            ready: Notify::new(),
            subscription: Mutex::new(None),
        })
    }

    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        // Flags stay consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    /// Run one command and wait for its final response frame.
    ///
    /// A lost connection marks the channel closed and unregistered, so the
    /// next registration attempt subscribes again.
    pub async fn execute(
        &self,
        command: &str,
        handler: &mut dyn ResponseHandler,
    ) -> Result<CommandOutcome, ChannelError> {
        debug!(command = command_name(command), "executing command");

        let result = self.exchange(command, handler).await;
        if matches!(&result, Err(e) if e.is_disconnect()) {
            self.connection_lost();
        }
        result
    }

    async fn exchange(
        &self,
        command: &str,
        handler: &mut dyn ResponseHandler,
    ) -> Result<CommandOutcome, ChannelError> {
        let mut conn = self.transport.connect().await?;
        self.state().open = true;
        conn.send(&encode_request(command)).await?;

        loop {
            let raw = self.receive_frame(conn.as_mut()).await?;
            let frame = ResponseFrame::decode(&raw)?;
            match frame.status {
                StatusCode::RequiresConfirmation => {
                    let answer = handler.answer(Question::Confirmation(frame.body)).await;
                    conn.send(&encode_request(&answer)).await?;
                }
                StatusCode::RequiresString => {
                    let answer = handler.answer(Question::Text(frame.body)).await;
                    conn.send(&encode_request(&answer)).await?;
                }
                StatusCode::PartialOutput => handler.partial_output(&frame.body, false),
                StatusCode::PartialError => handler.partial_output(&frame.body, true),
                status => {
                    if let Err(e) = conn.close().await {
                        trace!("closing command connection: {e}");
                    }
                    debug!(command = command_name(command), %status, "command finished");
                    return Ok(CommandOutcome {
                        status,
                        output: frame.body,
                    });
                }
            }
        }
    }

    /// Run a command that must not ask anything.
    pub async fn execute_simple(&self, command: &str) -> Result<CommandOutcome, ChannelError> {
        self.execute(command, &mut DeclineQuestions).await
    }

    async fn receive_frame(&self, conn: &mut dyn Connection) -> Result<Vec<u8>, TransportError> {
        match self.config.command_timeout {
            Some(timeout) => conn.receive(FRAME_DELIMITER, timeout).await,
            None => loop {
                match conn
                    .receive(FRAME_DELIMITER, self.config.poll_interval)
                    .await
                {
                    Err(TransportError::Timeout) => continue,
                    other => break other,
                }
            },
        }
    }

    /// Whether the server holds a logged-in session.
    pub async fn is_logged_in(&self) -> Result<bool, ChannelError> {
        let outcome = self.execute_simple(LOGGED_IN_QUERY).await?;
        Ok(outcome.status != StatusCode::NotLoggedIn)
    }

    /// Lightweight keep-alive used to detect a server that came back.
    pub async fn retry_connection(&self) -> Result<(), ChannelError> {
        self.execute_simple(RETRY_CONNECTION).await.map(|_| ())
    }

    /// Subscribe to the push stream.
    ///
    /// Returns `Ok(false)` without doing anything when a live subscription
    /// already exists.
    pub async fn register_for_state_changes(
        self: &Arc<Self>,
        also_notifications: bool,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<bool, TransportError> {
        if !self.registration_required() {
            return Ok(false);
        }

        let request = if also_notifications {
            REGISTER_LISTENER.to_string()
        } else {
            format!("{REGISTER_LISTENER} --no-notifications")
        };

        let conn = match self.open_subscription(&request).await {
            Ok(conn) => conn,
            Err(e) => {
                self.subscription_lost(&e);
                return Err(e);
            }
        };

        {
            let mut state = self.state();
            state.open = true;
            state.registered = true;
            state.registration_failed = false;
        }

        let channel = Arc::clone(self);
        let task = tokio::spawn(async move { channel.subscription_loop(conn, handler).await });
        let previous = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }

        debug!(endpoint = %self.transport.endpoint(), "registered for state changes");
        Ok(true)
    }

    async fn open_subscription(&self, request: &str) -> Result<Box<dyn Connection>, TransportError> {
        let mut conn = self.transport.connect().await?;
        conn.send(&encode_request(request)).await?;
        Ok(conn)
    }

    async fn subscription_loop(
        self: Arc<Self>,
        mut conn: Box<dyn Connection>,
        handler: Arc<dyn NotificationHandler>,
    ) {
        loop {
            match conn
                .receive(RECORD_DELIMITER, self.config.poll_interval)
                .await
            {
                Ok(raw) => {
                    if raw.is_empty() {
                        continue;
                    }
                    let record = String::from_utf8_lossy(&raw);
                    match NotificationEvent::parse(&record) {
                        Ok(event) => {
                            trace!(?event, "state change");
                            handler.handle(event, &self).await;
                        }
                        Err(e) => warn!("dropping state change: {e}"),
                    }
                }
                Err(TransportError::Timeout) => continue,
                Err(e) => {
                    self.subscription_lost(&e);
                    return;
                }
            }
        }
    }

    fn connection_lost(&self) {
        let mut state = self.state();
        state.open = false;
        state.registered = false;
    }

    fn subscription_lost(&self, err: &TransportError) {
        if err.is_disconnect() {
            self.connection_lost();
        }
        let updating = {
            let mut state = self.state();
            state.registered = false;
            state.registration_failed = true;
            state.server_updating
        };
        self.ready.notify_waiters();

        if updating {
            debug!("state listener lost while server updates: {err}");
        } else {
            warn!("state listener lost: {err}");
        }
    }

    /// True when no live subscription exists.
    pub fn registration_required(&self) -> bool {
        if !self.state().registered {
            return true;
        }
        self.subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_none_or(|task| task.is_finished())
    }

    /// Wait until the server announced its prompt.
    ///
    /// Returns `false` on timeout or when the subscription failed first.
    pub async fn wait_for_server_ready(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.state();
                if state.server_ready {
                    return true;
                }
                if state.registration_failed {
                    return false;
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.is_server_ready();
            }
        }
    }

    pub fn mark_server_ready(&self) {
        self.state().server_ready = true;
        self.ready.notify_waiters();
    }

    pub fn is_server_ready(&self) -> bool {
        self.state().server_ready
    }

    pub fn is_server_updating(&self) -> bool {
        self.state().server_updating
    }

    pub fn mark_server_updating(&self) {
        self.state().server_updating = true;
    }

    pub fn unmark_server_updating(&self) {
        self.state().server_updating = false;
    }

    /// Whether the last connection attempt reached the server.
    pub fn is_open(&self) -> bool {
        self.state().open
    }

    pub fn client_id(&self) -> Option<String> {
        self.state().client_id.clone()
    }

    pub fn set_client_id(&self, id: impl Into<String>) {
        let id = id.into();
        debug!(client_id = %id, "client id assigned");
        self.state().client_id = Some(id);
    }

    /// Stop the subscription task and forget the connection.
    pub fn shutdown(&self) {
        if let Some(task) = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        let mut state = self.state();
        state.open = false;
        state.registered = false;
    }
}

/// First word of a command line. Full lines may carry secrets and are never logged.
fn command_name(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or_default()
}
