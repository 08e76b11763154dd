//! Input side of the terminal: a pull-based source of submitted lines.

use crate::console::{Console, TerminalConsole};
use async_trait::async_trait;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Line(String),
    /// Nothing was submitted before the timeout.
    Timeout,
    /// The user cancelled the current line.
    Interrupted,
    Eof,
}

#[async_trait]
pub trait LineSource: Send {
    async fn next_line(&mut self, timeout: Duration) -> LineEvent;

    /// Secret input is not echoed and not kept in history.
    fn set_secret(&mut self, secret: bool);

    /// What has been typed so far on the current line.
    fn partial_line(&self) -> String;

    /// Discard the current line.
    fn reset(&mut self);

    fn history(&self) -> Vec<String>;

    async fn wait_for_key(&mut self);
}

fn push_history(history: &mut Vec<String>, line: &str) {
    if line.trim().is_empty() || history.last().is_some_and(|last| last == line) {
        return;
    }
    history.push(line.to_string());
}

/// Line editor over crossterm key events, for a terminal in raw mode.
pub struct TerminalLineReader {
    console: Arc<TerminalConsole>,
    events: mpsc::UnboundedReceiver<Event>,
    buffer: String,
    secret: bool,
    history: Vec<String>,
    history_pos: Option<usize>,
}

impl TerminalLineReader {
    /// Start reading terminal events on a dedicated thread.
    pub fn spawn(console: Arc<TerminalConsole>) -> std::io::Result<Self> {
        let (tx, events) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("terminal-input".into())
            .spawn(move || {
                loop {
                    match crossterm::event::read() {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("reading terminal input failed: {e}");
                            break;
                        }
                    }
                }
            })?;

        Ok(Self {
            console,
            events,
            buffer: String::new(),
            secret: false,
            history: Vec::new(),
            history_pos: None,
        })
    }

    fn redraw(&self) {
        if self.secret {
            self.console.set_input("");
        } else {
            self.console.set_input(&self.buffer);
        }
    }

    fn recall(&mut self, older: bool) {
        if self.secret || self.history.is_empty() {
            return;
        }
        let last = self.history.len() - 1;
        self.history_pos = match (self.history_pos, older) {
            (None, true) => Some(last),
            (None, false) => None,
            (Some(pos), true) => Some(pos.saturating_sub(1)),
            (Some(pos), false) if pos < last => Some(pos + 1),
            (Some(_), false) => None,
        };
        self.buffer = self
            .history_pos
            .map(|pos| self.history[pos].clone())
            .unwrap_or_default();
    }

    /// Apply one key. Returns an event when the key ends the line.
    fn apply_key(&mut self, key: KeyEvent) -> Option<LineEvent> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        match key.code {
            KeyCode::Char('c') if ctrl => {
                self.buffer.clear();
                self.history_pos = None;
                self.console.commit_input();
                return Some(LineEvent::Interrupted);
            }
            KeyCode::Char('d') if ctrl && self.buffer.is_empty() => {
                self.console.commit_input();
                return Some(LineEvent::Eof);
            }
            KeyCode::Char('l') if ctrl => self.console.clear_screen(),
            KeyCode::Char('u') if ctrl => self.buffer.clear(),
            KeyCode::Enter => {
                let line = std::mem::take(&mut self.buffer);
                self.history_pos = None;
                self.console.commit_input();
                if !self.secret {
                    push_history(&mut self.history, &line);
                }
                return Some(LineEvent::Line(line));
            }
            KeyCode::Backspace => {
                self.buffer.pop();
            }
            KeyCode::Up => self.recall(true),
            KeyCode::Down => self.recall(false),
            KeyCode::Char(c) if !ctrl => self.buffer.push(c),
            _ => return None,
        }
        self.redraw();
        None
    }
}

#[async_trait]
impl LineSource for TerminalLineReader {
    async fn next_line(&mut self, timeout: Duration) -> LineEvent {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let event = match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Err(_) => return LineEvent::Timeout,
                Ok(None) => return LineEvent::Eof,
                Ok(Some(event)) => event,
            };
            match event {
                Event::Key(key) => {
                    if let Some(done) = self.apply_key(key) {
                        return done;
                    }
                }
                Event::Paste(text) => {
                    self.buffer.push_str(&text);
                    self.redraw();
                }
                Event::Resize(..) => self.redraw(),
                _ => {}
            }
        }
    }

    fn set_secret(&mut self, secret: bool) {
        self.secret = secret;
    }

    fn partial_line(&self) -> String {
        self.buffer.clone()
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.history_pos = None;
        self.redraw();
    }

    fn history(&self) -> Vec<String> {
        self.history.clone()
    }

    async fn wait_for_key(&mut self) {
        while let Some(event) = self.events.recv().await {
            if matches!(event, Event::Key(key) if key.kind == KeyEventKind::Press) {
                return;
            }
        }
    }
}

/// Line source over a non-terminal reader such as piped stdin.
///
/// Interrupts come from SIGINT through `interrupt` and only count while a
/// read is pending; the sender uses `notify_waiters`.
pub struct PipedLineReader<R> {
    lines: Lines<R>,
    interrupt: Arc<Notify>,
    secret: bool,
    history: Vec<String>,
}

impl PipedLineReader<BufReader<Stdin>> {
    pub fn stdin(interrupt: Arc<Notify>) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), interrupt)
    }
}

impl<R> PipedLineReader<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R, interrupt: Arc<Notify>) -> Self {
        Self {
            lines: reader.lines(),
            interrupt,
            secret: false,
            history: Vec::new(),
        }
    }
}

#[async_trait]
impl<R> LineSource for PipedLineReader<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_line(&mut self, timeout: Duration) -> LineEvent {
        tokio::select! {
            read = tokio::time::timeout(timeout, self.lines.next_line()) => match read {
                Err(_) => LineEvent::Timeout,
                Ok(Ok(Some(line))) => {
                    let line = line.trim_end_matches('\r').to_string();
                    if !self.secret {
                        push_history(&mut self.history, &line);
                    }
                    LineEvent::Line(line)
                }
                Ok(Ok(None)) => LineEvent::Eof,
                Ok(Err(e)) => {
                    debug!("reading input failed: {e}");
                    LineEvent::Eof
                }
            },
            _ = self.interrupt.notified() => LineEvent::Interrupted,
        }
    }

    fn set_secret(&mut self, secret: bool) {
        self.secret = secret;
    }

    fn partial_line(&self) -> String {
        String::new()
    }

    fn reset(&mut self) {}

    fn history(&self) -> Vec<String> {
        self.history.clone()
    }

    async fn wait_for_key(&mut self) {
        let _ = self.lines.next_line().await;
    }
}
