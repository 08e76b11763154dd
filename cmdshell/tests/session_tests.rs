#![cfg(unix)]

use async_trait::async_trait;
use cmdshell::console::Console;
use cmdshell::dispatcher::DispatcherConfig;
use cmdshell::line_input::{LineEvent, LineSource};
use cmdshell::shell::{Shell, ShellConfig};
use cmdshell::LineOutcome;
use cmdshell_ipc::{
    ChannelConfig, Connection, FRAME_DELIMITER, REGISTER_LISTENER, ResponseFrame,
    SessionChannel, StatusCode, StreamConnection, UnixSocketTransport, encode_records,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

const STEP: Duration = Duration::from_secs(5);

type Listener = Arc<tokio::sync::Mutex<Option<StreamConnection<UnixStream>>>>;

/// Session server that logs requests and pushes records on the listener.
struct FakeServer {
    requests: Arc<Mutex<Vec<String>>>,
    task: tokio::task::JoinHandle<()>,
}

impl FakeServer {
    fn start(path: &Path, greeting: &'static [&'static str]) -> Self {
        let socket = UnixListener::bind(path).unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requests);
        let listener: Listener = Arc::default();

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = socket.accept().await {
                let log = Arc::clone(&log);
                let listener = Arc::clone(&listener);
                tokio::spawn(async move {
                    let mut conn = StreamConnection::new(stream);
                    let Ok(raw) = conn.receive(FRAME_DELIMITER, STEP).await else {
                        return;
                    };
                    let request = String::from_utf8(raw).unwrap();
                    log.lock().unwrap().push(request.clone());

                    if request.starts_with(REGISTER_LISTENER) {
                        conn.send(&encode_records(greeting.iter().copied()))
                            .await
                            .unwrap();
                        *listener.lock().await = Some(conn);
                        return;
                    }
                    serve(&mut conn, &request, &listener).await;
                });
            }
        });
        Self { requests, task }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn push(listener: &Listener, records: &[&str]) {
    if let Some(conn) = listener.lock().await.as_mut() {
        conn.send(&encode_records(records.iter().copied()))
            .await
            .unwrap();
    }
}

async fn serve(conn: &mut StreamConnection<UnixStream>, request: &str, listener: &Listener) {
    let reply = |status, body: &str| ResponseFrame::new(status, body).encode();
    let name = request.split_whitespace().next().unwrap_or_default();
    match name {
        "loggedin" => {
            conn.send(&reply(StatusCode::NotLoggedIn, "")).await.unwrap();
        }
        "get" => {
            push(
                listener,
                &["progress:0:100", "progress:50:100", "progress:-2:100", "endtransfer:D:/f.txt"],
            )
            .await;
            conn.send(&reply(StatusCode::Ok, "")).await.unwrap();
        }
        "find" => {
            conn.send(&reply(StatusCode::PartialOutput, "/a\n")).await.unwrap();
            conn.send(&reply(StatusCode::Ok, "/b\n")).await.unwrap();
        }
        "broadcast" => {
            push(listener, &["message:maintenance at noon", "message:maintenance at noon"]).await;
            conn.send(&reply(StatusCode::Ok, "")).await.unwrap();
        }
        _ => {
            conn.send(&reply(StatusCode::Ok, "")).await.unwrap();
        }
    }
}

#[derive(Default)]
struct Screen {
    text: Mutex<String>,
    progress: Mutex<Vec<(String, bool)>>,
}

impl Screen {
    fn text(&self) -> String {
        self.text.lock().unwrap().clone()
    }
}

impl Console for Screen {
    fn write(&self, text: &str) {
        self.text.lock().unwrap().push_str(text);
    }

    fn print_error(&self, line: &str) {
        self.write(&format!("ERROR: {line}\n"));
    }

    fn show_prompt(&self, _prompt: &str, _echo: bool) {}

    fn update_prompt(&self, _prompt: &str) {}

    fn hide_prompt(&self) {}

    fn progress(&self, line: &str, finished: bool) {
        self.progress
            .lock()
            .unwrap()
            .push((line.to_string(), finished));
    }

    fn clear_screen(&self) {}

    fn width(&self) -> Option<u16> {
        Some(60)
    }
}

/// Feeds fixed lines, pausing briefly before each so pushed records land.
struct Lines(VecDeque<String>);

impl Lines {
    fn new(lines: &[&str]) -> Self {
        Self(lines.iter().map(|l| l.to_string()).collect())
    }
}

#[async_trait]
impl LineSource for Lines {
    async fn next_line(&mut self, _timeout: Duration) -> LineEvent {
        tokio::time::sleep(Duration::from_millis(50)).await;
        match self.0.pop_front() {
            Some(line) => LineEvent::Line(line),
            None => LineEvent::Eof,
        }
    }

    fn set_secret(&mut self, _secret: bool) {}

    fn partial_line(&self) -> String {
        String::new()
    }

    fn reset(&mut self) {}

    fn history(&self) -> Vec<String> {
        Vec::new()
    }

    async fn wait_for_key(&mut self) {}
}

fn shell(path: &Path, screen: &Arc<Screen>) -> Shell {
    let channel = SessionChannel::new(
        Arc::new(UnixSocketTransport::new(path)),
        ChannelConfig::default(),
    );
    Shell::new(
        channel,
        screen.clone(),
        ShellConfig {
            ready_timeout: STEP,
            show_welcome: false,
            ..Default::default()
        },
        DispatcherConfig::default(),
    )
}

async fn run(shell: &mut Shell, lines: &[&str]) -> LineOutcome {
    shell
        .run(&mut Lines::new(lines), CancellationToken::new())
        .await
}

#[tokio::test]
async fn test_interactive_login_uses_pushed_client_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("server.sock");
    let server = FakeServer::start(&path, &["clientID:42", "prompt:srv> "]);
    let screen = Arc::new(Screen::default());
    let mut shell = shell(&path, &screen);

    assert!(shell.connect().await);
    assert_eq!(shell.shared().prompt_text(), "srv> ");

    let outcome = run(&mut shell, &["login me@example.com", "hunter2"]).await;
    assert_eq!(outcome, LineOutcome::Exit);

    let requests = server.requests();
    assert_eq!(requests[0], REGISTER_LISTENER);
    assert!(requests.contains(&"loggedin".to_string()));
    assert!(requests.contains(&"login -v --clientID=42 me@example.com \"hunter2\"".to_string()));
}

#[tokio::test]
async fn test_transfer_progress_and_completion() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("server.sock");
    let server = FakeServer::start(&path, &["prompt:srv> "]);
    let screen = Arc::new(Screen::default());
    let mut shell = shell(&path, &screen);
    shell.connect().await;

    run(&mut shell, &["get /remote/f.txt ."]).await;

    assert!(
        server
            .requests()
            .contains(&"get --client-width=60 /remote/f.txt .".to_string())
    );

    let progress = screen.progress.lock().unwrap().clone();
    // The first record is below the reporting threshold.
    assert_eq!(progress.len(), 2);
    assert!(progress[0].0.contains("50.00 %"));
    assert!(!progress[0].1);
    assert!(progress[1].0.contains("100.00 %"));
    assert!(progress[1].1);
    assert!(screen.text().contains("Download finished: /f.txt\n"));
}

#[tokio::test]
async fn test_partial_output_and_repeated_messages() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("server.sock");
    let _server = FakeServer::start(&path, &["prompt:srv> "]);
    let screen = Arc::new(Screen::default());
    let mut shell = shell(&path, &screen);
    shell.connect().await;

    run(&mut shell, &["find /", "broadcast"]).await;

    let text = screen.text();
    assert!(text.starts_with("/a\n/b\n"), "got {text:?}");
    assert_eq!(text.matches("maintenance at noon").count(), 1);
}

#[tokio::test]
async fn test_shell_without_server_reports_and_exits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.sock");
    let screen = Arc::new(Screen::default());
    let mut shell = shell(&path, &screen);

    assert!(!shell.connect().await);
    assert_eq!(run(&mut shell, &["ls"]).await, LineOutcome::Exit);

    let text = screen.text();
    assert!(text.contains("ERROR: Server seems irresponsive"));
    // The failed command is reported, not fatal.
    assert_eq!(text.matches("ERROR:").count(), 2);
}
