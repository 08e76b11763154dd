use std::io;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Process signal routing.
///
/// SIGINT resets the current input line instead of ending the process;
/// SIGTERM and SIGHUP cancel the shutdown token.
pub struct SignalHandler {
    shutdown: CancellationToken,
    interrupt: Arc<Notify>,
    _handle: tokio::task::JoinHandle<()>,
}

impl SignalHandler {
    #[cfg(unix)]
    pub fn start() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown = CancellationToken::new();
        let interrupt = Arc::new(Notify::new());

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;

        let token = shutdown.clone();
        let notify = Arc::clone(&interrupt);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sigint.recv() => {
                        debug!("Received SIGINT, resetting input");
                        notify.notify_waiters();
                    }
                    _ = sigterm.recv() => {
                        debug!("Received SIGTERM, shutting down");
                        token.cancel();
                        break;
                    }
                    _ = sighup.recv() => {
                        debug!("Received SIGHUP, shutting down");
                        token.cancel();
                        break;
                    }
                }
            }
        });

        Ok(Self {
            shutdown,
            interrupt,
            _handle: handle,
        })
    }

    #[cfg(not(unix))]
    pub fn start() -> io::Result<Self> {
        let shutdown = CancellationToken::new();
        let interrupt = Arc::new(Notify::new());

        let notify = Arc::clone(&interrupt);
        let handle = tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                debug!("Received Ctrl+C, resetting input");
                notify.notify_waiters();
            }
        });

        Ok(Self {
            shutdown,
            interrupt,
            _handle: handle,
        })
    }

    /// Cancelled when the process is asked to terminate.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Wakes reads pending at the time of a user interrupt. Interrupts with
    /// nobody waiting are dropped.
    pub fn interrupts(&self) -> Arc<Notify> {
        Arc::clone(&self.interrupt)
    }
}
