//! In-process transport over `tokio::io::duplex`.
//!
//! [`MemoryTransport::pair`] returns the client-side connector and a
//! [`MemoryServer`] that accepts the server half of every connection. Tests
//! drive the session channel deterministically through it; it also works for
//! embedding a server in the same process.

use crate::codec::{
    FRAME_DELIMITER, ResponseFrame, StatusCode, decode_request, encode_records,
};
use crate::error::TransportError;
use crate::transport::{Connection, StreamConnection, Transport, TransportKind};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::sync::{Mutex, mpsc};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Client-side connector of an in-memory pair.
pub struct MemoryTransport {
    accept_tx: mpsc::UnboundedSender<DuplexStream>,
    refusing: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

/// Server side of an in-memory pair.
pub struct MemoryServer {
    accept_rx: Mutex<mpsc::UnboundedReceiver<DuplexStream>>,
    refusing: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl MemoryTransport {
    pub fn pair() -> (Arc<MemoryTransport>, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let refusing = Arc::new(AtomicBool::new(false));
        let attempts = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(MemoryTransport {
                accept_tx,
                refusing: Arc::clone(&refusing),
                attempts: Arc::clone(&attempts),
            }),
            MemoryServer {
                accept_rx: Mutex::new(accept_rx),
                refusing,
                attempts,
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectRefused {
                endpoint: self.endpoint(),
            });
        }
        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        self.accept_tx
            .send(server)
            .map_err(|_| TransportError::ConnectRefused {
                endpoint: self.endpoint(),
            })?;
        Ok(Box::new(StreamConnection::new(client)))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}

impl MemoryServer {
    /// Wait for the next client connection.
    pub async fn accept(&self) -> Option<ServerConnection> {
        let stream = self.accept_rx.lock().await.recv().await?;
        Some(ServerConnection {
            conn: StreamConnection::new(stream),
        })
    }

    /// Wait for the next connection, giving up after `timeout`.
    pub async fn accept_timeout(&self, timeout: Duration) -> Option<ServerConnection> {
        tokio::time::timeout(timeout, self.accept()).await.ok().flatten()
    }

    /// Make subsequent connection attempts fail as if the server were down.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of connection attempts made so far, refused ones included.
    pub fn connection_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// Server half of one in-memory connection.
pub struct ServerConnection {
    conn: StreamConnection<DuplexStream>,
}

impl ServerConnection {
    /// Read the next request or answer line.
    pub async fn read_request(&mut self, timeout: Duration) -> Result<String, TransportError> {
        let frame = self.conn.receive(FRAME_DELIMITER, timeout).await?;
        decode_request(&frame).map_err(|e| {
            TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }

    pub async fn respond(
        &mut self,
        status: StatusCode,
        body: &str,
    ) -> Result<(), TransportError> {
        self.conn
            .send(&ResponseFrame::new(status, body).encode())
            .await
    }

    pub async fn push_records(&mut self, records: &[&str]) -> Result<(), TransportError> {
        self.conn
            .send(&encode_records(records.iter().copied()))
            .await
    }

    /// Write raw bytes, e.g. half a record.
    pub async fn push_raw(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.conn.send(bytes).await
    }

    pub async fn close(mut self) {
        let _ = self.conn.close().await;
    }
}
