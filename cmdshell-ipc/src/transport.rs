//! Local IPC primitives.
//!
//! A [`Transport`] knows how to reach the server; every successful
//! [`Transport::connect`] yields an independent [`Connection`]. All stream
//! flavours (Unix domain sockets, Windows named pipes, in-memory duplex pipes)
//! share [`StreamConnection`], which owns the partial-write retry and the
//! delimiter-based reassembly of partial reads.

use crate::error::TransportError;
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

const READ_CHUNK: usize = 4096;

/// Which IPC primitive a transport is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    UnixSocket,
    NamedPipe,
    Memory,
}

/// Connector for the server endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new connection to the server.
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError>;

    fn kind(&self) -> TransportKind;

    /// Human readable endpoint, used in logs and errors.
    fn endpoint(&self) -> String;
}

/// One bidirectional connection to the server.
#[async_trait]
pub trait Connection: Send {
    /// Write all of `bytes`, retrying partial writes.
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Return the next frame terminated by `delimiter`, without the delimiter.
    ///
    /// Bytes received past the delimiter are kept for the next call, and a
    /// timeout never discards what was already buffered.
    async fn receive(&mut self, delimiter: u8, timeout: Duration)
    -> Result<Vec<u8>, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// [`Connection`] over any async byte stream.
pub struct StreamConnection<S> {
    stream: S,
    buffer: Vec<u8>,
}

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
        }
    }

    fn take_frame(&mut self, delimiter: u8) -> Option<Vec<u8>> {
        let pos = self.buffer.iter().position(|b| *b == delimiter)?;
        let mut frame: Vec<u8> = self.buffer.drain(..=pos).collect();
        frame.pop();
        Some(frame)
    }

    /// Number of bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[async_trait]
impl<S> Connection for StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut written = 0;
        while written < bytes.len() {
            match self.stream.write(&bytes[written..]).await {
                Ok(0) => {
                    return Err(TransportError::BrokenPipe(io::Error::from(
                        io::ErrorKind::WriteZero,
                    )));
                }
                Ok(n) => {
                    written += n;
                    if written < bytes.len() {
                        trace!("partial write: {written}/{} bytes", bytes.len());
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::from_stream(e)),
            }
        }
        self.stream
            .flush()
            .await
            .map_err(TransportError::from_stream)
    }

    async fn receive(
        &mut self,
        delimiter: u8,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        if let Some(frame) = self.take_frame(delimiter) {
            return Ok(frame);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let read = tokio::time::timeout_at(deadline, self.stream.read(&mut chunk)).await;
            let n = match read {
                Err(_) => return Err(TransportError::Timeout),
                Ok(Ok(0)) => {
                    if !self.buffer.is_empty() {
                        trace!(
                            "connection closed with {} unterminated bytes",
                            self.buffer.len()
                        );
                        self.buffer.clear();
                    }
                    return Err(TransportError::Closed);
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(TransportError::from_stream(e)),
            };

            self.buffer.extend_from_slice(&chunk[..n]);
            if let Some(frame) = self.take_frame(delimiter) {
                return Ok(frame);
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(TransportError::from_stream(e)),
        }
    }
}

/// Unix domain socket stream transport.
#[cfg(unix)]
pub struct UnixSocketTransport {
    path: std::path::PathBuf,
}

#[cfg(unix)]
impl UnixSocketTransport {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(unix)]
#[async_trait]
impl Transport for UnixSocketTransport {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        let stream = tokio::net::UnixStream::connect(&self.path)
            .await
            .map_err(|e| TransportError::from_connect(e, self.endpoint()))?;
        Ok(Box::new(StreamConnection::new(stream)))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::UnixSocket
    }

    fn endpoint(&self) -> String {
        self.path.display().to_string()
    }
}

/// Windows named pipe transport.
#[cfg(windows)]
pub struct NamedPipeTransport {
    name: String,
}

#[cfg(windows)]
impl NamedPipeTransport {
    /// All pipe instances busy; see `winerror.h`.
    const ERROR_PIPE_BUSY: i32 = 231;
    const BUSY_RETRIES: u32 = 20;

    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[cfg(windows)]
#[async_trait]
impl Transport for NamedPipeTransport {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        use tokio::net::windows::named_pipe::ClientOptions;

        let mut attempts = 0;
        loop {
            match ClientOptions::new().open(&self.name) {
                Ok(client) => return Ok(Box::new(StreamConnection::new(client))),
                Err(e)
                    if e.raw_os_error() == Some(Self::ERROR_PIPE_BUSY)
                        && attempts < Self::BUSY_RETRIES =>
                {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => return Err(TransportError::from_connect(e, self.endpoint())),
            }
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::NamedPipe
    }

    fn endpoint(&self) -> String {
        self.name.clone()
    }
}

/// The platform's native transport for `endpoint`.
pub fn platform_transport(endpoint: &crate::paths::Endpoint) -> Arc<dyn Transport> {
    #[cfg(unix)]
    {
        Arc::new(UnixSocketTransport::new(endpoint.as_path()))
    }

    #[cfg(windows)]
    {
        Arc::new(NamedPipeTransport::new(endpoint.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_receive_reassembles_partial_reads() {
        let (client, mut server) = duplex(64);
        let mut conn = StreamConnection::new(client);

        server.write_all(b"prompt:AB").await.unwrap();
        let pending = conn.receive(0x1F, Duration::from_millis(20)).await;
        assert!(matches!(pending, Err(TransportError::Timeout)));
        assert_eq!(conn.buffered(), 9);

        server.write_all(b"C> \x1Fack\x1F").await.unwrap();
        let first = conn.receive(0x1F, Duration::from_secs(1)).await.unwrap();
        assert_eq!(first, b"prompt:ABC> ".to_vec());
        let second = conn.receive(0x1F, Duration::from_secs(1)).await.unwrap();
        assert_eq!(second, b"ack".to_vec());
    }

    #[tokio::test]
    async fn test_receive_reports_closed_on_eof() {
        let (client, server) = duplex(64);
        let mut conn = StreamConnection::new(client);
        drop(server);

        let err = conn.receive(0x1E, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn test_send_larger_than_pipe_capacity() {
        let (client, server) = duplex(16);
        let mut conn = StreamConnection::new(client);
        let mut peer = StreamConnection::new(server);

        let payload: Vec<u8> = std::iter::repeat_n(b'x', 200).chain([0x1E]).collect();
        let reader = tokio::spawn(async move { peer.receive(0x1E, Duration::from_secs(1)).await });

        conn.send(&payload).await.unwrap();
        let frame = reader.await.unwrap().unwrap();
        assert_eq!(frame.len(), 200);
    }

    #[tokio::test]
    async fn test_send_after_peer_dropped_is_disconnect() {
        let (client, server) = duplex(16);
        let mut conn = StreamConnection::new(client);
        drop(server);

        let err = conn.send(b"loggedin\x1E").await.unwrap_err();
        assert!(err.is_disconnect(), "unexpected error: {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_socket_connect_refused_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let transport = UnixSocketTransport::new(dir.path().join("missing.sock"));

        let err = transport.connect().await.err().unwrap();
        assert!(matches!(err, TransportError::ConnectRefused { .. }));
        assert_eq!(transport.kind(), TransportKind::UnixSocket);
    }
}
