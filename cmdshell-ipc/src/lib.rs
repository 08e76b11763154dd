//! IPC between the interactive shell and its session server.
//!
//! This crate provides the byte transports (Unix domain sockets, Windows named
//! pipes, in-memory pairs), the text wire format of commands and push
//! notifications, and the session channel the shell talks to the server through.

mod channel;
mod codec;
mod error;
pub mod memory;
pub mod paths;
mod transport;

// Session channel
pub use channel::{
    ChannelConfig, CommandOutcome, DeclineQuestions, NotificationHandler, Question,
    ResponseHandler, SessionChannel,
};

// Wire format
pub use codec::{
    FRAME_DELIMITER, LOGGED_IN_QUERY, NotificationEvent, PROGRESS_COMPLETE, RECORD_DELIMITER,
    REGISTER_LISTENER, RETRY_CONNECTION, ResponseFrame, StatusCode, TransferDirection,
    decode_request, encode_records, encode_request,
};

pub use error::{ChannelError, ProtocolError, TransportError};

// Transports
#[cfg(windows)]
pub use transport::NamedPipeTransport;
#[cfg(unix)]
pub use transport::UnixSocketTransport;
pub use transport::{Connection, StreamConnection, Transport, TransportKind, platform_transport};
