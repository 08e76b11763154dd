//! Wire format shared by the shell and the server.
//!
//! Two message families use the same delimiter-based text framing:
//!
//! - Command exchanges, one per connection. The client writes the command line
//!   terminated by [`FRAME_DELIMITER`]; the server answers with one or more
//!   `"<status>:<body>"` frames, each terminated by [`FRAME_DELIMITER`]. Question
//!   and partial-output statuses keep the exchange open.
//! - The push stream of a registered listener: `tag:payload` records, each
//!   terminated by [`RECORD_DELIMITER`].
//!
//! Raw records are turned into [`NotificationEvent`] here so nothing past this
//! module matches on tag strings.

use crate::error::ProtocolError;
use std::fmt;

/// Terminates command requests, answers and response frames.
pub const FRAME_DELIMITER: u8 = 0x1E;

/// Separates push-notification records.
pub const RECORD_DELIMITER: u8 = 0x1F;

/// `received` value meaning "this transfer is done".
pub const PROGRESS_COMPLETE: i64 = -2;

/// Command that subscribes a connection to the push stream.
pub const REGISTER_LISTENER: &str = "registerstatelistener";

/// Keep-alive command issued while the shell idles.
pub const RETRY_CONNECTION: &str = "retrycons";

/// Command used to query the login state.
pub const LOGGED_IN_QUERY: &str = "loggedin";

/// Server status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    /// The user declined a confirmation.
    ConfirmNo,
    InvalidArguments,
    NotFound,
    /// The command is not valid in the server's current state.
    InvalidState,
    NotPermitted,
    NotLoggedIn,
    Unexpected,
    /// The server asks a yes/no question; the exchange stays open.
    RequiresConfirmation,
    /// The server asks for a string; the exchange stays open.
    RequiresString,
    PartialOutput,
    PartialError,
    /// The server binary was updated and the shell must restart.
    RestartRequired,
    Failure(i32),
}

impl StatusCode {
    pub fn code(self) -> i32 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::ConfirmNo => -12,
            StatusCode::InvalidArguments => -51,
            StatusCode::NotFound => -53,
            StatusCode::InvalidState => -54,
            StatusCode::NotPermitted => -56,
            StatusCode::NotLoggedIn => -57,
            StatusCode::Unexpected => -59,
            StatusCode::RequiresConfirmation => -60,
            StatusCode::RequiresString => -61,
            StatusCode::PartialOutput => -62,
            StatusCode::PartialError => -63,
            StatusCode::RestartRequired => -71,
            StatusCode::Failure(code) => code,
        }
    }

    pub fn is_success(self) -> bool {
        self == StatusCode::Ok
    }
}

impl From<i32> for StatusCode {
    fn from(code: i32) -> Self {
        match code {
            0 => StatusCode::Ok,
            -12 => StatusCode::ConfirmNo,
            -51 => StatusCode::InvalidArguments,
            -53 => StatusCode::NotFound,
            -54 => StatusCode::InvalidState,
            -56 => StatusCode::NotPermitted,
            -57 => StatusCode::NotLoggedIn,
            -59 => StatusCode::Unexpected,
            -60 => StatusCode::RequiresConfirmation,
            -61 => StatusCode::RequiresString,
            -62 => StatusCode::PartialOutput,
            -63 => StatusCode::PartialError,
            -71 => StatusCode::RestartRequired,
            other => StatusCode::Failure(other),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Encode a command line (or an answer to a question) for the command channel.
pub fn encode_request(line: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(line.len() + 1);
    bytes.extend(line.bytes().filter(|b| *b != FRAME_DELIMITER));
    bytes.push(FRAME_DELIMITER);
    bytes
}

/// Decode a request frame read by the server side.
pub fn decode_request(frame: &[u8]) -> Result<String, ProtocolError> {
    String::from_utf8(frame.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

/// One frame of a command response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub status: StatusCode,
    pub body: String,
}

impl ResponseFrame {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = format!("{}:", self.status.code()).into_bytes();
        bytes.extend(self.body.bytes().filter(|b| *b != FRAME_DELIMITER));
        bytes.push(FRAME_DELIMITER);
        bytes
    }

    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(frame).map_err(|_| ProtocolError::InvalidUtf8)?;
        let malformed = || ProtocolError::Malformed {
            what: "response",
            raw: text.to_string(),
        };
        let (code, body) = text.split_once(':').ok_or_else(malformed)?;
        let code: i32 = code.trim().parse().map_err(|_| malformed())?;
        Ok(Self {
            status: StatusCode::from(code),
            body: body.to_string(),
        })
    }
}

/// Encode push records the way the server emits them.
pub fn encode_records<'a>(records: impl IntoIterator<Item = &'a str>) -> Vec<u8> {
    let mut bytes = Vec::new();
    for record in records {
        bytes.extend_from_slice(record.as_bytes());
        bytes.push(RECORD_DELIMITER);
    }
    bytes
}

/// Direction of a finished transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Download,
    Upload,
}

impl TransferDirection {
    pub fn label(self) -> &'static str {
        match self {
            TransferDirection::Download => "Download",
            TransferDirection::Upload => "Upload",
        }
    }
}

/// A decoded push record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    PromptChanged(String),
    TransferEnded {
        direction: TransferDirection,
        path: String,
    },
    LoggingStarted,
    LoggingEnded,
    BroadcastMessage(String),
    ClientIdAssigned(String),
    Progress {
        received: i64,
        total: i64,
        title: Option<String>,
    },
    Acknowledged,
    RestartRequested,
    Unrecognized(String),
}

impl NotificationEvent {
    /// Decode one record. Unknown tags become [`NotificationEvent::Unrecognized`];
    /// known tags with unusable payloads are errors.
    pub fn parse(record: &str) -> Result<Self, ProtocolError> {
        if let Some(text) = record.strip_prefix("prompt:") {
            return Ok(NotificationEvent::PromptChanged(text.to_string()));
        }
        if let Some(rest) = record.strip_prefix("endtransfer:") {
            return parse_end_transfer(rest);
        }
        if record.starts_with("loged:") {
            return Ok(NotificationEvent::LoggingEnded);
        }
        if record.starts_with("login:") {
            return Ok(NotificationEvent::LoggingStarted);
        }
        if let Some(text) = record.strip_prefix("message:") {
            return Ok(NotificationEvent::BroadcastMessage(text.to_string()));
        }
        if let Some(id) = record.strip_prefix("clientID:") {
            return Ok(NotificationEvent::ClientIdAssigned(id.to_string()));
        }
        if let Some(rest) = record.strip_prefix("progress:") {
            return Ok(parse_progress(rest));
        }
        match record {
            "ack" => Ok(NotificationEvent::Acknowledged),
            "restart" => Ok(NotificationEvent::RestartRequested),
            other => Ok(NotificationEvent::Unrecognized(other.to_string())),
        }
    }

    /// Encode back into the record text the server sends.
    pub fn to_record(&self) -> String {
        match self {
            NotificationEvent::PromptChanged(text) => format!("prompt:{text}"),
            NotificationEvent::TransferEnded { direction, path } => {
                let flag = match direction {
                    TransferDirection::Download => 'D',
                    TransferDirection::Upload => 'U',
                };
                format!("endtransfer:{flag}:{path}")
            }
            NotificationEvent::LoggingStarted => "login:".to_string(),
            NotificationEvent::LoggingEnded => "loged:".to_string(),
            NotificationEvent::BroadcastMessage(text) => format!("message:{text}"),
            NotificationEvent::ClientIdAssigned(id) => format!("clientID:{id}"),
            NotificationEvent::Progress {
                received,
                total,
                title,
            } => match title {
                Some(title) => format!("progress:{received}:{total}:{title}"),
                None => format!("progress:{received}:{total}"),
            },
            NotificationEvent::Acknowledged => "ack".to_string(),
            NotificationEvent::RestartRequested => "restart".to_string(),
            NotificationEvent::Unrecognized(raw) => raw.clone(),
        }
    }
}

fn parse_end_transfer(rest: &str) -> Result<NotificationEvent, ProtocolError> {
    // <direction flag><separator><path>
    if rest.len() < 3 || !rest.is_char_boundary(1) || !rest.is_char_boundary(2) {
        return Err(ProtocolError::Malformed {
            what: "endtransfer",
            raw: rest.to_string(),
        });
    }
    let direction = if rest.starts_with('D') {
        TransferDirection::Download
    } else {
        TransferDirection::Upload
    };
    Ok(NotificationEvent::TransferEnded {
        direction,
        path: rest[2..].to_string(),
    })
}

fn parse_progress(rest: &str) -> NotificationEvent {
    let mut fields = rest.splitn(3, ':');
    let received = fields.next().unwrap_or_default();
    let total = fields.next().unwrap_or_default();
    let title = fields
        .next()
        .map(|t| t.split(':').next().unwrap_or_default())
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    NotificationEvent::Progress {
        received: parse_counter(received),
        total: parse_counter(total),
        title,
    }
}

fn parse_counter(field: &str) -> i64 {
    field.trim().parse().unwrap_or(0)
}
