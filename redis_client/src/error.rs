//! Error types shared across the driver: connection I/O, RESP parsing,
//! cluster redirection and sentinel discovery all report through
//! `ClientError`.
use std::fmt;
use std::io;

/// Coarse classification of a `ClientError`, used by callers that need to
/// branch on failure kind rather than match on the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// A required argument or handle was absent.
    Null,
    /// The object was used before it was initialized (e.g. a client that
    /// was never connected).
    NoInit,
    /// The channel role tag was out of range.
    InvalidChannel,
    /// A supplied name (subscriber prefix, script name, ...) was invalid.
    NameInvalid,
    /// A supplied group/shard identifier was invalid.
    GroupInvalid,
    /// An argument had the wrong size or shape.
    SizeInvalid,
    /// The socket is unusable; the owning client has been disabled.
    NoService,
    /// The read/connect timed out; the client remains usable.
    TimedOut,
    /// The wire framing was violated (missing `\r\n`, short read, ...).
    IncompleteTransfer,
    /// A RESP token could not be parsed (size, double, boolean, ...).
    ParseError,
    /// The reply tag did not match what the caller expected.
    UnexpectedResp,
    /// The reply array/map had a different number of elements than expected.
    UnexpectedArraySize,
    /// The server replied with a null where a value was required.
    RedisNull,
    /// The server replied with an error frame.
    RedisError,
    /// `connect` was called on an already-live connection.
    AlreadyOpen,
    /// TLS context setup or handshake failed.
    TlsError,
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientErrorKind::Null => "null",
            ClientErrorKind::NoInit => "not initialized",
            ClientErrorKind::InvalidChannel => "invalid channel",
            ClientErrorKind::NameInvalid => "invalid name",
            ClientErrorKind::GroupInvalid => "invalid group",
            ClientErrorKind::SizeInvalid => "invalid size",
            ClientErrorKind::NoService => "no service",
            ClientErrorKind::TimedOut => "timed out",
            ClientErrorKind::IncompleteTransfer => "incomplete transfer",
            ClientErrorKind::ParseError => "parse error",
            ClientErrorKind::UnexpectedResp => "unexpected response",
            ClientErrorKind::UnexpectedArraySize => "unexpected array size",
            ClientErrorKind::RedisNull => "redis null",
            ClientErrorKind::RedisError => "redis error",
            ClientErrorKind::AlreadyOpen => "already open",
            ClientErrorKind::TlsError => "TLS error",
        };
        f.write_str(s)
    }
}

/// The error type returned by every fallible operation in this crate.
#[derive(Debug)]
pub struct ClientError {
    kind: ClientErrorKind,
    message: String,
    source: Option<io::Error>,
}

impl ClientError {
    pub fn new(kind: ClientErrorKind, message: impl Into<String>) -> Self {
        ClientError {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn from_io(kind: ClientErrorKind, err: io::Error) -> Self {
        ClientError {
            message: err.to_string(),
            kind,
            source: Some(err),
        }
    }

    pub fn kind(&self) -> ClientErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Maps an I/O failure observed while reading or writing a socket to the
    /// `NoService`/`TimedOut` distinction required by §4.C.
    pub fn from_transfer_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                ClientError::from_io(ClientErrorKind::TimedOut, err)
            }
            _ => ClientError::from_io(ClientErrorKind::NoService, err),
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        ClientError::from_transfer_io(err)
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
