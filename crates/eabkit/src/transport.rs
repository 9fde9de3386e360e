//! HTTP transport seam between the EAB client and the network.
//!
//! Network failures are reported with a structured [`TransportErrorKind`]
//! so retry decisions never depend on error message text.

use async_trait::async_trait;
use std::fmt;
use std::io;
use thiserror::Error;

/// Classification of a network-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Request or connect timed out
    Timeout,
    /// Host name could not be resolved
    Dns,
    /// Connection dropped by the peer mid-exchange
    ConnectionReset,
    /// Connection refused or TLS setup failed
    Connect,
    /// The response body could not be read after the status arrived
    Body,
    /// An upstream dependency (the OAuth token endpoint) answered with this status
    Status(u16),
    /// Anything else
    Other,
}

impl TransportErrorKind {
    /// Whether an attempt that failed this way is worth repeating
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            TransportErrorKind::Timeout
                | TransportErrorKind::Dns
                | TransportErrorKind::ConnectionReset
                | TransportErrorKind::Status(500)
                | TransportErrorKind::Status(504)
        )
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Timeout => f.write_str("timeout"),
            TransportErrorKind::Dns => f.write_str("dns failure"),
            TransportErrorKind::ConnectionReset => f.write_str("connection reset"),
            TransportErrorKind::Connect => f.write_str("connect failure"),
            TransportErrorKind::Body => f.write_str("body read failure"),
            TransportErrorKind::Status(code) => write!(f, "HTTP {}", code),
            TransportErrorKind::Other => f.write_str("transport error"),
        }
    }
}

/// A network-level failure raised before a CA response was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Failure reading a response body. The server may already have acted
    /// on the request, so this is never treated as transient.
    pub fn body_read(err: &reqwest::Error) -> Self {
        Self {
            kind: TransportErrorKind::Body,
            message: error_chain(err),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            kind: classify_reqwest_error(&err),
            message: error_chain(&err),
        }
    }
}

/// Map a reqwest error onto a [`TransportErrorKind`].
///
/// Socket-level causes are read from the `std::io::Error` in the source
/// chain. A connect-stage failure with no recognisable socket cause is
/// the resolver failing, which is reported as [`TransportErrorKind::Dns`].
pub fn classify_reqwest_error(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        return TransportErrorKind::Timeout;
    }

    if let Some(io_err) = find_io_error(err) {
        match io_err.kind() {
            io::ErrorKind::TimedOut => return TransportErrorKind::Timeout,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => return TransportErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::InvalidData
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::AddrNotAvailable => return TransportErrorKind::Connect,
            _ => {}
        }
    }

    if err.is_connect() {
        return TransportErrorKind::Dns;
    }

    TransportErrorKind::Other
}

fn find_io_error<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a io::Error> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return Some(io_err);
        }
        source = cause.source();
    }
    None
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Status and body of a CA response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Sends authenticated JSON POSTs to the CA.
#[async_trait]
pub trait CaTransport: Send + Sync {
    /// POST `body` (or an empty body) with `Content-Type: application/json`.
    async fn post_json(&self, url: &str, body: Option<Vec<u8>>) -> Result<HttpReply, TransportError>;
}
