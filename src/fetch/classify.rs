//! Failure classification for fetches
//!
//! Transport failures become a [`FetchError`] carrying the retry window the
//! caller should apply. HTTP status codes are never errors here, except that
//! 408, 503 and 504 share the retry treatment of network failures.

use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// When to try again, and when to stop trying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryWindow {
    /// Earliest time (from now) worth retrying at
    pub retry_after: Duration,
    /// Time (from now) after which the document should be given up on
    pub give_up_after: Duration,
}

impl RetryWindow {
    const fn hours_to_hours(from: u64, to: u64) -> Self {
        Self {
            retry_after: Duration::from_secs(from * HOUR),
            give_up_after: Duration::from_secs(to * HOUR),
        }
    }

    const fn minutes_to_hours(from: u64, to: u64) -> Self {
        Self {
            retry_after: Duration::from_secs(from * MINUTE),
            give_up_after: Duration::from_secs(to * HOUR),
        }
    }

    /// 408, 503 and 504 responses
    pub const SERVICE_INTERRUPTION: RetryWindow = RetryWindow::hours_to_hours(2, 24);
    /// Socket and connect timeouts
    pub const TIMEOUT: RetryWindow = RetryWindow::minutes_to_hours(5, 2);
    /// The server closed the connection without answering
    pub const NO_RESPONSE: RetryWindow = RetryWindow::minutes_to_hours(15, 2);
    /// Refused, unreachable, TLS failures
    pub const CONNECT: RetryWindow = RetryWindow::hours_to_hours(2, 6);
    /// Any other I/O problem, circular redirects
    pub const IO: RetryWindow = RetryWindow::minutes_to_hours(5, 2);
}

/// A classified transport failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("connect timed out")]
    ConnectTimeout,

    #[error("socket timed out")]
    SocketTimeout,

    #[error("no response: {0}")]
    NoResponse(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("circular redirect")]
    CircularRedirect,

    #[error("IO error: {0}")]
    Io(String),

    #[error("fetch interrupted")]
    Interrupted,
}

impl FetchError {
    /// Classifies a reqwest error by walking its cause chain
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        let detail = describe(error);

        if error.is_timeout() {
            if error.is_connect() {
                return FetchError::ConnectTimeout;
            }
            return FetchError::SocketTimeout;
        }

        if error.is_connect() {
            let lowered = detail.to_lowercase();
            if lowered.contains("certificate") || lowered.contains("tls") || lowered.contains("handshake") {
                return FetchError::Tls(detail);
            }
            return FetchError::Connect(detail);
        }

        if error.is_redirect() {
            return FetchError::CircularRedirect;
        }

        if let Some(io) = find_io_error(error) {
            use std::io::ErrorKind;
            return match io.kind() {
                ErrorKind::TimedOut => FetchError::SocketTimeout,
                ErrorKind::ConnectionRefused | ErrorKind::AddrNotAvailable => {
                    FetchError::Connect(detail)
                }
                ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::UnexpectedEof => FetchError::NoResponse(detail),
                _ => FetchError::Io(detail),
            };
        }

        if error.is_request() {
            return FetchError::NoResponse(detail);
        }

        FetchError::Io(detail)
    }

    /// Retry window for the failure; `None` for interruptions
    pub fn retry_window(&self) -> Option<RetryWindow> {
        match self {
            FetchError::ConnectTimeout | FetchError::SocketTimeout => Some(RetryWindow::TIMEOUT),
            FetchError::NoResponse(_) => Some(RetryWindow::NO_RESPONSE),
            FetchError::Connect(_) | FetchError::Tls(_) => Some(RetryWindow::CONNECT),
            FetchError::CircularRedirect | FetchError::Io(_) => Some(RetryWindow::IO),
            FetchError::Interrupted => None,
        }
    }

    /// Short code used in activity records and the FETCH log line
    pub fn code(&self) -> &'static str {
        match self {
            FetchError::ConnectTimeout => "CONNECTTIMEOUT",
            FetchError::SocketTimeout => "SOCKETTIMEOUT",
            FetchError::NoResponse(_) => "NORESPONSE",
            FetchError::Connect(_) => "CONNECTFAILED",
            FetchError::Tls(_) => "TLSFAILED",
            FetchError::CircularRedirect => "CIRCULARREDIRECT",
            FetchError::Io(_) => "IOERROR",
            FetchError::Interrupted => "INTERRUPTED",
        }
    }
}

fn describe(error: &reqwest::Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

fn find_io_error<'a>(error: &'a (dyn StdError + 'static)) -> Option<&'a std::io::Error> {
    let mut source = error.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return Some(io);
        }
        source = cause.source();
    }
    None
}

/// Whether a status code is a temporary service interruption
pub fn is_service_interruption(status: u16) -> bool {
    matches!(status, 408 | 503 | 504)
}

/// Whether a status code yields content worth processing (a page or a redirect)
pub fn is_fetchable_status(status: u16) -> bool {
    matches!(status, 200 | 301 | 302)
}
