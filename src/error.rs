use http::{HeaderMap, Method, StatusCode};
use thiserror::Error;

use crate::util::truncate_text;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Body,
    Timeout,
    Canceled,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Body => "body",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Coarse classification used by the caller-facing boundary to pick a
/// process exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Usage,
    Auth,
    Network,
}

impl ErrorKind {
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Usage => 2,
            Self::Auth => 3,
            Self::Network => 4,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Usage => "usage",
            Self::Auth => "auth",
            Self::Network => "network",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    Usage,
    HttpStatus,
    Transport,
    Timeout,
    Canceled,
    ReadBody,
    Deserialize,
    TlsConfig,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Usage => "usage",
            Self::HttpStatus => "http_status",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
            Self::ReadBody => "read_body",
            Self::Deserialize => "deserialize",
            Self::TlsConfig => "tls_config",
        }
    }

    pub const fn all() -> &'static [ErrorCode] {
        &[
            Self::Usage,
            Self::HttpStatus,
            Self::Transport,
            Self::Timeout,
            Self::Canceled,
            Self::ReadBody,
            Self::Deserialize,
            Self::TlsConfig,
        ]
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request: {message}")]
    Usage { message: String },
    #[error(
        "http status error {status} for {method} {url}: {}{}",
        truncate_text(.body),
        hint_suffix(.hint)
    )]
    Status {
        status: u16,
        method: Method,
        url: String,
        headers: Box<HeaderMap>,
        body: String,
        hint: Option<&'static str>,
    },
    #[error("http transport error ({kind}) for {method} {url}: {source}")]
    Transport {
        kind: TransportErrorKind,
        timeout: bool,
        method: Method,
        url: String,
        #[source]
        source: BoxError,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("invalid tls configuration: {message}")]
    TlsConfig { message: String },
}

fn hint_suffix(hint: &Option<&'static str>) -> String {
    match hint {
        Some(hint) => format!(" ({hint})"),
        None => String::new(),
    }
}

impl Error {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    pub(crate) fn status(
        status: StatusCode,
        method: &Method,
        url: &str,
        headers: &HeaderMap,
        body: String,
    ) -> Self {
        Self::Status {
            status: status.as_u16(),
            method: method.clone(),
            url: url.to_owned(),
            headers: Box::new(headers.clone()),
            body,
            hint: auth_hint(status),
        }
    }

    pub(crate) fn transport(
        kind: TransportErrorKind,
        method: &Method,
        url: &str,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Transport {
            kind,
            timeout: kind == TransportErrorKind::Timeout,
            method: method.clone(),
            url: url.to_owned(),
            source: source.into(),
        }
    }

    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Usage { .. } => ErrorCode::Usage,
            Self::Status { .. } => ErrorCode::HttpStatus,
            Self::Transport { kind, .. } => match kind {
                TransportErrorKind::Timeout => ErrorCode::Timeout,
                TransportErrorKind::Canceled => ErrorCode::Canceled,
                TransportErrorKind::Body => ErrorCode::ReadBody,
                _ => ErrorCode::Transport,
            },
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::TlsConfig { .. } => ErrorCode::TlsConfig,
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Usage { .. } | Self::TlsConfig { .. } => ErrorKind::Usage,
            Self::Status { status, .. } if *status == 401 || *status == 403 => ErrorKind::Auth,
            Self::Status { .. } | Self::Transport { .. } | Self::Deserialize { .. } => {
                ErrorKind::Network
            }
        }
    }

    pub const fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }

    /// Whether the executor may schedule another attempt after this error.
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Transport { kind, .. } => !matches!(kind, TransportErrorKind::Canceled),
            _ => false,
        }
    }

    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { timeout: true, .. })
    }

    pub const fn is_canceled(&self) -> bool {
        matches!(
            self,
            Self::Transport {
                kind: TransportErrorKind::Canceled,
                ..
            }
        )
    }

    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Status { hint, .. } => *hint,
            _ => None,
        }
    }
}

fn auth_hint(status: StatusCode) -> Option<&'static str> {
    match status {
        StatusCode::UNAUTHORIZED => Some("authentication failed; check that the api token is set and valid"),
        StatusCode::FORBIDDEN => Some("permission denied; the api token lacks access to this resource"),
        _ => None,
    }
}
