use reqwest::StatusCode;
use verilist_engine::{EffectError, RemoteError};

/// Errors from XRPC calls.
#[derive(Debug, thiserror::Error)]
pub enum XrpcError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx answer, with the XRPC error body when the server sent one.
    #[error("xrpc {status}: {}", describe(.error, .message))]
    Response {
        status: StatusCode,
        error: Option<String>,
        message: Option<String>,
    },

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

fn describe(error: &Option<String>, message: &Option<String>) -> String {
    match (error, message) {
        (Some(e), Some(m)) => format!("{e}: {m}"),
        (Some(e), None) => e.clone(),
        (None, Some(m)) => m.clone(),
        (None, None) => "no error body".to_string(),
    }
}

impl XrpcError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Response { status, .. } => Some(*status),
            Self::Http(e) => e.status(),
            _ => None,
        }
    }

    /// The access token expired and a refresh may fix the call.
    pub fn is_expired_token(&self) -> bool {
        matches!(self, Self::Response { error: Some(e), .. } if e == "ExpiredToken")
    }

    pub fn is_auth(&self) -> bool {
        match self {
            Self::Response { status, error, .. } => {
                *status == StatusCode::UNAUTHORIZED
                    || matches!(
                        error.as_deref(),
                        Some("ExpiredToken" | "InvalidToken" | "AuthRequired" | "AuthenticationRequired")
                    )
            }
            _ => false,
        }
    }

    /// The server refused a write because the record is already there.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::Response { error, message, .. } => {
                error.as_deref() == Some("RecordAlreadyExists")
                    || message
                        .as_deref()
                        .is_some_and(|m| m.to_ascii_lowercase().contains("already exists"))
            }
            _ => false,
        }
    }
}

impl From<XrpcError> for EffectError {
    fn from(e: XrpcError) -> Self {
        if e.is_already_exists() {
            return EffectError::AlreadyExists(e.to_string());
        }
        if e.is_auth() {
            return EffectError::Auth(e.to_string());
        }
        match e {
            XrpcError::Http(inner) if inner.is_decode() => EffectError::Decode(inner.to_string()),
            XrpcError::Http(inner) => match inner.status() {
                Some(status) => EffectError::Rejected {
                    status: status.as_u16(),
                    message: inner.to_string(),
                },
                None => EffectError::Transport(inner.to_string()),
            },
            XrpcError::Response {
                status,
                ref error,
                ref message,
            } => EffectError::Rejected {
                status: status.as_u16(),
                message: describe(error, message),
            },
            other => EffectError::Transport(other.to_string()),
        }
    }
}

impl From<XrpcError> for RemoteError {
    fn from(e: XrpcError) -> Self {
        match e {
            XrpcError::Http(inner) if inner.is_decode() => RemoteError::Decode(inner.to_string()),
            XrpcError::Http(inner) => match inner.status() {
                Some(status) => RemoteError::Status(status.as_u16()),
                None => RemoteError::Transport(inner.to_string()),
            },
            XrpcError::Response { status, .. } => RemoteError::Status(status.as_u16()),
            other => RemoteError::Transport(other.to_string()),
        }
    }
}

/// Errors resolving a DID document.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("unsupported did method: {0}")]
    UnsupportedMethod(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("did document for {0} has no #atproto_pds service")]
    NoPds(String),
}
