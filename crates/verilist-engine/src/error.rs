//! Error types shared by the engine and its collaborators.

/// Errors returned by side-effecting calls to the social network.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EffectError {
    /// The target record already exists. Callers treat this as success.
    #[error("record already exists: {0}")]
    AlreadyExists(String),

    /// The request never produced a response (DNS, connect, timeout).
    #[error("request failed: {0}")]
    Transport(String),

    /// The server answered with an error status.
    #[error("request rejected with status {status}: {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// XRPC error name and message, if any.
        message: String,
    },

    /// The session could not be established or refreshed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The response body did not have the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Errors returned by read-only remote queries (link index, record listing).
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Transport(String),

    /// The server answered with a non-2xx status.
    #[error("unexpected status {0}")]
    Status(u16),

    /// The response body could not be decoded.
    #[error("undecodable response: {0}")]
    Decode(String),
}

/// Errors surfaced by event sources.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The subscription URL could not be built.
    #[error("invalid source endpoint: {0}")]
    Endpoint(String),

    /// The subscription could not be (re-)established.
    #[error("failed to connect to event stream after {attempts} attempts: {reason}")]
    Connect {
        /// Consecutive failed attempts.
        attempts: u32,
        /// The last connection error.
        reason: String,
    },
}
