/// Error types for the proxy library.
///
/// Every variant is fatal to the session that observes it. The only
/// distinction callers care about is whether the error is a clean shutdown
/// (a peer went away) or something worth reporting.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    /// I/O errors from tokio sockets
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The read deadline elapsed before a full line arrived
    #[error("read timed out after {0}s")]
    Timeout(u64),

    /// A line exceeded the framing buffer without a terminator
    #[error("data is too long")]
    LineTooLong,

    /// The peer closed the stream
    #[error("connection closed by peer")]
    Closed,

    /// Malformed JSON on the wire
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing or mistyped Stratum parameters
    #[error("invalid parameter: {0}")]
    InvalidParams(String),

    /// Dial URL scheme other than tcp/tls/ssl
    #[error("scheme not supported: {0}")]
    UnsupportedScheme(String),

    /// Dial URL that could not be parsed
    #[error("invalid pool url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Coin token with no develop pool
    #[error("{0} token isn't supported")]
    UnsupportedCoin(String),

    /// TLS setup errors (handshake failures surface as Io)
    #[error("TLS error: {0}")]
    Tls(String),

    /// Correlation store failures
    #[error("correlation store error: {0}")]
    Store(#[from] redis::RedisError),
}

impl ProxyError {
    /// EOF or an already-closed socket. These end a session without being
    /// reported as failures.
    pub fn is_clean_shutdown(&self) -> bool {
        match self {
            ProxyError::Closed => true,
            ProxyError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, ProxyError>;
