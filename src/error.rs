//! Error types for tower-bayeux

use thiserror::Error;

/// tower-bayeux error type
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed message JSON in a request or reply.
    #[error("message parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The request representation was unusable: a required parameter was
    /// missing, or the body encoding was not valid UTF-8.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// I/O failure while reading the request or writing the response.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration detected at startup. The server must not
    /// begin accepting requests after this.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport error
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Create a bad-request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest(message.into())
    }

    /// True for failures caused by the client's request rather than the
    /// server; the HTTP layer maps these to 4xx responses.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Parse(_) | Error::BadRequest(_))
    }
}

/// Result type alias for tower-bayeux
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_are_client_errors() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(err.is_client_error());
        assert!(Error::bad_request("missing parameter").is_client_error());
    }

    #[test]
    fn config_errors_are_not_client_errors() {
        assert!(!Error::Config("bad timeout".into()).is_client_error());
        assert!(!Error::Transport("closed".into()).is_client_error());
    }
}
