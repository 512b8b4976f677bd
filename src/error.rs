//! Library error type shared by the capture engine.
//!
//! CLI-facing code wraps these in `anyhow` at the edge; internal code
//! propagates `ProxyError` so callers can match on failure kind where it
//! matters (see spec §7 error kinds).

use std::path::PathBuf;

pub type ProxyResult<T> = Result<T, ProxyError>;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("failed to bind {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("client TLS handshake failed: {0}")]
    ClientTls(String),

    #[error("upstream TLS handshake to {target} failed: {reason}")]
    UpstreamTls { target: String, reason: String },

    #[error("failed to connect to {target}: {reason}")]
    UpstreamConnect { target: String, reason: String },

    #[error("http error: {0}")]
    Http(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("io error at {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Internal(String),
}

impl From<std::io::Error> for ProxyError {
    fn from(source: std::io::Error) -> Self {
        ProxyError::Io { path: None, source }
    }
}

impl ProxyError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProxyError::Io {
            path: Some(path.into()),
            source,
        }
    }
}
