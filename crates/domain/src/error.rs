/// Shared error type used across all gateway crates.
///
/// Every variant carries enough context to rebuild the OpenAI-shaped error
/// envelope at the HTTP boundary (see `ErrorKind`) without re-deriving it
/// from string matching.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider {
        provider: String,
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Other(String),
}

/// The adapter-boundary error taxonomy (spec §4.3 / §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Unavailable,
    InvalidResponse,
    Timeout,
    ConfigError,
    NotImplemented,
    BadRequest,
    AuthFailed,
    RateLimited,
    NotFound,
}

impl ProviderErrorKind {
    /// Classify an upstream HTTP status code per spec §4.3.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 | 403 => Self::AuthFailed,
            404 => Self::NotFound,
            429 => Self::RateLimited,
            500..=599 => Self::Unavailable,
            _ => Self::InvalidResponse,
        }
    }
}

/// The top-level error kind surfaced to the REST boundary (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    Authentication,
    PermissionDenied,
    NotFound,
    RateLimit,
    ServerError,
}

impl Error {
    /// Classify this error into the HTTP-facing taxonomy of spec §7.
    /// Provider `upstream_*` subtypes collapse into `server_error` here but
    /// remain distinguishable in logs via the `Provider` variant's `kind`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidRequest(_) | Error::Json(_) => ErrorKind::InvalidRequest,
            Error::Auth(_) => ErrorKind::Authentication,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Provider { kind, .. } => match kind {
                ProviderErrorKind::RateLimited => ErrorKind::RateLimit,
                ProviderErrorKind::AuthFailed => ErrorKind::Authentication,
                ProviderErrorKind::NotFound => ErrorKind::NotFound,
                ProviderErrorKind::BadRequest => ErrorKind::InvalidRequest,
                _ => ErrorKind::ServerError,
            },
            Error::Io(_) | Error::Http(_) | Error::Timeout(_) | Error::Config(_) | Error::Other(_) => {
                ErrorKind::ServerError
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
