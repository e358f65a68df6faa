//! Error types for index retrieval and verification.

/// Index errors.
///
/// Underlying causes are captured as messages so that a stored cache outcome
/// can be handed to every caller unchanged.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IndexError {
    /// Malformed repository line.
    #[error("invalid repository line: {line:?}")]
    InvalidRepository { line: String },

    /// URL could not be parsed.
    #[error("failed to parse repo as URI {url}: {message}")]
    InvalidUrl { url: String, message: String },

    /// Scheme other than https or a local path.
    #[error("repository scheme {scheme} not supported")]
    UnsupportedScheme { scheme: String },

    /// Remote index answered 404.
    #[error("repository index not found for architecture {arch} at {url}")]
    NotFound { arch: String, url: String },

    /// Remote index answered with an unexpected status.
    #[error(
        "unexpected status code {status} when getting repository index for architecture {arch} at {url}"
    )]
    Http {
        status: u16,
        arch: String,
        url: String,
    },

    /// Network failure (send, body read, exhausted retries).
    #[error("network error: {message}")]
    Network { message: String },

    /// Local read failure other than "does not exist".
    #[error("failed to read repository {path}: {message}")]
    Io { path: String, message: String },

    /// Bad compressed stream or unexpected archive records.
    #[error("invalid signed index: {message}")]
    Container { message: String },

    /// Verification requested without any trust keys.
    #[error("no keys provided to verify signature")]
    NoTrustKeys,

    /// No trusted key validated the signature.
    #[error(
        "no key found to verify signature for keyfile {key_name}; tried all {tried} keys"
    )]
    Untrusted { key_name: String, tried: usize },

    /// Verified payload could not be decoded.
    #[error("unable to convert repository index bytes to index at {url}: {message}")]
    Decode { url: String, message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl IndexError {
    /// Whether the error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub(crate) fn container(message: impl Into<String>) -> Self {
        Self::Container {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for IndexError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;
