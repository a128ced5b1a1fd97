use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("backend returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unknown backend: {name}")]
    UnknownBackend { name: String },

    #[error("no api key configured for backend {name}")]
    MissingApiKey { name: String },

    #[error("backend returned an empty reply")]
    EmptyReply,
}

impl Error {
    /// Whether a retry on the next cycle is reasonable.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            // 429 and 5xx clear up; 4xx configuration errors do not.
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
