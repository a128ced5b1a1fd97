use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Momentary UI condition (element not found, stale element, sidecar
    /// busy). Safe to retry on the next poll cycle.
    #[error("transient surface error: {message}")]
    Transient { message: String },

    /// The surface lock could not be acquired within the timeout.
    #[error("timed out waiting for the surface lock")]
    LockTimeout,

    /// No stable reply appeared within the stabilizer deadline.
    #[error("reply did not stabilize within {waited_secs}s")]
    StabilizeTimeout { waited_secs: u64 },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    /// Whether a retry on the next cycle is reasonable.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient { .. } | Self::LockTimeout => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

impl relais_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

relais_common::impl_context!();
