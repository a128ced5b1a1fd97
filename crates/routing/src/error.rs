use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The message's group has no usable route. Not retried: the config is
    /// immutable for the lifetime of the process.
    #[error("no route configured for group {group}")]
    NotConfigured { group: String },

    #[error(transparent)]
    Backend(#[from] relais_backends::Error),

    #[error(transparent)]
    Surface(#[from] relais_surface::Error),

    #[error("media error: {message}")]
    Media { message: String },
}

impl Error {
    #[must_use]
    pub fn media(message: impl std::fmt::Display) -> Self {
        Self::Media {
            message: message.to_string(),
        }
    }

    /// Whether a retry on the next cycle is reasonable.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Backend(e) => e.is_transient(),
            Self::Surface(e) => e.is_transient(),
            Self::NotConfigured { .. } | Self::Media { .. } => false,
        }
    }
}
