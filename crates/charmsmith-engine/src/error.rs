use std::io;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("{context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid vector: {0}")]
    InvalidVector(String),

    #[error("failed to encode gallery metadata: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("gallery state lock poisoned")]
    Poisoned,
}

pub type GalleryResult<T> = Result<T, GalleryError>;

impl GalleryError {
    pub fn persistence(context: impl Into<String>, source: io::Error) -> Self {
        GalleryError::Persistence {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn at(action: &str, path: &Path, source: io::Error) -> Self {
        Self::persistence(format!("failed to {action} {}", path.display()), source)
    }
}
