use thiserror::Error;

use crate::types::MediaType;

pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("sidecar generation is only supported for VIDEO and AUDIO, not {0}")]
    UnsupportedSidecarRequest(MediaType),

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("MAC verification failed")]
    Integrity,

    #[error("invalid PKCS#7 padding length: {0}")]
    InvalidPadding(u8),

    #[error("cipher failure: {0}")]
    CipherFailure(String),

    #[error("sidecar is not available until the source is fully consumed")]
    NotYetFinalized,

    #[error("stream already failed and cannot be read again")]
    Poisoned,

    #[error("source returned no bytes before reaching end of input")]
    SourceStalled,

    #[error("invalid sidecar: {0}")]
    InvalidSidecar(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Whether a stream engine that hit this error must refuse further reads.
    ///
    /// Only setup and query errors leave the engine usable.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            MediaError::InvalidKeyLength { .. }
                | MediaError::UnsupportedSidecarRequest(_)
                | MediaError::UnsupportedMediaType(_)
                | MediaError::NotYetFinalized
                | MediaError::Config(_)
        )
    }
}

impl From<MediaError> for std::io::Error {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Io(e) => e,
            MediaError::Integrity | MediaError::InvalidPadding(_) => {
                std::io::Error::new(std::io::ErrorKind::InvalidData, err)
            }
            other => std::io::Error::other(other),
        }
    }
}
