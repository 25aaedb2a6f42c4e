//! Error types for byteward.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid URL: {0:?} is empty after normalization")]
    InvalidUrl(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transfer cancelled before completion")]
    Cancelled,

    #[error("body already consumed")]
    BodyConsumed,

    #[error("invalid settings: {0}")]
    Settings(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[cfg(feature = "reqwest")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Returns `true` for faults raised while moving body bytes.
    pub fn is_transfer_fault(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
