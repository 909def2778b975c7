//! Error types for metrosync-session.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Operation called in a state that does not allow it.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error(transparent)]
    Core(#[from] metrosync_core::Error),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn invalid_state(operation: &'static str, state: &'static str) -> Self {
        Error::InvalidState { operation, state }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
