//! Error types for metrosync-core.

use thiserror::Error;

/// Error type for metrosync-core operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid tempo: {bpm}. Must be between {min} and {max} BPM")]
    InvalidTempo { bpm: u32, min: u32, max: u32 },
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;
