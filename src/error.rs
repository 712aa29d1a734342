//! Error taxonomy for the trajectory-to-DCCM pipeline.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DccmError>;

#[derive(Debug, Error)]
pub enum DccmError {
    /// Zero frames, ragged frames, or a residue label count that doesn't match the atom count.
    /// Raised before anything is written.
    #[error("Invalid trajectory shape: {0}")]
    InputShape(String),

    #[error("Window size must be at least 1 frame")]
    InvalidWindowSize,

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A window produced NaN or infinite correlations, e.g. from non-finite coordinates.
    #[error("Non-finite correlation in window {window}")]
    NonFinite { window: usize },

    #[error("Residue label {name:?} is {len} bytes; at most 4 are allowed")]
    LabelTooLong { name: String, len: usize },

    #[error("Residue label {0:?} contains a NUL byte")]
    InvalidLabel(String),

    #[error("Unsupported DCCM format tag {0}")]
    UnsupportedFormat(u32),

    #[error("{what} ({value}) does not fit in the u32 header field")]
    HeaderOverflow { what: &'static str, value: usize },

    /// The header describes a payload that can't exist, e.g. sizes that overflow.
    #[error("Corrupt artifact: {0}")]
    Corrupt(String),

    #[error("Artifact is {actual} bytes; expected {expected}")]
    Truncated { expected: usize, actual: usize },

    #[error("Window {index} out of range; artifact has {count}")]
    WindowOutOfRange { index: usize, count: usize },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DccmError {
    pub fn input_shape(msg: impl Into<String>) -> Self {
        Self::InputShape(msg.into())
    }
}
