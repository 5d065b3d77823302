use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the intake pipeline.
///
/// Settle outcomes that are expected in normal operation (a file
/// vanishing or never stabilizing) are not errors; they live in
/// [`crate::settle::SettleStatus`].
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watch error: {0}")]
    Watch(String),

    #[error("no free collision suffix for {name} in {}", dir.display())]
    CollisionExhausted { dir: PathBuf, name: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, IntakeError>;
