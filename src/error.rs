//! Error taxonomy for the viewer pair.
//!
//! None of these are fatal to a window: `NotFound` is skipped or shown as the
//! "no image" fallback, `ConversionFailed` ends up in the wait overlay,
//! `StatusUnreadable` reads as "no status", and `ProcessLaunchRace` degrades to
//! launching anyway.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("{} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("conversion failed: {0}")]
    ConversionFailed(String),

    #[error("status file {} unreadable: {reason}", .path.display())]
    StatusUnreadable { path: PathBuf, reason: String },

    #[error("cannot inspect running viewers: {0}")]
    ProcessLaunchRace(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ViewerError>;
