//! Error types for appdex.

use std::path::PathBuf;

/// Errors produced while parsing desktop entries or theme indexes.
///
/// Lookups that simply find nothing (a missing icon, an unknown category)
/// return empty results instead of an error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed key/value line, escape sequence, or list syntax.
    #[error("invalid desktop entry data: {0}")]
    Format(String),

    /// A source file that exists but holds an invalid value, or cannot be
    /// read as UTF-8 text.
    #[error("bad entry file {path}: {reason}")]
    File { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn file(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::File {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
