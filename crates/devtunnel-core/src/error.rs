//! Error types for devtunnel core library.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using devtunnel Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while resolving settings.
#[derive(Debug, Error)]
pub enum Error {
    /// Settings file could not be read
    #[error("Failed to read settings file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings file is not valid settings JSON
    #[error("Failed to parse settings file {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
