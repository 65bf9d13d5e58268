//! Error types for the kernel transport and the artifact store.

use std::path::PathBuf;

/// Error type for kernel transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("No kernel running")]
    NotRunning,

    #[error("Failed to send {msg_type}: {reason}")]
    Send { msg_type: &'static str, reason: String },

    #[error("Kernel did not respond within {0:?}")]
    Timeout(std::time::Duration),

    #[error("Kernel launch failed: {0}")]
    Launch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error type for writing execution artifacts to disk.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid base64 image payload: {0}")]
    Decode(#[from] base64::DecodeError),
}
