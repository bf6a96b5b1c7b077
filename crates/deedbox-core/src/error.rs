//! Error taxonomy for sync, indexing and retrieval.

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a core operation can surface to its caller.
///
/// Per-file transfer failures during a sync run are normally *recorded*
/// into the run's `SyncStatus` rather than returned; [`Error::Transfer`]
/// only escapes when the remote listing itself fails.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid chunking, top_k or application parameters. Raised before any
    /// work starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// Path absent from the local tree or the manifest.
    #[error("not found: {0}")]
    NotFound(String),

    /// Another sync run holds the run lock.
    #[error("a sync run is already in progress ({0})")]
    AlreadyRunning(String),

    /// Remote listing or download failed.
    #[error("transfer failed for {path}: {message}")]
    Transfer { path: String, message: String },

    /// Document bytes could not be turned into text (corrupt or
    /// unsupported content).
    #[error("could not extract text from {path}: {message}")]
    Extract { path: String, message: String },

    /// Embedding or generation capability unavailable or timed out.
    #[error("provider error: {0}")]
    Provider(String),

    /// Chunk-store backend failure.
    #[error("index store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn transfer(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Transfer {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn extract(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Extract {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::NotFound(_) => "not_found",
            Error::AlreadyRunning(_) => "already_running",
            Error::Transfer { .. } => "transfer_error",
            Error::Extract { .. } => "unreadable_document",
            Error::Provider(_) => "provider_error",
            Error::Store(_) | Error::Io(_) | Error::Serialization(_) => "internal",
        }
    }

    /// True when the error was caused by a provider or transfer deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Provider(msg) => msg.contains("timed out"),
            Error::Transfer { message, .. } => message.contains("timed out"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(Error::Config("x".into()).code(), "config_error");
        assert_eq!(Error::NotFound("x".into()).code(), "not_found");
        assert_eq!(Error::transfer("a.pdf", "boom").code(), "transfer_error");
        assert_eq!(
            Error::extract("a.docx", "missing word/document.xml").code(),
            "unreadable_document"
        );
        assert_eq!(
            Error::Store(anyhow::anyhow!("disk full")).code(),
            "internal"
        );
    }

    #[test]
    fn test_timeout_detection() {
        assert!(Error::Provider("embedding timed out after 30s".into()).is_timeout());
        assert!(!Error::Provider("HTTP 500".into()).is_timeout());
        assert!(Error::transfer("a.pdf", "download timed out after 60s").is_timeout());
    }

    #[test]
    fn test_transfer_display_names_path() {
        let e = Error::transfer("leases/unit5.txt", "HTTP 409");
        assert_eq!(e.to_string(), "transfer failed for leases/unit5.txt: HTTP 409");
    }
}
