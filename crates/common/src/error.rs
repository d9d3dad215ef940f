//! Error types shared across clipstitch crates.

use std::path::PathBuf;

/// Top-level error type for clipstitch operations.
#[derive(Debug, thiserror::Error)]
pub enum StitchError {
    /// Invalid or incomplete configuration. Always fatal, raised before work starts.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A download or transcode attempt failed but may succeed on retry.
    #[error("Transient failure for {asset}: {message}")]
    TransientAsset { asset: String, message: String },

    /// An asset could not be produced after exhausting its retry budget.
    #[error("Asset unavailable: {asset} ({reason})")]
    AssetUnavailable { asset: String, reason: String },

    /// Shutdown was requested while the operation was in flight.
    #[error("Operation cancelled: {context}")]
    Cancelled { context: String },

    /// Moving a finished compilation to its destination failed.
    #[error("Finalization error for {path}: {message}")]
    Finalization { path: PathBuf, message: String },

    #[error("Transcode error: {message}")]
    Transcode { message: String },

    #[error("Probe error for {path}: {message}")]
    Probe { path: PathBuf, message: String },

    #[error("Fetch error: {message}")]
    Fetch { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using StitchError.
pub type StitchResult<T> = Result<T, StitchError>;

impl StitchError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    pub fn transient(asset: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TransientAsset {
            asset: asset.into(),
            message: msg.into(),
        }
    }

    pub fn unavailable(asset: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AssetUnavailable {
            asset: asset.into(),
            reason: reason.into(),
        }
    }

    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::Cancelled {
            context: context.into(),
        }
    }

    pub fn finalization(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Finalization {
            path: path.into(),
            message: msg.into(),
        }
    }

    pub fn transcode(msg: impl Into<String>) -> Self {
        Self::Transcode {
            message: msg.into(),
        }
    }

    pub fn probe(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Probe {
            path: path.into(),
            message: msg.into(),
        }
    }

    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch {
            message: msg.into(),
        }
    }

    /// Whether this error represents a cooperative shutdown rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Cancelled { .. })
    }

    /// Whether a retry loop should try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientAsset { .. }
                | Self::Transcode { .. }
                | Self::Fetch { .. }
                | Self::Probe { .. }
                | Self::Io(_)
        )
    }

    /// Process exit status the CLI reports for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration { .. } => 2,
            Self::Cancelled { .. } => 130,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_distinguishable() {
        let err = StitchError::cancelled("download clip abc");
        assert!(err.is_cancelled());
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
        assert_eq!(err.exit_code(), 130);
    }

    #[test]
    fn test_configuration_is_fatal() {
        let err = StitchError::configuration("static asset missing");
        assert!(err.is_fatal());
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("static asset missing"));
    }

    #[test]
    fn test_unavailable_is_not_retryable() {
        let err = StitchError::unavailable("transition_01.mp4", "3 attempts failed");
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
        assert!(StitchError::transient("clip", "exit 1").is_retryable());
    }
}
