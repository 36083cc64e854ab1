//! Shared error type for the emuparity workspace.
//!
//! Every fallible harness API returns [`Result`]. Child-process failures are
//! deliberately *not* represented here: a spawn error or a timeout is an
//! observation the harness records, not an error it raises.

use thiserror::Error;

/// Convenient result alias used across the workspace.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Unified harness error.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Invalid or incomplete configuration supplied by the caller.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A user-supplied regular expression failed to compile.
    #[error("invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    /// A persisted document declared an unsupported schema version.
    #[error("schema version mismatch in {path}: expected {expected}, found {found}")]
    SchemaVersion {
        path: String,
        expected: u32,
        found: u32,
    },

    /// A persisted document could not be parsed.
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    /// A value could not be serialized for persistence.
    #[error("serialization failure: {0}")]
    Serialize(String),

    /// The native-oracle container image could not be pulled.
    #[error("container image pull failed: {0}")]
    ImagePull(String),

    /// Filesystem-level failure while persisting or reading artifacts.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display_includes_detail() {
        let err = HarnessError::Config("no cases defined".to_string());
        assert_eq!(err.to_string(), "invalid configuration: no cases defined");
    }

    #[test]
    fn schema_version_error_names_path_and_versions() {
        let err = HarnessError::SchemaVersion {
            path: "artifacts/result.json".to_string(),
            expected: 1,
            found: 7,
        };
        let text = err.to_string();
        assert!(text.contains("artifacts/result.json"), "got: {text}");
        assert!(text.contains("expected 1"), "got: {text}");
        assert!(text.contains("found 7"), "got: {text}");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: HarnessError = io.into();
        assert!(matches!(err, HarnessError::Io(_)));
    }
}
