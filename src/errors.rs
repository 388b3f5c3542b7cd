use thiserror::Error;

/// Errors that can occur while resolving references.
#[derive(Error, Debug)]
pub enum SymrefError {
    #[error("index not found: {path}")]
    IndexNotFound { path: String },

    #[error("index parse error: {message} (path: {path})")]
    IndexParse { message: String, path: String },

    #[error("index generation failed for {language}: {message}")]
    IndexGeneration { language: String, message: String },

    #[error("config error: {message}")]
    Config { message: String },

    #[error("unsupported language: {language}")]
    UnsupportedLanguage { language: String },

    #[error("connection error: {message} (language: {language})")]
    Connection { message: String, language: String },

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("request timed out after {elapsed_ms}ms: {operation}")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}

impl SymrefError {
    /// Returns `true` for failures that leave the analyzer connection in an
    /// unknown state: timeouts, disconnects and transport I/O errors.
    ///
    /// These trigger a restart of the connection before the next attempt.
    /// Remote errors reported by a healthy analyzer do not.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::Io(_)
        )
    }

    /// Returns `true` if this error means the index tier is unavailable and
    /// resolution should fall back to live queries.
    pub fn is_index_unavailable(&self) -> bool {
        matches!(
            self,
            Self::IndexNotFound { .. }
                | Self::IndexParse { .. }
                | Self::IndexGeneration { .. }
                | Self::Decode(_)
        )
    }
}

/// Convenience alias for results using `SymrefError`.
pub type Result<T> = std::result::Result<T, SymrefError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failure_classification() {
        let timeout = SymrefError::Timeout {
            operation: "textDocument/references".to_string(),
            elapsed_ms: 1000,
        };
        let remote = SymrefError::Protocol {
            message: "method failed".to_string(),
        };
        assert!(timeout.is_connection_failure());
        assert!(!remote.is_connection_failure());
    }

    #[test]
    fn test_index_unavailable_classification() {
        let missing = SymrefError::IndexNotFound {
            path: "index.scip".to_string(),
        };
        assert!(missing.is_index_unavailable());
        assert!(!SymrefError::Config {
            message: "bad".to_string()
        }
        .is_index_unavailable());
    }
}
