//! Error types for Pathfinder

use thiserror::Error;

/// Result type alias using Pathfinder's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Pathfinder error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Input errors (E100-E199)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Dependency errors (E200-E299)
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // State errors (E300-E399)
    #[error("State corruption: {0}")]
    StateCorruption(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Config errors (E400-E499)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "E100",
            Self::DependencyUnavailable(_) => "E200",
            Self::DatabaseError(_) => "E201",
            Self::StateCorruption(_) => "E300",
            Self::Serialization(_) => "E301",
            Self::ConfigError(_) => "E400",
            Self::Io(_) => "E900",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::InvalidArgument(_) => Some("Pass at least one candidate arm".to_string()),
            Self::DependencyUnavailable(_) | Self::DatabaseError(_) => {
                Some("Check that the shared store is reachable".to_string())
            }
            Self::StateCorruption(_) => {
                Some("Remove the snapshot file to start from an empty state".to_string())
            }
            Self::ConfigError(_) => Some("pathfinder config list".to_string()),
            _ => None,
        }
    }

    /// Whether the decision path may recover from this error locally
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DependencyUnavailable(_) | Self::DatabaseError(_) | Self::StateCorruption(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_error() {
        let error = Error::InvalidArgument("candidates must not be empty".to_string());
        assert_eq!(error.code(), "E100");
        assert!(error.to_string().contains("candidates must not be empty"));
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_dependency_unavailable_is_recoverable() {
        let error = Error::DependencyUnavailable("store timed out".to_string());
        assert_eq!(error.code(), "E200");
        assert!(error.is_recoverable());
        assert!(error.suggestion().is_some());
    }

    #[test]
    fn test_state_corruption_error() {
        let error = Error::StateCorruption("bad json".to_string());
        assert_eq!(error.code(), "E300");
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let error: Error = parse.unwrap_err().into();
        assert_eq!(error.code(), "E301");
    }

    #[test]
    fn test_io_error_has_no_suggestion() {
        let error: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(error.code(), "E900");
        assert!(error.suggestion().is_none());
    }
}
