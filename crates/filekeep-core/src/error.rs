use std::error::Error as StdError;

/// Boxed root cause attached to a failure.
pub type Cause = Box<dyn StdError + Send + Sync + 'static>;

/// Failure outcomes of filekeep operations.
///
/// Expected failure modes (missing file, decode failure, backup-name collision,
/// network fault) are always reported through this type, never by panicking.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O failure: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<Cause>,
    },

    #[error("Format failure: {message}")]
    Format {
        message: String,
        #[source]
        source: Option<Cause>,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

impl FileError {
    /// I/O failure with a root cause.
    pub fn io(message: impl Into<String>, source: impl Into<Cause>) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// I/O failure without a root cause.
    pub fn io_msg(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
            source: None,
        }
    }

    /// Decode/encode failure with a root cause.
    pub fn format(message: impl Into<String>, source: impl Into<Cause>) -> Self {
        Self::Format {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, FileError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_io_error_keeps_root_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = FileError::io("Failed to write /tmp/x", cause);

        assert_eq!(err.to_string(), "I/O failure: Failed to write /tmp/x");
        let source = err.source().expect("root cause");
        assert_eq!(source.to_string(), "denied");
    }

    #[test]
    fn test_predicates() {
        assert!(FileError::NotFound("a".into()).is_not_found());
        assert!(FileError::Cancelled.is_cancelled());
        assert!(!FileError::io_msg("x").is_not_found());
    }
}
