use std::error::Error as StdError;

/// Crate-wide result type for chat operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed chat errors shared by every platform binding.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input payload or parameter is invalid.
    #[error("invalid chat input: {message}")]
    InvalidInput { message: String },

    /// The platform has no such operation (for example editing a sent message).
    #[error("operation not supported by this platform: {operation}")]
    Unsupported { operation: &'static str },

    /// The platform answered but reported a failure.
    #[error("platform rejected {operation}: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },

    /// Wrapped source error from an external dependency.
    #[error("chat operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }

    #[must_use]
    pub fn rejected(operation: &'static str, message: impl std::fmt::Display) -> Self {
        Self::Rejected {
            operation,
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
