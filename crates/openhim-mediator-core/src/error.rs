use thiserror::Error;

/// Error types shared across the mediator engine
#[derive(Debug, Error)]
pub enum MediatorError {
    #[error("{0} requests not supported")]
    UnsupportedMethod(String),

    #[error("Route pattern already mapped: {0}")]
    DuplicateRoute(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("{transport} transport error: {message}")]
    Transport { transport: String, message: String },

    #[error("Core authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid mediator response content: {0}")]
    InvalidContent(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Cannot enable async processing: the transaction id header is unknown")]
    MissingTransactionId,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),
}

impl MediatorError {
    /// Create a new UnsupportedMethod error
    pub fn unsupported_method(method: impl Into<String>) -> Self {
        Self::UnsupportedMethod(method.into())
    }

    /// Create a new DuplicateRoute error
    pub fn duplicate_route(pattern: impl Into<String>) -> Self {
        Self::DuplicateRoute(pattern.into())
    }

    /// Create a new Handler error
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Create a new Transport error
    pub fn transport(transport: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            transport: transport.into(),
            message: message.into(),
        }
    }

    /// Create a new Authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication(message.into())
    }

    /// Create a new InvalidContent error
    pub fn invalid_content(message: impl Into<String>) -> Self {
        Self::InvalidContent(message.into())
    }

    /// Create a new InvalidTimestamp error
    pub fn invalid_timestamp(message: impl Into<String>) -> Self {
        Self::InvalidTimestamp(message.into())
    }

    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Check if this error should prevent startup rather than fail a single request
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::DuplicateRoute(_) | Self::RegexError(_)
        )
    }

    /// Get error category for logging/monitoring
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnsupportedMethod(_) | Self::Transport { .. } | Self::UrlError(_) => {
                ErrorCategory::Transport
            }
            Self::Handler(_) | Self::MissingTransactionId => ErrorCategory::Handler,
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::InvalidContent(_) | Self::InvalidTimestamp(_) | Self::JsonError(_) => {
                ErrorCategory::Parse
            }
            Self::DuplicateRoute(_) | Self::Configuration(_) | Self::RegexError(_) => {
                ErrorCategory::Configuration
            }
        }
    }
}

/// Error categories for monitoring and classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Handler,
    Transport,
    Authentication,
    Parse,
    Configuration,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handler => write!(f, "handler"),
            Self::Transport => write!(f, "transport"),
            Self::Authentication => write!(f, "authentication"),
            Self::Parse => write!(f, "parse"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Convenience result type for mediator operations
pub type Result<T> = std::result::Result<T, MediatorError>;
