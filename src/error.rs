//! Custom error types for the active scanner
//!
//! Provides structured error handling with context propagation
//! and user-friendly error messages.

use thiserror::Error;

/// Main error type for scanner operations
#[derive(Error, Debug)]
pub enum AscanError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    /// Scanner errors
    #[error("Scanner error: {0}")]
    Scanner(#[from] ScannerError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {path}")]
    ReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Failed to write configuration file: {path}")]
    WriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    SerializeError(String),

    #[error("Invalid configuration value: {field} - {reason}")]
    ValidationError { field: String, reason: String },

    #[error("Configuration directory could not be determined")]
    NoConfigDir,
}

/// HTTP transport errors, surfaced to plugins as the result of one send
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Request failed: {0}")]
    RequestFailed(String),
}

/// Scanner lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScannerError {
    #[error("A scan is already running")]
    AlreadyRunning,

    #[error("Nothing to scan under node '{0}'")]
    EmptyTarget(String),

    #[error("Invalid target URL: {0}")]
    InvalidTarget(String),
}

impl AscanError {
    /// Create an error with additional context
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        AscanError::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            AscanError::Config(e) => format!("Configuration problem: {}", e.user_hint()),
            AscanError::Http(e) => format!("Network issue: {}", e.user_hint()),
            AscanError::Scanner(e) => format!("Scanner issue: {}", e.user_hint()),
            AscanError::Io(e) => format!("File system issue: {}", e),
            AscanError::WithContext { context, source } => {
                format!("{}: {}", context, source)
            }
        }
    }
}

/// Trait for providing user-friendly hints
pub trait UserHint {
    fn user_hint(&self) -> String;
}

impl UserHint for ConfigError {
    fn user_hint(&self) -> String {
        match self {
            ConfigError::ReadError { path, .. } => {
                format!("Could not read '{}'. Check if the file exists and you have read permissions.", path)
            }
            ConfigError::ParseError(_) => {
                "The configuration file has invalid syntax. Check for TOML formatting errors.".into()
            }
            ConfigError::WriteError { path, .. } => {
                format!("Could not write '{}'. Check the directory exists and is writable.", path)
            }
            ConfigError::SerializeError(e) => format!("Configuration could not be encoded: {}", e),
            ConfigError::ValidationError { field, reason } => {
                format!("Invalid value for '{}': {}", field, reason)
            }
            ConfigError::NoConfigDir => {
                "No home directory found. Pass --config with an explicit path.".into()
            }
        }
    }
}

impl UserHint for HttpError {
    fn user_hint(&self) -> String {
        match self {
            HttpError::Connection(_) => {
                "Could not connect to the server. Check if it's running and accessible.".into()
            }
            HttpError::Timeout(ms) => {
                format!("Request timed out after {}ms. The server may be slow or unresponsive.", ms)
            }
            HttpError::InvalidUrl(url) => {
                format!("'{}' is not a valid URL. Check the format.", url)
            }
            _ => self.to_string(),
        }
    }
}

impl UserHint for ScannerError {
    fn user_hint(&self) -> String {
        match self {
            ScannerError::AlreadyRunning => {
                "A scan is already in progress. Stop it or wait for it to finish.".into()
            }
            ScannerError::InvalidTarget(url) => {
                format!("'{}' is not a valid scan target. Use a full URL.", url)
            }
            _ => self.to_string(),
        }
    }
}

/// Extension trait for adding context to Result types
pub trait ResultExt<T, E> {
    fn with_context<C>(self, context: C) -> Result<T, AscanError>
    where
        C: Into<String>;
}

impl<T, E> ResultExt<T, E> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_context<C>(self, context: C) -> Result<T, AscanError>
    where
        C: Into<String>,
    {
        self.map_err(|e| AscanError::with_context(context, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_for_timeout() {
        let err = AscanError::from(HttpError::Timeout(1500));
        assert!(err.user_message().contains("1500ms"));
    }

    #[test]
    fn test_result_context() {
        let res: Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
        let err = res.with_context("loading targets").unwrap_err();
        assert_eq!(err.user_message(), "loading targets: missing");
    }
}
