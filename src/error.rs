//! Unified error handling for afk-rotator
//!
//! Each component owns a focused `thiserror` type. This module gathers them in
//! a single [`Error`] enum and classifies them, so callers can decide how to
//! react without matching every variant.
//!
//! # Architecture
//!
//! - [`RotatorErrorTrait`] - common interface implemented by all error types
//! - [`ErrorCategory`] - classification of errors for handling strategies
//! - [`Error`] - unified error enum wrapping the domain errors
//!
//! Only configuration errors are fatal, and the binary exits non-zero only for
//! those. Everything else is absorbed by the scheduler: connection failures are
//! retried with backoff, an empty pool skips a rotation, auth failures leave the
//! session connected, persistence failures fall back to the in-memory cursor.
//!
//! # Usage
//!
//! ```rust
//! use afk_rotator::error::{Error, ErrorCategory, RotatorErrorTrait};
//! use afk_rotator::identity::EmptyPoolError;
//!
//! let err: Error = EmptyPoolError.into();
//! assert!(err.is_recoverable());
//! assert_eq!(err.category(), ErrorCategory::Identity);
//! ```

use thiserror::Error;

pub use crate::auth::AuthSequenceError;
pub use crate::config::ConfigError;
pub use crate::identity::EmptyPoolError;
pub use crate::session::SessionError;
pub use crate::storage::PersistenceError;
pub use crate::transport::ConnectionError;

/// Common trait for all afk-rotator error types
pub trait RotatorErrorTrait: std::error::Error {
    /// Whether the process can carry on after this error
    fn is_recoverable(&self) -> bool;

    /// The error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration and validation errors
    Config,
    /// Identity pool errors
    Identity,
    /// Session slot misuse
    Session,
    /// Connection establishment and transport errors
    Network,
    /// Post-connect auth exchange errors
    Auth,
    /// Rotation state persistence errors
    Storage,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Identity => "identity",
            Self::Session => "session",
            Self::Network => "network",
            Self::Auth => "auth",
            Self::Storage => "storage",
        };
        write!(f, "{s}")
    }
}

/// Unified error type for afk-rotator
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing configuration
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Rotation requested with an empty pool
    #[error("Identity error: {0}")]
    EmptyPool(#[from] EmptyPoolError),

    /// Start requested while a session is current
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Connection failure
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Auth exchange failure
    #[error("Auth error: {0}")]
    Auth(#[from] AuthSequenceError),

    /// Rotation state could not be written
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl RotatorErrorTrait for ConfigError {
    fn is_recoverable(&self) -> bool {
        false
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Config
    }
}

impl RotatorErrorTrait for EmptyPoolError {
    fn is_recoverable(&self) -> bool {
        true
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Identity
    }
}

impl RotatorErrorTrait for SessionError {
    fn is_recoverable(&self) -> bool {
        true
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Session
    }
}

impl RotatorErrorTrait for ConnectionError {
    fn is_recoverable(&self) -> bool {
        true
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Network
    }
}

impl RotatorErrorTrait for AuthSequenceError {
    fn is_recoverable(&self) -> bool {
        true
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Auth
    }
}

impl RotatorErrorTrait for PersistenceError {
    fn is_recoverable(&self) -> bool {
        true
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Storage
    }
}

impl RotatorErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(e) => e.is_recoverable(),
            Self::EmptyPool(e) => e.is_recoverable(),
            Self::Session(e) => e.is_recoverable(),
            Self::Connection(e) => e.is_recoverable(),
            Self::Auth(e) => e.is_recoverable(),
            Self::Persistence(e) => e.is_recoverable(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(e) => e.category(),
            Self::EmptyPool(e) => e.category(),
            Self::Session(e) => e.category(),
            Self::Connection(e) => e.category(),
            Self::Auth(e) => e.category(),
            Self::Persistence(e) => e.category(),
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthStep;
    use crate::session::SessionId;

    #[test]
    fn test_only_config_is_fatal() {
        let config: Error = ConfigError::invalid("endpoint.host", "must not be empty").into();
        assert!(!config.is_recoverable());
        assert_eq!(config.category(), ErrorCategory::Config);

        let recoverable: Vec<Error> = vec![
            EmptyPoolError.into(),
            ConnectionError::Closed.into(),
            AuthSequenceError::Timeout {
                step: AuthStep::Login,
            }
            .into(),
            PersistenceError::Io {
                operation: "remove",
                path: "/tmp/rotation.json".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            }
            .into(),
        ];
        for err in recoverable {
            assert!(err.is_recoverable(), "{err} should be recoverable");
        }
    }

    #[test]
    fn test_error_category() {
        let err: Error = ConnectionError::Timeout {
            endpoint: "localhost:25565".to_string(),
            timeout_ms: 30_000,
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Network);
        assert_eq!(
            err.to_string(),
            "Connection error: connection to localhost:25565 timed out after 30000ms"
        );

        let err: Error = PersistenceError::Serialize(
            serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
        )
        .into();
        assert_eq!(err.category(), ErrorCategory::Storage);
    }

    #[test]
    fn test_session_error_conversion() {
        let err = SessionError::Duplicate {
            current: SessionId::new(1),
            identity: "alpha".to_string(),
        };
        let unified: Error = err.into();
        assert!(matches!(unified, Error::Session(_)));
        assert_eq!(unified.category(), ErrorCategory::Session);
    }
}
