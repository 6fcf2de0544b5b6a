//! Error Types for the Runtime
//!
//! Every failure a session can report, raised synchronously at the call site
//! that detects it. None are swallowed and none close the session.
//!
//! ## Error Categories
//!
//! - Configuration: the foreign context could not be built (fatal)
//! - Call: a foreign function returned a failure status (recoverable)
//! - Conversion: host data does not fit the foreign type, or a restore failed
//! - Registry: a type descriptor lacks an operation the call needs
//! - Lookup and lifecycle: unknown names, closed sessions

use futbind_ffi::FfiError;
use thiserror::Error;

/// Result type for runtime operations
pub type BindResult<T> = Result<T, BindError>;

/// Runtime error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindError {
    /// Context construction or configuration failed
    #[error("context configuration failed: {message}")]
    Configuration {
        /// Foreign diagnostic text, verbatim when available
        message: String,
    },

    /// A foreign call reported failure
    #[error("`{function}` failed: {message}")]
    Call {
        /// Symbol that failed
        function: String,
        /// Foreign diagnostic text, verbatim when available
        message: String,
    },

    /// Host value incompatible with the foreign type, or restore failure
    #[error("conversion failed: {message}")]
    Conversion {
        /// What did not fit
        message: String,
    },

    /// Type descriptor is missing an operation
    #[error("type `{type_name}` cannot be used here: {message}")]
    Registry {
        /// Printable type name
        type_name: String,
        /// Which operation is missing
        message: String,
    },

    /// Session already closed
    #[error("session is closed")]
    Closed,

    /// No entry point with this name
    #[error("no entry point named `{name}`")]
    UnknownEntryPoint {
        /// Requested name
        name: String,
    },

    /// No registered type with this name
    #[error("no type named `{name}`")]
    UnknownType {
        /// Requested name
        name: String,
    },

    /// Failure at the foreign module boundary
    #[error(transparent)]
    Ffi(#[from] FfiError),
}

impl BindError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        BindError::Configuration {
            message: message.into(),
        }
    }

    /// Create a call error
    pub fn call(function: impl Into<String>, message: impl Into<String>) -> Self {
        BindError::Call {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Create a conversion error
    pub fn conversion(message: impl Into<String>) -> Self {
        BindError::Conversion {
            message: message.into(),
        }
    }

    /// Create a registry error
    pub fn registry(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        BindError::Registry {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Whether the session stays usable after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BindError::Call { .. }
                | BindError::Conversion { .. }
                | BindError::UnknownEntryPoint { .. }
                | BindError::UnknownType { .. }
        )
    }
}
