//! FFI Error Types
//!
//! Errors raised at the foreign module boundary: loading a library, reading
//! its header, resolving symbols and performing dynamic calls.
//!
//! ## Error Categories
//!
//! - Library and header loading
//! - Signatures the call layer cannot express
//! - Argument mismatches at call time
//! - Foreign status codes and null returns
//! - Strings with interior NUL bytes

use std::ffi::NulError;
use thiserror::Error;

/// Result type for FFI operations
pub type FfiResult<T> = Result<T, FfiError>;

/// FFI error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FfiError {
    /// Null pointer was passed or returned where non-null was expected
    #[error("null pointer error: {context}")]
    NullPointer {
        /// Description of where the null pointer was encountered
        context: String,
    },

    /// String contains interior NUL bytes
    #[error("string contains interior NUL byte at position {position}")]
    InteriorNul {
        /// Position of the NUL byte
        position: usize,
    },

    /// An argument's ABI kind does not match the declared parameter
    #[error("ABI mismatch in `{function}`: {message}")]
    AbiMismatch {
        /// Function being called
        function: String,
        /// Description of the mismatch
        message: String,
    },

    /// Wrong number of arguments for a call
    #[error("`{function}` takes {expected} arguments, {actual} given")]
    ArgumentCount {
        /// Function being called
        function: String,
        /// Declared parameter count
        expected: usize,
        /// Supplied argument count
        actual: usize,
    },

    /// A declared type has no ABI kind the call layer can pass
    #[error("unsupported type `{ty}` in `{function}`")]
    UnsupportedType {
        /// Function using the type
        function: String,
        /// Rendered C type
        ty: String,
    },

    /// C library returned an error code
    #[error("C error code {code}: {message}")]
    CError {
        /// The error code
        code: i32,
        /// Message, including foreign diagnostic text when available
        message: String,
    },

    /// Symbol not found in dynamic library
    #[error("symbol not found: {symbol_name}")]
    SymbolNotFound {
        /// Name of the symbol
        symbol_name: String,
    },

    /// Library load failed
    #[error("failed to load library: {library_path}: {reason}")]
    LibraryLoadFailed {
        /// Path to the library
        library_path: String,
        /// Reason for failure
        reason: String,
    },

    /// Header could not be read
    #[error("failed to read header {header_path}: {reason}")]
    HeaderRead {
        /// Path to the header
        header_path: String,
        /// Reason for failure
        reason: String,
    },
}

impl FfiError {
    /// Create a null pointer error with context
    pub fn null_pointer(context: impl Into<String>) -> Self {
        FfiError::NullPointer {
            context: context.into(),
        }
    }

    /// Create an ABI mismatch error
    pub fn abi_mismatch(function: impl Into<String>, message: impl Into<String>) -> Self {
        FfiError::AbiMismatch {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported type error
    pub fn unsupported_type(function: impl Into<String>, ty: impl ToString) -> Self {
        FfiError::UnsupportedType {
            function: function.into(),
            ty: ty.to_string(),
        }
    }

    /// Create a C error from an error code
    pub fn from_c_error(code: i32, message: impl Into<String>) -> Self {
        FfiError::CError {
            code,
            message: message.into(),
        }
    }

    /// Create a symbol not found error
    pub fn symbol_not_found(symbol_name: impl Into<String>) -> Self {
        FfiError::SymbolNotFound {
            symbol_name: symbol_name.into(),
        }
    }
}

impl From<NulError> for FfiError {
    fn from(err: NulError) -> Self {
        FfiError::InteriorNul {
            position: err.nul_position(),
        }
    }
}
