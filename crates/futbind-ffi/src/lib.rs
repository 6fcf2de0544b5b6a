//! Foreign module boundary for futbind.
//!
//! This crate turns a compiled C library plus its generated header into a
//! table of callable functions whose signatures are known only at runtime.
//!
//! # Architecture
//!
//! - `c_header_parser`: Lexer and parser for the header's declarations
//! - `c_types`: Reduction of C types to calling-convention kinds
//! - `call`: Dynamic calls through a call interface built per prototype
//! - `module`: Library loading and symbol binding
//! - `ownership`: Finalizer-bound pointers and foreign allocation helpers
//! - `error`: Error types for all of the above
//!
//! # Example
//!
//! ```ignore
//! use futbind_ffi::{ForeignArg, ForeignModule};
//!
//! let module = ForeignModule::load("./libsum.so", "./sum.h")?;
//! let new_cfg = module.function("futhark_context_config_new").unwrap();
//! let cfg = unsafe { new_cfg.invoke(&[])? };
//! ```

pub mod c_header_parser;
pub mod c_types;
pub mod call;
pub mod error;
pub mod module;
pub mod ownership;

pub use c_header_parser::{
    parse_header, CConstantValue, CDeclaration, CFunctionDecl, CFunctionParam, CHeaderParser,
    CType,
};
pub use c_types::{AbiKind, AbiScalar};
pub use call::{ForeignArg, ForeignFunction, ForeignValue};
pub use error::{FfiError, FfiResult};
pub use module::ForeignModule;
pub use ownership::{copy_foreign_buffer, take_foreign_string, Borrowed, Owned};
