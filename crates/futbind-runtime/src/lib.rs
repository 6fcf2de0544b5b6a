//! # futbind runtime
//!
//! Reflective marshalling for libraries compiled to a C interface with
//! opaque array handles. Nothing is generated ahead of time: the library's
//! header is read at load time and every entry point becomes callable with
//! host arrays and scalars.
//!
//! ## Overview
//!
//! - A context manager that configures and owns the foreign context
//! - A type registry built from the conventionally named array accessors
//! - Entry point signatures classified from parameter types
//! - Host array conversion with lossless element widening
//! - Owned handles released exactly once, and never after their context
//! - Byte serialization for opaque values
//!
//! ## Example
//!
//! ```ignore
//! use futbind_runtime::{HostArray, Input, Session, SessionConfig};
//! use ndarray::array;
//!
//! let session = Session::load("./libsum.so", "./sum.h", &SessionConfig::default())?;
//! let xs = HostArray::from(array![1i64, 2, 3].into_dyn());
//! let total = session.call("sum", &[Input::Array(&xs)])?;
//! ```
//!
//! ## Module Structure
//!
//! - [`session`]: The public entry into everything below
//! - [`context`]: Foreign context lifecycle and configuration
//! - [`config`]: Session options, in code or TOML
//! - [`naming`]: Symbol naming convention
//! - [`registry`]: Type descriptors scanned from accessor symbols
//! - [`entry`]: Entry point classification and calls
//! - [`handle`]: Owned foreign objects
//! - [`element`]: Element kinds and scalar values
//! - [`host_array`]: Dynamically typed host arrays
//! - [`error`]: Error types

pub mod config;
pub mod context;
pub mod element;
pub mod entry;
pub mod error;
pub mod handle;
pub mod host_array;
mod marshal;
pub mod naming;
pub mod registry;
mod serialize;
pub mod session;

// Re-export main types for convenience
pub use config::SessionConfig;
pub use context::ContextState;
pub use element::{ElementKind, Scalar};
pub use entry::{EntryPoint, EntryPointSignature, EntryPoints, Input, ParamRole, Returned, Value};
pub use error::{BindError, BindResult};
pub use handle::OpaqueArray;
pub use host_array::{Element, HostArray};
pub use naming::{Naming, SymbolRole};
pub use registry::{TypeDescriptor, TypeId, TypeRegistry};
pub use session::Session;

pub use futbind_ffi::{FfiError, ForeignModule};
