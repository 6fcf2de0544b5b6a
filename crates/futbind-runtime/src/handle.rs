//! Opaque Handles
//!
//! An [`OpaqueArray`] owns one foreign object together with its type
//! descriptor. The object is released exactly once: explicitly through
//! [`OpaqueArray::release`] or implicitly on drop. Once the context is
//! closed, release is skipped, since the context already reclaimed the
//! object's memory.

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;

use futbind_ffi::{FfiError, FfiResult, ForeignArg, ForeignFunction, Owned};
use smol_str::SmolStr;

use crate::context::Context;
use crate::error::{BindError, BindResult};
use crate::host_array::HostArray;
use crate::marshal;
use crate::registry::TypeDescriptor;

/// An owned foreign object of a registered type
pub struct OpaqueArray {
    raw: Owned<c_void>,
    descriptor: Rc<TypeDescriptor>,
    context: Rc<Context>,
}

impl OpaqueArray {
    /// Take ownership of `raw`, a fresh object of the descriptor's type
    ///
    /// The caller must have checked that the descriptor is destructible, or
    /// the object leaks when this fails.
    pub(crate) fn bind(
        raw: *mut c_void,
        descriptor: &Rc<TypeDescriptor>,
        context: &Rc<Context>,
    ) -> BindResult<Self> {
        let destructor = descriptor.destructor()?.clone();
        let owner = context.clone();
        let type_name = SmolStr::new(descriptor.name());

        // SAFETY: `raw` is a live object of this type and the destructor frees it
        let raw = unsafe {
            Owned::with_finalizer(raw, move |ptr| {
                release_object(&owner, &destructor, &type_name, ptr)
            })
        }
        .ok_or_else(|| {
            BindError::call(
                descriptor.name(),
                "foreign call produced a null handle",
            )
        })?;

        Ok(Self {
            raw,
            descriptor: descriptor.clone(),
            context: context.clone(),
        })
    }

    pub fn descriptor(&self) -> &Rc<TypeDescriptor> {
        &self.descriptor
    }

    pub fn type_name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.raw.as_ptr()
    }

    pub(crate) fn context(&self) -> &Rc<Context> {
        &self.context
    }

    /// Whether this handle was created by the session owning `context`
    pub(crate) fn belongs_to(&self, context: &Rc<Context>) -> bool {
        Rc::ptr_eq(&self.context, context)
    }

    /// Dimensions of the foreign array
    pub fn shape(&self) -> BindResult<Vec<usize>> {
        marshal::shape_of(self)
    }

    /// Copy the foreign array into a new host array
    pub fn to_host(&self) -> BindResult<HostArray> {
        let mut arrays = marshal::from_foreign_batch(&self.context, &[self])?;
        arrays
            .pop()
            .ok_or_else(|| BindError::conversion("no array extracted"))
    }

    /// Release the object now, reporting a failing destructor
    pub fn release(self) -> BindResult<()> {
        let function = self
            .descriptor
            .destructor()
            .map(|d| d.name().to_string())
            .unwrap_or_else(|_| self.descriptor.name().to_string());
        self.raw.release().map_err(|err| match err {
            FfiError::CError { message, .. } => BindError::call(function, message),
            other => other.into(),
        })
    }
}

impl fmt::Debug for OpaqueArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpaqueArray")
            .field("type", &self.descriptor.name())
            .field("ptr", &self.raw.as_ptr())
            .finish()
    }
}

fn release_object(
    context: &Context,
    destructor: &ForeignFunction,
    type_name: &str,
    ptr: NonNull<c_void>,
) -> FfiResult<()> {
    let Some(ctx) = context.raw_if_live() else {
        tracing::trace!(type_name, "context closed; skipping destructor");
        return Ok(());
    };

    // SAFETY: the object was created in this live context and is freed once
    let status = unsafe {
        destructor.invoke(&[ForeignArg::Pointer(ctx), ForeignArg::Pointer(ptr.as_ptr())])
    }?;
    match status.as_status() {
        None | Some(0) => Ok(()),
        Some(code) => Err(FfiError::from_c_error(
            code as i32,
            context
                .last_error()
                .unwrap_or_else(|| format!("{} returned status {}", destructor.name(), code)),
        )),
    }
}
