//! Serialization
//!
//! Opaque values round-trip through byte strings using the type's own
//! `store_<T>` and `restore_<T>` functions. The byte format belongs to the
//! library; it is copied verbatim and never inspected here.

use std::ffi::c_void;
use std::rc::Rc;

use futbind_ffi::{copy_foreign_buffer, ForeignArg};

use crate::context::Context;
use crate::error::{BindError, BindResult};
use crate::handle::OpaqueArray;
use crate::registry::TypeDescriptor;

/// Serialize a handle into bytes the matching restore accepts
pub(crate) fn store(context: &Rc<Context>, handle: &OpaqueArray) -> BindResult<Vec<u8>> {
    if !handle.belongs_to(context) {
        return Err(BindError::conversion(format!(
            "{} handle belongs to another session",
            handle.type_name()
        )));
    }
    let store = handle.descriptor().store_fn()?;

    let mut data: *mut c_void = std::ptr::null_mut();
    let mut size: usize = 0;
    // SAFETY: the out pointers live on this frame; the foreign side mallocs `data`
    let status = unsafe {
        store.invoke(&[
            ForeignArg::Pointer(context.raw()?),
            ForeignArg::Pointer(handle.as_ptr()),
            ForeignArg::ptr(&mut data as *mut *mut c_void),
            ForeignArg::ptr(&mut size as *mut usize),
        ])
    }?;

    if let Err(err) = context.check(store.name(), status) {
        // SAFETY: whatever was allocated before the failure is ours to free
        unsafe { copy_foreign_buffer(data, 0) };
        return Err(err);
    }
    // SAFETY: the foreign side wrote `size` bytes at `data` and handed them over
    let bytes = unsafe { copy_foreign_buffer(data, size) };
    tracing::trace!(ty = handle.type_name(), bytes = bytes.len(), "stored value");
    Ok(bytes)
}

/// Rebuild a handle of `descriptor`'s type from stored bytes
pub(crate) fn restore(
    context: &Rc<Context>,
    descriptor: &Rc<TypeDescriptor>,
    bytes: &[u8],
) -> BindResult<OpaqueArray> {
    let restore = descriptor.restore_fn()?;
    descriptor.destructor()?;
    if bytes.is_empty() {
        return Err(BindError::conversion(format!(
            "cannot restore {} from an empty buffer",
            descriptor.name()
        )));
    }

    // SAFETY: the buffer outlives the call and restore only reads from it
    let value = unsafe {
        restore.invoke(&[
            ForeignArg::Pointer(context.raw()?),
            ForeignArg::ptr(bytes.as_ptr()),
        ])
    }?;

    let raw = value.as_pointer().unwrap_or(std::ptr::null_mut());
    if raw.is_null() {
        let detail = context
            .last_error()
            .unwrap_or_else(|| "data rejected".to_string());
        return Err(BindError::conversion(format!(
            "cannot restore {}: {}",
            descriptor.name(),
            detail.trim_end()
        )));
    }
    OpaqueArray::bind(raw, descriptor, context)
}
