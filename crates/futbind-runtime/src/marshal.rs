//! Array Marshalling
//!
//! Conversion between host arrays and foreign array handles.
//!
//! ## Into the foreign side
//!
//! 1. Check the host array's rank against the descriptor's
//! 2. Widen the elements to the descriptor's kind if that is lossless
//! 3. Hand the constructor a row-major buffer and the dimensions
//!
//! ## Out of the foreign side
//!
//! Shape first, then a host buffer of that shape for the value extractor to
//! fill. Batches are bracketed by synchronization so asynchronous backends
//! have finished writing before the buffers are read.

use std::rc::Rc;

use futbind_ffi::{Borrowed, ForeignArg};

use crate::context::Context;
use crate::element::Scalar;
use crate::error::{BindError, BindResult};
use crate::handle::OpaqueArray;
use crate::host_array::HostArray;
use crate::registry::TypeDescriptor;

/// Construct a foreign array holding a copy of `host`
pub(crate) fn to_foreign(
    context: &Rc<Context>,
    descriptor: &Rc<TypeDescriptor>,
    host: &HostArray,
) -> BindResult<OpaqueArray> {
    let constructor = descriptor.constructor()?;
    descriptor.destructor()?;
    let element = descriptor.require_element()?;
    let rank = descriptor.require_rank()?;

    if host.ndim() != rank {
        return Err(BindError::conversion(format!(
            "{} expects an array of rank {}, got rank {}",
            descriptor.name(),
            rank,
            host.ndim()
        )));
    }
    let host = host.cast(element)?;

    let mut args = vec![
        ForeignArg::Pointer(context.raw()?),
        ForeignArg::Pointer(std::ptr::null_mut()),
    ];
    for (&dim, &kind) in host.shape().iter().zip(&constructor.param_kinds()[2..]) {
        let arg = Scalar::integer_arg(kind, dim as i128).ok_or_else(|| {
            BindError::conversion(format!("dimension {} does not fit {}", dim, kind))
        })?;
        args.push(arg);
    }

    let value = host.with_row_major(|data| {
        args[1] = ForeignArg::ptr(data);
        // SAFETY: data holds product(dims) elements of the constructor's kind
        // and stays alive for the duration of the call
        unsafe { constructor.invoke(&args) }
    })?;

    let raw = value.as_pointer().unwrap_or(std::ptr::null_mut());
    if raw.is_null() {
        let message = context
            .last_error()
            .unwrap_or_else(|| "constructor returned null".to_string());
        return Err(BindError::call(constructor.name(), message));
    }

    tracing::trace!(ty = descriptor.name(), shape = ?host.shape(), "constructed foreign array");
    OpaqueArray::bind(raw, descriptor, context)
}

/// Dimensions of a foreign array, copied out of the shape accessor's buffer
pub(crate) fn shape_of(handle: &OpaqueArray) -> BindResult<Vec<usize>> {
    let descriptor = handle.descriptor();
    let accessor = descriptor.shape_accessor()?;
    let rank = descriptor.require_rank()?;
    let ctx = handle.context().raw()?;

    // SAFETY: the handle is live in this context
    let value = unsafe {
        accessor.invoke(&[ForeignArg::Pointer(ctx), ForeignArg::Pointer(handle.as_ptr())])
    }?;
    let ptr = value.as_pointer().unwrap_or(std::ptr::null_mut());

    // SAFETY: the accessor returns `rank` dimensions owned by the handle
    let dims = unsafe { Borrowed::new(ptr.cast::<i64>().cast_const()).as_slice(rank) }
        .ok_or_else(|| BindError::call(accessor.name(), "returned no shape"))?;

    dims.iter()
        .map(|&dim| {
            usize::try_from(dim)
                .map_err(|_| BindError::conversion(format!("negative dimension {}", dim)))
        })
        .collect()
}

/// Copy one foreign array out, without synchronizing
fn extract(handle: &OpaqueArray) -> BindResult<HostArray> {
    let descriptor = handle.descriptor();
    let values = descriptor.values_accessor()?;
    let element = descriptor.require_element()?;
    let shape = shape_of(handle)?;

    let context = handle.context();
    let mut host = HostArray::zeros(element, &shape);
    // SAFETY: `host` has room for product(shape) elements of the extractor's kind
    let status = unsafe {
        values.invoke(&[
            ForeignArg::Pointer(context.raw()?),
            ForeignArg::Pointer(handle.as_ptr()),
            ForeignArg::Pointer(host.as_mut_ptr()),
        ])
    }?;
    context.check(values.name(), status)?;
    Ok(host)
}

/// Copy several foreign arrays out under one pair of synchronization points
pub(crate) fn from_foreign_batch(
    context: &Rc<Context>,
    handles: &[&OpaqueArray],
) -> BindResult<Vec<HostArray>> {
    if let Some(stranger) = handles.iter().find(|h| !h.belongs_to(context)) {
        return Err(BindError::conversion(format!(
            "{} handle belongs to another session",
            stranger.type_name()
        )));
    }

    context.sync()?;
    let arrays = handles
        .iter()
        .map(|handle| extract(handle))
        .collect::<BindResult<Vec<_>>>()?;
    context.sync()?;
    Ok(arrays)
}
