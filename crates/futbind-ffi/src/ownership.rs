//! FFI Ownership
//!
//! Wrapper types that encode who frees a foreign pointer.
//!
//! ## Ownership Model
//!
//! - [`Owned`]: the host owns the pointer and a finalizer that releases it.
//!   The finalizer runs exactly once, on explicit [`Owned::release`] or on
//!   drop, whichever comes first. [`Owned::into_raw`] disarms it.
//! - [`Borrowed`]: foreign code owns the memory; the host only reads it for
//!   as long as the foreign side keeps it alive.
//!
//! Foreign strings and buffers allocated with the C allocator are copied into
//! host memory and freed immediately by [`take_foreign_string`] and
//! [`copy_foreign_buffer`].

use std::ffi::{c_char, c_void, CStr};
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::error::FfiResult;

// ============================================================================
// Owned Wrapper
// ============================================================================

type Finalizer<T> = Box<dyn FnOnce(NonNull<T>) -> FfiResult<()>>;

/// Owned pointer wrapper with a bound finalizer
pub struct Owned<T> {
    ptr: NonNull<T>,
    finalizer: Option<Finalizer<T>>,
}

impl<T> Owned<T> {
    /// Take ownership of `ptr`, releasing it with `finalizer`
    ///
    /// Returns `None` for a null pointer; the finalizer is then never run.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid until the finalizer runs, and the finalizer must
    /// be the correct way to release it.
    pub unsafe fn with_finalizer<F>(ptr: *mut T, finalizer: F) -> Option<Self>
    where
        F: FnOnce(NonNull<T>) -> FfiResult<()> + 'static,
    {
        NonNull::new(ptr).map(|ptr| Self {
            ptr,
            finalizer: Some(Box::new(finalizer)),
        })
    }

    /// Get the raw pointer
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Whether the finalizer is still pending
    pub fn is_armed(&self) -> bool {
        self.finalizer.is_some()
    }

    /// Run the finalizer now and report its outcome
    pub fn release(mut self) -> FfiResult<()> {
        match self.finalizer.take() {
            Some(finalizer) => finalizer(self.ptr),
            None => Ok(()),
        }
    }

    /// Consume and return the raw pointer without running the finalizer
    ///
    /// After calling this, the caller is responsible for releasing it.
    pub fn into_raw(mut self) -> *mut T {
        self.finalizer = None;
        self.ptr.as_ptr()
    }
}

impl<T> Drop for Owned<T> {
    fn drop(&mut self) {
        if let Some(finalizer) = self.finalizer.take() {
            if let Err(err) = finalizer(self.ptr) {
                tracing::warn!(error = %err, ptr = ?self.ptr, "finalizer failed during drop");
            }
        }
    }
}

impl<T> fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Owned({:p}", self.ptr)?;
        if !self.is_armed() {
            write!(f, ", released")?;
        }
        write!(f, ")")
    }
}

// ============================================================================
// Borrowed Wrapper
// ============================================================================

/// Borrowed pointer wrapper - foreign code owns this memory
pub struct Borrowed<'a, T> {
    ptr: *const T,
    _lifetime: PhantomData<&'a T>,
}

impl<'a, T> Borrowed<'a, T> {
    /// Create a new borrowed pointer
    ///
    /// # Safety
    ///
    /// The pointer must be null or valid for the lifetime 'a.
    pub unsafe fn new(ptr: *const T) -> Self {
        Self {
            ptr,
            _lifetime: PhantomData,
        }
    }

    /// Get the raw pointer
    pub fn as_ptr(&self) -> *const T {
        self.ptr
    }

    /// Check if the pointer is null
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// View `len` consecutive elements, or `None` for a null pointer
    ///
    /// # Safety
    ///
    /// The pointer must address at least `len` initialized, aligned elements.
    pub unsafe fn as_slice(&self, len: usize) -> Option<&'a [T]> {
        if self.ptr.is_null() {
            None
        } else {
            Some(std::slice::from_raw_parts(self.ptr, len))
        }
    }
}

impl<T> fmt::Debug for Borrowed<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Borrowed({:p})", self.ptr)
    }
}

// ============================================================================
// Foreign Allocations
// ============================================================================

fn c_free<T>(ptr: NonNull<T>) -> FfiResult<()> {
    // SAFETY: only bound to pointers the foreign side allocated with malloc
    unsafe { libc::free(ptr.as_ptr().cast::<c_void>()) };
    Ok(())
}

/// Copy a `malloc`ed NUL-terminated string into a host `String` and free it
///
/// Returns `None` for a null pointer. Invalid UTF-8 is replaced lossily so
/// foreign diagnostics are never dropped.
///
/// # Safety
///
/// `ptr` must be null or a NUL-terminated string allocated with the C
/// allocator that nothing else will free.
pub unsafe fn take_foreign_string(ptr: *mut c_char) -> Option<String> {
    let owned = Owned::with_finalizer(ptr, c_free)?;
    let text = CStr::from_ptr(owned.as_ptr()).to_string_lossy().into_owned();
    drop(owned);
    Some(text)
}

/// Copy a `malloc`ed buffer of `len` bytes into host memory and free it
///
/// # Safety
///
/// `ptr` must be null or point to `len` readable bytes allocated with the C
/// allocator that nothing else will free.
pub unsafe fn copy_foreign_buffer(ptr: *mut c_void, len: usize) -> Vec<u8> {
    match Owned::with_finalizer(ptr.cast::<u8>(), c_free) {
        Some(owned) => {
            let bytes = std::slice::from_raw_parts(owned.as_ptr(), len).to_vec();
            drop(owned);
            bytes
        }
        None => Vec::new(),
    }
}
