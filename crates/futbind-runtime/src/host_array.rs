//! Host Arrays
//!
//! [`HostArray`] is a dynamically-ranked `ndarray` of any supported element
//! kind, tagged by kind so values can flow through untyped call paths.
//!
//! ## Memory Layout
//!
//! Foreign constructors read a row-major contiguous buffer. Arrays already
//! in standard layout are passed without copying; transposed or strided
//! arrays are copied into row-major order for the duration of the call.

use std::borrow::Cow;
use std::ffi::c_void;

use futbind_ffi::AbiScalar;
use ndarray::{Array, ArrayD, Dimension, IxDyn};

use crate::element::ElementKind;
use crate::error::{BindError, BindResult};

// ============================================================================
// HostArray
// ============================================================================

/// A host-side multi-dimensional array of one element kind
#[derive(Debug, Clone, PartialEq)]
pub enum HostArray {
    Bool(ArrayD<bool>),
    Int8(ArrayD<i8>),
    Int16(ArrayD<i16>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    UInt8(ArrayD<u8>),
    UInt16(ArrayD<u16>),
    UInt32(ArrayD<u32>),
    UInt64(ArrayD<u64>),
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
}

/// Apply the same expression to whichever array a `HostArray` holds
macro_rules! dispatch {
    ($host:expr, $a:ident => $body:expr) => {
        match $host {
            HostArray::Bool($a) => $body,
            HostArray::Int8($a) => $body,
            HostArray::Int16($a) => $body,
            HostArray::Int32($a) => $body,
            HostArray::Int64($a) => $body,
            HostArray::UInt8($a) => $body,
            HostArray::UInt16($a) => $body,
            HostArray::UInt32($a) => $body,
            HostArray::UInt64($a) => $body,
            HostArray::Float32($a) => $body,
            HostArray::Float64($a) => $body,
        }
    };
}

/// Numeric-to-numeric elementwise cast into the `$variant` array
macro_rules! widen_into {
    ($host:expr, $ty:ty, $variant:ident) => {
        match $host {
            HostArray::Bool(_) => None,
            HostArray::Int8(a) => Some(HostArray::$variant(a.mapv(|x| x as $ty))),
            HostArray::Int16(a) => Some(HostArray::$variant(a.mapv(|x| x as $ty))),
            HostArray::Int32(a) => Some(HostArray::$variant(a.mapv(|x| x as $ty))),
            HostArray::Int64(a) => Some(HostArray::$variant(a.mapv(|x| x as $ty))),
            HostArray::UInt8(a) => Some(HostArray::$variant(a.mapv(|x| x as $ty))),
            HostArray::UInt16(a) => Some(HostArray::$variant(a.mapv(|x| x as $ty))),
            HostArray::UInt32(a) => Some(HostArray::$variant(a.mapv(|x| x as $ty))),
            HostArray::UInt64(a) => Some(HostArray::$variant(a.mapv(|x| x as $ty))),
            HostArray::Float32(a) => Some(HostArray::$variant(a.mapv(|x| x as $ty))),
            HostArray::Float64(a) => Some(HostArray::$variant(a.mapv(|x| x as $ty))),
        }
    };
}

impl HostArray {
    /// Element kind of the array
    pub fn kind(&self) -> ElementKind {
        match self {
            HostArray::Bool(_) => ElementKind::Bool,
            HostArray::Int8(_) => ElementKind::Int8,
            HostArray::Int16(_) => ElementKind::Int16,
            HostArray::Int32(_) => ElementKind::Int32,
            HostArray::Int64(_) => ElementKind::Int64,
            HostArray::UInt8(_) => ElementKind::UInt8,
            HostArray::UInt16(_) => ElementKind::UInt16,
            HostArray::UInt32(_) => ElementKind::UInt32,
            HostArray::UInt64(_) => ElementKind::UInt64,
            HostArray::Float32(_) => ElementKind::Float32,
            HostArray::Float64(_) => ElementKind::Float64,
        }
    }

    /// Dimension sizes
    pub fn shape(&self) -> &[usize] {
        dispatch!(self, a => a.shape())
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        dispatch!(self, a => a.ndim())
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        dispatch!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the data is row-major contiguous
    pub fn is_standard_layout(&self) -> bool {
        dispatch!(self, a => a.is_standard_layout())
    }

    /// A zero-filled (`false` for bool) array of `kind` and `shape`
    pub fn zeros(kind: ElementKind, shape: &[usize]) -> HostArray {
        match kind {
            ElementKind::Bool => zeros_of::<bool>(shape),
            ElementKind::Int8 => zeros_of::<i8>(shape),
            ElementKind::Int16 => zeros_of::<i16>(shape),
            ElementKind::Int32 => zeros_of::<i32>(shape),
            ElementKind::Int64 => zeros_of::<i64>(shape),
            ElementKind::UInt8 => zeros_of::<u8>(shape),
            ElementKind::UInt16 => zeros_of::<u16>(shape),
            ElementKind::UInt32 => zeros_of::<u32>(shape),
            ElementKind::UInt64 => zeros_of::<u64>(shape),
            ElementKind::Float32 => zeros_of::<f32>(shape),
            ElementKind::Float64 => zeros_of::<f64>(shape),
        }
    }

    /// Retag to `kind`, borrowing when it already matches
    ///
    /// Only lossless widening is performed; anything else is a conversion
    /// error.
    pub fn cast(&self, kind: ElementKind) -> BindResult<Cow<'_, HostArray>> {
        if self.kind() == kind {
            return Ok(Cow::Borrowed(self));
        }
        if !kind.can_hold(self.kind()) {
            return Err(BindError::conversion(format!(
                "cannot convert {} array to {} without loss",
                self.kind(),
                kind
            )));
        }
        self.widen(kind).map(Cow::Owned).ok_or_else(|| {
            BindError::conversion(format!("cannot convert {} array to {}", self.kind(), kind))
        })
    }

    fn widen(&self, kind: ElementKind) -> Option<HostArray> {
        match kind {
            ElementKind::Bool => None,
            ElementKind::Int8 => widen_into!(self, i8, Int8),
            ElementKind::Int16 => widen_into!(self, i16, Int16),
            ElementKind::Int32 => widen_into!(self, i32, Int32),
            ElementKind::Int64 => widen_into!(self, i64, Int64),
            ElementKind::UInt8 => widen_into!(self, u8, UInt8),
            ElementKind::UInt16 => widen_into!(self, u16, UInt16),
            ElementKind::UInt32 => widen_into!(self, u32, UInt32),
            ElementKind::UInt64 => widen_into!(self, u64, UInt64),
            ElementKind::Float32 => widen_into!(self, f32, Float32),
            ElementKind::Float64 => widen_into!(self, f64, Float64),
        }
    }

    /// Borrow the typed array if it holds `T`
    pub fn as_array<T: Element>(&self) -> Option<&ArrayD<T>> {
        T::view(self)
    }

    /// Take the typed array if it holds `T`, or give the value back
    pub fn into_array<T: Element>(self) -> Result<ArrayD<T>, HostArray> {
        T::take(self)
    }

    /// Run `f` with a pointer to the row-major element buffer
    ///
    /// Non-standard layouts are copied first; the pointer is valid only
    /// inside `f`.
    pub(crate) fn with_row_major<R>(&self, f: impl FnOnce(*const c_void) -> R) -> R {
        dispatch!(self, a => {
            let standard = a.as_standard_layout();
            f(standard.as_ptr().cast())
        })
    }

    /// Pointer to the element buffer for foreign code to fill
    ///
    /// Only meaningful for arrays in standard layout, such as those built by
    /// [`HostArray::zeros`].
    pub(crate) fn as_mut_ptr(&mut self) -> *mut c_void {
        dispatch!(self, a => a.as_mut_ptr().cast())
    }
}

fn zeros_of<T: Element + Default>(shape: &[usize]) -> HostArray {
    T::wrap(ArrayD::from_elem(IxDyn(shape), T::default()))
}

impl<T: Element, D: Dimension> From<Array<T, D>> for HostArray {
    fn from(array: Array<T, D>) -> Self {
        T::wrap(array.into_dyn())
    }
}

// ============================================================================
// Element trait
// ============================================================================

/// Rust element types a [`HostArray`] can hold
pub trait Element: AbiScalar + Default {
    const ELEMENT: ElementKind;

    fn wrap(array: ArrayD<Self>) -> HostArray;

    fn view(host: &HostArray) -> Option<&ArrayD<Self>>;

    fn take(host: HostArray) -> Result<ArrayD<Self>, HostArray>;
}

macro_rules! element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl Element for $ty {
            const ELEMENT: ElementKind = ElementKind::$variant;

            fn wrap(array: ArrayD<Self>) -> HostArray {
                HostArray::$variant(array)
            }

            fn view(host: &HostArray) -> Option<&ArrayD<Self>> {
                match host {
                    HostArray::$variant(a) => Some(a),
                    _ => None,
                }
            }

            fn take(host: HostArray) -> Result<ArrayD<Self>, HostArray> {
                match host {
                    HostArray::$variant(a) => Ok(a),
                    other => Err(other),
                }
            }
        })*
    };
}

element! {
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
}
