//! C Type Mappings
//!
//! Reduces parsed C types to the handful of ABI kinds a dynamic call can
//! pass or return.
//!
//! ## Kind Categories
//!
//! 1. **Platform-specific types**: `int`, `long`, `char`, `size_t` resolve by
//!    the target's sizes and signedness
//! 2. **Fixed-size types**: `int8_t` .. `uint64_t` map one to one
//! 3. **Floating point**: `float`, `double`
//! 4. **Pointers**: every pointer and array decays to one pointer kind
//!
//! By-value structs, unresolved named types and `long double` have no kind;
//! functions using them cannot be called.

use std::fmt;
use std::mem::size_of;
use std::os::raw::{c_char, c_int, c_long, c_short};

use libffi::middle::Type;

use crate::c_header_parser::CType;

// ============================================================================
// ABI Kinds
// ============================================================================

/// The calling-convention class of a parameter or return value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbiKind {
    Void,
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Pointer,
}

impl AbiKind {
    /// Classify a C type, or `None` if it cannot cross a dynamic call
    pub fn of(ty: &CType) -> Option<AbiKind> {
        let kind = match ty {
            CType::Const(inner) | CType::Volatile(inner) => return AbiKind::of(inner),
            CType::Void => AbiKind::Void,
            CType::Bool => AbiKind::Bool,
            CType::Char => integer::<c_char>(c_char::MIN != 0),
            CType::SChar | CType::Int8 => AbiKind::I8,
            CType::UChar | CType::UInt8 => AbiKind::U8,
            CType::Short | CType::Int16 => integer::<c_short>(true),
            CType::UShort | CType::UInt16 => integer::<c_short>(false),
            CType::Int | CType::Int32 => integer::<c_int>(true),
            CType::UInt | CType::UInt32 => integer::<c_int>(false),
            CType::Long => integer::<c_long>(true),
            CType::ULong => integer::<c_long>(false),
            CType::LongLong | CType::Int64 => AbiKind::I64,
            CType::ULongLong | CType::UInt64 => AbiKind::U64,
            CType::SizeT | CType::UIntPtrT => integer::<usize>(false),
            CType::SSizeT | CType::IntPtrT | CType::PtrDiffT => integer::<isize>(true),
            CType::Float => AbiKind::F32,
            CType::Double => AbiKind::F64,
            CType::Pointer(_) | CType::Array(..) => AbiKind::Pointer,
            CType::LongDouble | CType::Named(_) => return None,
        };
        Some(kind)
    }

    /// Size in bytes
    pub fn size(self) -> usize {
        match self {
            AbiKind::Void => 0,
            AbiKind::Bool | AbiKind::I8 | AbiKind::U8 => 1,
            AbiKind::I16 | AbiKind::U16 => 2,
            AbiKind::I32 | AbiKind::U32 | AbiKind::F32 => 4,
            AbiKind::I64 | AbiKind::U64 | AbiKind::F64 => 8,
            AbiKind::Pointer => size_of::<*const ()>(),
        }
    }

    /// Short name used in messages
    pub fn name(self) -> &'static str {
        match self {
            AbiKind::Void => "void",
            AbiKind::Bool => "bool",
            AbiKind::I8 => "i8",
            AbiKind::I16 => "i16",
            AbiKind::I32 => "i32",
            AbiKind::I64 => "i64",
            AbiKind::U8 => "u8",
            AbiKind::U16 => "u16",
            AbiKind::U32 => "u32",
            AbiKind::U64 => "u64",
            AbiKind::F32 => "f32",
            AbiKind::F64 => "f64",
            AbiKind::Pointer => "pointer",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            AbiKind::I8
                | AbiKind::I16
                | AbiKind::I32
                | AbiKind::I64
                | AbiKind::U8
                | AbiKind::U16
                | AbiKind::U32
                | AbiKind::U64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, AbiKind::F32 | AbiKind::F64)
    }

    /// A value kind: neither void nor a pointer
    pub fn is_primitive(self) -> bool {
        !matches!(self, AbiKind::Void | AbiKind::Pointer)
    }

    /// The libffi type describing this kind
    pub(crate) fn ffi_type(self) -> Type {
        match self {
            AbiKind::Void => Type::void(),
            AbiKind::Bool | AbiKind::U8 => Type::u8(),
            AbiKind::I8 => Type::i8(),
            AbiKind::I16 => Type::i16(),
            AbiKind::I32 => Type::i32(),
            AbiKind::I64 => Type::i64(),
            AbiKind::U16 => Type::u16(),
            AbiKind::U32 => Type::u32(),
            AbiKind::U64 => Type::u64(),
            AbiKind::F32 => Type::f32(),
            AbiKind::F64 => Type::f64(),
            AbiKind::Pointer => Type::pointer(),
        }
    }
}

impl fmt::Display for AbiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Integer kind for the C type `T` stands in for
fn integer<T>(signed: bool) -> AbiKind {
    match (size_of::<T>(), signed) {
        (1, true) => AbiKind::I8,
        (1, false) => AbiKind::U8,
        (2, true) => AbiKind::I16,
        (2, false) => AbiKind::U16,
        (4, true) => AbiKind::I32,
        (4, false) => AbiKind::U32,
        (_, true) => AbiKind::I64,
        (_, false) => AbiKind::U64,
    }
}

// ============================================================================
// Rust Scalars
// ============================================================================

/// Rust types with an exact ABI kind
///
/// Implemented for the fixed-width primitives only; buffers of these types
/// can be handed to foreign code expecting the matching C element type.
pub trait AbiScalar: Copy + 'static {
    const KIND: AbiKind;
}

macro_rules! abi_scalar {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(impl AbiScalar for $ty {
            const KIND: AbiKind = AbiKind::$kind;
        })*
    };
}

abi_scalar! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}
