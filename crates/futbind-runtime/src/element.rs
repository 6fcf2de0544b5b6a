//! Element Kinds and Scalars
//!
//! [`ElementKind`] is the closed set of primitive element types a foreign
//! array can hold; each maps to exactly one ABI kind and back. [`Scalar`] is
//! a single host value of one of those kinds.
//!
//! ## Conversion rules
//!
//! - Arrays: only lossless widening between kinds ([`ElementKind::can_hold`])
//! - Scalars: any kind, as long as the particular value is represented
//!   exactly in the target ([`Scalar::coerce`])
//! - `bool` never converts to or from a numeric kind

use std::ffi::c_void;
use std::fmt;

use futbind_ffi::{AbiKind, ForeignArg};

use crate::error::{BindError, BindResult};

// ============================================================================
// ElementKind
// ============================================================================

/// Primitive element type of a foreign array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementKind {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl ElementKind {
    /// Every supported kind
    pub const ALL: [ElementKind; 11] = [
        ElementKind::Bool,
        ElementKind::Int8,
        ElementKind::Int16,
        ElementKind::Int32,
        ElementKind::Int64,
        ElementKind::UInt8,
        ElementKind::UInt16,
        ElementKind::UInt32,
        ElementKind::UInt64,
        ElementKind::Float32,
        ElementKind::Float64,
    ];

    /// Get the size in bytes
    pub fn size(self) -> usize {
        self.abi().size()
    }

    /// Width in bits
    pub fn bits(self) -> u32 {
        (self.size() * 8) as u32
    }

    /// Short name as used in foreign type names (`i64` in `i64_1d`)
    pub fn name(self) -> &'static str {
        match self {
            ElementKind::Bool => "bool",
            ElementKind::Int8 => "i8",
            ElementKind::Int16 => "i16",
            ElementKind::Int32 => "i32",
            ElementKind::Int64 => "i64",
            ElementKind::UInt8 => "u8",
            ElementKind::UInt16 => "u16",
            ElementKind::UInt32 => "u32",
            ElementKind::UInt64 => "u64",
            ElementKind::Float32 => "f32",
            ElementKind::Float64 => "f64",
        }
    }

    /// Parse a kind from its short or long name
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "bool" => Some(ElementKind::Bool),
            "i8" | "int8" => Some(ElementKind::Int8),
            "i16" | "int16" => Some(ElementKind::Int16),
            "i32" | "int32" => Some(ElementKind::Int32),
            "i64" | "int64" => Some(ElementKind::Int64),
            "u8" | "uint8" => Some(ElementKind::UInt8),
            "u16" | "uint16" => Some(ElementKind::UInt16),
            "u32" | "uint32" => Some(ElementKind::UInt32),
            "u64" | "uint64" => Some(ElementKind::UInt64),
            "f32" | "float32" => Some(ElementKind::Float32),
            "f64" | "float64" => Some(ElementKind::Float64),
            _ => None,
        }
    }

    /// The element kind passed as `abi`, if it is a value kind
    pub fn from_abi(abi: AbiKind) -> Option<Self> {
        Some(match abi {
            AbiKind::Bool => ElementKind::Bool,
            AbiKind::I8 => ElementKind::Int8,
            AbiKind::I16 => ElementKind::Int16,
            AbiKind::I32 => ElementKind::Int32,
            AbiKind::I64 => ElementKind::Int64,
            AbiKind::U8 => ElementKind::UInt8,
            AbiKind::U16 => ElementKind::UInt16,
            AbiKind::U32 => ElementKind::UInt32,
            AbiKind::U64 => ElementKind::UInt64,
            AbiKind::F32 => ElementKind::Float32,
            AbiKind::F64 => ElementKind::Float64,
            AbiKind::Void | AbiKind::Pointer => return None,
        })
    }

    /// The ABI kind this element is passed as
    pub fn abi(self) -> AbiKind {
        match self {
            ElementKind::Bool => AbiKind::Bool,
            ElementKind::Int8 => AbiKind::I8,
            ElementKind::Int16 => AbiKind::I16,
            ElementKind::Int32 => AbiKind::I32,
            ElementKind::Int64 => AbiKind::I64,
            ElementKind::UInt8 => AbiKind::U8,
            ElementKind::UInt16 => AbiKind::U16,
            ElementKind::UInt32 => AbiKind::U32,
            ElementKind::UInt64 => AbiKind::U64,
            ElementKind::Float32 => AbiKind::F32,
            ElementKind::Float64 => AbiKind::F64,
        }
    }

    pub fn is_integer(self) -> bool {
        self.abi().is_integer()
    }

    pub fn is_float(self) -> bool {
        self.abi().is_float()
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ElementKind::Int8 | ElementKind::Int16 | ElementKind::Int32 | ElementKind::Int64
        ) || self.is_float()
    }

    /// Whether every value of `source` is exactly representable in `self`
    pub fn can_hold(self, source: ElementKind) -> bool {
        if self == source {
            return true;
        }
        if self == ElementKind::Bool || source == ElementKind::Bool {
            return false;
        }
        match (self.is_float(), source.is_float()) {
            // Mantissa must cover the integer's width
            (true, false) => source.bits() < self.mantissa_bits(),
            (true, true) => self.bits() > source.bits(),
            (false, true) => false,
            (false, false) if self.is_signed() => source.bits() < self.bits(),
            (false, false) => !source.is_signed() && source.bits() < self.bits(),
        }
    }

    fn mantissa_bits(self) -> u32 {
        match self {
            ElementKind::Float32 => 24,
            ElementKind::Float64 => 53,
            _ => 0,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Scalar
// ============================================================================

/// A single host value of some element kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

macro_rules! scalar_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Scalar {
            fn from(v: $ty) -> Self {
                Scalar::$variant(v)
            }
        })*
    };
}

scalar_from! {
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

impl Scalar {
    pub fn kind(&self) -> ElementKind {
        match self {
            Scalar::Bool(_) => ElementKind::Bool,
            Scalar::I8(_) => ElementKind::Int8,
            Scalar::I16(_) => ElementKind::Int16,
            Scalar::I32(_) => ElementKind::Int32,
            Scalar::I64(_) => ElementKind::Int64,
            Scalar::U8(_) => ElementKind::UInt8,
            Scalar::U16(_) => ElementKind::UInt16,
            Scalar::U32(_) => ElementKind::UInt32,
            Scalar::U64(_) => ElementKind::UInt64,
            Scalar::F32(_) => ElementKind::Float32,
            Scalar::F64(_) => ElementKind::Float64,
        }
    }

    /// Integer value, for integer kinds
    pub fn as_i128(&self) -> Option<i128> {
        Some(match *self {
            Scalar::I8(v) => v.into(),
            Scalar::I16(v) => v.into(),
            Scalar::I32(v) => v.into(),
            Scalar::I64(v) => v.into(),
            Scalar::U8(v) => v.into(),
            Scalar::U16(v) => v.into(),
            Scalar::U32(v) => v.into(),
            Scalar::U64(v) => v.into(),
            _ => return None,
        })
    }

    /// Integer value if it fits an `i64`
    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|v| i64::try_from(v).ok())
    }

    /// Floating value, for float kinds
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Scalar::F32(v) => Some(v.into()),
            Scalar::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Scalar::Bool(v) => Some(v),
            _ => None,
        }
    }

    fn from_i128(kind: ElementKind, v: i128) -> Option<Scalar> {
        Some(match kind {
            ElementKind::Int8 => Scalar::I8(i8::try_from(v).ok()?),
            ElementKind::Int16 => Scalar::I16(i16::try_from(v).ok()?),
            ElementKind::Int32 => Scalar::I32(i32::try_from(v).ok()?),
            ElementKind::Int64 => Scalar::I64(i64::try_from(v).ok()?),
            ElementKind::UInt8 => Scalar::U8(u8::try_from(v).ok()?),
            ElementKind::UInt16 => Scalar::U16(u16::try_from(v).ok()?),
            ElementKind::UInt32 => Scalar::U32(u32::try_from(v).ok()?),
            ElementKind::UInt64 => Scalar::U64(u64::try_from(v).ok()?),
            ElementKind::Float32 => {
                let f = v as f32;
                (f as i128 == v).then_some(Scalar::F32(f))?
            }
            ElementKind::Float64 => {
                let f = v as f64;
                (f as i128 == v).then_some(Scalar::F64(f))?
            }
            ElementKind::Bool => return None,
        })
    }

    /// Convert to `target` if this value is exactly representable there
    pub fn coerce(self, target: ElementKind) -> BindResult<Scalar> {
        if self.kind() == target {
            return Ok(self);
        }

        let converted = if let Some(v) = self.as_i128() {
            Scalar::from_i128(target, v)
        } else {
            match (self, target) {
                (Scalar::F32(v), ElementKind::Float64) => Some(Scalar::F64(v.into())),
                (Scalar::F64(v), ElementKind::Float32) => {
                    let f = v as f32;
                    (f64::from(f) == v || v.is_nan()).then_some(Scalar::F32(f))
                }
                _ => None,
            }
        };

        converted.ok_or_else(|| {
            BindError::conversion(format!("{:?} is not representable as {}", self, target))
        })
    }

    /// An integer argument of ABI kind `kind`, if `value` fits it
    pub(crate) fn integer_arg(kind: AbiKind, value: i128) -> Option<ForeignArg> {
        let kind = ElementKind::from_abi(kind).filter(|k| k.is_integer())?;
        Scalar::from_i128(kind, value).map(Scalar::to_arg)
    }

    /// Pass this scalar by value
    pub(crate) fn to_arg(self) -> ForeignArg {
        match self {
            Scalar::Bool(v) => ForeignArg::Bool(v),
            Scalar::I8(v) => ForeignArg::I8(v),
            Scalar::I16(v) => ForeignArg::I16(v),
            Scalar::I32(v) => ForeignArg::I32(v),
            Scalar::I64(v) => ForeignArg::I64(v),
            Scalar::U8(v) => ForeignArg::U8(v),
            Scalar::U16(v) => ForeignArg::U16(v),
            Scalar::U32(v) => ForeignArg::U32(v),
            Scalar::U64(v) => ForeignArg::U64(v),
            Scalar::F32(v) => ForeignArg::F32(v),
            Scalar::F64(v) => ForeignArg::F64(v),
        }
    }

    /// Read a value of `kind` that foreign code wrote through an out pointer
    ///
    /// # Safety
    ///
    /// `cell` must be aligned for `kind` and hold a value written as `kind`.
    pub(crate) unsafe fn read(kind: ElementKind, cell: *const c_void) -> Scalar {
        match kind {
            ElementKind::Bool => Scalar::Bool(cell.cast::<u8>().read() != 0),
            ElementKind::Int8 => Scalar::I8(cell.cast::<i8>().read()),
            ElementKind::Int16 => Scalar::I16(cell.cast::<i16>().read()),
            ElementKind::Int32 => Scalar::I32(cell.cast::<i32>().read()),
            ElementKind::Int64 => Scalar::I64(cell.cast::<i64>().read()),
            ElementKind::UInt8 => Scalar::U8(cell.cast::<u8>().read()),
            ElementKind::UInt16 => Scalar::U16(cell.cast::<u16>().read()),
            ElementKind::UInt32 => Scalar::U32(cell.cast::<u32>().read()),
            ElementKind::UInt64 => Scalar::U64(cell.cast::<u64>().read()),
            ElementKind::Float32 => Scalar::F32(cell.cast::<f32>().read()),
            ElementKind::Float64 => Scalar::F64(cell.cast::<f64>().read()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::I8(v) => write!(f, "{}i8", v),
            Scalar::I16(v) => write!(f, "{}i16", v),
            Scalar::I32(v) => write!(f, "{}i32", v),
            Scalar::I64(v) => write!(f, "{}i64", v),
            Scalar::U8(v) => write!(f, "{}u8", v),
            Scalar::U16(v) => write!(f, "{}u16", v),
            Scalar::U32(v) => write!(f, "{}u32", v),
            Scalar::U64(v) => write!(f, "{}u64", v),
            Scalar::F32(v) => write!(f, "{}f32", v),
            Scalar::F64(v) => write!(f, "{}f64", v),
        }
    }
}
