//! Dynamic Calls
//!
//! A [`ForeignFunction`] pairs a parsed prototype with a resolved address and
//! a libffi call interface built once from that prototype. Arguments and
//! return values travel as tagged [`ForeignArg`] / [`ForeignValue`] so the
//! caller never needs a static Rust signature.

use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;

use libffi::middle::{Arg, Cif, CodePtr};
use libloading::Library;

use crate::c_header_parser::CFunctionDecl;
use crate::c_types::AbiKind;
use crate::error::{FfiError, FfiResult};

// ============================================================================
// Arguments and Results
// ============================================================================

/// One argument of a dynamic call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ForeignArg {
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
    Pointer(*mut c_void),
}

impl ForeignArg {
    /// The ABI kind this argument is passed as
    pub fn kind(&self) -> AbiKind {
        match self {
            ForeignArg::Bool(_) => AbiKind::Bool,
            ForeignArg::I8(_) => AbiKind::I8,
            ForeignArg::I16(_) => AbiKind::I16,
            ForeignArg::I32(_) => AbiKind::I32,
            ForeignArg::I64(_) => AbiKind::I64,
            ForeignArg::U8(_) => AbiKind::U8,
            ForeignArg::U16(_) => AbiKind::U16,
            ForeignArg::U32(_) => AbiKind::U32,
            ForeignArg::U64(_) => AbiKind::U64,
            ForeignArg::F32(_) => AbiKind::F32,
            ForeignArg::F64(_) => AbiKind::F64,
            ForeignArg::Pointer(_) => AbiKind::Pointer,
        }
    }

    /// Shorthand for a pointer argument
    pub fn ptr<T>(ptr: *const T) -> Self {
        ForeignArg::Pointer(ptr.cast_mut().cast())
    }

    fn as_arg(&self) -> Arg {
        match self {
            ForeignArg::Bool(v) => Arg::new(v),
            ForeignArg::I8(v) => Arg::new(v),
            ForeignArg::I16(v) => Arg::new(v),
            ForeignArg::I32(v) => Arg::new(v),
            ForeignArg::I64(v) => Arg::new(v),
            ForeignArg::U8(v) => Arg::new(v),
            ForeignArg::U16(v) => Arg::new(v),
            ForeignArg::U32(v) => Arg::new(v),
            ForeignArg::U64(v) => Arg::new(v),
            ForeignArg::F32(v) => Arg::new(v),
            ForeignArg::F64(v) => Arg::new(v),
            ForeignArg::Pointer(v) => Arg::new(v),
        }
    }
}

/// The result of a dynamic call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ForeignValue {
    Void,
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
    Pointer(*mut c_void),
}

impl ForeignValue {
    /// An integer result widened to `i64`, as status codes are read
    pub fn as_status(&self) -> Option<i64> {
        match *self {
            ForeignValue::I8(v) => Some(v.into()),
            ForeignValue::I16(v) => Some(v.into()),
            ForeignValue::I32(v) => Some(v.into()),
            ForeignValue::I64(v) => Some(v),
            ForeignValue::U8(v) => Some(v.into()),
            ForeignValue::U16(v) => Some(v.into()),
            ForeignValue::U32(v) => Some(v.into()),
            ForeignValue::U64(v) => Some(v as i64),
            _ => None,
        }
    }

    /// A pointer result
    pub fn as_pointer(&self) -> Option<*mut c_void> {
        match *self {
            ForeignValue::Pointer(p) => Some(p),
            _ => None,
        }
    }
}

// ============================================================================
// Foreign Function
// ============================================================================

/// A callable foreign function with its signature
pub struct ForeignFunction {
    decl: CFunctionDecl,
    params: Vec<AbiKind>,
    ret: AbiKind,
    cif: Cif,
    code: CodePtr,
    /// Keeps the library mapped while the function is reachable
    library: Option<Rc<Library>>,
}

impl ForeignFunction {
    /// Bind a prototype to the code at `address`
    ///
    /// Fails if the prototype is variadic or uses a type without an ABI kind.
    ///
    /// # Safety
    ///
    /// `address` must be a function with exactly the declared C signature,
    /// valid for as long as the returned value lives.
    pub unsafe fn new(decl: CFunctionDecl, address: *const c_void) -> FfiResult<Self> {
        if address.is_null() {
            return Err(FfiError::null_pointer(format!("address of `{}`", decl.name)));
        }
        if decl.variadic {
            return Err(FfiError::unsupported_type(&decl.name, "..."));
        }

        let params = decl
            .params
            .iter()
            .map(|p| match AbiKind::of(&p.ty) {
                Some(AbiKind::Void) | None => Err(FfiError::unsupported_type(&decl.name, &p.ty)),
                Some(kind) => Ok(kind),
            })
            .collect::<FfiResult<Vec<_>>>()?;
        let ret = AbiKind::of(&decl.return_type)
            .ok_or_else(|| FfiError::unsupported_type(&decl.name, &decl.return_type))?;

        let cif = Cif::new(params.iter().map(|k| k.ffi_type()), ret.ffi_type());

        Ok(Self {
            decl,
            params,
            ret,
            cif,
            code: CodePtr::from_ptr(address),
            library: None,
        })
    }

    /// Tie the function to the library it was resolved from
    pub(crate) fn keep_alive(mut self, library: Rc<Library>) -> Self {
        self.library = Some(library);
        self
    }

    /// Symbol name
    pub fn name(&self) -> &str {
        &self.decl.name
    }

    /// The parsed prototype
    pub fn decl(&self) -> &CFunctionDecl {
        &self.decl
    }

    /// Parameter ABI kinds in declaration order
    pub fn param_kinds(&self) -> &[AbiKind] {
        &self.params
    }

    /// Return ABI kind
    pub fn return_kind(&self) -> AbiKind {
        self.ret
    }

    /// Call the function
    ///
    /// Arity and argument kinds are checked against the prototype first.
    ///
    /// # Safety
    ///
    /// Pointer arguments must satisfy whatever the foreign function requires
    /// of them (validity, size, lifetime, aliasing).
    pub unsafe fn invoke(&self, args: &[ForeignArg]) -> FfiResult<ForeignValue> {
        if args.len() != self.params.len() {
            return Err(FfiError::ArgumentCount {
                function: self.name().to_string(),
                expected: self.params.len(),
                actual: args.len(),
            });
        }
        for (index, (arg, expected)) in args.iter().zip(&self.params).enumerate() {
            if arg.kind() != *expected {
                return Err(FfiError::abi_mismatch(
                    self.name(),
                    format!("argument {} is {}, parameter is {}", index, arg.kind(), expected),
                ));
            }
        }

        let ffi_args: Vec<Arg> = args.iter().map(ForeignArg::as_arg).collect();
        tracing::trace!(function = %self.name(), args = args.len(), "foreign call");

        let cif = &self.cif;
        let code = self.code;
        // Integer results narrower than a register come back widened to one
        let value = match self.ret {
            AbiKind::Void => {
                cif.call::<()>(code, &ffi_args);
                ForeignValue::Void
            }
            AbiKind::Bool => ForeignValue::Bool(cif.call::<usize>(code, &ffi_args) as u8 != 0),
            AbiKind::I8 => ForeignValue::I8(cif.call::<usize>(code, &ffi_args) as i8),
            AbiKind::I16 => ForeignValue::I16(cif.call::<usize>(code, &ffi_args) as i16),
            AbiKind::I32 => ForeignValue::I32(cif.call::<usize>(code, &ffi_args) as i32),
            AbiKind::U8 => ForeignValue::U8(cif.call::<usize>(code, &ffi_args) as u8),
            AbiKind::U16 => ForeignValue::U16(cif.call::<usize>(code, &ffi_args) as u16),
            AbiKind::U32 => ForeignValue::U32(cif.call::<usize>(code, &ffi_args) as u32),
            AbiKind::I64 => ForeignValue::I64(cif.call::<i64>(code, &ffi_args)),
            AbiKind::U64 => ForeignValue::U64(cif.call::<u64>(code, &ffi_args)),
            AbiKind::F32 => ForeignValue::F32(cif.call::<f32>(code, &ffi_args)),
            AbiKind::F64 => ForeignValue::F64(cif.call::<f64>(code, &ffi_args)),
            AbiKind::Pointer => ForeignValue::Pointer(cif.call::<*mut c_void>(code, &ffi_args)),
        };
        Ok(value)
    }
}

impl fmt::Debug for ForeignFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignFunction")
            .field("decl", &self.decl.to_string())
            .field("params", &self.params)
            .field("ret", &self.ret)
            .field("code", &self.code.as_ptr())
            .field("library", &self.library.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::c_header_parser::{parse_header, CDeclaration};
    use pretty_assertions::assert_eq;

    extern "C" fn add_i32(a: i32, b: i32) -> i32 {
        a + b
    }

    extern "C" fn scale(x: f64, k: f32) -> f64 {
        x * f64::from(k)
    }

    extern "C" fn negate(x: bool) -> bool {
        !x
    }

    extern "C" fn low_byte(x: i64) -> i8 {
        x as i8
    }

    unsafe extern "C" fn double_into(out: *mut i64, v: i64) -> i32 {
        *out = v * 2;
        0
    }

    fn decl(src: &str) -> CFunctionDecl {
        match parse_header(src).pop() {
            Some(CDeclaration::Function(f)) => f,
            other => panic!("expected a function, got {:?}", other),
        }
    }

    fn bind(src: &str, address: *const c_void) -> ForeignFunction {
        unsafe { ForeignFunction::new(decl(src), address) }.unwrap()
    }

    #[test]
    fn test_call_integers() {
        let f = bind("int32_t add_i32(int32_t a, int32_t b);", add_i32 as *const c_void);
        assert_eq!(f.param_kinds(), &[AbiKind::I32, AbiKind::I32]);
        let value = unsafe { f.invoke(&[ForeignArg::I32(40), ForeignArg::I32(2)]) }.unwrap();
        assert_eq!(value, ForeignValue::I32(42));
        assert_eq!(value.as_status(), Some(42));
    }

    #[test]
    fn test_call_floats() {
        let f = bind("double scale(double x, float k);", scale as *const c_void);
        let value = unsafe { f.invoke(&[ForeignArg::F64(1.5), ForeignArg::F32(4.0)]) }.unwrap();
        assert_eq!(value, ForeignValue::F64(6.0));
    }

    #[test]
    fn test_call_narrow_returns() {
        let f = bind("bool negate(bool x);", negate as *const c_void);
        let value = unsafe { f.invoke(&[ForeignArg::Bool(false)]) }.unwrap();
        assert_eq!(value, ForeignValue::Bool(true));

        let f = bind("int8_t low_byte(int64_t x);", low_byte as *const c_void);
        let value = unsafe { f.invoke(&[ForeignArg::I64(0x1ff)]) }.unwrap();
        assert_eq!(value, ForeignValue::I8(-1));
    }

    #[test]
    fn test_call_with_out_pointer() {
        let f = bind("int double_into(int64_t *out, int64_t v);", double_into as *const c_void);
        let mut out = 0i64;
        let status = unsafe { f.invoke(&[ForeignArg::ptr(&mut out as *mut i64), ForeignArg::I64(21)]) }.unwrap();
        assert_eq!(status.as_status(), Some(0));
        assert_eq!(out, 42);
    }

    #[test]
    fn test_argument_checks() {
        let f = bind("int32_t add_i32(int32_t a, int32_t b);", add_i32 as *const c_void);

        let err = unsafe { f.invoke(&[ForeignArg::I32(1)]) }.unwrap_err();
        assert_eq!(
            err,
            FfiError::ArgumentCount {
                function: "add_i32".into(),
                expected: 2,
                actual: 1
            }
        );

        let err = unsafe { f.invoke(&[ForeignArg::I32(1), ForeignArg::I64(1)]) }.unwrap_err();
        assert!(matches!(err, FfiError::AbiMismatch { .. }), "{:?}", err);
    }

    #[test]
    fn test_rejects_unsupported_signatures() {
        let err = unsafe {
            ForeignFunction::new(decl("int printf(const char *fmt, ...);"), add_i32 as *const c_void)
        }
        .unwrap_err();
        assert!(matches!(err, FfiError::UnsupportedType { .. }));

        let err = unsafe {
            ForeignFunction::new(decl("int enqueue(cl_command_queue q);"), add_i32 as *const c_void)
        }
        .unwrap_err();
        assert_eq!(err, FfiError::unsupported_type("enqueue", "cl_command_queue"));

        let err = unsafe { ForeignFunction::new(decl("int nothing(void);"), std::ptr::null()) }.unwrap_err();
        assert!(matches!(err, FfiError::NullPointer { .. }));
    }
}
