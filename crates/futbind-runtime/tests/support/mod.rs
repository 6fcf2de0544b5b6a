//! An in-process stand-in for a compiled library.
//!
//! Every function is a Rust `extern "C"` function; a header describing them
//! is generated alongside, so modules built here go through the same parsing
//! and binding as a library loaded from disk. Live objects and notable calls
//! are tracked per thread, which keeps parallel tests apart.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void, CStr};

use futbind_runtime::{ForeignModule, Session, SessionConfig};

thread_local! {
    static LIVE: Cell<i64> = const { Cell::new(0) };
    static EVENTS: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
}

/// Objects allocated by the fake library and not yet freed
pub fn live_objects() -> i64 {
    LIVE.with(Cell::get)
}

/// Notable calls so far, oldest first
pub fn events() -> Vec<&'static str> {
    EVENTS.with(|events| events.borrow().clone())
}

pub fn clear_events() {
    EVENTS.with(|events| events.borrow_mut().clear());
}

fn record(event: &'static str) {
    EVENTS.with(|events| events.borrow_mut().push(event));
}

fn allocated() {
    LIVE.with(|live| live.set(live.get() + 1));
}

fn freed() {
    LIVE.with(|live| live.set(live.get() - 1));
}

unsafe fn malloc_string(text: &str) -> *mut c_char {
    let ptr = libc::malloc(text.len() + 1).cast::<u8>();
    std::ptr::copy_nonoverlapping(text.as_ptr(), ptr, text.len());
    *ptr.add(text.len()) = 0;
    ptr.cast()
}

// ============================================================================
// Configuration and Context
// ============================================================================

pub struct FakeConfig {
    device: Option<String>,
    profiling: bool,
}

pub struct FakeContext {
    error: Option<String>,
    profiling: bool,
    paused: bool,
}

unsafe fn fail(ctx: *mut FakeContext, message: String) -> c_int {
    (*ctx).error = Some(message);
    1
}

extern "C" fn config_new() -> *mut FakeConfig {
    Box::into_raw(Box::new(FakeConfig {
        device: None,
        profiling: false,
    }))
}

unsafe extern "C" fn config_free(cfg: *mut FakeConfig) {
    record("config_free");
    drop(Box::from_raw(cfg));
}

unsafe extern "C" fn config_set_device(cfg: *mut FakeConfig, device: *const c_char) {
    (*cfg).device = Some(CStr::from_ptr(device).to_string_lossy().into_owned());
}

unsafe extern "C" fn config_set_profiling(cfg: *mut FakeConfig, flag: c_int) {
    (*cfg).profiling = flag != 0;
}

unsafe extern "C" fn config_set_tuning_param(
    _cfg: *mut FakeConfig,
    name: *const c_char,
    _value: usize,
) -> c_int {
    match CStr::from_ptr(name).to_str() {
        Ok("main.group_size") => 0,
        _ => 1,
    }
}

unsafe extern "C" fn context_new(cfg: *mut FakeConfig) -> *mut FakeContext {
    let error = match &(*cfg).device {
        Some(device) if device == "missing" => {
            Some(format!("No device matching \"{}\" found.\n", device))
        }
        _ => None,
    };
    Box::into_raw(Box::new(FakeContext {
        error,
        profiling: (*cfg).profiling,
        paused: false,
    }))
}

unsafe extern "C" fn context_free(ctx: *mut FakeContext) {
    record("context_free");
    drop(Box::from_raw(ctx));
}

unsafe extern "C" fn context_get_error(ctx: *mut FakeContext) -> *mut c_char {
    match (*ctx).error.take() {
        Some(message) => malloc_string(&message),
        None => std::ptr::null_mut(),
    }
}

unsafe extern "C" fn context_sync(_ctx: *mut FakeContext) -> c_int {
    record("sync");
    0
}

unsafe extern "C" fn context_report(ctx: *mut FakeContext) -> *mut c_char {
    let report = format!(
        "{{\"profiling\": {}, \"paused\": {}}}",
        (*ctx).profiling,
        (*ctx).paused
    );
    malloc_string(&report)
}

unsafe extern "C" fn context_pause_profiling(ctx: *mut FakeContext) {
    (*ctx).paused = true;
}

unsafe extern "C" fn context_unpause_profiling(ctx: *mut FakeContext) {
    (*ctx).paused = false;
}

unsafe extern "C" fn context_clear_caches(_ctx: *mut FakeContext) -> c_int {
    record("clear_caches");
    0
}

// ============================================================================
// Arrays
// ============================================================================

pub struct FakeArray<T> {
    data: Vec<T>,
    shape: Vec<i64>,
}

fn boxed<T>(data: Vec<T>, shape: Vec<i64>) -> *mut FakeArray<T> {
    allocated();
    Box::into_raw(Box::new(FakeArray { data, shape }))
}

unsafe fn copy_in<T: Copy>(data: *const T, shape: Vec<i64>) -> *mut FakeArray<T> {
    let len = shape.iter().product::<i64>() as usize;
    let data = std::slice::from_raw_parts(data, len).to_vec();
    boxed(data, shape)
}

unsafe extern "C" fn new_0d<T: Copy>(_ctx: *mut FakeContext, data: *const T) -> *mut FakeArray<T> {
    copy_in(data, Vec::new())
}

unsafe extern "C" fn new_1d<T: Copy>(_ctx: *mut FakeContext, data: *const T, d0: i64) -> *mut FakeArray<T> {
    copy_in(data, vec![d0])
}

unsafe extern "C" fn new_2d<T: Copy>(
    _ctx: *mut FakeContext,
    data: *const T,
    d0: i64,
    d1: i64,
) -> *mut FakeArray<T> {
    copy_in(data, vec![d0, d1])
}

unsafe extern "C" fn free_array<T>(_ctx: *mut FakeContext, arr: *mut FakeArray<T>) -> c_int {
    record("free");
    freed();
    drop(Box::from_raw(arr));
    0
}

unsafe extern "C" fn values_array<T: Copy>(
    _ctx: *mut FakeContext,
    arr: *const FakeArray<T>,
    out: *mut T,
) -> c_int {
    record("values");
    let data = &(*arr).data;
    std::ptr::copy_nonoverlapping(data.as_ptr(), out, data.len());
    0
}

unsafe extern "C" fn shape_array<T>(_ctx: *mut FakeContext, arr: *const FakeArray<T>) -> *const i64 {
    (*arr).shape.as_ptr()
}

// ============================================================================
// Opaque Pairs
// ============================================================================

pub struct Pair {
    a: i64,
    b: i64,
}

const PAIR_MAGIC: &[u8; 4] = b"PAIR";
const PAIR_BYTES: usize = 20;

unsafe extern "C" fn free_pair(_ctx: *mut FakeContext, pair: *mut Pair) -> c_int {
    record("free");
    freed();
    drop(Box::from_raw(pair));
    0
}

unsafe extern "C" fn store_pair(
    _ctx: *mut FakeContext,
    pair: *const Pair,
    p: *mut *mut c_void,
    n: *mut usize,
) -> c_int {
    let mut bytes = Vec::with_capacity(PAIR_BYTES);
    bytes.extend_from_slice(PAIR_MAGIC);
    bytes.extend_from_slice(&(*pair).a.to_le_bytes());
    bytes.extend_from_slice(&(*pair).b.to_le_bytes());

    let buffer = libc::malloc(bytes.len()).cast::<u8>();
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer, bytes.len());
    *p = buffer.cast();
    *n = bytes.len();
    0
}

unsafe extern "C" fn restore_pair(ctx: *mut FakeContext, p: *const c_void) -> *mut Pair {
    let bytes = std::slice::from_raw_parts(p.cast::<u8>(), PAIR_BYTES);
    if &bytes[..4] != PAIR_MAGIC {
        fail(ctx, "restore: corrupt opaque_pair data\n".to_string());
        return std::ptr::null_mut();
    }
    let word = |at: usize| {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[at..at + 8]);
        i64::from_le_bytes(raw)
    };
    allocated();
    Box::into_raw(Box::new(Pair {
        a: word(4),
        b: word(12),
    }))
}

// ============================================================================
// Entry Points
// ============================================================================

unsafe extern "C" fn entry_add_one(_ctx: *mut FakeContext, out0: *mut i32, in0: i32) -> c_int {
    *out0 = in0 + 1;
    0
}

unsafe extern "C" fn entry_sum(
    _ctx: *mut FakeContext,
    out0: *mut i64,
    in0: *const FakeArray<i64>,
) -> c_int {
    *out0 = (*in0).data.iter().sum();
    0
}

unsafe extern "C" fn entry_prefix_sum(
    _ctx: *mut FakeContext,
    out0: *mut *mut FakeArray<i64>,
    in0: *const FakeArray<i64>,
) -> c_int {
    let data: Vec<i64> = (*in0)
        .data
        .iter()
        .scan(0, |acc, x| {
            *acc += x;
            Some(*acc)
        })
        .collect();
    *out0 = boxed(data, (*in0).shape.clone());
    0
}

unsafe extern "C" fn entry_add_sub(
    _ctx: *mut FakeContext,
    out0: *mut i64,
    out1: *mut i64,
    in0: i64,
    in1: i64,
) -> c_int {
    *out0 = in0 + in1;
    *out1 = in0 - in1;
    0
}

unsafe extern "C" fn entry_double_matrix(
    _ctx: *mut FakeContext,
    out0: *mut *mut FakeArray<i64>,
    in0: *const FakeArray<i64>,
) -> c_int {
    let data = (*in0).data.iter().map(|x| x * 2).collect();
    *out0 = boxed(data, (*in0).shape.clone());
    0
}

unsafe extern "C" fn entry_negate(_ctx: *mut FakeContext, out0: *mut bool, in0: bool) -> c_int {
    *out0 = !in0;
    0
}

unsafe extern "C" fn entry_scale(
    _ctx: *mut FakeContext,
    out0: *mut *mut FakeArray<f64>,
    in0: *const FakeArray<f64>,
    in1: f64,
) -> c_int {
    let data = (*in0).data.iter().map(|x| x * in1).collect();
    *out0 = boxed(data, (*in0).shape.clone());
    0
}

unsafe extern "C" fn entry_take_five(
    ctx: *mut FakeContext,
    out0: *mut i32,
    in0: *const FakeArray<i32>,
) -> c_int {
    let data = &(*in0).data;
    match data.get(4) {
        Some(x) => {
            *out0 = *x;
            0
        }
        None => fail(
            ctx,
            format!(
                "Index [4] out of bounds for array of shape [{}].",
                data.len()
            ),
        ),
    }
}

unsafe extern "C" fn entry_make_pair(
    _ctx: *mut FakeContext,
    out0: *mut *mut Pair,
    in0: i64,
    in1: i64,
) -> c_int {
    allocated();
    *out0 = Box::into_raw(Box::new(Pair { a: in0, b: in1 }));
    0
}

unsafe extern "C" fn entry_split_pair(
    _ctx: *mut FakeContext,
    out0: *mut i64,
    out1: *mut i64,
    in0: *const Pair,
) -> c_int {
    *out0 = (*in0).a;
    *out1 = (*in0).b;
    0
}

unsafe extern "C" fn entry_mystery(
    _ctx: *mut FakeContext,
    out0: *mut *mut c_void,
    _in0: i32,
) -> c_int {
    *out0 = std::ptr::null_mut();
    0
}

// ============================================================================
// Library
// ============================================================================

/// Header text plus the address behind every declared symbol
pub struct FakeLibrary {
    header: String,
    symbols: HashMap<String, *const c_void>,
}

impl FakeLibrary {
    pub fn new() -> Self {
        let mut lib = FakeLibrary {
            header: String::from(
                "#ifndef FAKE_H\n#define FAKE_H\n#define FUTHARK_BACKEND_c\n\n\
                 #ifdef __cplusplus\nextern \"C\" {\n#endif\n\n\
                 struct futhark_context_config;\nstruct futhark_context;\n",
            ),
            symbols: HashMap::new(),
        };
        lib.declare_context();
        lib.declare_arrays();
        lib.declare_pair();
        lib.declare_entries();
        lib.header
            .push_str("\n#ifdef __cplusplus\n}\n#endif\n#endif\n");
        lib
    }

    /// Drop one symbol, as a library built without it would lack it
    pub fn without(mut self, symbol: &str) -> Self {
        self.symbols.remove(symbol);
        self
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn module(&self) -> ForeignModule {
        // SAFETY: every address is a function matching its declaration
        unsafe { ForeignModule::from_resolver(&self.header, |name| self.symbols.get(name).copied()) }
    }

    pub fn session(&self) -> Session {
        Session::new(self.module()).expect("fake library session")
    }

    pub fn session_with(&self, config: &SessionConfig) -> futbind_runtime::BindResult<Session> {
        Session::with_config(self.module(), config)
    }

    fn declare(&mut self, prototype: &str, symbol: &str, address: *const c_void) {
        self.header.push_str(prototype);
        self.header.push('\n');
        self.symbols.insert(symbol.to_string(), address);
    }

    fn declare_context(&mut self) {
        let ctx = "struct futhark_context *ctx";
        let cfg = "struct futhark_context_config *cfg";
        self.declare(
            "struct futhark_context_config *futhark_context_config_new(void);",
            "futhark_context_config_new",
            config_new as *const c_void,
        );
        self.declare(
            &format!("void futhark_context_config_free({cfg});"),
            "futhark_context_config_free",
            config_free as *const c_void,
        );
        self.declare(
            &format!("void futhark_context_config_set_device({cfg}, const char *s);"),
            "futhark_context_config_set_device",
            config_set_device as *const c_void,
        );
        self.declare(
            &format!("void futhark_context_config_set_profiling({cfg}, int flag);"),
            "futhark_context_config_set_profiling",
            config_set_profiling as *const c_void,
        );
        self.declare(
            &format!(
                "int futhark_context_config_set_tuning_param({cfg}, const char *param_name, size_t new_value);"
            ),
            "futhark_context_config_set_tuning_param",
            config_set_tuning_param as *const c_void,
        );
        self.declare(
            &format!("struct futhark_context *futhark_context_new({cfg});"),
            "futhark_context_new",
            context_new as *const c_void,
        );
        self.declare(
            &format!("void futhark_context_free({ctx});"),
            "futhark_context_free",
            context_free as *const c_void,
        );
        self.declare(
            &format!("char *futhark_context_get_error({ctx});"),
            "futhark_context_get_error",
            context_get_error as *const c_void,
        );
        self.declare(
            &format!("int futhark_context_sync({ctx});"),
            "futhark_context_sync",
            context_sync as *const c_void,
        );
        self.declare(
            &format!("char *futhark_context_report({ctx});"),
            "futhark_context_report",
            context_report as *const c_void,
        );
        self.declare(
            &format!("void futhark_context_pause_profiling({ctx});"),
            "futhark_context_pause_profiling",
            context_pause_profiling as *const c_void,
        );
        self.declare(
            &format!("void futhark_context_unpause_profiling({ctx});"),
            "futhark_context_unpause_profiling",
            context_unpause_profiling as *const c_void,
        );
        self.declare(
            &format!("int futhark_context_clear_caches({ctx});"),
            "futhark_context_clear_caches",
            context_clear_caches as *const c_void,
        );
    }

    fn declare_array<T: Copy + 'static>(&mut self, name: &str, ctype: &str, rank: usize) {
        let ctx = "struct futhark_context *ctx";
        let ty = format!("struct futhark_{name}");
        self.header.push_str(&format!("{ty};\n"));

        let (dims, new): (&str, *const c_void) = match rank {
            0 => ("", new_0d::<T> as *const c_void),
            1 => (", int64_t dim0", new_1d::<T> as *const c_void),
            _ => (", int64_t dim0, int64_t dim1", new_2d::<T> as *const c_void),
        };
        self.declare(
            &format!("{ty} *futhark_new_{name}({ctx}, const {ctype} *data{dims});"),
            &format!("futhark_new_{name}"),
            new,
        );
        self.declare(
            &format!("{ty} *futhark_new_raw_{name}({ctx}, unsigned char *data{dims});"),
            &format!("futhark_new_raw_{name}"),
            new,
        );
        self.declare(
            &format!("int futhark_free_{name}({ctx}, {ty} *arr);"),
            &format!("futhark_free_{name}"),
            free_array::<T> as *const c_void,
        );
        self.declare(
            &format!("int futhark_values_{name}({ctx}, {ty} *arr, {ctype} *data);"),
            &format!("futhark_values_{name}"),
            values_array::<T> as *const c_void,
        );
        self.declare(
            &format!("const int64_t *futhark_shape_{name}({ctx}, {ty} *arr);"),
            &format!("futhark_shape_{name}"),
            shape_array::<T> as *const c_void,
        );
    }

    fn declare_arrays(&mut self) {
        self.declare_array::<bool>("bool_1d", "bool", 1);
        self.declare_array::<i8>("i8_1d", "int8_t", 1);
        self.declare_array::<i16>("i16_1d", "int16_t", 1);
        self.declare_array::<i32>("i32_1d", "int32_t", 1);
        self.declare_array::<i64>("i64_1d", "int64_t", 1);
        self.declare_array::<u8>("u8_1d", "uint8_t", 1);
        self.declare_array::<u16>("u16_1d", "uint16_t", 1);
        self.declare_array::<u32>("u32_1d", "uint32_t", 1);
        self.declare_array::<u64>("u64_1d", "uint64_t", 1);
        self.declare_array::<f32>("f32_1d", "float", 1);
        self.declare_array::<f64>("f64_1d", "double", 1);
        self.declare_array::<i64>("i64_0d", "int64_t", 0);
        self.declare_array::<i64>("i64_2d", "int64_t", 2);
        self.declare_array::<f32>("f32_2d", "float", 2);

        // Constructible but never readable
        let ctx = "struct futhark_context *ctx";
        self.header.push_str("struct futhark_u8_2d;\n");
        self.declare(
            &format!("struct futhark_u8_2d *futhark_new_u8_2d({ctx}, const uint8_t *data, int64_t dim0, int64_t dim1);"),
            "futhark_new_u8_2d",
            new_2d::<u8> as *const c_void,
        );
        self.declare(
            &format!("int futhark_free_u8_2d({ctx}, struct futhark_u8_2d *arr);"),
            "futhark_free_u8_2d",
            free_array::<u8> as *const c_void,
        );
    }

    fn declare_pair(&mut self) {
        let ctx = "struct futhark_context *ctx";
        self.header.push_str("struct futhark_opaque_pair;\n");
        self.declare(
            &format!("int futhark_free_opaque_pair({ctx}, struct futhark_opaque_pair *obj);"),
            "futhark_free_opaque_pair",
            free_pair as *const c_void,
        );
        self.declare(
            &format!("int futhark_store_opaque_pair({ctx}, const struct futhark_opaque_pair *obj, void **p, size_t *n);"),
            "futhark_store_opaque_pair",
            store_pair as *const c_void,
        );
        self.declare(
            &format!("struct futhark_opaque_pair *futhark_restore_opaque_pair({ctx}, const void *p);"),
            "futhark_restore_opaque_pair",
            restore_pair as *const c_void,
        );
    }

    fn declare_entries(&mut self) {
        let ctx = "struct futhark_context *ctx";
        let entries: [(&str, String, *const c_void); 11] = [
            (
                "add_one",
                "int32_t *out0, const int32_t in0".to_string(),
                entry_add_one as *const c_void,
            ),
            (
                "sum",
                "int64_t *out0, const struct futhark_i64_1d *in0".to_string(),
                entry_sum as *const c_void,
            ),
            (
                "prefix_sum",
                "struct futhark_i64_1d **out0, const struct futhark_i64_1d *in0".to_string(),
                entry_prefix_sum as *const c_void,
            ),
            (
                "add_sub",
                "int64_t *out0, int64_t *out1, const int64_t in0, const int64_t in1".to_string(),
                entry_add_sub as *const c_void,
            ),
            (
                "double_matrix",
                "struct futhark_i64_2d **out0, const struct futhark_i64_2d *in0".to_string(),
                entry_double_matrix as *const c_void,
            ),
            (
                "negate",
                "bool *out0, const bool in0".to_string(),
                entry_negate as *const c_void,
            ),
            (
                "scale",
                "struct futhark_f64_1d **out0, const struct futhark_f64_1d *in0, const double in1"
                    .to_string(),
                entry_scale as *const c_void,
            ),
            (
                "take_five",
                "int32_t *out0, const struct futhark_i32_1d *in0".to_string(),
                entry_take_five as *const c_void,
            ),
            (
                "make_pair",
                "struct futhark_opaque_pair **out0, const int64_t in0, const int64_t in1"
                    .to_string(),
                entry_make_pair as *const c_void,
            ),
            (
                "split_pair",
                "int64_t *out0, int64_t *out1, const struct futhark_opaque_pair *in0".to_string(),
                entry_split_pair as *const c_void,
            ),
            (
                "mystery",
                "struct futhark_mystery **out0, const int32_t in0".to_string(),
                entry_mystery as *const c_void,
            ),
        ];

        self.header.push_str("struct futhark_mystery;\n");
        for (name, params, address) in entries {
            self.declare(
                &format!("int futhark_entry_{name}({ctx}, {params});"),
                &format!("futhark_entry_{name}"),
                address,
            );
        }
    }
}
