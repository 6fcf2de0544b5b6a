//! Foreign Modules
//!
//! A [`ForeignModule`] is the symbol table of a compiled library: every
//! function its header declares that the library actually exports, each
//! bound to a ready-to-call [`ForeignFunction`], plus the header's
//! `#define` constants.
//!
//! Declarations the call layer cannot express (by-value structs, variadics,
//! unknown typedefs) are recorded as skipped rather than failing the load.

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;
use libloading::Library;
use smol_str::SmolStr;

use crate::c_header_parser::{CConstantValue, CDeclaration, CHeaderParser};
use crate::call::ForeignFunction;
use crate::error::{FfiError, FfiResult};

/// A loaded library together with its parsed header
#[derive(Debug, Default)]
pub struct ForeignModule {
    path: Option<PathBuf>,
    functions: IndexMap<SmolStr, Rc<ForeignFunction>>,
    constants: IndexMap<SmolStr, CConstantValue>,
    skipped: IndexMap<SmolStr, FfiError>,
}

impl ForeignModule {
    /// Open a shared library and bind the functions its header declares
    pub fn load(library: impl AsRef<Path>, header: impl AsRef<Path>) -> FfiResult<Self> {
        let library = library.as_ref();
        let header = header.as_ref();

        let source = std::fs::read_to_string(header).map_err(|e| FfiError::HeaderRead {
            header_path: header.display().to_string(),
            reason: e.to_string(),
        })?;

        // SAFETY: loading runs the library's initializers; the caller chose it
        let lib = unsafe { Library::new(library) }.map_err(|e| FfiError::LibraryLoadFailed {
            library_path: library.display().to_string(),
            reason: e.to_string(),
        })?;
        let lib = Rc::new(lib);

        let resolver = |name: &str| {
            // SAFETY: the symbol is only read as an address here
            unsafe { lib.get::<*const c_void>(name.as_bytes()) }
                .ok()
                .map(|symbol| *symbol)
        };
        // SAFETY: addresses come from the library whose header declared them
        let mut module = unsafe { Self::build(&source, resolver, Some(&lib)) };
        module.path = Some(library.to_path_buf());

        tracing::debug!(
            library = %library.display(),
            functions = module.functions.len(),
            skipped = module.skipped.len(),
            "loaded foreign module"
        );
        Ok(module)
    }

    /// Bind a header's declarations to addresses supplied by `resolve`
    ///
    /// Declarations `resolve` returns `None` for are left out, as an
    /// unexported symbol would be.
    ///
    /// # Safety
    ///
    /// Every address returned must be a function matching its declaration in
    /// `header` and stay valid for the life of the module.
    pub unsafe fn from_resolver<F>(header: &str, resolve: F) -> Self
    where
        F: FnMut(&str) -> Option<*const c_void>,
    {
        Self::build(header, resolve, None)
    }

    unsafe fn build<F>(header: &str, mut resolve: F, library: Option<&Rc<Library>>) -> Self
    where
        F: FnMut(&str) -> Option<*const c_void>,
    {
        let mut module = ForeignModule::default();
        let mut parser = CHeaderParser::new(header);
        let declarations = parser.parse();
        if !parser.errors().is_empty() {
            tracing::debug!(errors = parser.errors().len(), "header declarations skipped");
        }

        for decl in declarations {
            match decl {
                CDeclaration::Function(func) => {
                    let name = SmolStr::new(&func.name);
                    let Some(address) = resolve(&func.name) else {
                        tracing::debug!(symbol = %name, "declared but not exported");
                        continue;
                    };
                    match ForeignFunction::new(func, address) {
                        Ok(function) => {
                            let function = match library {
                                Some(lib) => function.keep_alive(lib.clone()),
                                None => function,
                            };
                            module.functions.insert(name, Rc::new(function));
                        }
                        Err(err) => {
                            tracing::debug!(symbol = %name, error = %err, "skipping uncallable function");
                            module.skipped.insert(name, err);
                        }
                    }
                }
                CDeclaration::Constant(constant) => {
                    module.constants.insert(SmolStr::new(&constant.name), constant.value);
                }
                _ => {}
            }
        }

        module
    }

    /// Path of the shared library, if loaded from disk
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Look up a bound function by symbol name
    pub fn function(&self, name: &str) -> Option<&Rc<ForeignFunction>> {
        self.functions.get(name)
    }

    /// All bound functions in declaration order
    pub fn functions(&self) -> impl Iterator<Item = &Rc<ForeignFunction>> {
        self.functions.values()
    }

    /// Look up a `#define` constant
    pub fn constant(&self, name: &str) -> Option<&CConstantValue> {
        self.constants.get(name)
    }

    /// Names of `#define NAME` flags starting with `prefix`, prefix removed
    pub fn flags_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.constants.iter().filter_map(move |(name, value)| match value {
            CConstantValue::Flag => name.strip_prefix(prefix),
            _ => None,
        })
    }

    /// Declared functions that could not be bound, with the reason
    pub fn skipped(&self) -> impl Iterator<Item = (&str, &FfiError)> {
        self.skipped.iter().map(|(name, err)| (name.as_str(), err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{ForeignArg, ForeignValue};
    use pretty_assertions::assert_eq;

    extern "C" fn answer() -> i32 {
        42
    }

    const HEADER: &str = r#"
#define LIB_BACKEND_c
#define LIB_VERSION 3
int lib_answer(void);
int lib_missing(void);
int lib_enqueue(cl_command_queue q);
"#;

    fn resolve(name: &str) -> Option<*const c_void> {
        match name {
            "lib_answer" | "lib_enqueue" => Some(answer as *const c_void),
            _ => None,
        }
    }

    #[test]
    fn test_from_resolver_binds_exported_functions() {
        let module = unsafe { ForeignModule::from_resolver(HEADER, resolve) };
        let names: Vec<_> = module.functions().map(|f| f.name().to_string()).collect();
        assert_eq!(names, vec!["lib_answer".to_string()]);

        let f = module.function("lib_answer").unwrap();
        assert_eq!(unsafe { f.invoke(&[]) }.unwrap(), ForeignValue::I32(42));
        assert!(module.function("lib_missing").is_none());
        assert!(module.path().is_none());
    }

    #[test]
    fn test_uncallable_functions_are_skipped() {
        let module = unsafe { ForeignModule::from_resolver(HEADER, resolve) };
        let skipped: Vec<_> = module.skipped().map(|(name, _)| name).collect();
        assert_eq!(skipped, vec!["lib_enqueue"]);
    }

    #[test]
    fn test_constants_and_flags() {
        let module = unsafe { ForeignModule::from_resolver(HEADER, resolve) };
        assert_eq!(module.constant("LIB_VERSION"), Some(&CConstantValue::Integer(3)));
        let flags: Vec<_> = module.flags_with_prefix("LIB_BACKEND_").collect();
        assert_eq!(flags, vec!["c"]);
    }

    #[test]
    fn test_load_reports_missing_files() {
        let err = ForeignModule::load("/nonexistent/libfut.so", "/nonexistent/fut.h").unwrap_err();
        assert!(matches!(err, FfiError::HeaderRead { .. }), "{:?}", err);
    }

    #[test]
    fn test_invoke_checks_survive_module() {
        let module = unsafe { ForeignModule::from_resolver(HEADER, resolve) };
        let f = module.function("lib_answer").unwrap().clone();
        drop(module);
        let err = unsafe { f.invoke(&[ForeignArg::I32(1)]) }.unwrap_err();
        assert!(matches!(err, FfiError::ArgumentCount { expected: 0, .. }));
    }
}
