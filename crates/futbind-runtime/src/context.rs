//! Context Manager
//!
//! Owns the foreign configuration object and the context built from it.
//! Every other foreign call takes the context as its first argument, so the
//! context must be live for them to run.
//!
//! ## Lifecycle
//!
//! ```text
//! Unconfigured -> Configuring -> Live -> Closed
//!                      |
//!                      +-------> Failed
//! ```
//!
//! Teardown frees the context before the configuration it was built from.
//! Strings handed to configuration setters are kept until then, since the
//! foreign side may hold on to them.

use std::cell::{Cell, RefCell};
use std::ffi::{c_void, CString};
use std::ptr::NonNull;
use std::rc::Rc;

use futbind_ffi::{
    take_foreign_string, AbiKind, FfiError, FfiResult, ForeignArg, ForeignFunction,
    ForeignModule, ForeignValue, Owned,
};

use crate::config::SessionConfig;
use crate::element::Scalar;
use crate::error::{BindError, BindResult};
use crate::naming::Naming;

/// Where a context is in its lifecycle
///
/// Only `Live` and `Closed` are ever seen through [`crate::Session::state`].
/// The other states exist while `Context::create` runs: a `Failed` context
/// is torn down there and surfaces as a `Configuration` error carrying the
/// foreign message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Unconfigured,
    Configuring,
    Live,
    Failed,
    Closed,
}

/// Context functions resolved up front
#[derive(Debug)]
struct ContextFns {
    config_new: Rc<ForeignFunction>,
    config_free: Rc<ForeignFunction>,
    context_new: Rc<ForeignFunction>,
    context_free: Rc<ForeignFunction>,
    get_error: Rc<ForeignFunction>,
    sync: Option<Rc<ForeignFunction>>,
    report: Option<Rc<ForeignFunction>>,
    pause_profiling: Option<Rc<ForeignFunction>>,
    unpause_profiling: Option<Rc<ForeignFunction>>,
    clear_caches: Option<Rc<ForeignFunction>>,
}

impl ContextFns {
    fn resolve(module: &ForeignModule, naming: &Naming) -> BindResult<Self> {
        let optional = |op: &str| module.function(&naming.context_symbol(op)).cloned();
        let required = |op: &str| {
            let symbol = naming.context_symbol(op);
            module.function(&symbol).cloned().ok_or_else(|| {
                BindError::configuration(format!("library does not export `{}`", symbol))
            })
        };

        Ok(Self {
            config_new: required("config_new")?,
            config_free: required("config_free")?,
            context_new: required("new")?,
            context_free: required("free")?,
            get_error: required("get_error")?,
            sync: optional("sync"),
            report: optional("report"),
            pause_profiling: optional("pause_profiling"),
            unpause_profiling: optional("unpause_profiling"),
            clear_caches: optional("clear_caches"),
        })
    }
}

/// Live foreign objects, dropped context first
struct Handles {
    context: Owned<c_void>,
    config: Owned<c_void>,
}

/// The foreign context a session runs in
pub struct Context {
    state: Cell<ContextState>,
    handles: RefCell<Option<Handles>>,
    fns: ContextFns,
    // Option strings, kept until the configuration is freed
    option_strings: Vec<CString>,
}

impl Context {
    /// Create the configuration, apply `config`, then create the context
    pub fn create(
        module: &ForeignModule,
        config: &SessionConfig,
        naming: &Naming,
    ) -> BindResult<Self> {
        let fns = ContextFns::resolve(module, naming)?;
        let mut context = Context {
            state: Cell::new(ContextState::Unconfigured),
            handles: RefCell::new(None),
            fns,
            option_strings: Vec::new(),
        };

        context.state.set(ContextState::Configuring);
        match context.configure(module, config, naming) {
            Ok(handles) => {
                *context.handles.get_mut() = Some(handles);
                context.state.set(ContextState::Live);
                tracing::debug!("context live");
                Ok(context)
            }
            Err(err) => {
                context.state.set(ContextState::Failed);
                tracing::warn!(error = %err, "context configuration failed");
                Err(err)
            }
        }
    }

    fn configure(
        &mut self,
        module: &ForeignModule,
        config: &SessionConfig,
        naming: &Naming,
    ) -> BindResult<Handles> {
        // SAFETY: takes no arguments and returns a fresh object or null
        let raw = unsafe { self.fns.config_new.invoke(&[]) }?;
        // SAFETY: the pointer came from config_new and config_free releases it
        let cfg = unsafe {
            Owned::with_finalizer(pointer(raw), finalizer(&self.fns.config_free))
        }
        .ok_or_else(|| BindError::configuration("could not allocate a configuration"))?;

        let mut options = Options {
            module,
            naming,
            cfg: cfg.as_ptr(),
            strings: &mut self.option_strings,
        };
        options.apply(config)?;

        let cfg_arg = ForeignArg::Pointer(cfg.as_ptr());
        // SAFETY: the configuration is live and outlives the context
        let raw = unsafe { self.fns.context_new.invoke(&[cfg_arg]) }?;
        // SAFETY: the pointer came from context_new and context_free releases it
        let ctx = unsafe { Owned::with_finalizer(pointer(raw), finalizer(&self.fns.context_free)) }
            .ok_or_else(|| BindError::configuration("could not create a context"))?;

        // Construction may succeed while leaving an error behind
        if let Some(message) = self.error_text(ctx.as_ptr()) {
            drop(ctx);
            drop(cfg);
            return Err(BindError::configuration(message));
        }

        Ok(Handles {
            context: ctx,
            config: cfg,
        })
    }

    pub fn state(&self) -> ContextState {
        self.state.get()
    }

    pub fn is_live(&self) -> bool {
        self.state.get() == ContextState::Live
    }

    /// The raw context pointer, failing once closed
    pub(crate) fn raw(&self) -> BindResult<*mut c_void> {
        self.raw_if_live().ok_or(BindError::Closed)
    }

    pub(crate) fn raw_if_live(&self) -> Option<*mut c_void> {
        self.handles
            .borrow()
            .as_ref()
            .filter(|_| self.is_live())
            .map(|handles| handles.context.as_ptr())
    }

    /// Take the context's pending error message, if any
    pub fn last_error(&self) -> Option<String> {
        self.raw_if_live().and_then(|ctx| self.error_text(ctx))
    }

    fn error_text(&self, ctx: *mut c_void) -> Option<String> {
        // SAFETY: get_error takes a live context and returns a malloc'd string or null
        let value = unsafe { self.fns.get_error.invoke(&[ForeignArg::Pointer(ctx)]) }.ok()?;
        // SAFETY: ownership of the message passes to us
        unsafe { take_foreign_string(pointer(value).cast()) }
    }

    /// Turn a foreign status into a call error carrying the foreign message
    pub(crate) fn check(&self, function: &str, value: ForeignValue) -> BindResult<()> {
        match value.as_status() {
            None | Some(0) => Ok(()),
            Some(code) => {
                let message = self
                    .last_error()
                    .unwrap_or_else(|| format!("returned status {}", code));
                tracing::debug!(function, code, "foreign call failed");
                Err(BindError::call(function, message))
            }
        }
    }

    /// Run a context operation and check its status
    fn run(&self, function: &Option<Rc<ForeignFunction>>, op: &str) -> BindResult<ForeignValue> {
        let function = function
            .as_ref()
            .ok_or_else(|| BindError::call(op, "not exported by this library"))?;
        let ctx = self.raw()?;
        // SAFETY: every context operation takes only the live context
        let value = unsafe { function.invoke(&[ForeignArg::Pointer(ctx)]) }?;
        self.check(function.name(), value)?;
        Ok(value)
    }

    /// Wait for all pending foreign work to finish
    pub fn sync(&self) -> BindResult<()> {
        if self.fns.sync.is_none() {
            // Nothing is asynchronous without a sync operation
            return self.raw().map(drop);
        }
        self.run(&self.fns.sync, "context_sync").map(drop)
    }

    pub fn pause_profiling(&self) -> BindResult<()> {
        self.run(&self.fns.pause_profiling, "context_pause_profiling")
            .map(drop)
    }

    pub fn unpause_profiling(&self) -> BindResult<()> {
        self.run(&self.fns.unpause_profiling, "context_unpause_profiling")
            .map(drop)
    }

    /// The backend's profiling report
    pub fn report(&self) -> BindResult<String> {
        let value = self.run(&self.fns.report, "context_report")?;
        // SAFETY: the report is a malloc'd string owned by the caller
        unsafe { take_foreign_string(pointer(value).cast()) }.ok_or_else(|| {
            BindError::call(
                "context_report",
                self.last_error()
                    .unwrap_or_else(|| "no report produced".to_string()),
            )
        })
    }

    /// Release memory the backend keeps cached between calls
    pub fn clear_caches(&self) -> BindResult<()> {
        self.run(&self.fns.clear_caches, "context_clear_caches")
            .map(drop)
    }

    /// Free the context, then its configuration
    ///
    /// Handles still alive afterwards skip their destructors. Closing twice
    /// does nothing.
    pub fn close(&self) {
        let handles = self.handles.borrow_mut().take();
        if self.state.get() == ContextState::Live {
            self.state.set(ContextState::Closed);
        }
        if let Some(Handles { context, config }) = handles {
            if let Err(err) = context.release() {
                tracing::warn!(error = %err, "context teardown failed");
            }
            if let Err(err) = config.release() {
                tracing::warn!(error = %err, "configuration teardown failed");
            }
            tracing::debug!("context closed");
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Configuration Options
// ============================================================================

struct Options<'a> {
    module: &'a ForeignModule,
    naming: &'a Naming,
    cfg: *mut c_void,
    strings: &'a mut Vec<CString>,
}

impl Options<'_> {
    fn apply(&mut self, config: &SessionConfig) -> BindResult<()> {
        if config.interactive {
            self.set("interactive", "config_select_device_interactively", &[])?;
        }
        if let Some(device) = &config.device {
            let arg = self.string(device)?;
            self.set("device", "config_set_device", &[arg])?;
        }
        if let Some(platform) = &config.platform {
            let arg = self.string(platform)?;
            self.set("platform", "config_set_platform", &[arg])?;
        }
        if config.profiling {
            self.flag("profiling", "config_set_profiling")?;
        }
        if config.debugging {
            self.flag("debugging", "config_set_debugging")?;
        }
        if config.logging {
            self.flag("logging", "config_set_logging")?;
        }
        if let Some(path) = &config.cache_path {
            let arg = self.string(&path.to_string_lossy())?;
            self.set("cache-path", "config_set_cache_file", &[arg])?;
        }
        for (name, value) in &config.tuning {
            self.tune(name, *value)?;
        }
        Ok(())
    }

    fn setter(&self, option: &str, op: &str) -> BindResult<Rc<ForeignFunction>> {
        let symbol = self.naming.context_symbol(op);
        self.module.function(&symbol).cloned().ok_or_else(|| {
            BindError::configuration(format!(
                "backend does not support option `{}` (`{}` not exported)",
                option, symbol
            ))
        })
    }

    fn set(&mut self, option: &str, op: &str, args: &[ForeignArg]) -> BindResult<ForeignValue> {
        let setter = self.setter(option, op)?;
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(ForeignArg::Pointer(self.cfg));
        full.extend_from_slice(args);
        tracing::trace!(option, symbol = setter.name(), "applying option");
        // SAFETY: setters take the live configuration followed by the option
        Ok(unsafe { setter.invoke(&full) }?)
    }

    fn flag(&mut self, option: &str, op: &str) -> BindResult<()> {
        let setter = self.setter(option, op)?;
        let kind = setter.param_kinds().get(1).copied().unwrap_or(AbiKind::I32);
        let arg = Scalar::integer_arg(kind, 1).ok_or_else(|| {
            BindError::configuration(format!("`{}` does not take a flag", setter.name()))
        })?;
        self.set(option, op, &[arg]).map(drop)
    }

    fn tune(&mut self, name: &str, value: u64) -> BindResult<()> {
        // Older libraries call tuning parameters sizes
        let modern = self.naming.context_symbol("config_set_tuning_param");
        let op = if self.module.function(&modern).is_some() {
            "config_set_tuning_param"
        } else {
            "config_set_size"
        };
        let setter = self.setter("tuning", op)?;
        let kind = setter.param_kinds().get(2).copied().unwrap_or(AbiKind::U64);
        let value_arg = Scalar::integer_arg(kind, value.into()).ok_or_else(|| {
            BindError::configuration(format!("tuning value {} for `{}` out of range", value, name))
        })?;
        let name_arg = self.string(name)?;
        let status = self.set("tuning", op, &[name_arg, value_arg])?;
        match status.as_status() {
            None | Some(0) => Ok(()),
            Some(_) => Err(BindError::configuration(format!(
                "unknown tuning parameter `{}`",
                name
            ))),
        }
    }

    /// A string argument that lives as long as the context
    fn string(&mut self, value: &str) -> BindResult<ForeignArg> {
        let text = CString::new(value).map_err(FfiError::from)?;
        let arg = ForeignArg::ptr(text.as_ptr());
        self.strings.push(text);
        Ok(arg)
    }
}

fn pointer(value: ForeignValue) -> *mut c_void {
    value.as_pointer().unwrap_or(std::ptr::null_mut())
}

fn finalizer(
    free: &Rc<ForeignFunction>,
) -> impl FnOnce(NonNull<c_void>) -> FfiResult<()> + 'static {
    let free = free.clone();
    // SAFETY: runs once, on a pointer the matching constructor returned
    move |ptr| unsafe { free.invoke(&[ForeignArg::Pointer(ptr.as_ptr())]) }.map(drop)
}
