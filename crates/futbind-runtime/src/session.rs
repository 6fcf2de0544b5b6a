//! Sessions
//!
//! A [`Session`] is one loaded library with a live context: its type
//! registry, its entry points, and the conversions between host arrays and
//! the library's handles.
//!
//! Construction runs in a fixed order. The context comes first, so a library
//! that cannot run fails before anything else is built. Then the registry is
//! scanned, and finally the entry points are classified against it.
//!
//! Sessions are single-threaded: they hold shared references that are not
//! `Send`, matching a foreign context that is not safe to share.

use std::path::Path;
use std::rc::Rc;

use futbind_ffi::ForeignModule;
use smol_str::SmolStr;

use crate::config::SessionConfig;
use crate::context::{Context, ContextState};
use crate::entry::{EntryPoint, EntryPoints, Input, Returned};
use crate::error::{BindError, BindResult};
use crate::handle::OpaqueArray;
use crate::host_array::HostArray;
use crate::marshal;
use crate::registry::TypeRegistry;
use crate::serialize;

/// A loaded library bound to a live context
pub struct Session {
    entries: EntryPoints,
    registry: Rc<TypeRegistry>,
    context: Rc<Context>,
    backend: Option<SmolStr>,
    module: ForeignModule,
}

impl Session {
    /// Open a session with default options
    pub fn new(module: ForeignModule) -> BindResult<Self> {
        Self::with_config(module, &SessionConfig::default())
    }

    /// Open a session, applying `config` before the context is created
    pub fn with_config(module: ForeignModule, config: &SessionConfig) -> BindResult<Self> {
        let naming = config.naming();
        let context = Rc::new(Context::create(&module, config, &naming)?);
        let registry = Rc::new(TypeRegistry::scan(&module, &naming));
        let entries = EntryPoints::build(&module, &naming, &registry, &context);
        let backend = module
            .flags_with_prefix(&naming.backend_flag_prefix())
            .next()
            .map(SmolStr::new);

        tracing::info!(
            library = ?module.path(),
            backend = backend.as_deref().unwrap_or("unknown"),
            types = registry.len(),
            entry_points = entries.len(),
            "session opened"
        );
        Ok(Self {
            entries,
            registry,
            context,
            backend,
            module,
        })
    }

    /// Load a library and its header from disk and open a session on it
    pub fn load(
        library: impl AsRef<Path>,
        header: impl AsRef<Path>,
        config: &SessionConfig,
    ) -> BindResult<Self> {
        let module = ForeignModule::load(library, header)?;
        Self::with_config(module, config)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Entry point by name
    pub fn entry(&self, name: &str) -> BindResult<&EntryPoint> {
        self.entries.get(name)
    }

    /// Call the entry point `name`
    pub fn call(&self, name: &str, inputs: &[Input<'_>]) -> BindResult<Returned> {
        self.entry(name)?.call(inputs)
    }

    pub fn entry_points(&self) -> &EntryPoints {
        &self.entries
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn module(&self) -> &ForeignModule {
        &self.module
    }

    /// Compilation backend named by the header, such as `c` or `opencl`
    pub fn backend(&self) -> Option<&str> {
        self.backend.as_deref()
    }

    // ========================================================================
    // Marshalling
    // ========================================================================

    /// Copy a host array into a new foreign array of the named type
    pub fn to_foreign(&self, type_name: &str, host: &HostArray) -> BindResult<OpaqueArray> {
        let descriptor = self.registry.resolve(type_name)?;
        marshal::to_foreign(&self.context, descriptor, host)
    }

    /// Copy a foreign array into a new host array
    pub fn from_foreign(&self, handle: &OpaqueArray) -> BindResult<HostArray> {
        let mut arrays = self.from_foreign_many(&[handle])?;
        arrays
            .pop()
            .ok_or_else(|| BindError::conversion("no array extracted"))
    }

    /// Copy several foreign arrays out with one synchronization on each side
    pub fn from_foreign_many(&self, handles: &[&OpaqueArray]) -> BindResult<Vec<HostArray>> {
        marshal::from_foreign_batch(&self.context, handles)
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// Serialize a handle to bytes
    pub fn store(&self, handle: &OpaqueArray) -> BindResult<Vec<u8>> {
        serialize::store(&self.context, handle)
    }

    /// Rebuild a handle of the named type from bytes
    pub fn restore(&self, type_name: &str, bytes: &[u8]) -> BindResult<OpaqueArray> {
        let descriptor = self.registry.resolve(type_name)?;
        serialize::restore(&self.context, descriptor, bytes)
    }

    // ========================================================================
    // Context
    // ========================================================================

    pub fn state(&self) -> ContextState {
        self.context.state()
    }

    pub fn sync(&self) -> BindResult<()> {
        self.context.sync()
    }

    pub fn pause_profiling(&self) -> BindResult<()> {
        self.context.pause_profiling()
    }

    pub fn unpause_profiling(&self) -> BindResult<()> {
        self.context.unpause_profiling()
    }

    /// Profiling report, in the backend's own format
    pub fn report(&self) -> BindResult<String> {
        self.context.report()
    }

    pub fn clear_caches(&self) -> BindResult<()> {
        self.context.clear_caches()
    }

    /// Tear down the context
    ///
    /// Every later foreign operation fails with [`BindError::Closed`], and
    /// handles still alive skip their destructors.
    pub fn close(&self) {
        self.context.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.context.state())
            .field("backend", &self.backend)
            .field("types", &self.registry.len())
            .field("entry_points", &self.entries.len())
            .finish()
    }
}
