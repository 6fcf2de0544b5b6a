//! Type Registry
//!
//! The first pass over a module's symbols: every function whose name follows
//! the array naming convention contributes one operation to the descriptor
//! of the type it names. Types are identified by the struct tag of their
//! handle (`struct futhark_i64_1d`), so a descriptor and an entry point
//! parameter meet on the C type rather than on a spelling of the name.
//!
//! ## Registration rules
//!
//! - `new_<T>` is a constructor only if it returns a pointer to a struct;
//!   its element kind is the pointee of the data parameter and its rank is
//!   the number of dimension parameters after it
//! - Every other accessor is matched by parameter shape and skipped with a
//!   debug log when it does not fit
//! - A descriptor may be incomplete; the missing operation is reported when
//!   something first needs it

use std::fmt;
use std::rc::Rc;

use futbind_ffi::{AbiKind, CType, ForeignFunction, ForeignModule};
use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::element::ElementKind;
use crate::error::{BindError, BindResult};
use crate::naming::{Naming, SymbolRole};

// ============================================================================
// Type Identity
// ============================================================================

/// Identity of a foreign type: the struct tag its handles point to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(SmolStr);

impl TypeId {
    pub fn new(tag: impl Into<SmolStr>) -> Self {
        TypeId(tag.into())
    }

    /// The type a handle parameter `struct T *` points to
    pub fn of_handle(ty: &CType) -> Option<TypeId> {
        ty.pointee()?.struct_tag().map(TypeId::new)
    }

    /// The type an out parameter `struct T **` writes a handle of
    pub fn of_handle_slot(ty: &CType) -> Option<TypeId> {
        TypeId::of_handle(ty.pointee()?)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Type Descriptor
// ============================================================================

/// Everything known about one foreign type
#[derive(Debug)]
pub struct TypeDescriptor {
    id: TypeId,
    name: SmolStr,
    element: Option<ElementKind>,
    rank: Option<usize>,
    constructor: Option<Rc<ForeignFunction>>,
    destructor: Option<Rc<ForeignFunction>>,
    shape: Option<Rc<ForeignFunction>>,
    values: Option<Rc<ForeignFunction>>,
    store: Option<Rc<ForeignFunction>>,
    restore: Option<Rc<ForeignFunction>>,
}

impl TypeDescriptor {
    pub fn id(&self) -> &TypeId {
        &self.id
    }

    /// Printable name, `i64_1d` for `struct futhark_i64_1d`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element(&self) -> Option<ElementKind> {
        self.element
    }

    pub fn rank(&self) -> Option<usize> {
        self.rank
    }

    /// Whether host arrays convert to and from this type
    pub fn is_array(&self) -> bool {
        self.element.is_some()
            && self.rank.is_some()
            && self.constructor.is_some()
            && self.destructor.is_some()
            && self.shape.is_some()
            && self.values.is_some()
    }

    /// Whether handles of this type can be released
    pub fn is_destructible(&self) -> bool {
        self.destructor.is_some()
    }

    pub fn is_serializable(&self) -> bool {
        self.store.is_some() && self.restore.is_some()
    }

    pub(crate) fn constructor(&self) -> BindResult<&Rc<ForeignFunction>> {
        self.require(&self.constructor, "no array constructor")
    }

    pub(crate) fn destructor(&self) -> BindResult<&Rc<ForeignFunction>> {
        self.require(&self.destructor, "no destructor")
    }

    pub(crate) fn shape_accessor(&self) -> BindResult<&Rc<ForeignFunction>> {
        self.require(&self.shape, "no shape accessor")
    }

    pub(crate) fn values_accessor(&self) -> BindResult<&Rc<ForeignFunction>> {
        self.require(&self.values, "no value extractor")
    }

    pub(crate) fn store_fn(&self) -> BindResult<&Rc<ForeignFunction>> {
        self.require(&self.store, "no serializer")
    }

    pub(crate) fn restore_fn(&self) -> BindResult<&Rc<ForeignFunction>> {
        self.require(&self.restore, "no deserializer")
    }

    pub(crate) fn require_element(&self) -> BindResult<ElementKind> {
        self.element
            .ok_or_else(|| BindError::registry(self.name.as_str(), "element kind unknown"))
    }

    pub(crate) fn require_rank(&self) -> BindResult<usize> {
        self.rank
            .ok_or_else(|| BindError::registry(self.name.as_str(), "rank unknown"))
    }

    fn require<'a>(
        &self,
        slot: &'a Option<Rc<ForeignFunction>>,
        missing: &str,
    ) -> BindResult<&'a Rc<ForeignFunction>> {
        slot.as_ref()
            .ok_or_else(|| BindError::registry(self.name.as_str(), missing))
    }

    fn operations(&self) -> Vec<&'static str> {
        let slots = [
            (&self.constructor, "new"),
            (&self.destructor, "free"),
            (&self.shape, "shape"),
            (&self.values, "values"),
            (&self.store, "store"),
            (&self.restore, "restore"),
        ];
        slots
            .iter()
            .filter(|(slot, _)| slot.is_some())
            .map(|(_, op)| *op)
            .collect()
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        match (self.element, self.rank) {
            (Some(element), Some(rank)) => write!(f, " ({}, rank {})", element, rank)?,
            _ => write!(f, " (opaque)")?,
        }
        write!(f, ": {}", self.operations().join(" "))
    }
}

#[derive(Debug, Default)]
struct DescriptorBuilder {
    name: Option<SmolStr>,
    // Element kinds seen by the constructor and by the value extractor
    element: Option<ElementKind>,
    values_element: Option<ElementKind>,
    rank: Option<usize>,
    constructor: Option<Rc<ForeignFunction>>,
    destructor: Option<Rc<ForeignFunction>>,
    shape: Option<Rc<ForeignFunction>>,
    values: Option<Rc<ForeignFunction>>,
    store: Option<Rc<ForeignFunction>>,
    restore: Option<Rc<ForeignFunction>>,
}

impl DescriptorBuilder {
    fn finish(self, id: TypeId) -> TypeDescriptor {
        let name = self.name.unwrap_or_else(|| id.0.clone());
        // The constructor decides the element kind; an extractor writing a
        // different kind would overrun the host buffer
        let mut values = self.values;
        let element = match (self.element, self.values_element) {
            (Some(made), Some(read)) if made != read => {
                tracing::debug!(
                    type_name = %name,
                    constructor = %made,
                    extractor = %read,
                    "value extractor disagrees with constructor; dropped"
                );
                values = None;
                Some(made)
            }
            (made, read) => made.or(read),
        };
        TypeDescriptor {
            id,
            name,
            element,
            rank: self.rank,
            constructor: self.constructor,
            destructor: self.destructor,
            shape: self.shape,
            values,
            store: self.store,
            restore: self.restore,
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// All foreign types a module's symbols describe
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: IndexMap<TypeId, Rc<TypeDescriptor>>,
    names: IndexMap<SmolStr, TypeId>,
}

impl TypeRegistry {
    /// Build descriptors from every conventionally named accessor in `module`
    pub fn scan(module: &ForeignModule, naming: &Naming) -> Self {
        let mut builders: IndexMap<TypeId, DescriptorBuilder> = IndexMap::new();

        for function in module.functions() {
            let role = naming.classify(function.name());
            let registered = match role {
                SymbolRole::Constructor(name) => register_constructor(&mut builders, name, function),
                SymbolRole::Destructor(name) => {
                    register_accessor(&mut builders, name, function, 2, |b| &mut b.destructor)
                }
                SymbolRole::Shape(name) => register_shape(&mut builders, name, function),
                SymbolRole::Values(name) => register_values(&mut builders, name, function),
                SymbolRole::Store(name) => {
                    register_accessor(&mut builders, name, function, 4, |b| &mut b.store)
                }
                SymbolRole::Restore(name) => register_restore(&mut builders, name, function),
                _ => continue,
            };
            if !registered {
                tracing::debug!(
                    symbol = function.name(),
                    signature = %function.decl(),
                    "accessor does not match the naming convention's signature"
                );
            }
        }

        let mut registry = TypeRegistry::default();
        for (id, builder) in builders {
            let descriptor = builder.finish(id.clone());
            tracing::trace!(descriptor = %descriptor, "registered type");
            registry.names.insert(descriptor.name.clone(), id.clone());
            registry.types.insert(id, Rc::new(descriptor));
        }
        tracing::debug!(types = registry.types.len(), "type registry built");
        registry
    }

    /// Descriptor for a type identity
    pub fn get(&self, id: &TypeId) -> Option<&Rc<TypeDescriptor>> {
        self.types.get(id)
    }

    /// Descriptor for a printable name such as `i64_1d`
    pub fn by_name(&self, name: &str) -> Option<&Rc<TypeDescriptor>> {
        self.names.get(name).and_then(|id| self.types.get(id))
    }

    /// Like [`TypeRegistry::by_name`], failing with `UnknownType`
    pub fn resolve(&self, name: &str) -> BindResult<&Rc<TypeDescriptor>> {
        self.by_name(name).ok_or_else(|| BindError::UnknownType {
            name: name.to_string(),
        })
    }

    /// Descriptor of the type a handle parameter points to
    pub fn lookup(&self, ty: &CType) -> Option<&Rc<TypeDescriptor>> {
        TypeId::of_handle(ty).and_then(|id| self.types.get(&id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<TypeDescriptor>> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

// ============================================================================
// Registration
// ============================================================================

fn builder<'a>(
    builders: &'a mut IndexMap<TypeId, DescriptorBuilder>,
    id: TypeId,
    name: &str,
) -> &'a mut DescriptorBuilder {
    let builder = builders.entry(id).or_default();
    builder.name.get_or_insert_with(|| SmolStr::new(name));
    builder
}

/// The type of the handle a function takes at position `index`
fn handle_param(function: &ForeignFunction, index: usize) -> Option<TypeId> {
    function
        .decl()
        .params
        .get(index)
        .and_then(|param| TypeId::of_handle(&param.ty))
}

/// The element kind a data pointer parameter addresses
fn element_param(function: &ForeignFunction, index: usize) -> Option<ElementKind> {
    let param = function.decl().params.get(index)?;
    AbiKind::of(param.ty.pointee()?).and_then(ElementKind::from_abi)
}

fn register_constructor(
    builders: &mut IndexMap<TypeId, DescriptorBuilder>,
    name: &str,
    function: &Rc<ForeignFunction>,
) -> bool {
    // Newer `new_opaque_` functions return a status; they are not constructors
    let Some(id) = TypeId::of_handle(&function.decl().return_type) else {
        return false;
    };
    let kinds = function.param_kinds();
    if kinds.len() < 2 || kinds[0] != AbiKind::Pointer {
        return false;
    }
    let Some(element) = element_param(function, 1) else {
        return false;
    };
    if !kinds[2..].iter().all(|kind| kind.is_integer()) {
        return false;
    }

    let builder = builder(builders, id, name);
    builder.element = Some(element);
    builder.rank = Some(kinds.len() - 2);
    builder.constructor = Some(function.clone());
    true
}

fn register_accessor(
    builders: &mut IndexMap<TypeId, DescriptorBuilder>,
    name: &str,
    function: &Rc<ForeignFunction>,
    arity: usize,
    slot: fn(&mut DescriptorBuilder) -> &mut Option<Rc<ForeignFunction>>,
) -> bool {
    if function.param_kinds().len() != arity {
        return false;
    }
    let Some(id) = handle_param(function, 1) else {
        return false;
    };
    *slot(builder(builders, id, name)) = Some(function.clone());
    true
}

fn register_shape(
    builders: &mut IndexMap<TypeId, DescriptorBuilder>,
    name: &str,
    function: &Rc<ForeignFunction>,
) -> bool {
    let returns_dims = function
        .decl()
        .return_type
        .pointee()
        .and_then(AbiKind::of)
        == Some(AbiKind::I64);
    returns_dims && register_accessor(builders, name, function, 2, |b| &mut b.shape)
}

fn register_values(
    builders: &mut IndexMap<TypeId, DescriptorBuilder>,
    name: &str,
    function: &Rc<ForeignFunction>,
) -> bool {
    if function.param_kinds().len() != 3 {
        return false;
    }
    let (Some(id), Some(element)) = (handle_param(function, 1), element_param(function, 2)) else {
        return false;
    };

    let builder = builder(builders, id, name);
    builder.values_element = Some(element);
    builder.values = Some(function.clone());
    true
}

fn register_restore(
    builders: &mut IndexMap<TypeId, DescriptorBuilder>,
    name: &str,
    function: &Rc<ForeignFunction>,
) -> bool {
    if function.param_kinds().len() != 2 {
        return false;
    }
    let Some(id) = TypeId::of_handle(&function.decl().return_type) else {
        return false;
    };
    builder(builders, id, name).restore = Some(function.clone());
    true
}
