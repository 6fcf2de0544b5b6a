//! Entry Points
//!
//! The second pass over a module's symbols. Every `entry_<name>` function is
//! classified parameter by parameter against the type registry, producing a
//! signature that drives calls from then on.
//!
//! ## Parameter classification
//!
//! After the leading context parameter:
//!
//! - A pointer to a primitive is an output scalar
//! - A pointer to a pointer to a struct is an output handle
//! - A pointer to a registered struct is an input array, converted from a
//!   host array or passed through as an existing handle
//! - Anything else is an input passed by value without conversion
//!
//! ## Calls
//!
//! Inputs are matched to input parameters left to right. Output slots are
//! zero-initialized cells the foreign function writes into. Handles created
//! from host arrays for the call are released when it returns, whether it
//! succeeded or not.

use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;

use futbind_ffi::{AbiKind, CType, ForeignArg, ForeignFunction, ForeignModule};
use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::context::Context;
use crate::element::{ElementKind, Scalar};
use crate::error::{BindError, BindResult};
use crate::handle::OpaqueArray;
use crate::host_array::HostArray;
use crate::marshal;
use crate::naming::{Naming, SymbolRole};
use crate::registry::{TypeId, TypeRegistry};

// ============================================================================
// Signatures
// ============================================================================

/// How one entry point parameter is treated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamRole {
    /// Passed by value as given
    InputValue { kind: AbiKind },
    /// Handle of a registered type, built from a host array when needed
    InputArray { ty: TypeId },
    /// Scalar written through an out pointer
    OutputScalar { kind: ElementKind },
    /// Handle written through an out pointer
    OutputOpaque { ty: TypeId },
}

impl ParamRole {
    pub fn is_output(&self) -> bool {
        matches!(
            self,
            ParamRole::OutputScalar { .. } | ParamRole::OutputOpaque { .. }
        )
    }
}

impl fmt::Display for ParamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamRole::InputValue { kind } => write!(f, "in {}", kind),
            ParamRole::InputArray { ty } => write!(f, "in {}", ty),
            ParamRole::OutputScalar { kind } => write!(f, "out {}", kind),
            ParamRole::OutputOpaque { ty } => write!(f, "out {}", ty),
        }
    }
}

/// Classified parameters of one entry point
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPointSignature {
    name: SmolStr,
    roles: Vec<ParamRole>,
    /// Why the entry point cannot be called, reported at first use
    issue: Option<BindError>,
}

impl EntryPointSignature {
    /// Classify the parameters of `function` against `registry`
    pub fn classify(name: &str, function: &ForeignFunction, registry: &TypeRegistry) -> Self {
        let mut signature = Self {
            name: SmolStr::new(name),
            roles: Vec::new(),
            issue: None,
        };

        let params = &function.decl().params;
        let has_context = params.first().is_some_and(|p| p.ty.is_pointer());
        if !has_context {
            signature.flag(BindError::call(
                function.name(),
                "first parameter is not a context",
            ));
        }
        if !matches!(function.return_kind(), AbiKind::Void) && !function.return_kind().is_integer() {
            signature.flag(BindError::call(
                function.name(),
                "does not return a status code",
            ));
        }

        for param in params.iter().skip(1) {
            match classify_param(&param.ty, registry) {
                Ok(role) => signature.roles.push(role),
                Err((role, err)) => {
                    signature.roles.push(role);
                    signature.flag(err);
                }
            }
        }
        signature
    }

    fn flag(&mut self, err: BindError) {
        self.issue.get_or_insert(err);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roles(&self) -> &[ParamRole] {
        &self.roles
    }

    pub fn inputs(&self) -> impl Iterator<Item = &ParamRole> {
        self.roles.iter().filter(|r| !r.is_output())
    }

    pub fn outputs(&self) -> impl Iterator<Item = &ParamRole> {
        self.roles.iter().filter(|r| r.is_output())
    }

    /// The problem that keeps this entry point from being called, if any
    pub fn issue(&self) -> Option<&BindError> {
        self.issue.as_ref()
    }
}

impl fmt::Display for EntryPointSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, role) in self.roles.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", role)?;
        }
        write!(f, ")")
    }
}

type Classified = Result<ParamRole, (ParamRole, BindError)>;

fn classify_param(ty: &CType, registry: &TypeRegistry) -> Classified {
    if let Some(pointee) = ty.pointee() {
        if pointee.is_pointer() {
            return classify_output_handle(ty, registry);
        }
        if let Some(kind) = AbiKind::of(pointee).and_then(ElementKind::from_abi) {
            return Ok(ParamRole::OutputScalar { kind });
        }
        if let Some(descriptor) = registry.lookup(ty) {
            return Ok(ParamRole::InputArray {
                ty: descriptor.id().clone(),
            });
        }
    }

    // Unregistered handles and by-value scalars pass through
    match AbiKind::of(ty) {
        Some(kind) => Ok(ParamRole::InputValue { kind }),
        None => {
            let role = ParamRole::InputValue {
                kind: AbiKind::Pointer,
            };
            Err((role, BindError::conversion(format!("unsupported parameter type {}", ty))))
        }
    }
}

fn classify_output_handle(ty: &CType, registry: &TypeRegistry) -> Classified {
    let Some(id) = TypeId::of_handle_slot(ty) else {
        let role = ParamRole::OutputOpaque {
            ty: TypeId::new(ty.to_string()),
        };
        let err = BindError::registry(ty.to_string(), "out parameter is not a handle");
        return Err((role, err));
    };

    let role = ParamRole::OutputOpaque { ty: id.clone() };
    match registry.get(&id) {
        Some(descriptor) if descriptor.is_destructible() => Ok(role),
        Some(descriptor) => Err((
            role,
            BindError::registry(descriptor.name(), "no destructor for returned handles"),
        )),
        None => Err((
            role,
            BindError::registry(id.as_str(), "not registered; returned handles could not be freed"),
        )),
    }
}

// ============================================================================
// Call Values
// ============================================================================

/// One argument to an entry point call
#[derive(Debug, Clone, Copy)]
pub enum Input<'a> {
    /// Host array, converted for the call and released after it
    Array(&'a HostArray),
    /// Existing handle, passed through
    Handle(&'a OpaqueArray),
    Scalar(Scalar),
}

impl<'a> From<&'a HostArray> for Input<'a> {
    fn from(array: &'a HostArray) -> Self {
        Input::Array(array)
    }
}

impl<'a> From<&'a OpaqueArray> for Input<'a> {
    fn from(handle: &'a OpaqueArray) -> Self {
        Input::Handle(handle)
    }
}

impl From<Scalar> for Input<'_> {
    fn from(scalar: Scalar) -> Self {
        Input::Scalar(scalar)
    }
}

macro_rules! input_from_scalar {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Input<'_> {
            fn from(v: $ty) -> Self {
                Input::Scalar(v.into())
            }
        })*
    };
}

input_from_scalar!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

/// One value an entry point produced
#[derive(Debug)]
pub enum Value {
    Scalar(Scalar),
    Opaque(OpaqueArray),
}

impl Value {
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Value::Scalar(s) => Some(*s),
            Value::Opaque(_) => None,
        }
    }

    pub fn as_opaque(&self) -> Option<&OpaqueArray> {
        match self {
            Value::Opaque(h) => Some(h),
            Value::Scalar(_) => None,
        }
    }

    pub fn into_opaque(self) -> Option<OpaqueArray> {
        match self {
            Value::Opaque(h) => Some(h),
            Value::Scalar(_) => None,
        }
    }
}

/// Everything an entry point produced: one value, or a tuple in
/// declaration order
#[derive(Debug)]
pub enum Returned {
    Single(Value),
    Tuple(Vec<Value>),
}

impl Returned {
    fn from_values(mut values: Vec<Value>) -> Self {
        if values.len() == 1 {
            if let Some(value) = values.pop() {
                return Returned::Single(value);
            }
        }
        Returned::Tuple(values)
    }

    /// The single value, if exactly one was produced
    pub fn into_single(self) -> Option<Value> {
        match self {
            Returned::Single(value) => Some(value),
            Returned::Tuple(_) => None,
        }
    }

    /// All values in declaration order
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Returned::Single(value) => vec![value],
            Returned::Tuple(values) => values,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Returned::Single(_) => 1,
            Returned::Tuple(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Entry Points
// ============================================================================

/// A callable entry point bound to a session's context
pub struct EntryPoint {
    signature: EntryPointSignature,
    function: Rc<ForeignFunction>,
    registry: Rc<TypeRegistry>,
    context: Rc<Context>,
}

impl EntryPoint {
    pub fn name(&self) -> &str {
        self.signature.name()
    }

    pub fn signature(&self) -> &EntryPointSignature {
        &self.signature
    }

    /// Number of inputs a call takes
    pub fn arity(&self) -> usize {
        self.signature.inputs().count()
    }

    /// Call with `inputs` matched to the input parameters in order
    pub fn call(&self, inputs: &[Input<'_>]) -> BindResult<Returned> {
        if let Some(issue) = &self.signature.issue {
            return Err(issue.clone());
        }
        if inputs.len() != self.arity() {
            return Err(BindError::conversion(format!(
                "`{}` takes {} inputs, {} given",
                self.name(),
                self.arity(),
                inputs.len()
            )));
        }

        let ctx = self.context.raw()?;
        let outputs = self.signature.outputs().count();
        // One 8-byte cell per output; large and aligned enough for any scalar or pointer
        let mut cells = vec![0u64; outputs];
        let base = cells.as_mut_ptr();
        // Handles converted from host arrays, released when the call returns
        let mut temporaries = Vec::new();

        let mut args = Vec::with_capacity(self.signature.roles.len() + 1);
        args.push(ForeignArg::Pointer(ctx));
        let mut inputs = inputs.iter();
        let mut next_cell = 0;
        for role in &self.signature.roles {
            let arg = match role {
                ParamRole::OutputScalar { .. } | ParamRole::OutputOpaque { .. } => {
                    // SAFETY: next_cell < outputs, the length of `cells`
                    let cell = unsafe { base.add(next_cell) };
                    next_cell += 1;
                    ForeignArg::ptr(cell.cast_const())
                }
                ParamRole::InputValue { kind } => {
                    let input = inputs.next().ok_or_else(|| BindError::conversion("missing input"))?;
                    self.by_value(*kind, input)?
                }
                ParamRole::InputArray { ty } => {
                    let input = inputs.next().ok_or_else(|| BindError::conversion("missing input"))?;
                    self.handle_arg(ty, input, &mut temporaries)?
                }
            };
            args.push(arg);
        }

        // SAFETY: arguments follow the classified prototype and every
        // pointer stays alive until the call returns
        let status = unsafe { self.function.invoke(&args) }?;
        drop(temporaries);
        self.context.check(self.function.name(), status)?;

        let outputs = self.signature.outputs().zip(cells.iter());
        let values: Vec<BindResult<Value>> = outputs
            .map(|(role, cell)| self.wrap_output(role, cell))
            .collect();
        // Wrap everything before failing so no handle leaks
        let values = values.into_iter().collect::<BindResult<Vec<_>>>()?;
        Ok(Returned::from_values(values))
    }

    fn by_value(&self, kind: AbiKind, input: &Input<'_>) -> BindResult<ForeignArg> {
        match (input, ElementKind::from_abi(kind)) {
            (Input::Scalar(scalar), Some(element)) => Ok(scalar.coerce(element)?.to_arg()),
            (Input::Handle(handle), None) if kind == AbiKind::Pointer => {
                self.check_owner(handle)?;
                Ok(ForeignArg::Pointer(handle.as_ptr()))
            }
            (input, _) => Err(BindError::conversion(format!(
                "`{}` expected a {} argument, got {}",
                self.name(),
                kind,
                describe(input)
            ))),
        }
    }

    fn handle_arg(
        &self,
        ty: &TypeId,
        input: &Input<'_>,
        temporaries: &mut Vec<OpaqueArray>,
    ) -> BindResult<ForeignArg> {
        let descriptor = self
            .registry
            .get(ty)
            .ok_or_else(|| BindError::registry(ty.as_str(), "not registered"))?;

        match input {
            Input::Handle(handle) => {
                self.check_owner(handle)?;
                if handle.descriptor().id() != ty {
                    return Err(BindError::conversion(format!(
                        "`{}` expected {}, got a {} handle",
                        self.name(),
                        descriptor.name(),
                        handle.type_name()
                    )));
                }
                Ok(ForeignArg::Pointer(handle.as_ptr()))
            }
            Input::Array(array) => {
                let handle = marshal::to_foreign(&self.context, descriptor, array)?;
                let arg = ForeignArg::Pointer(handle.as_ptr());
                temporaries.push(handle);
                Ok(arg)
            }
            Input::Scalar(scalar) => Err(BindError::conversion(format!(
                "`{}` expected {}, got scalar {}",
                self.name(),
                descriptor.name(),
                scalar
            ))),
        }
    }

    fn check_owner(&self, handle: &OpaqueArray) -> BindResult<()> {
        if handle.belongs_to(&self.context) {
            Ok(())
        } else {
            Err(BindError::conversion(format!(
                "{} handle belongs to another session",
                handle.type_name()
            )))
        }
    }

    fn wrap_output(&self, role: &ParamRole, cell: &u64) -> BindResult<Value> {
        let cell: *const c_void = (cell as *const u64).cast();
        match role {
            ParamRole::OutputScalar { kind } => {
                // SAFETY: the cell is aligned for any scalar and was written as `kind`
                Ok(Value::Scalar(unsafe { Scalar::read(*kind, cell) }))
            }
            ParamRole::OutputOpaque { ty } => {
                // SAFETY: the cell holds the handle pointer the call wrote
                let raw = unsafe { cell.cast::<*mut c_void>().read() };
                let descriptor = self
                    .registry
                    .get(ty)
                    .ok_or_else(|| BindError::registry(ty.as_str(), "not registered"))?;
                OpaqueArray::bind(raw, descriptor, &self.context).map(Value::Opaque)
            }
            _ => Err(BindError::conversion("not an output parameter")),
        }
    }
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoint")
            .field("signature", &self.signature.to_string())
            .finish()
    }
}

fn describe(input: &Input<'_>) -> String {
    match input {
        Input::Array(array) => format!("{} array of rank {}", array.kind(), array.ndim()),
        Input::Handle(handle) => format!("{} handle", handle.type_name()),
        Input::Scalar(scalar) => format!("scalar {}", scalar),
    }
}

/// All entry points of a module, by name
#[derive(Debug, Default)]
pub struct EntryPoints {
    entries: IndexMap<SmolStr, EntryPoint>,
}

impl EntryPoints {
    /// Classify every `entry_<name>` function in `module`
    pub(crate) fn build(
        module: &ForeignModule,
        naming: &Naming,
        registry: &Rc<TypeRegistry>,
        context: &Rc<Context>,
    ) -> Self {
        let mut entries = IndexMap::new();
        for function in module.functions() {
            let SymbolRole::Entry(name) = naming.classify(function.name()) else {
                continue;
            };
            let signature = EntryPointSignature::classify(name, function, registry);
            match signature.issue() {
                Some(issue) => tracing::debug!(entry = name, %issue, "entry point not callable"),
                None => tracing::trace!(entry = %signature, "entry point"),
            }
            entries.insert(
                SmolStr::new(name),
                EntryPoint {
                    signature,
                    function: function.clone(),
                    registry: registry.clone(),
                    context: context.clone(),
                },
            );
        }
        Self { entries }
    }

    pub fn get(&self, name: &str) -> BindResult<&EntryPoint> {
        self.entries.get(name).ok_or_else(|| BindError::UnknownEntryPoint {
            name: name.to_string(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(SmolStr::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntryPoint> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
