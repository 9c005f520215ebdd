//! An [Op] is the interned identity of a primitive operator.
//!
//! [Op]s are created only by a [Registry](crate::registry::Registry),
//! the first time an operator name is declared, and are never destroyed.
//! Equal names yield the identical [Op] instance, so identities can be
//! compared and hashed cheaply by the IR that embeds them.
//!
//! The structural fields of an operator ([OpInfo]) live behind the
//! identity and are updated in place by the registry's structural
//! mutators. Readers only ever get copies of them.

use std::{
    fmt::{self, Display},
    hash::Hash,
    sync::Arc,
};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::{
    arg_err,
    name::verify_op_name,
    not_found_err,
    result::{Result, UnknownOpErr},
};

/// `num_inputs` value of an operator that accepts any number of inputs.
pub const VARIADIC_INPUTS: i32 = -1;

/// Dense index of an operator within its registry.
pub(crate) type OpIndex = u32;

/// Describes one positional argument of an operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgumentDesc {
    pub name: String,
    /// Free form type tag, such as `"Tensor"` or `"Expr"`.
    pub type_info: String,
    pub description: String,
}

/// The structural (non priority-ranked) fields of an operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpInfo {
    /// Number of inputs, [VARIADIC_INPUTS] if variadic.
    pub num_inputs: i32,
    /// Key of the schema that validates the operator's structured attributes.
    pub attrs_type_key: String,
    /// Documentation tier; carries no semantic weight.
    pub support_level: i32,
    pub description: String,
    /// Arguments, in positional order.
    pub arguments: Vec<ArgumentDesc>,
}

impl Default for OpInfo {
    fn default() -> Self {
        OpInfo {
            num_inputs: VARIADIC_INPUTS,
            attrs_type_key: String::new(),
            support_level: 0,
            description: String::new(),
            arguments: Vec::new(),
        }
    }
}

/// An opaque handle to an [Op], for passing across a call boundary.
/// Turn it back into an [Op] with
/// [Registry::op_from_handle](crate::registry::Registry::op_from_handle).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct OpHandle {
    registry: u32,
    index: OpIndex,
}

impl OpHandle {
    /// Pack into a single integer.
    pub fn to_raw(self) -> u64 {
        ((self.registry as u64) << 32) | self.index as u64
    }

    /// Unpack from [to_raw](Self::to_raw)'s result. Any integer is accepted here,
    /// validation happens when the handle is resolved.
    pub fn from_raw(raw: u64) -> OpHandle {
        OpHandle {
            registry: (raw >> 32) as u32,
            index: raw as u32,
        }
    }

    pub(crate) fn registry(&self) -> u32 {
        self.registry
    }

    pub(crate) fn index(&self) -> OpIndex {
        self.index
    }
}

struct OpNode {
    name: String,
    handle: OpHandle,
    info: RwLock<OpInfo>,
}

/// Interned identity of an operator. Cloning is cheap.
#[derive(Clone)]
pub struct Op(Arc<OpNode>);

impl Op {
    fn new(handle: OpHandle, name: &str) -> Op {
        Op(Arc::new(OpNode {
            name: name.to_string(),
            handle,
            info: RwLock::new(OpInfo::default()),
        }))
    }

    /// The operator's unique name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn handle(&self) -> OpHandle {
        self.0.handle
    }

    pub(crate) fn index(&self) -> OpIndex {
        self.0.handle.index
    }

    /// A copy of all structural fields, read atomically.
    pub fn info(&self) -> OpInfo {
        self.0.info.read().clone()
    }

    pub fn num_inputs(&self) -> i32 {
        self.0.info.read().num_inputs
    }

    pub fn is_variadic(&self) -> bool {
        self.num_inputs() == VARIADIC_INPUTS
    }

    pub fn attrs_type_key(&self) -> String {
        self.0.info.read().attrs_type_key.clone()
    }

    pub fn support_level(&self) -> i32 {
        self.0.info.read().support_level
    }

    pub fn description(&self) -> String {
        self.0.info.read().description.clone()
    }

    pub fn arguments(&self) -> Vec<ArgumentDesc> {
        self.0.info.read().arguments.clone()
    }

    /// Last write wins, there is no priority on structural fields.
    pub(crate) fn update_info(&self, f: impl FnOnce(&mut OpInfo)) {
        f(&mut *self.0.info.write())
    }
}

impl PartialEq for Op {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Op {}

impl Hash for Op {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.handle.hash(state);
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.name)
    }
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Op")
            .field("name", &self.0.name)
            .field("handle", &self.0.handle)
            .finish()
    }
}

impl AsRef<str> for Op {
    fn as_ref(&self) -> &str {
        self.name()
    }
}

/// Name keyed table of all declared [Op]s of one registry.
pub(crate) struct OpTable {
    registry: u32,
    by_name: FxHashMap<String, Op>,
    /// Declaration order; an [Op]'s index is its position here.
    ops: Vec<Op>,
}

impl OpTable {
    pub(crate) fn new(registry: u32) -> OpTable {
        OpTable {
            registry,
            by_name: FxHashMap::default(),
            ops: Vec::new(),
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Op> {
        self.by_name.get(name)
    }

    /// Like [get](Self::get), but failing with a not-found error.
    pub(crate) fn lookup(&self, name: &str) -> Result<&Op> {
        match self.get(name) {
            Some(op) => Ok(op),
            None => not_found_err!(UnknownOpErr(name.to_string())),
        }
    }

    /// Get the [Op] named `name`, declaring it if it is new.
    /// The boolean is true if the operator was just declared.
    pub(crate) fn get_or_declare(&mut self, name: &str) -> Result<(Op, bool)> {
        if let Some(op) = self.by_name.get(name) {
            return Ok((op.clone(), false));
        }
        verify_op_name(name)?;
        let Ok(index) = OpIndex::try_from(self.ops.len()) else {
            return arg_err!("Operator table is full, cannot declare \"{}\"", name);
        };
        let op = Op::new(
            OpHandle {
                registry: self.registry,
                index,
            },
            name,
        );
        self.ops.push(op.clone());
        self.by_name.insert(name.to_string(), op.clone());
        Ok((op, true))
    }

    pub(crate) fn by_index(&self, index: OpIndex) -> Option<&Op> {
        self.ops.get(index as usize)
    }

    pub(crate) fn from_handle(&self, handle: OpHandle) -> Option<&Op> {
        if handle.registry() != self.registry {
            return None;
        }
        self.by_index(handle.index())
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.ops.iter().map(|op| op.name().to_string()).collect()
    }
}
