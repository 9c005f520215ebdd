//! Attributes are keyed, dynamically typed properties of operators:
//! type inference rules, layout rules, operator patterns, flags.
//!
//! The registry does not look inside attribute values. They are stored
//! type erased as [AttrValue]s and downcast by the reader, which knows the
//! convention of the key it asks for. [AttrValue]s are shared, never
//! mutable: a reader gets its own [Arc] to the value it observed, and a
//! later registration replaces the effective [Arc] instead of writing
//! through it.
//!
//! For hot paths that query one key for many operators, an
//! [OpAttrMap] takes a typed snapshot of a key once.

use std::{any::type_name, sync::Arc};

use downcast_rs::{impl_downcast, DowncastSync};
use rustc_hash::FxHashMap;

use crate::{
    arg_error,
    op::{Op, OpIndex},
    priority::PriorityTable,
    result::{AttrTypeMismatchErr, Result},
};

/// Any value that can be stored as an attribute.
pub trait OpAttrValue: DowncastSync {}

impl<T: std::any::Any + Send + Sync> OpAttrValue for T {}

impl_downcast!(sync OpAttrValue);

/// A type erased, shared attribute value.
pub type AttrValue = Arc<dyn OpAttrValue>;

/// Attribute storage: columns are attribute keys.
pub(crate) type AttrStore = PriorityTable<AttrValue>;

/// Get a typed view of `value`, which is attribute `key` of operator `op`.
pub(crate) fn downcast<T: OpAttrValue>(value: &AttrValue, op: &str, key: &str) -> Result<Arc<T>> {
    value.clone().downcast_arc::<T>().map_err(|_| {
        arg_error!(AttrTypeMismatchErr {
            op: op.to_string(),
            key: key.to_string(),
            expected: type_name::<T>(),
        })
    })
}

/// Typed snapshot of one attribute key across all operators.
///
/// Registrations made after the snapshot was taken are not reflected in it.
pub struct OpAttrMap<T> {
    key: String,
    registry: u32,
    values: FxHashMap<OpIndex, Arc<T>>,
}

impl<T: OpAttrValue> OpAttrMap<T> {
    pub(crate) fn collect<'a>(
        key: &str,
        registry: u32,
        entries: impl Iterator<Item = (OpIndex, &'a AttrValue)>,
        name_of: impl Fn(OpIndex) -> String,
    ) -> Result<Self> {
        let mut values = FxHashMap::default();
        for (op, value) in entries {
            values.insert(op, downcast::<T>(value, &name_of(op), key)?);
        }
        Ok(OpAttrMap {
            key: key.to_string(),
            registry,
            values,
        })
    }

    /// The attribute key this map was built for.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self, op: &Op) -> Option<Arc<T>> {
        if op.handle().registry() != self.registry {
            return None;
        }
        self.values.get(&op.index()).cloned()
    }

    /// Like [get](Self::get), but with a caller supplied value for
    /// operators that do not have the attribute.
    pub fn get_or(&self, op: &Op, default: T) -> Arc<T> {
        self.get(op).unwrap_or_else(|| Arc::new(default))
    }

    pub fn contains(&self, op: &Op) -> bool {
        op.handle().registry() == self.registry && self.values.contains_key(&op.index())
    }

    /// Number of operators that have the attribute.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
