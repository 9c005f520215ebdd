//! The [Registry] is the catalog of operators, their attributes and
//! their lowering rules.
//!
//! There is normally one registry per process, [Registry::global], which
//! extension modules populate at load time (see
//! [registration](crate::registration)) and the compiler pipeline reads on
//! its hot paths. Isolated registries can be created with [Registry::new].
//!
//! # Concurrency
//!
//! All operations are synchronous and never block on anything but the
//! registry's own locks. The identity table, the attribute store and the
//! lowering store are each guarded by a readers-writer lock; a writer holds
//! at most one of them at a time. Readers receive their own [Arc] to the
//! effective value, so a concurrent registration can never expose a
//! partially written entry.
//!
//! No ordering is imposed between registrations from different threads.
//! Two registrations of equal priority on the same `(operator, key)` race,
//! and the one that commits last becomes effective. Registering several
//! attributes of one operator is several independent mutations, not one
//! atomic group.

use std::{
    any::Any,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, LazyLock,
    },
};

use log::{debug, trace};
use parking_lot::RwLock;

use crate::{
    arg_err,
    attr_not_set_err,
    attribute::{downcast, AttrStore, AttrValue, OpAttrMap, OpAttrValue},
    construction_err,
    lowering::{CallSite, Lowered, LoweringRule, LoweringRuleObj, LoweringStore},
    name::{verify_attr_key, verify_target},
    no_lowering_err,
    op::{ArgumentDesc, Op, OpHandle, OpTable, VARIADIC_INPUTS},
    priority::{Priority, Resolution},
    registration,
    result::{
        AttrNotSetErr, ForeignHandleErr, InvalidNumInputsErr, InvalidSupportLevelErr,
        NoLoweringErr, Result,
    },
};

static NEXT_REGISTRY_ID: AtomicU32 = AtomicU32::new(0);

static GLOBAL: LazyLock<Registry> = LazyLock::new(|| {
    let registry = Registry::new();
    for (site, err) in registration::apply_static_registrations(&registry) {
        log::error!("Static registration at {} failed: {}", site, err);
    }
    registry
});

/// Operator identity table, attribute store and lowering store.
pub struct Registry {
    id: u32,
    ops: RwLock<OpTable>,
    attrs: RwLock<AttrStore>,
    lowerings: RwLock<LoweringStore>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty registry. Static registrations are not applied to it,
    /// see [apply_static_registrations](registration::apply_static_registrations).
    pub fn new() -> Registry {
        let id = NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed);
        Registry {
            id,
            ops: RwLock::new(OpTable::new(id)),
            attrs: RwLock::new(AttrStore::default()),
            lowerings: RwLock::new(LoweringStore::default()),
        }
    }

    /// The process wide registry. On first use, all
    /// [static registrations](crate::registration) linked into the binary
    /// are applied to it. A static registration must therefore not itself
    /// call [Registry::global].
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    // Identity table.

    /// Get the identity of the operator named `name`.
    /// Never declares `name`.
    pub fn get(&self, name: &str) -> Result<Op> {
        self.ops.read().lookup(name).cloned()
    }

    /// Names of all declared operators, in declaration order.
    pub fn list_op_names(&self) -> Vec<String> {
        self.ops.read().names()
    }

    /// Rebuild an [Op] from a raw [OpHandle]. This is the only way back
    /// from a handle; handles not issued by this registry are rejected.
    pub fn op_from_handle(&self, handle: OpHandle) -> Result<Op> {
        match self.ops.read().from_handle(handle) {
            Some(op) => Ok(op.clone()),
            None => construction_err!(ForeignHandleErr(handle.to_raw())),
        }
    }

    /// Get the operator named `name`, declaring it with default fields
    /// if it is new. Every mutation goes through here.
    pub(crate) fn declare(&self, name: &str) -> Result<Op> {
        if let Some(op) = self.ops.read().get(name) {
            return Ok(op.clone());
        }
        let (op, fresh) = self.ops.write().get_or_declare(name)?;
        if fresh {
            debug!("Declared operator {}", op);
        }
        Ok(op)
    }

    // Structural fields. Last write wins.

    pub fn set_num_inputs(&self, op: impl AsRef<str>, n: i32) -> Result<()> {
        if n < VARIADIC_INPUTS {
            return arg_err!(InvalidNumInputsErr(n));
        }
        self.declare(op.as_ref())?.update_info(|info| info.num_inputs = n);
        Ok(())
    }

    /// Append an argument description. Arguments keep the order of the calls.
    pub fn add_argument(
        &self,
        op: impl AsRef<str>,
        name: &str,
        type_info: &str,
        description: &str,
    ) -> Result<()> {
        if name.is_empty() {
            return arg_err!("Argument of operator \"{}\" must be named", op.as_ref());
        }
        let arg = ArgumentDesc {
            name: name.to_string(),
            type_info: type_info.to_string(),
            description: description.to_string(),
        };
        self.declare(op.as_ref())?.update_info(|info| info.arguments.push(arg));
        Ok(())
    }

    pub fn set_attrs_type_key(&self, op: impl AsRef<str>, key: &str) -> Result<()> {
        verify_attr_key(key)?;
        self.declare(op.as_ref())?.update_info(|info| info.attrs_type_key = key.to_string());
        Ok(())
    }

    pub fn set_support_level(&self, op: impl AsRef<str>, level: i32) -> Result<()> {
        if level < 0 {
            return arg_err!(InvalidSupportLevelErr(level));
        }
        self.declare(op.as_ref())?.update_info(|info| info.support_level = level);
        Ok(())
    }

    pub fn describe(&self, op: impl AsRef<str>, description: &str) -> Result<()> {
        self.declare(op.as_ref())?.update_info(|info| info.description = description.to_string());
        Ok(())
    }

    // Attribute store.

    /// Register `value` as attribute `key` of `op` at priority `level`.
    pub fn set_attr<T: OpAttrValue>(
        &self,
        op: impl AsRef<str>,
        key: &str,
        value: T,
        level: i32,
    ) -> Result<Resolution> {
        self.set_attr_value(op, key, Arc::new(value), level)
    }

    /// Same as [set_attr](Self::set_attr), for an already erased value.
    pub fn set_attr_value(
        &self,
        op: impl AsRef<str>,
        key: &str,
        value: AttrValue,
        level: i32,
    ) -> Result<Resolution> {
        verify_attr_key(key)?;
        let priority = Priority::new(level)?;
        let op = self.declare(op.as_ref())?;
        let resolution = self.attrs.write().insert(key, op.index(), value, priority);
        match resolution {
            Resolution::Installed => {
                debug!("Attribute {} of {} set at priority {}", key, op, priority)
            }
            Resolution::Shadowed { by } => debug!(
                "Attribute {} of {} at priority {} is shadowed by priority {}",
                key, op, priority, by
            ),
        }
        Ok(resolution)
    }

    /// The effective value of attribute `key` of `op`, as a `T`.
    pub fn get_attr<T: OpAttrValue>(&self, op: impl AsRef<str>, key: &str) -> Result<Arc<T>> {
        let value = self.get_attr_value(op.as_ref(), key)?;
        downcast::<T>(&value, op.as_ref(), key)
    }

    /// The effective value of attribute `key` of `op`, type erased.
    pub fn get_attr_value(&self, op: impl AsRef<str>, key: &str) -> Result<AttrValue> {
        let op = self.get(op.as_ref())?;
        let value = self.attrs.read().get(key, op.index()).cloned();
        match value {
            Some(value) => Ok(value),
            None => attr_not_set_err!(AttrNotSetErr {
                op: op.name().to_string(),
                key: key.to_string(),
            }),
        }
    }

    /// Does `op` have an effective value for `key`? False for unknown operators.
    pub fn has_attr(&self, op: impl AsRef<str>, key: &str) -> bool {
        match self.ops.read().get(op.as_ref()) {
            Some(op) => self.attrs.read().contains(key, op.index()),
            None => false,
        }
    }

    /// Remove all registrations of `key` on `op`, at every priority.
    /// Resetting an undeclared operator does nothing and does not declare it.
    pub fn reset_attr(&self, op: impl AsRef<str>, key: &str) -> Result<()> {
        verify_attr_key(key)?;
        let Some(op) = self.ops.read().get(op.as_ref()).cloned() else {
            return Ok(());
        };
        let removed = self.attrs.write().reset(key, op.index());
        trace!("Reset attribute {} of {}, {} entries removed", key, op, removed);
        Ok(())
    }

    /// Sorted keys of all attributes set on `op`.
    pub fn attr_keys(&self, op: impl AsRef<str>) -> Result<Vec<String>> {
        let op = self.get(op.as_ref())?;
        Ok(self.attrs.read().columns_of(op.index()))
    }

    /// Does any operator have attribute `key`?
    pub fn has_attr_map(&self, key: &str) -> bool {
        self.attrs.read().has_column(key)
    }

    /// Snapshot attribute `key` of all operators, typed as `T`.
    pub fn attr_map<T: OpAttrValue>(&self, key: &str) -> Result<OpAttrMap<T>> {
        let ops = self.ops.read();
        let attrs = self.attrs.read();
        let Some(entries) = attrs.column(key) else {
            return attr_not_set_err!("No operator has attribute \"{}\"", key);
        };
        OpAttrMap::collect(key, self.id, entries, |index| {
            ops.by_index(index)
                .map(|op| op.name().to_string())
                .unwrap_or_default()
        })
    }

    // Lowering store.

    /// Register `rule` as the lowering of `op` for `target` at priority `level`.
    pub fn register_lowering(
        &self,
        op: impl AsRef<str>,
        target: &str,
        rule: impl LoweringRule,
        level: i32,
    ) -> Result<Resolution> {
        self.register_lowering_obj(op, target, Arc::new(rule), level)
    }

    /// Same as [register_lowering](Self::register_lowering), for a shared rule.
    pub fn register_lowering_obj(
        &self,
        op: impl AsRef<str>,
        target: &str,
        rule: LoweringRuleObj,
        level: i32,
    ) -> Result<Resolution> {
        verify_target(target)?;
        let priority = Priority::new(level)?;
        let op = self.declare(op.as_ref())?;
        let resolution = self
            .lowerings
            .write()
            .insert(target, op.index(), rule, priority);
        match resolution {
            Resolution::Installed => debug!(
                "Lowering of {} for {} set at priority {}",
                op, target, priority
            ),
            Resolution::Shadowed { by } => debug!(
                "Lowering of {} for {} at priority {} is shadowed by priority {}",
                op, target, priority, by
            ),
        }
        Ok(resolution)
    }

    /// The effective lowering rule of `op` for exactly `target`.
    pub fn lookup_lowering(&self, op: impl AsRef<str>, target: &str) -> Result<LoweringRuleObj> {
        let op = self.get(op.as_ref())?;
        let lowerings = self.lowerings.read();
        match lowerings.get(target, op.index()) {
            Some(rule) => Ok(rule.clone()),
            None => no_lowering_err!(NoLoweringErr {
                op: op.name().to_string(),
                target: target.to_string(),
                available: lowerings.columns_of(op.index()),
            }),
        }
    }

    /// Does `op` have a lowering rule for exactly `target`?
    pub fn has_lowering(&self, op: impl AsRef<str>, target: &str) -> bool {
        match self.ops.read().get(op.as_ref()) {
            Some(op) => self.lowerings.read().contains(target, op.index()),
            None => false,
        }
    }

    /// Sorted targets for which `op` has a lowering rule.
    pub fn lowering_targets(&self, op: impl AsRef<str>) -> Result<Vec<String>> {
        let op = self.get(op.as_ref())?;
        Ok(self.lowerings.read().columns_of(op.index()))
    }

    /// Remove all lowering rules of `op` for `target`, at every priority.
    pub fn reset_lowering(&self, op: impl AsRef<str>, target: &str) -> Result<()> {
        verify_target(target)?;
        let Some(op) = self.ops.read().get(op.as_ref()).cloned() else {
            return Ok(());
        };
        let removed = self.lowerings.write().reset(target, op.index());
        trace!("Reset lowering of {} for {}, {} entries removed", op, target, removed);
        Ok(())
    }

    /// Lower one invocation of `op` for `target`. `call` is the host IR's call node.
    /// The rule runs without any registry lock held.
    pub fn lower(&self, op: impl AsRef<str>, target: &str, call: &dyn Any) -> Result<Lowered> {
        let rule = self.lookup_lowering(op.as_ref(), target)?;
        let op = self.get(op.as_ref())?;
        rule.lower(&CallSite::new(&op, target, call))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use expect_test::expect;

    use super::Registry;
    use crate::{
        lowering::{CallSite, Lowered},
        op::{ArgumentDesc, OpHandle},
        priority::{Priority, Resolution},
        result::{ErrorKind, NoLoweringErr, Result},
    };

    #[derive(Clone, Debug, PartialEq)]
    enum OpPattern {
        ElemWise,
        Broadcast,
        Opaque,
    }

    #[test]
    fn get_does_not_declare() {
        let registry = Registry::new();
        let err = registry.get("nonexistent.op").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(!registry.has_attr("nonexistent.op", "TOpPattern"));
        assert_eq!(
            registry
                .get_attr_value("nonexistent.op", "TOpPattern")
                .err()
                .unwrap()
                .kind,
            ErrorKind::NotFound
        );
        registry.reset_attr("nonexistent.op", "TOpPattern").unwrap();
        assert!(registry.list_op_names().is_empty());
    }

    #[test]
    fn set_attr_declares() {
        let registry = Registry::new();
        registry
            .set_attr("add", "TOpPattern", OpPattern::Broadcast, 10)
            .unwrap();
        let add = registry.get("add").unwrap();
        assert_eq!(add, registry.get("add").unwrap());
        assert_eq!(add.num_inputs(), -1);
        assert_eq!(
            *registry.get_attr::<OpPattern>(&add, "TOpPattern").unwrap(),
            OpPattern::Broadcast
        );
    }

    #[test]
    fn priorities_and_ties() {
        let registry = Registry::new();
        registry.set_attr("exp", "k", 1u8, 10).unwrap();
        registry.set_attr("exp", "k", 2u8, 20).unwrap();
        assert_eq!(*registry.get_attr::<u8>("exp", "k").unwrap(), 2);

        let res = registry.set_attr("exp", "k", 3u8, 10).unwrap();
        assert_eq!(
            res,
            Resolution::Shadowed {
                by: Priority::new(20).unwrap()
            }
        );
        assert_eq!(*registry.get_attr::<u8>("exp", "k").unwrap(), 2);

        registry.set_attr("exp", "k", 4u8, 20).unwrap();
        assert_eq!(*registry.get_attr::<u8>("exp", "k").unwrap(), 4);
    }

    #[test]
    fn reset_then_fresh_set() {
        let registry = Registry::new();
        registry.set_attr("exp", "k", 1u8, 30).unwrap();
        registry.set_attr("exp", "k", 2u8, 20).unwrap();
        registry.reset_attr("exp", "k").unwrap();
        assert!(!registry.has_attr("exp", "k"));
        let err = registry.get_attr::<u8>("exp", "k").unwrap_err();
        assert_eq!(err.kind, ErrorKind::AttrNotSet);

        registry.set_attr("exp", "k", 3u8, 1).unwrap();
        assert_eq!(*registry.get_attr::<u8>("exp", "k").unwrap(), 3);
    }

    #[test]
    fn invalid_arguments_are_not_stored() {
        let registry = Registry::new();
        for res in [
            registry.set_attr("sqrt", "k", 0u8, 0).map(|_| ()),
            registry.set_attr("sqrt", "", 0u8, 10).map(|_| ()),
            registry.set_num_inputs("sqrt", -2),
            registry.set_support_level("sqrt", -1),
            registry.add_argument("sqrt", "", "Tensor", "input"),
            registry.set_attr("1sqrt", "k", 0u8, 10).map(|_| ()),
        ] {
            assert_eq!(res.unwrap_err().kind, ErrorKind::InvalidArgument);
        }
        assert!(registry.list_op_names().is_empty());
    }

    #[test]
    fn structural_fields() {
        let registry = Registry::new();
        registry.set_num_inputs("nn.conv2d", 2).unwrap();
        registry
            .add_argument("nn.conv2d", "data", "Tensor", "The input data.")
            .unwrap();
        registry
            .add_argument("nn.conv2d", "weight", "Tensor", "The weight.")
            .unwrap();
        registry
            .set_attrs_type_key("nn.conv2d", "relay.attrs.Conv2DAttrs")
            .unwrap();
        registry.set_support_level("nn.conv2d", 2).unwrap();
        registry.set_support_level("nn.conv2d", 3).unwrap();
        registry.describe("nn.conv2d", "2D convolution.").unwrap();

        let info = registry.get("nn.conv2d").unwrap().info();
        assert_eq!(info.num_inputs, 2);
        assert_eq!(info.support_level, 3);
        assert_eq!(info.attrs_type_key, "relay.attrs.Conv2DAttrs");
        assert_eq!(info.description, "2D convolution.");
        assert_eq!(
            info.arguments
                .iter()
                .map(|arg| arg.name.as_str())
                .collect::<Vec<_>>(),
            vec!["data", "weight"]
        );
        assert_eq!(
            info.arguments[1],
            ArgumentDesc {
                name: "weight".into(),
                type_info: "Tensor".into(),
                description: "The weight.".into(),
            }
        );
    }

    #[test]
    fn attr_keys_and_maps() {
        let registry = Registry::new();
        registry
            .set_attr("exp", "TOpPattern", OpPattern::ElemWise, 10)
            .unwrap();
        registry
            .set_attr("add", "TOpPattern", OpPattern::Broadcast, 10)
            .unwrap();
        registry.set_attr("add", "TOpIsStateful", false, 10).unwrap();
        registry.set_num_inputs("take", 2).unwrap();

        assert_eq!(
            registry.attr_keys("add").unwrap(),
            vec!["TOpIsStateful", "TOpPattern"]
        );
        assert!(registry.has_attr_map("TOpPattern"));
        assert!(!registry.has_attr_map("FTVMCompute"));

        let patterns = registry.attr_map::<OpPattern>("TOpPattern").unwrap();
        assert_eq!(patterns.key(), "TOpPattern");
        assert_eq!(patterns.len(), 2);
        let exp = registry.get("exp").unwrap();
        let take = registry.get("take").unwrap();
        assert_eq!(*patterns.get(&exp).unwrap(), OpPattern::ElemWise);
        assert!(!patterns.contains(&take));
        assert_eq!(*patterns.get_or(&take, OpPattern::Opaque), OpPattern::Opaque);

        let other = Registry::new();
        other.set_num_inputs("exp", 1).unwrap();
        assert!(patterns.get(&other.get("exp").unwrap()).is_none());

        assert_eq!(
            registry.attr_map::<OpPattern>("FTVMCompute").err().unwrap().kind,
            ErrorKind::AttrNotSet
        );
        assert_eq!(
            registry.attr_map::<bool>("TOpPattern").err().unwrap().kind,
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn handles_round_trip_only_within_registry() {
        let registry = Registry::new();
        registry.set_num_inputs("exp", 1).unwrap();
        let exp = registry.get("exp").unwrap();
        assert_eq!(registry.op_from_handle(exp.handle()).unwrap(), exp);

        let other = Registry::new();
        let err = other.op_from_handle(exp.handle()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Construction);
        let err = registry
            .op_from_handle(OpHandle::from_raw(exp.handle().to_raw() + 100))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Construction);
    }

    fn lower_to_string(site: &CallSite) -> Result<Lowered> {
        let arg = site.call::<&str>()?;
        Ok(Box::new(format!("{}.{}({})", site.target(), site.op(), arg)))
    }

    #[test]
    fn lowering_exact_target() {
        let registry = Registry::new();
        registry
            .register_lowering("tir.exp", "llvm", lower_to_string, 10)
            .unwrap();
        registry
            .register_lowering("tir.exp", "nvptx", lower_to_string, 10)
            .unwrap();

        let lowered = registry.lower("tir.exp", "llvm", &"x").unwrap();
        assert_eq!(lowered.downcast_ref::<String>().unwrap(), "llvm.tir.exp(x)");
        assert!(registry.has_lowering("tir.exp", "llvm"));
        assert!(!registry.has_lowering("tir.exp", "cuda"));

        let err = registry.lookup_lowering("tir.exp", "cuda").err().unwrap();
        assert_eq!(err.kind, ErrorKind::NoLoweringFound);
        let payload = err.err.downcast_ref::<NoLoweringErr>().unwrap();
        assert_eq!(payload.available, vec!["llvm", "nvptx"]);
        expect![[r#"
            Registry error: no lowering found.
            Operator "tir.exp" is not supported for target "cuda" (lowerings exist for: [llvm, nvptx])"#]]
        .assert_eq(&err.to_string());
    }

    #[test]
    fn lowering_priorities_and_reset() {
        let registry = Registry::new();
        fn fast(_: &CallSite) -> Result<Lowered> {
            Ok(Box::new("fast"))
        }
        fn slow(_: &CallSite) -> Result<Lowered> {
            Ok(Box::new("slow"))
        }
        registry.register_lowering("tir.exp", "cuda", fast, 20).unwrap();
        registry.register_lowering("tir.exp", "cuda", slow, 10).unwrap();
        let lowered = registry.lower("tir.exp", "cuda", &()).unwrap();
        assert_eq!(*lowered.downcast_ref::<&str>().unwrap(), "fast");

        registry.reset_lowering("tir.exp", "cuda").unwrap();
        assert!(registry.lowering_targets("tir.exp").unwrap().is_empty());
        assert_eq!(
            registry.lower("tir.exp", "cuda", &()).err().unwrap().kind,
            ErrorKind::NoLoweringFound
        );
    }

    #[test]
    fn erased_values() {
        let registry = Registry::new();
        let value: crate::attribute::AttrValue = Arc::new(String::from("kOpaque"));
        registry
            .set_attr_value("my.op", "TOpPattern", value, 10)
            .unwrap();
        let got = registry.get_attr_value("my.op", "TOpPattern").unwrap();
        assert_eq!(got.downcast_ref::<String>().unwrap(), "kOpaque");
    }
}
