//! The mutation surface used by extension modules.
//!
//! Registration comes in two shapes. A registrar binds the
//! `(operator, key, priority)` (or `(operator, target, priority)`) of a
//! registration up front, and performs it once a value is at hand, handing
//! the value back unchanged. So a call site can either register on the spot:
//! ```
//! use opreg::registry::Registry;
//!
//! let registry = Registry::new();
//! let pattern = registry
//!     .register_op_attr("add", "TOpPattern")
//!     .register("kBroadcast")
//!     .unwrap();
//! assert_eq!(pattern, "kBroadcast");
//! ```
//! or keep the registrar and apply it later, possibly more than once:
//! ```
//! use opreg::registry::Registry;
//!
//! let registry = Registry::new();
//! let registrar = registry
//!     .register_op_attr("exp", "TOpPattern")
//!     .with_priority(20);
//! // ... the value is produced ...
//! registrar.register(String::from("kElemWise")).unwrap();
//! assert_eq!(
//!     *registry.get_attr::<String>("exp", "TOpPattern").unwrap(),
//!     "kElemWise"
//! );
//! ```
//!
//! Registrations that must happen when an extension module is loaded are
//! declared with [register_op_attr!](crate::register_op_attr),
//! [register_lowering_rule!](crate::register_lowering_rule) and
//! [declare_op!](crate::declare_op). They are collected at link time and
//! applied to [Registry::global] when it is first used.

use std::sync::Arc;

use crate::{
    attribute::OpAttrValue,
    lowering::{LoweringRule, LoweringRuleObj},
    op::Op,
    priority::DEFAULT_PRIORITY,
    registry::Registry,
    result::{Error, Result},
};

/// Registers values of one attribute key of one operator.
#[derive(Clone)]
pub struct OpAttrRegistrar<'r> {
    registry: &'r Registry,
    op_name: String,
    key: String,
    priority: i32,
}

impl OpAttrRegistrar<'_> {
    /// Set the priority level of the registrations. Defaults to [DEFAULT_PRIORITY].
    pub fn with_priority(mut self, level: i32) -> Self {
        self.priority = level;
        self
    }

    /// Register `value` and hand it back.
    pub fn register<T: OpAttrValue + Clone>(&self, value: T) -> Result<T> {
        self.registry
            .set_attr(&self.op_name, &self.key, value.clone(), self.priority)?;
        Ok(value)
    }
}

/// Registers lowering rules of one operator for one target.
#[derive(Clone)]
pub struct LoweringRegistrar<'r> {
    registry: &'r Registry,
    op_name: String,
    target: String,
    priority: i32,
}

impl LoweringRegistrar<'_> {
    /// Set the priority level of the registrations. Defaults to [DEFAULT_PRIORITY].
    pub fn with_priority(mut self, level: i32) -> Self {
        self.priority = level;
        self
    }

    /// Register `rule` and hand it back.
    pub fn register<R: LoweringRule + Clone>(&self, rule: R) -> Result<R> {
        self.registry.register_lowering(
            &self.op_name,
            &self.target,
            rule.clone(),
            self.priority,
        )?;
        Ok(rule)
    }

    /// Register a boxed `rule` and hand it back.
    pub fn register_boxed(&self, rule: Box<dyn LoweringRule>) -> Result<Box<dyn LoweringRule>> {
        let stored: LoweringRuleObj = Arc::from(dyn_clone::clone_box(&*rule));
        self.registry
            .register_lowering_obj(&self.op_name, &self.target, stored, self.priority)?;
        Ok(rule)
    }
}

/// Declares an operator and sets its fields, one chained call at a time.
/// Each call is an independent mutation of the registry.
pub struct OpBuilder<'r> {
    registry: &'r Registry,
    op: Op,
}

impl OpBuilder<'_> {
    pub fn describe(self, description: &str) -> Result<Self> {
        self.registry.describe(&self.op, description)?;
        Ok(self)
    }

    pub fn set_num_inputs(self, n: i32) -> Result<Self> {
        self.registry.set_num_inputs(&self.op, n)?;
        Ok(self)
    }

    pub fn add_argument(self, name: &str, type_info: &str, description: &str) -> Result<Self> {
        self.registry.add_argument(&self.op, name, type_info, description)?;
        Ok(self)
    }

    pub fn set_attrs_type_key(self, key: &str) -> Result<Self> {
        self.registry.set_attrs_type_key(&self.op, key)?;
        Ok(self)
    }

    pub fn set_support_level(self, level: i32) -> Result<Self> {
        self.registry.set_support_level(&self.op, level)?;
        Ok(self)
    }

    pub fn set_attr<T: OpAttrValue>(self, key: &str, value: T, level: i32) -> Result<Self> {
        self.registry.set_attr(&self.op, key, value, level)?;
        Ok(self)
    }

    pub fn register_lowering(
        self,
        target: &str,
        rule: impl LoweringRule,
        level: i32,
    ) -> Result<Self> {
        self.registry.register_lowering(&self.op, target, rule, level)?;
        Ok(self)
    }

    /// The declared operator.
    pub fn op(self) -> Op {
        self.op
    }
}

impl Registry {
    /// A registrar for attribute `key` of operator `op_name`.
    /// Nothing is validated or stored until it registers a value.
    pub fn register_op_attr(&self, op_name: &str, key: &str) -> OpAttrRegistrar<'_> {
        OpAttrRegistrar {
            registry: self,
            op_name: op_name.to_string(),
            key: key.to_string(),
            priority: DEFAULT_PRIORITY,
        }
    }

    /// A registrar for lowering rules of operator `op_name` for `target`.
    /// Nothing is validated or stored until it registers a rule.
    pub fn register_lowering_rule(&self, op_name: &str, target: &str) -> LoweringRegistrar<'_> {
        LoweringRegistrar {
            registry: self,
            op_name: op_name.to_string(),
            target: target.to_string(),
            priority: DEFAULT_PRIORITY,
        }
    }

    /// Declare operator `name` (if it is new) and get a builder to set its fields.
    pub fn declare_op(&self, name: &str) -> Result<OpBuilder<'_>> {
        let op = self.declare(name)?;
        Ok(OpBuilder { registry: self, op })
    }
}

/// [Registry::register_op_attr] on [Registry::global].
pub fn register_op_attr(op_name: &str, key: &str) -> OpAttrRegistrar<'static> {
    Registry::global().register_op_attr(op_name, key)
}

/// [Registry::register_lowering_rule] on [Registry::global].
pub fn register_lowering_rule(op_name: &str, target: &str) -> LoweringRegistrar<'static> {
    Registry::global().register_lowering_rule(op_name, target)
}

/// A registration to be applied when the global registry is created.
pub struct StaticRegistration {
    /// `file:line` of the declaring macro invocation.
    pub site: &'static str,
    pub apply: fn(&Registry) -> Result<()>,
}

/// All [StaticRegistration]s linked into the binary.
#[linkme::distributed_slice]
pub static STATIC_REGISTRATIONS: [StaticRegistration] = [..];

/// Apply every [StaticRegistration] to `registry`, in link order.
/// Failed registrations do not stop the others; they are returned
/// with the site that declared them.
pub fn apply_static_registrations(registry: &Registry) -> Vec<(&'static str, Error)> {
    STATIC_REGISTRATIONS
        .iter()
        .filter_map(|registration| {
            (registration.apply)(registry)
                .err()
                .map(|err| (registration.site, err))
        })
        .collect()
}

#[doc(hidden)]
#[macro_export]
macro_rules! __static_registration {
    ($registry: ident => $body: expr) => {
        const _: () = {
            fn apply($registry: &$crate::registry::Registry) -> $crate::result::Result<()> {
                $body
            }

            #[$crate::linkme::distributed_slice($crate::registration::STATIC_REGISTRATIONS)]
            #[linkme(crate = $crate::linkme)]
            static STATIC_REGISTRATION: $crate::registration::StaticRegistration =
                $crate::registration::StaticRegistration {
                    site: concat!(file!(), ":", line!()),
                    apply,
                };
        };
    };
}

/// Register an operator attribute when the binary is loaded.
/// ```
/// opreg::register_op_attr!("my.relu", "TOpPattern", "kElemWise");
/// opreg::register_op_attr!("my.relu", "TOpPattern", "kInjective", priority = 5);
///
/// # use opreg::registry::Registry;
/// let pattern = Registry::global()
///     .get_attr::<&str>("my.relu", "TOpPattern")
///     .unwrap();
/// assert_eq!(*pattern, "kElemWise");
/// ```
#[macro_export]
macro_rules! register_op_attr {
    ($op: expr, $key: expr, $value: expr, priority = $level: expr $(,)?) => {
        $crate::__static_registration!(registry => {
            registry
                .register_op_attr($op, $key)
                .with_priority($level)
                .register($value)
                .map(|_| ())
        });
    };
    ($op: expr, $key: expr, $value: expr $(,)?) => {
        $crate::register_op_attr!($op, $key, $value, priority = $crate::priority::DEFAULT_PRIORITY);
    };
}

/// Register a lowering rule when the binary is loaded.
/// ```
/// use opreg::{lowering::{CallSite, Lowered}, result::Result};
///
/// fn lower_my_exp(site: &CallSite) -> Result<Lowered> {
///     Ok(Box::new(format!("__expf({})", site.call::<&str>()?)))
/// }
/// opreg::register_lowering_rule!("my.exp", "cuda", lower_my_exp);
///
/// # use opreg::registry::Registry;
/// let lowered = Registry::global().lower("my.exp", "cuda", &"x").unwrap();
/// assert_eq!(lowered.downcast_ref::<String>().unwrap(), "__expf(x)");
/// ```
#[macro_export]
macro_rules! register_lowering_rule {
    ($op: expr, $target: expr, $rule: expr, priority = $level: expr $(,)?) => {
        $crate::__static_registration!(registry => {
            registry
                .register_lowering_rule($op, $target)
                .with_priority($level)
                .register($rule)
                .map(|_| ())
        });
    };
    ($op: expr, $target: expr, $rule: expr $(,)?) => {
        $crate::register_lowering_rule!(
            $op,
            $target,
            $rule,
            priority = $crate::priority::DEFAULT_PRIORITY
        );
    };
}

/// Declare an operator when the binary is loaded, applying
/// [OpBuilder] methods in order.
/// ```
/// opreg::declare_op!(
///     "my.square",
///     set_num_inputs(1),
///     add_argument("data", "Tensor", "The input tensor."),
///     describe("Elementwise square."),
///     set_support_level(1),
/// );
///
/// # use opreg::registry::Registry;
/// let op = Registry::global().get("my.square").unwrap();
/// assert_eq!(op.num_inputs(), 1);
/// ```
#[macro_export]
macro_rules! declare_op {
    ($name: expr $(, $method: ident ( $($arg: expr),* $(,)? ))* $(,)?) => {
        $crate::__static_registration!(registry => {
            registry.declare_op($name)? $(.$method($($arg),*)?)*;
            Ok(())
        });
    };
}
