//! Lowering rules rewrite an operator invocation into target specific IR.
//!
//! Rules are a distinct kind of registry entry, keyed by
//! `(operator, target)` and resolved by priority exactly like attributes.
//! Lookup is exact on the target string: a rule for `"llvm"` is never
//! returned for `"cuda"`, and no parent/wildcard target is consulted.
//! Target hierarchies, if wanted, are walked by the caller.
//!
//! The host IR is not known to the registry. A [CallSite] carries the host's
//! call node as `&dyn Any` and a rule asks for the type it expects with
//! [CallSite::call]. What a rule produces is equally opaque ([Lowered]).

use std::{
    any::{type_name, Any},
    sync::Arc,
};

use dyn_clone::DynClone;

use crate::{
    arg_err,
    op::Op,
    priority::PriorityTable,
    result::{CallSiteTypeErr, Result},
};

/// Target specific IR produced by a [LoweringRule].
pub type Lowered = Box<dyn Any + Send>;

/// One invocation of an operator, as seen by a [LoweringRule].
pub struct CallSite<'a> {
    op: &'a Op,
    target: &'a str,
    call: &'a dyn Any,
}

impl<'a> CallSite<'a> {
    pub fn new(op: &'a Op, target: &'a str, call: &'a dyn Any) -> Self {
        CallSite { op, target, call }
    }

    pub fn op(&self) -> &'a Op {
        self.op
    }

    pub fn target(&self) -> &'a str {
        self.target
    }

    /// The host IR call node, if it is a `T`.
    pub fn call<T: Any>(&self) -> Result<&'a T> {
        match self.call.downcast_ref::<T>() {
            Some(call) => Ok(call),
            None => arg_err!(CallSiteTypeErr {
                op: self.op.name().to_string(),
                expected: type_name::<T>(),
            }),
        }
    }
}

/// A target specific rewrite of an operator invocation.
///
/// Functions and closures of type `Fn(&CallSite) -> Result<Lowered>`
/// are lowering rules.
pub trait LoweringRule: DynClone + Send + Sync + 'static {
    fn lower(&self, site: &CallSite) -> Result<Lowered>;
}

dyn_clone::clone_trait_object!(LoweringRule);

impl<F> LoweringRule for F
where
    F: Fn(&CallSite) -> Result<Lowered> + Clone + Send + Sync + 'static,
{
    fn lower(&self, site: &CallSite) -> Result<Lowered> {
        self(site)
    }
}

/// A shared, registered [LoweringRule].
pub type LoweringRuleObj = Arc<dyn LoweringRule>;

/// Lowering storage: columns are targets.
pub(crate) type LoweringStore = PriorityTable<LoweringRuleObj>;

#[cfg(test)]
mod tests {
    use super::{CallSite, Lowered, LoweringRule};
    use crate::{op::OpTable, result::{CallSiteTypeErr, Result}};

    struct Call {
        args: Vec<&'static str>,
    }

    fn lower_exp(site: &CallSite) -> Result<Lowered> {
        let call = site.call::<Call>()?;
        Ok(Box::new(format!(
            "{}_{}({})",
            site.target(),
            site.op().name(),
            call.args.join(", ")
        )))
    }

    #[test]
    fn fn_items_are_rules() {
        let mut table = OpTable::new(0);
        let (op, _) = table.get_or_declare("exp").unwrap();
        let call = Call { args: vec!["x"] };
        let site = CallSite::new(&op, "cuda", &call);

        let rule: Box<dyn LoweringRule> = Box::new(lower_exp);
        let lowered = rule.lower(&site).unwrap();
        assert_eq!(lowered.downcast_ref::<String>().unwrap(), "cuda_exp(x)");

        let cloned = rule.clone();
        assert!(cloned.lower(&site).is_ok());
    }

    #[test]
    fn wrong_call_node() {
        let mut table = OpTable::new(0);
        let (op, _) = table.get_or_declare("exp").unwrap();
        let site = CallSite::new(&op, "llvm", &17u32);
        let err = lower_exp(&site).unwrap_err();
        assert!(err.err.is::<CallSiteTypeErr>());
    }
}
