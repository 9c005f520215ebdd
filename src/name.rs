//! Validation of the strings the registry is keyed by.
//!
//! Operator names are dot separated identifiers (`nn.conv2d`, `tir.exp`),
//! each segment satisfying `[a-zA-Z_][a-zA-Z0-9_]*`. Attribute keys are
//! conventions of the callers, so only emptiness and whitespace are
//! rejected. Targets may be full descriptors such as
//! `"llvm -mcpu=skylake"`; only the empty target is rejected.

use std::sync::LazyLock;

use regex::Regex;

use crate::{arg_err, result::MalformedNameErr, result::Result};

static OP_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z_][a-zA-Z0-9_]*)*$")
        .expect("operator name regex must compile")
});

/// Check that `name` can name an operator.
pub fn verify_op_name(name: &str) -> Result<()> {
    if !OP_NAME_RE.is_match(name) {
        return arg_err!(MalformedNameErr {
            what: "operator name",
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Check that `key` can name an attribute.
pub fn verify_attr_key(key: &str) -> Result<()> {
    verify_token("attribute key", key)
}

/// Check that `target` can name a code generation target.
pub fn verify_target(target: &str) -> Result<()> {
    if target.is_empty() {
        return arg_err!(MalformedNameErr {
            what: "target",
            name: String::new(),
        });
    }
    Ok(())
}

fn verify_token(what: &'static str, s: &str) -> Result<()> {
    if s.is_empty() || s.chars().any(char::is_whitespace) {
        return arg_err!(MalformedNameErr {
            what,
            name: s.to_string(),
        });
    }
    Ok(())
}
