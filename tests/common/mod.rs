use opreg::{
    lowering::{CallSite, Lowered},
    result::Result,
};

/// Initialize env_logger for tests
pub fn init_env_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A host IR call node, as the codegen driver would hand it over.
pub struct Call {
    pub args: Vec<String>,
}

impl Call {
    pub fn new(args: &[&str]) -> Call {
        Call {
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }
}

/// Lower to `<target>.<op>(<args>)`.
pub fn lower_generic(site: &CallSite) -> Result<Lowered> {
    let call = site.call::<Call>()?;
    Ok(Box::new(format!(
        "{}.{}({})",
        site.target(),
        site.op().name(),
        call.args.join(", ")
    )))
}

/// Lower to a vendor intrinsic.
pub fn lower_intrinsic(site: &CallSite) -> Result<Lowered> {
    let call = site.call::<Call>()?;
    Ok(Box::new(format!("__nv_{}({})", site.op().name(), call.args.join(", "))))
}
