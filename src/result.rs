//! Utilities for error handling

use std::{
    backtrace::{Backtrace, BacktraceStatus},
    fmt::Display,
};

use downcast_rs::{impl_downcast, DowncastSync};
use thiserror::Error;

/// The kinds of failures a registry operation can report.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An operator identity was rebuilt through a path other than the registry.
    #[error("operator construction failed")]
    Construction,
    /// The named operator was never declared.
    #[error("operator not found")]
    NotFound,
    /// The operator exists but has no effective entry for the attribute key.
    #[error("attribute not set")]
    AttrNotSet,
    /// No lowering rule is registered for the (operator, target) pair.
    #[error("no lowering found")]
    NoLoweringFound,
    /// Inconsistent or invalid argument(s) passed to a registry function.
    #[error("invalid argument")]
    InvalidArgument,
}

/// An error object that can hold any [std::error::Error].
#[derive(Debug)]
pub struct Error {
    /// The kind of error this is
    pub kind: ErrorKind,
    /// The actual error object describing the error
    pub err: Box<dyn RegistryError>,
    /// Details of how this error occurred
    pub backtrace: Backtrace,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Registry error: {}.\n{}", self.kind, self.err)
    }
}

impl Error {
    /// Like [Display], but also prints the backtrace if one was captured.
    pub fn verbose(&self) -> String {
        if self.backtrace.status() == BacktraceStatus::Captured {
            format!("{}\nError backtrace:\n{}", self, self.backtrace)
        } else {
            self.to_string()
        }
    }
}

pub trait RegistryError: std::error::Error + DowncastSync {}

impl<T: std::error::Error + Send + Sync + 'static> RegistryError for T {}

impl_downcast!(sync RegistryError);

impl std::error::Error for Error {}

/// Type alias for [std::result::Result] with the error type set to [struct@Error]
pub type Result<T> = std::result::Result<T, Error>;

#[doc(hidden)]
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StringError(pub String);

/// `get` of an operator name that was never declared.
#[derive(Debug, Error)]
#[error("Operator \"{0}\" is not registered")]
pub struct UnknownOpErr(pub String);

/// `get_attr` of a key with no effective entry.
#[derive(Debug, Error)]
#[error("Attribute \"{key}\" is not set on operator \"{op}\"")]
pub struct AttrNotSetErr {
    pub op: String,
    pub key: String,
}

/// `lookup_lowering` for a target with no rule. Carries the targets
/// that do have a rule so the codegen driver can report them.
#[derive(Debug, Error)]
#[error(
    "Operator \"{op}\" is not supported for target \"{target}\" (lowerings exist for: [{}])",
    .available.join(", ")
)]
pub struct NoLoweringErr {
    pub op: String,
    pub target: String,
    pub available: Vec<String>,
}

/// A raw handle that this registry did not issue.
#[derive(Debug, Error)]
#[error("Handle {0:#018x} does not name an operator of this registry; use `get` instead")]
pub struct ForeignHandleErr(pub u64);

#[derive(Debug, Error)]
#[error("Priority level must be greater than 0, got {0}")]
pub struct InvalidPriorityErr(pub i32);

#[derive(Debug, Error)]
#[error("Number of inputs must be non-negative or -1 (variadic), got {0}")]
pub struct InvalidNumInputsErr(pub i32);

#[derive(Debug, Error)]
#[error("Support level must be non-negative, got {0}")]
pub struct InvalidSupportLevelErr(pub i32);

#[derive(Debug, Error)]
#[error("Malformed {what} \"{name}\"")]
pub struct MalformedNameErr {
    pub what: &'static str,
    pub name: String,
}

/// A typed read requested a different type than the one registered.
#[derive(Debug, Error)]
#[error("Attribute \"{key}\" of operator \"{op}\" is not a `{expected}`")]
pub struct AttrTypeMismatchErr {
    pub op: String,
    pub key: String,
    pub expected: &'static str,
}

/// A lowering rule asked for a host call node of the wrong type.
#[derive(Debug, Error)]
#[error("Call site of operator \"{op}\" does not carry a `{expected}`")]
pub struct CallSiteTypeErr {
    pub op: String,
    pub expected: &'static str,
}

/// Specify [ErrorKind] and create [struct@Error] from any [std::error::Error] object.
/// To create [Result], use [create_err!](crate::create_err) instead.
/// The macro also accepts [format!] like arguments to create one-off errors.
#[macro_export]
macro_rules! create_error {
    ($kind: expr, $str: literal $($t:tt)*) => {
        $crate::create_error!($kind, $crate::result::StringError(format!($str $($t)*)))
    };
    ($kind: expr, $err: expr) => {
        $crate::result::Error {
            kind: $kind,
            err: Box::new($err),
            backtrace: std::backtrace::Backtrace::capture(),
        }
    };
}

/// Specify [ErrorKind] and create [Result] from any [std::error::Error] object.
/// To create [struct@Error], use [create_error!](crate::create_error) instead.
#[macro_export]
macro_rules! create_err {
    ($kind: expr, $($t:tt)*) => {
        Err($crate::create_error!($kind, $($t)*))
    };
}

/// Create [ErrorKind::InvalidArgument] [Result] from any [std::error::Error] object.
/// ```rust
/// use thiserror::Error;
/// use opreg::{arg_err, result::{Result, ErrorKind, Error}};
///
/// #[derive(Error, Debug)]
/// #[error("sample error")]
/// pub struct SampleErr;
///
/// assert!(
///     matches!(
///         arg_err!(SampleErr),
///         Result::<()>::Err(Error {
///            kind: ErrorKind::InvalidArgument,
///            err,
///            ..
///         }) if err.is::<SampleErr>()
/// ));
///
/// let res_msg: Result<()> = arg_err!("Some formatted {}", 0);
/// assert_eq!(
///     res_msg.unwrap_err().err.to_string(),
///     "Some formatted 0"
/// );
/// ```
#[macro_export]
macro_rules! arg_err {
    ($($t:tt)*) => {
        $crate::create_err!($crate::result::ErrorKind::InvalidArgument, $($t)*)
    }
}

/// Create [ErrorKind::InvalidArgument] [struct@Error] from any [std::error::Error] object.
/// To create [Result], use [arg_err!](crate::arg_err) instead.
#[macro_export]
macro_rules! arg_error {
    ($($t:tt)*) => {
        $crate::create_error!($crate::result::ErrorKind::InvalidArgument, $($t)*)
    }
}

/// Create [ErrorKind::NotFound] [Result].
#[macro_export]
macro_rules! not_found_err {
    ($($t:tt)*) => {
        $crate::create_err!($crate::result::ErrorKind::NotFound, $($t)*)
    }
}

/// Create [ErrorKind::AttrNotSet] [Result].
#[macro_export]
macro_rules! attr_not_set_err {
    ($($t:tt)*) => {
        $crate::create_err!($crate::result::ErrorKind::AttrNotSet, $($t)*)
    }
}

/// Create [ErrorKind::NoLoweringFound] [Result].
#[macro_export]
macro_rules! no_lowering_err {
    ($($t:tt)*) => {
        $crate::create_err!($crate::result::ErrorKind::NoLoweringFound, $($t)*)
    }
}

/// Create [ErrorKind::Construction] [Result].
#[macro_export]
macro_rules! construction_err {
    ($($t:tt)*) => {
        $crate::create_err!($crate::result::ErrorKind::Construction, $($t)*)
    }
}
