//! `opreg` is a process wide catalog of the primitive operators of a
//! compiler IR.
//!
//! Every operator name maps to one interned identity ([op::Op]), an open
//! set of priority ranked attributes ([attribute]) and per target lowering
//! rules ([lowering]). Extension modules populate the catalog through the
//! [registration] API, often at load time; the compiler pipeline reads it
//! through the query methods of [registry::Registry].
//!
//! ```
//! use opreg::registry::Registry;
//!
//! let registry = Registry::new();
//! registry.set_num_inputs("my.square", 1).unwrap();
//! registry.set_attr("my.square", "TOpPattern", "kElemWise", 10).unwrap();
//! // A second module registers a competing value at a lower priority.
//! registry.set_attr("my.square", "TOpPattern", "kOpaque", 5).unwrap();
//!
//! let pattern = registry.get_attr::<&str>("my.square", "TOpPattern").unwrap();
//! assert_eq!(*pattern, "kElemWise");
//! assert_eq!(registry.list_op_names(), vec!["my.square"]);
//! ```

#![forbid(unsafe_code)]

pub mod attribute;
pub mod lowering;
pub mod name;
pub mod op;
pub mod priority;
pub mod registration;
pub mod registry;
pub mod result;

// Re-export linkme for use in the static registration macros.
pub use linkme;
