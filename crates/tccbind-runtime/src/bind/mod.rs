//! Binding host types to native symbols
//!
//! - `describe`: the explicit member table of a host type
//! - `naming`: symbol naming templates
//! - `thunk`: per-member C-ABI entry points
//! - `binder`: walks a description and registers thunks with a session

pub mod binder;
pub mod describe;
pub mod naming;
pub mod thunk;

pub use binder::{plan_symbols, Binder, PlannedSymbol};
pub use describe::{
    Describe, Invoker, MemberDescriptor, MemberKind, TypeBuilder, TypeDescription, Visibility,
};
pub use naming::{apply_format, encode_args, is_c_identifier, NameContext, NamingRules, Template};
pub use thunk::{synthesize, Dispatch, Thunk};
