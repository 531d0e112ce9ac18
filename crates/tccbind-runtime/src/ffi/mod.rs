//! Native boundary: callable types, C-ABI closures and library loading

mod boundary;
pub mod callable;
pub mod loader;

pub(crate) use boundary::{dispatcher, Invoke};
pub use callable::{
    cached_types, reverse_wrap, wrap, wrap_dynamic, CallableType, ForeignFunction, NativeCallable,
    Signature, TypedFunction,
};
pub(crate) use callable::wrap_labelled;
pub use loader::{LibraryLoader, LoadError};
