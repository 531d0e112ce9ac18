//! tccbind Runtime - Exposing Rust types to code compiled by libtcc
//!
//! This library provides:
//! - Marshaling of primitives, strings and host objects across the C ABI
//! - A handle registry standing in for host objects on the native side
//! - Native-callable closures and callable native functions (libffi)
//! - Type surface binding with configurable symbol naming
//! - A libtcc compilation session driving compile, relocate and run

/// tccbind runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Public API modules
pub mod bind;
pub mod compiler;
pub mod error;
pub mod fault;
pub mod ffi;
pub mod handle;
pub mod marshal;
pub mod params;
pub mod session;

// Re-export commonly used types
pub use bind::{Binder, Describe, MemberKind, NamingRules, TypeDescription};
pub use compiler::{CompilationService, Diagnostic, OutputMode, Severity, Tcc};
pub use error::{Error, MarshalError, Result};
pub use ffi::{
    reverse_wrap, wrap, wrap_dynamic, CallableType, ForeignFunction, NativeCallable, Signature,
    TypedFunction,
};
pub use handle::{Handle, HandleRegistry, HostClass, HostObject, ObjectType, Ref, Val};
pub use marshal::{HostType, Marshal, StringBuffer, Value};
pub use session::Session;
