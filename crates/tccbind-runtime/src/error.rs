//! Error types for every stage of binding, compiling and calling
//!
//! Each component owns a small error enum; `Error` wraps them all so the
//! session API can return a single `Result<T>`.

use crate::compiler::Diagnostic;
use crate::ffi::LoadError;
use std::path::PathBuf;
use thiserror::Error;

/// Values that could not be converted across the native boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarshalError {
    #[error("null string pointer received")]
    NullString,

    #[error("string contains an interior NUL byte")]
    InteriorNul,

    #[error("invalid char code point {0:#x}")]
    InvalidChar(u32),

    #[error("invalid discriminant {value} for enum {name}")]
    InvalidEnum { name: &'static str, value: i64 },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("expected {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },
}

/// Handle registry failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandleError {
    #[error("invalid handle {0:#x}")]
    InvalidHandle(usize),

    #[error("{class} receiver is already borrowed by an active call")]
    ReceiverBusy { class: String },
}

/// Failures creating or describing native-callable signatures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallableError {
    #[error("{ty} cannot cross the boundary directly ({position})")]
    OpaqueSignature { position: String, ty: String },

    #[error("{0} is not valid as a parameter type")]
    VoidParameter(String),

    #[error("failed to allocate native closure")]
    ClosureAlloc,

    #[error("failed to prepare native closure: {0}")]
    ClosurePrep(String),

    #[error("null function address")]
    NullAddress,
}

/// Type surface binding failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindError {
    #[error("symbol '{symbol}' is produced by more than one member of {class}")]
    DuplicateSymbol { symbol: String, class: String },

    #[error("{class}::{member} is overloaded; give each overload an explicit symbol")]
    OverloadedMember { class: String, member: String },

    #[error("invalid naming template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("generated symbol '{0}' is not a valid C identifier")]
    InvalidSymbol(String),
}

/// Compilation failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("output mode must be set before compiling")]
    OutputModeNotSet,

    #[error("output mode cannot change after compilation started")]
    OutputModeLocked,

    #[error("compilation failed{}", first_message(.diagnostics))]
    Failed { diagnostics: Vec<Diagnostic> },

    #[error("argument contains an interior NUL byte: {0}")]
    InvalidArgument(String),

    #[error("compiler option rejected: {0}")]
    InvalidOption(String),
}

/// Linking, relocation and symbol lookup failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    #[error("nothing has been compiled yet")]
    NotCompiled,

    #[error("code has not been relocated into memory")]
    NotRelocated,

    #[error("code has already been relocated")]
    AlreadyRelocated,

    #[error("operation requires output mode {expected}, session uses {actual}")]
    WrongOutputMode { expected: String, actual: String },

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("library not found: {0}")]
    LibraryNotFound(String),

    #[error("relocation failed{}", first_message(.diagnostics))]
    RelocationFailed { diagnostics: Vec<Diagnostic> },

    #[error("failed to write output file {0}")]
    OutputFailed(PathBuf),
}

/// Symbol registration failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SymbolError {
    #[error("'{0}' is not a valid symbol name")]
    InvalidName(String),

    #[error("symbol '{0}' registered twice")]
    Duplicate(String),

    #[error("cannot register '{0}' after relocation")]
    AfterRelocation(String),
}

/// Any tccbind failure
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error(transparent)]
    Callable(#[from] CallableError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Symbol(#[from] SymbolError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Config(#[from] tccbind_config::ConfigError),

    #[error("host code panicked: {0}")]
    Panicked(String),
}

/// Result type for tccbind operations
pub type Result<T> = std::result::Result<T, Error>;

fn first_message(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .find(|d| d.is_error())
        .or_else(|| diagnostics.first())
        .map(|d| format!(": {}", d))
        .unwrap_or_default()
}
