//! Compilation service seam
//!
//! The binder and session only talk to the native compiler through
//! `CompilationService`. `Tcc` implements it over a runtime-loaded libtcc;
//! tests substitute a recording implementation.

mod diagnostic;
mod tcc;

pub use diagnostic::{Diagnostic, Severity};
pub use tcc::Tcc;

use crate::error::Result;
use std::fmt;
use std::os::raw::c_void;
use std::path::Path;
use tccbind_config::OutputKind;

/// What the compiler produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputMode {
    /// Executable code relocated into this process
    #[default]
    Memory,
    Exe,
    Dll,
    Obj,
    /// Preprocessed source only
    Preprocess,
}

impl OutputMode {
    /// `TCC_OUTPUT_*` value
    pub fn raw(self) -> i32 {
        match self {
            OutputMode::Memory => 1,
            OutputMode::Exe => 2,
            OutputMode::Dll => 3,
            OutputMode::Obj => 4,
            OutputMode::Preprocess => 5,
        }
    }

    /// Whether this mode writes a file through `output_file`
    pub fn emits_file(self) -> bool {
        self != OutputMode::Memory
    }
}

impl From<OutputKind> for OutputMode {
    fn from(kind: OutputKind) -> Self {
        match kind {
            OutputKind::Memory => OutputMode::Memory,
            OutputKind::Exe => OutputMode::Exe,
            OutputKind::Dll => OutputMode::Dll,
            OutputKind::Obj => OutputMode::Obj,
            OutputKind::Preprocess => OutputMode::Preprocess,
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputMode::Memory => "memory",
            OutputMode::Exe => "exe",
            OutputMode::Dll => "dll",
            OutputMode::Obj => "obj",
            OutputMode::Preprocess => "preprocess",
        };
        f.write_str(name)
    }
}

/// Callback receiving every diagnostic as it is reported
pub type DiagnosticHandler = Box<dyn FnMut(&Diagnostic)>;

/// Operations the binder needs from a native compiler
///
/// Implementations report failures of individual calls; ordering rules
/// (output mode before compile, compile before relocate) are enforced by
/// `Session`.
pub trait CompilationService {
    fn set_lib_path(&mut self, path: &Path) -> Result<()>;

    fn set_options(&mut self, options: &str) -> Result<()>;

    fn add_include_path(&mut self, path: &Path) -> Result<()>;

    fn add_sysinclude_path(&mut self, path: &Path) -> Result<()>;

    fn define_symbol(&mut self, name: &str, value: Option<&str>) -> Result<()>;

    fn undefine_symbol(&mut self, name: &str) -> Result<()>;

    fn add_file(&mut self, path: &Path) -> Result<()>;

    fn compile_string(&mut self, source: &str) -> Result<()>;

    fn set_output_mode(&mut self, mode: OutputMode) -> Result<()>;

    fn add_library_path(&mut self, path: &Path) -> Result<()>;

    fn add_library(&mut self, name: &str) -> Result<()>;

    /// Make `address` visible to compiled code under `name`
    fn add_symbol(&mut self, name: &str, address: *const c_void) -> Result<()>;

    fn output_file(&mut self, path: &Path) -> Result<()>;

    /// Run `main` with the given argument vector
    fn run(&mut self, args: &[String]) -> Result<i32>;

    fn relocate(&mut self) -> Result<()>;

    /// Address of a symbol in relocated code
    fn symbol_address(&mut self, name: &str) -> Option<*const c_void>;

    fn set_diagnostic_handler(&mut self, handler: DiagnosticHandler);
}
