//! Shared test utilities
//!
//! `RecordingService` is an in-memory compilation service. It records every
//! call made on it and, once "relocated", resolves each registered symbol to
//! the address it was registered with. Looking a bound symbol up therefore
//! yields the thunk itself, so tests can drive thunks exactly the way
//! compiled C would without needing libtcc.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::raw::c_void;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tccbind_runtime::compiler::DiagnosticHandler;
use tccbind_runtime::{CompilationService, OutputMode, Result, Session};
use tracing_subscriber::EnvFilter;

// Re-export testing utilities
pub use pretty_assertions::{assert_eq, assert_ne};

/// Everything a `RecordingService` has been asked to do
#[derive(Debug, Default)]
pub struct Recorded {
    pub output_mode: Option<OutputMode>,
    pub sources: Vec<String>,
    pub files: Vec<PathBuf>,
    pub include_paths: Vec<PathBuf>,
    pub library_paths: Vec<PathBuf>,
    pub libraries: Vec<String>,
    pub defines: Vec<(String, Option<String>)>,
    pub options: Vec<String>,
    pub symbols: Vec<(String, usize)>,
    pub outputs: Vec<PathBuf>,
    pub runs: Vec<Vec<String>>,
    pub relocated: bool,
}

impl Recorded {
    pub fn symbol_names(&self) -> Vec<&str> {
        self.symbols.iter().map(|(name, _)| name.as_str()).collect()
    }
}

/// Handle kept by the test after the service moves into a session
pub type Shared = Rc<RefCell<Recorded>>;

#[derive(Default)]
pub struct RecordingService {
    recorded: Shared,
    exit_code: i32,
    on_run: Option<Box<dyn FnMut(&HashMap<String, usize>)>>,
}

impl RecordingService {
    pub fn new() -> (Self, Shared) {
        let service = Self::default();
        let recorded = service.recorded.clone();
        (service, recorded)
    }

    /// Exit code reported by `run`
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Stand-in for `main`: called during `run` with the registered symbols
    pub fn on_run(mut self, f: impl FnMut(&HashMap<String, usize>) + 'static) -> Self {
        self.on_run = Some(Box::new(f));
        self
    }

    fn symbol_table(&self) -> HashMap<String, usize> {
        self.recorded.borrow().symbols.iter().cloned().collect()
    }
}

impl CompilationService for RecordingService {
    fn set_lib_path(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn set_options(&mut self, options: &str) -> Result<()> {
        self.recorded.borrow_mut().options.push(options.to_string());
        Ok(())
    }

    fn add_include_path(&mut self, path: &Path) -> Result<()> {
        self.recorded.borrow_mut().include_paths.push(path.to_path_buf());
        Ok(())
    }

    fn add_sysinclude_path(&mut self, path: &Path) -> Result<()> {
        self.add_include_path(path)
    }

    fn define_symbol(&mut self, name: &str, value: Option<&str>) -> Result<()> {
        self.recorded
            .borrow_mut()
            .defines
            .push((name.to_string(), value.map(str::to_string)));
        Ok(())
    }

    fn undefine_symbol(&mut self, name: &str) -> Result<()> {
        self.recorded.borrow_mut().defines.retain(|(n, _)| n != name);
        Ok(())
    }

    fn add_file(&mut self, path: &Path) -> Result<()> {
        self.recorded.borrow_mut().files.push(path.to_path_buf());
        Ok(())
    }

    fn compile_string(&mut self, source: &str) -> Result<()> {
        self.recorded.borrow_mut().sources.push(source.to_string());
        Ok(())
    }

    fn set_output_mode(&mut self, mode: OutputMode) -> Result<()> {
        self.recorded.borrow_mut().output_mode = Some(mode);
        Ok(())
    }

    fn add_library_path(&mut self, path: &Path) -> Result<()> {
        self.recorded.borrow_mut().library_paths.push(path.to_path_buf());
        Ok(())
    }

    fn add_library(&mut self, name: &str) -> Result<()> {
        self.recorded.borrow_mut().libraries.push(name.to_string());
        Ok(())
    }

    fn add_symbol(&mut self, name: &str, address: *const c_void) -> Result<()> {
        self.recorded
            .borrow_mut()
            .symbols
            .push((name.to_string(), address as usize));
        Ok(())
    }

    fn output_file(&mut self, path: &Path) -> Result<()> {
        self.recorded.borrow_mut().outputs.push(path.to_path_buf());
        Ok(())
    }

    fn run(&mut self, args: &[String]) -> Result<i32> {
        self.recorded.borrow_mut().runs.push(args.to_vec());
        let table = self.symbol_table();
        if let Some(main) = self.on_run.as_mut() {
            main(&table);
        }
        Ok(self.exit_code)
    }

    fn relocate(&mut self) -> Result<()> {
        self.recorded.borrow_mut().relocated = true;
        Ok(())
    }

    fn symbol_address(&mut self, name: &str) -> Option<*const c_void> {
        self.recorded
            .borrow()
            .symbols
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, address)| *address as *const c_void)
    }

    fn set_diagnostic_handler(&mut self, _handler: DiagnosticHandler) {}
}

/// Route tracing output to the test harness, filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Session over a fresh recording service with the memory output mode set
pub fn memory_session() -> (Session, Shared) {
    init_tracing();
    let (service, recorded) = RecordingService::new();
    let mut session = Session::new(service);
    session
        .set_output_mode(OutputMode::Memory)
        .expect("memory output mode");
    (session, recorded)
}

/// Compile a placeholder translation unit and relocate
pub fn relocate(session: &mut Session) {
    session
        .compile_string("int main(void) { return 0; }")
        .expect("compile");
    session.relocate().expect("relocate");
}
