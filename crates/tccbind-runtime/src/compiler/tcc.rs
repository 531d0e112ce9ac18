//! libtcc backend
//!
//! libtcc is loaded at runtime so the crate builds without it installed.
//! Entry points follow the 0.9.27 `libtcc.h` API.

use crate::compiler::{CompilationService, Diagnostic, DiagnosticHandler, OutputMode};
use crate::error::{CompileError, Error, LinkError, Result, SymbolError};
use crate::ffi::{LibraryLoader, LoadError};
use libloading::Library;
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::fmt;
use std::os::raw::{c_char, c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::ptr;
use tracing::{debug, info, warn};

type State = *mut c_void;
type ErrorFunc = unsafe extern "C" fn(*mut c_void, *const c_char);

/// `TCC_RELOCATE_AUTO`
const RELOCATE_AUTO: *mut c_void = 1 as *mut c_void;

struct Api {
    new: unsafe extern "C" fn() -> State,
    delete: unsafe extern "C" fn(State),
    set_lib_path: unsafe extern "C" fn(State, *const c_char),
    set_error_func: unsafe extern "C" fn(State, *mut c_void, Option<ErrorFunc>),
    set_options: unsafe extern "C" fn(State, *const c_char),
    add_include_path: unsafe extern "C" fn(State, *const c_char) -> c_int,
    add_sysinclude_path: unsafe extern "C" fn(State, *const c_char) -> c_int,
    define_symbol: unsafe extern "C" fn(State, *const c_char, *const c_char),
    undefine_symbol: unsafe extern "C" fn(State, *const c_char),
    add_file: unsafe extern "C" fn(State, *const c_char) -> c_int,
    compile_string: unsafe extern "C" fn(State, *const c_char) -> c_int,
    set_output_type: unsafe extern "C" fn(State, c_int) -> c_int,
    add_library_path: unsafe extern "C" fn(State, *const c_char) -> c_int,
    add_library: unsafe extern "C" fn(State, *const c_char) -> c_int,
    add_symbol: unsafe extern "C" fn(State, *const c_char, *const c_void) -> c_int,
    output_file: unsafe extern "C" fn(State, *const c_char) -> c_int,
    run: unsafe extern "C" fn(State, c_int, *mut *mut c_char) -> c_int,
    relocate: unsafe extern "C" fn(State, *mut c_void) -> c_int,
    get_symbol: unsafe extern "C" fn(State, *const c_char) -> *mut c_void,
}

impl Api {
    fn load(library: &Library, name: &str) -> std::result::Result<Self, LoadError> {
        unsafe fn get<T: Copy>(
            library: &Library,
            name: &str,
            symbol: &str,
        ) -> std::result::Result<T, LoadError> {
            unsafe { library.get::<T>(symbol.as_bytes()) }
                .map(|sym| *sym)
                .map_err(|_| LoadError::SymbolNotFound {
                    library: name.to_string(),
                    symbol: symbol.to_string(),
                })
        }

        unsafe {
            Ok(Self {
                new: get(library, name, "tcc_new")?,
                delete: get(library, name, "tcc_delete")?,
                set_lib_path: get(library, name, "tcc_set_lib_path")?,
                set_error_func: get(library, name, "tcc_set_error_func")?,
                set_options: get(library, name, "tcc_set_options")?,
                add_include_path: get(library, name, "tcc_add_include_path")?,
                add_sysinclude_path: get(library, name, "tcc_add_sysinclude_path")?,
                define_symbol: get(library, name, "tcc_define_symbol")?,
                undefine_symbol: get(library, name, "tcc_undefine_symbol")?,
                add_file: get(library, name, "tcc_add_file")?,
                compile_string: get(library, name, "tcc_compile_string")?,
                set_output_type: get(library, name, "tcc_set_output_type")?,
                add_library_path: get(library, name, "tcc_add_library_path")?,
                add_library: get(library, name, "tcc_add_library")?,
                add_symbol: get(library, name, "tcc_add_symbol")?,
                output_file: get(library, name, "tcc_output_file")?,
                run: get(library, name, "tcc_run")?,
                relocate: get(library, name, "tcc_relocate")?,
                get_symbol: get(library, name, "tcc_get_symbol")?,
            })
        }
    }
}

#[derive(Default)]
struct DiagnosticSink {
    collected: RefCell<Vec<Diagnostic>>,
    handler: RefCell<Option<DiagnosticHandler>>,
}

impl DiagnosticSink {
    fn drain(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.collected.borrow_mut())
    }
}

unsafe extern "C" fn on_diagnostic(opaque: *mut c_void, message: *const c_char) {
    if opaque.is_null() || message.is_null() {
        return;
    }
    let sink = unsafe { &*(opaque as *const DiagnosticSink) };
    let text = unsafe { CStr::from_ptr(message) }.to_string_lossy();
    let diagnostic = Diagnostic::parse(&text);
    warn!(%diagnostic, "compiler diagnostic");

    let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
        if let Ok(mut handler) = sink.handler.try_borrow_mut() {
            if let Some(handler) = handler.as_mut() {
                handler(&diagnostic);
            }
        }
    }));
    if delivered.is_err() {
        warn!("diagnostic handler panicked");
    }

    if let Ok(mut collected) = sink.collected.try_borrow_mut() {
        collected.push(diagnostic);
    }
}

/// A libtcc compilation state
pub struct Tcc {
    state: State,
    api: Api,
    sink: Box<DiagnosticSink>,
    _library: Library,
}

impl Tcc {
    /// Load libtcc by short name or path and create a fresh state
    pub fn load(library: &str) -> Result<Self> {
        Self::load_with(&LibraryLoader::new(), library)
    }

    pub fn load_with(loader: &LibraryLoader, library: &str) -> Result<Self> {
        let handle = loader.load(library)?;
        let api = Api::load(&handle, library)?;

        let state = unsafe { (api.new)() };
        if state.is_null() {
            return Err(LoadError::LoadFailed(format!("{}: tcc_new returned null", library)).into());
        }

        let sink = Box::new(DiagnosticSink::default());
        let opaque = &*sink as *const DiagnosticSink as *mut c_void;
        unsafe { (api.set_error_func)(state, opaque, Some(on_diagnostic)) };

        info!(library, "loaded native compiler");
        Ok(Self {
            state,
            api,
            sink,
            _library: handle,
        })
    }

    fn check(&self, rc: c_int, fail: impl FnOnce(Vec<Diagnostic>) -> Error) -> Result<()> {
        let diagnostics = self.sink.drain();
        if rc < 0 {
            Err(fail(diagnostics))
        } else {
            Ok(())
        }
    }
}

fn c_string(value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| CompileError::InvalidArgument(value.to_string()).into())
}

fn c_path(path: &Path) -> Result<CString> {
    c_string(&path.to_string_lossy())
}

impl CompilationService for Tcc {
    fn set_lib_path(&mut self, path: &Path) -> Result<()> {
        let path = c_path(path)?;
        unsafe { (self.api.set_lib_path)(self.state, path.as_ptr()) };
        Ok(())
    }

    fn set_options(&mut self, options: &str) -> Result<()> {
        let raw = c_string(options)?;
        unsafe { (self.api.set_options)(self.state, raw.as_ptr()) };
        if self.sink.drain().iter().any(Diagnostic::is_error) {
            return Err(CompileError::InvalidOption(options.to_string()).into());
        }
        Ok(())
    }

    fn add_include_path(&mut self, path: &Path) -> Result<()> {
        let raw = c_path(path)?;
        let rc = unsafe { (self.api.add_include_path)(self.state, raw.as_ptr()) };
        self.check(rc, |_| CompileError::InvalidArgument(path.display().to_string()).into())
    }

    fn add_sysinclude_path(&mut self, path: &Path) -> Result<()> {
        let raw = c_path(path)?;
        let rc = unsafe { (self.api.add_sysinclude_path)(self.state, raw.as_ptr()) };
        self.check(rc, |_| CompileError::InvalidArgument(path.display().to_string()).into())
    }

    fn define_symbol(&mut self, name: &str, value: Option<&str>) -> Result<()> {
        let name = c_string(name)?;
        let value = value.map(c_string).transpose()?;
        let value_ptr = value.as_ref().map_or(ptr::null(), |v| v.as_ptr());
        unsafe { (self.api.define_symbol)(self.state, name.as_ptr(), value_ptr) };
        Ok(())
    }

    fn undefine_symbol(&mut self, name: &str) -> Result<()> {
        let name = c_string(name)?;
        unsafe { (self.api.undefine_symbol)(self.state, name.as_ptr()) };
        Ok(())
    }

    fn add_file(&mut self, path: &Path) -> Result<()> {
        let raw = c_path(path)?;
        let rc = unsafe { (self.api.add_file)(self.state, raw.as_ptr()) };
        self.check(rc, |diagnostics| CompileError::Failed { diagnostics }.into())
    }

    fn compile_string(&mut self, source: &str) -> Result<()> {
        let raw = c_string(source)?;
        let rc = unsafe { (self.api.compile_string)(self.state, raw.as_ptr()) };
        self.check(rc, |diagnostics| CompileError::Failed { diagnostics }.into())
    }

    fn set_output_mode(&mut self, mode: OutputMode) -> Result<()> {
        let rc = unsafe { (self.api.set_output_type)(self.state, mode.raw()) };
        self.check(rc, |_| CompileError::InvalidOption(format!("output mode {}", mode)).into())
    }

    fn add_library_path(&mut self, path: &Path) -> Result<()> {
        let raw = c_path(path)?;
        let rc = unsafe { (self.api.add_library_path)(self.state, raw.as_ptr()) };
        self.check(rc, |_| CompileError::InvalidArgument(path.display().to_string()).into())
    }

    fn add_library(&mut self, name: &str) -> Result<()> {
        let raw = c_string(name)?;
        let rc = unsafe { (self.api.add_library)(self.state, raw.as_ptr()) };
        self.check(rc, |_| LinkError::LibraryNotFound(name.to_string()).into())
    }

    fn add_symbol(&mut self, name: &str, address: *const c_void) -> Result<()> {
        let raw = CString::new(name).map_err(|_| SymbolError::InvalidName(name.to_string()))?;
        let rc = unsafe { (self.api.add_symbol)(self.state, raw.as_ptr(), address) };
        debug!(symbol = name, ?address, "added native symbol");
        self.check(rc, |_| SymbolError::InvalidName(name.to_string()).into())
    }

    fn output_file(&mut self, path: &Path) -> Result<()> {
        let raw = c_path(path)?;
        let rc = unsafe { (self.api.output_file)(self.state, raw.as_ptr()) };
        self.check(rc, |_| LinkError::OutputFailed(path.to_path_buf()).into())
    }

    fn run(&mut self, args: &[String]) -> Result<i32> {
        let owned = args
            .iter()
            .map(|arg| c_string(arg))
            .collect::<Result<Vec<_>>>()?;
        let mut argv: Vec<*mut c_char> =
            owned.iter().map(|arg| arg.as_ptr() as *mut c_char).collect();
        argv.push(ptr::null_mut());

        let rc = unsafe { (self.api.run)(self.state, owned.len() as c_int, argv.as_mut_ptr()) };
        self.sink.drain();
        Ok(rc)
    }

    fn relocate(&mut self) -> Result<()> {
        let rc = unsafe { (self.api.relocate)(self.state, RELOCATE_AUTO) };
        self.check(rc, |diagnostics| LinkError::RelocationFailed { diagnostics }.into())
    }

    fn symbol_address(&mut self, name: &str) -> Option<*const c_void> {
        let raw = CString::new(name).ok()?;
        let address = unsafe { (self.api.get_symbol)(self.state, raw.as_ptr()) };
        (!address.is_null()).then_some(address as *const c_void)
    }

    fn set_diagnostic_handler(&mut self, handler: DiagnosticHandler) {
        *self.sink.handler.borrow_mut() = Some(handler);
    }
}

impl Drop for Tcc {
    fn drop(&mut self) {
        unsafe { (self.api.delete)(self.state) };
    }
}

impl fmt::Debug for Tcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tcc").field("state", &self.state).finish()
    }
}
