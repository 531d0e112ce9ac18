//! Compilation session
//!
//! A `Session` ties one compilation service to the state every bound symbol
//! depends on:
//! - the handle registry shared by all thunks of the session
//! - the retention set keeping every native closure alive
//! - the lifecycle: output mode → compile → relocate/run → symbol lookup
//!
//! Dropping the session deletes the compiler state first, then frees the
//! closures native code could have called.

use crate::bind::{is_c_identifier, Binder, Describe, NamingRules};
use crate::compiler::{CompilationService, Diagnostic, OutputMode, Tcc};
use crate::error::{CompileError, LinkError, Result, SymbolError};
use crate::fault;
use crate::ffi::{wrap_labelled, CallableType, ForeignFunction, NativeCallable, TypedFunction};
use crate::handle::{Handle, HandleRegistry};
use crate::marshal::{HostType, Marshal, Value};
use crate::params::{HostFn, Params};
use std::collections::HashSet;
use std::fmt;
use std::os::raw::c_void;
use std::path::Path;
use std::rc::Rc;
use tccbind_config::Config;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Empty,
    Compiled,
    Relocated,
}

/// One compiler state plus everything native code compiled by it can reach
pub struct Session {
    service: Box<dyn CompilationService>,
    registry: Rc<HandleRegistry>,
    naming: NamingRules,
    output: Option<OutputMode>,
    stage: Stage,
    pending_libraries: Vec<String>,
    symbols: HashSet<String>,
    release_symbols: HashSet<String>,
    retained: Vec<NativeCallable>,
}

impl Session {
    pub fn new(service: impl CompilationService + 'static) -> Self {
        Self::with_service(Box::new(service))
    }

    pub fn with_service(service: Box<dyn CompilationService>) -> Self {
        Self {
            service,
            registry: Rc::new(HandleRegistry::new()),
            naming: NamingRules::default(),
            output: None,
            stage: Stage::Empty,
            pending_libraries: Vec::new(),
            symbols: HashSet::new(),
            release_symbols: HashSet::new(),
            retained: Vec::new(),
        }
    }

    /// Load libtcc and apply the `[compiler]` and `[naming]` settings
    pub fn from_config(config: &Config) -> Result<Self> {
        let compiler = config.compiler();
        let mut session = Session::new(Tcc::load(config.library())?);
        session.naming = NamingRules::from_config(&config.naming())?;

        if let Some(path) = &compiler.lib_path {
            session.set_lib_path(path)?;
        }
        for path in &compiler.include_paths {
            session.add_include_path(path)?;
        }
        for path in &compiler.sysinclude_paths {
            session.add_sysinclude_path(path)?;
        }
        for path in &compiler.library_paths {
            session.add_library_path(path)?;
        }
        for (name, value) in &compiler.defines {
            session.define_symbol(name, Some(value.as_str()))?;
        }
        if let Some(options) = &compiler.options {
            session.set_options(options)?;
        }
        for library in &compiler.libraries {
            session.add_library(library)?;
        }
        if let Some(output) = config.output() {
            session.set_output_mode(output.into())?;
        }
        Ok(session)
    }

    pub fn with_naming(mut self, naming: NamingRules) -> Self {
        self.naming = naming;
        self
    }

    pub fn naming(&self) -> &NamingRules {
        &self.naming
    }

    pub fn registry(&self) -> &Rc<HandleRegistry> {
        &self.registry
    }

    pub fn output_mode(&self) -> Option<OutputMode> {
        self.output
    }

    /// Number of native closures kept alive by this session
    pub fn retained(&self) -> usize {
        self.retained.len()
    }

    // === Configuration ===

    /// Choose what compilation produces; must precede any compilation
    pub fn set_output_mode(&mut self, mode: OutputMode) -> Result<()> {
        if self.stage != Stage::Empty {
            return Err(CompileError::OutputModeLocked.into());
        }
        self.service.set_output_mode(mode)?;
        self.output = Some(mode);
        for library in std::mem::take(&mut self.pending_libraries) {
            self.service.add_library(&library)?;
        }
        Ok(())
    }

    pub fn set_lib_path(&mut self, path: &Path) -> Result<()> {
        self.service.set_lib_path(path)
    }

    pub fn set_options(&mut self, options: &str) -> Result<()> {
        self.service.set_options(options)
    }

    pub fn add_include_path(&mut self, path: &Path) -> Result<()> {
        self.service.add_include_path(path)
    }

    pub fn add_sysinclude_path(&mut self, path: &Path) -> Result<()> {
        self.service.add_sysinclude_path(path)
    }

    pub fn define_symbol(&mut self, name: &str, value: Option<&str>) -> Result<()> {
        self.service.define_symbol(name, value)
    }

    pub fn undefine_symbol(&mut self, name: &str) -> Result<()> {
        self.service.undefine_symbol(name)
    }

    pub fn add_library_path(&mut self, path: &Path) -> Result<()> {
        self.service.add_library_path(path)
    }

    /// Link against a library; deferred until the output mode is known
    pub fn add_library(&mut self, name: &str) -> Result<()> {
        if self.output.is_none() {
            self.pending_libraries.push(name.to_string());
            return Ok(());
        }
        self.service.add_library(name)
    }

    pub fn set_diagnostic_handler(&mut self, handler: impl FnMut(&Diagnostic) + 'static) {
        self.service.set_diagnostic_handler(Box::new(handler));
    }

    // === Compilation ===

    fn require_output(&self) -> Result<OutputMode> {
        self.output
            .ok_or_else(|| CompileError::OutputModeNotSet.into())
    }

    fn before_compile(&self) -> Result<()> {
        self.require_output()?;
        if self.stage == Stage::Relocated {
            return Err(LinkError::AlreadyRelocated.into());
        }
        Ok(())
    }

    pub fn compile_string(&mut self, source: &str) -> Result<()> {
        self.before_compile()?;
        self.service.compile_string(source)?;
        self.stage = Stage::Compiled;
        Ok(())
    }

    pub fn add_file(&mut self, path: &Path) -> Result<()> {
        self.before_compile()?;
        self.service.add_file(path)?;
        self.stage = Stage::Compiled;
        Ok(())
    }

    // === Symbols ===

    /// Expose a host closure to native code under `name`
    pub fn add_symbol<A, R, F>(&mut self, name: &str, f: F) -> Result<()>
    where
        A: Params,
        R: Marshal,
        F: HostFn<A, R>,
    {
        let ty = CallableType::of::<A, R>()?;
        let callable = wrap_labelled(&ty, name, move |args: Vec<Value>| {
            let args = A::from_values(args)?;
            Ok(f.invoke(args).into_value())
        })?;
        self.register_native(name, callable)
    }

    /// Expose a dynamically typed host closure under `name`
    pub fn add_dynamic_symbol<F>(&mut self, name: &str, ty: &CallableType, f: F) -> Result<()>
    where
        F: Fn(Vec<Value>) -> Result<Value> + 'static,
    {
        let callable = wrap_labelled(ty, name, f)?;
        self.register_native(name, callable)
    }

    /// Expose an already wrapped callable; the session takes ownership
    pub fn add_native(&mut self, name: &str, callable: NativeCallable) -> Result<()> {
        self.register_native(name, callable)
    }

    pub(crate) fn register_native(&mut self, name: &str, callable: NativeCallable) -> Result<()> {
        if !is_c_identifier(name) {
            return Err(SymbolError::InvalidName(name.to_string()).into());
        }
        if self.stage == Stage::Relocated {
            return Err(SymbolError::AfterRelocation(name.to_string()).into());
        }
        if self.symbols.contains(name) {
            return Err(SymbolError::Duplicate(name.to_string()).into());
        }
        self.service.add_symbol(name, callable.address())?;
        debug!(
            symbol = name,
            signature = %callable.callable_type().signature(),
            "registered symbol"
        );
        self.symbols.insert(name.to_string());
        self.retained.push(callable);
        Ok(())
    }

    pub(crate) fn is_registered(&self, name: &str) -> bool {
        self.symbols.contains(name)
    }

    /// Register the shared handle release function once per name
    pub(crate) fn ensure_release_symbol(&mut self, name: &str) -> Result<()> {
        if self.release_symbols.contains(name) {
            return Ok(());
        }
        let ty = CallableType::new(HostType::Void, vec![HostType::Pointer])?;
        let registry = self.registry.clone();
        let release = wrap_labelled(&ty, name, move |args: Vec<Value>| {
            let (address,) = <(*mut c_void,)>::from_values(args)?;
            registry.release(Handle::from_raw(address as usize))?;
            Ok(Value::Void)
        })?;
        self.register_native(name, release)?;
        self.release_symbols.insert(name.to_string());
        Ok(())
    }

    /// Release a handle from host code
    pub fn release(&self, handle: Handle) -> Result<()> {
        Ok(self.registry.release(handle)?)
    }

    // === Binding ===

    /// Binder using this session's naming rules
    pub fn binder(&mut self) -> Binder<'_> {
        let rules = self.naming.clone();
        Binder::new(self, rules)
    }

    pub fn bind_type<T: Describe>(&mut self) -> Result<Vec<String>> {
        self.binder().bind_type::<T>()
    }

    // === Linking and execution ===

    fn require_memory(&self) -> Result<()> {
        let mode = self.require_output()?;
        if mode != OutputMode::Memory {
            return Err(LinkError::WrongOutputMode {
                expected: OutputMode::Memory.to_string(),
                actual: mode.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Link compiled code into this process
    pub fn relocate(&mut self) -> Result<()> {
        self.require_memory()?;
        match self.stage {
            Stage::Empty => return Err(LinkError::NotCompiled.into()),
            Stage::Relocated => return Err(LinkError::AlreadyRelocated.into()),
            Stage::Compiled => {}
        }
        self.service.relocate()?;
        self.stage = Stage::Relocated;
        Ok(())
    }

    /// Run `main` with an argument vector and return its exit code
    ///
    /// The compiler relocates the code itself; afterwards the session counts
    /// as relocated. A fault raised by host code during the run is returned
    /// as this call's error.
    pub fn run<S: AsRef<str>>(&mut self, args: &[S]) -> Result<i32> {
        self.require_memory()?;
        match self.stage {
            Stage::Empty => return Err(LinkError::NotCompiled.into()),
            Stage::Relocated => return Err(LinkError::AlreadyRelocated.into()),
            Stage::Compiled => {}
        }
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();

        let service = &mut self.service;
        let (result, fault) = fault::isolate(|| service.run(&args));
        self.stage = Stage::Relocated;

        if let Some(err) = fault {
            return Err(err);
        }
        result
    }

    /// Write the compiled output for a file-emitting output mode
    pub fn output_file(&mut self, path: &Path) -> Result<()> {
        let mode = self.require_output()?;
        if !mode.emits_file() {
            return Err(LinkError::WrongOutputMode {
                expected: "exe, dll, obj or preprocess".to_string(),
                actual: mode.to_string(),
            }
            .into());
        }
        if self.stage == Stage::Empty {
            return Err(LinkError::NotCompiled.into());
        }
        self.service.output_file(path)
    }

    /// Address of a symbol in relocated code
    pub fn symbol_address(&mut self, name: &str) -> Result<*const c_void> {
        match self.stage {
            Stage::Empty => return Err(LinkError::NotCompiled.into()),
            Stage::Compiled => return Err(LinkError::NotRelocated.into()),
            Stage::Relocated => {}
        }
        self.service
            .symbol_address(name)
            .ok_or_else(|| LinkError::SymbolNotFound(name.to_string()).into())
    }

    /// Look up a compiled function and interpret it with the given type
    ///
    /// # Safety
    ///
    /// The function must have the C signature described by `ty`, and must
    /// not be called after this session is dropped.
    pub unsafe fn get_symbol(&mut self, name: &str, ty: &CallableType) -> Result<ForeignFunction> {
        let address = self.symbol_address(name)?;
        Ok(unsafe { ForeignFunction::from_raw(address, ty) }?)
    }

    /// Look up a compiled function with a static Rust signature
    ///
    /// # Safety
    ///
    /// See [`Session::get_symbol`].
    pub unsafe fn function<A: Params, R: Marshal>(
        &mut self,
        name: &str,
    ) -> Result<TypedFunction<A, R>> {
        let ty = CallableType::of::<A, R>()?;
        let function = unsafe { self.get_symbol(name, &ty) }?;
        Ok(function.typed::<A, R>()?)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("output", &self.output)
            .field("stage", &self.stage)
            .field("registry", &self.registry)
            .field("retained", &self.retained.len())
            .finish()
    }
}
