//! Session lifecycle tests
//!
//! Ordering rules of the compile → relocate → lookup sequence, symbol
//! registration, and fault propagation through `run`.

mod common;

use common::*;
use common::assert_eq;
use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;
use tccbind_runtime::error::{CompileError, LinkError, SymbolError};
use tccbind_runtime::{
    reverse_wrap, wrap, CallableType, Error, HostType, OutputMode, Session, Value,
};

fn ty(ret: HostType, params: Vec<HostType>) -> CallableType {
    CallableType::new(ret, params).unwrap()
}

// ===== Ordering =====

#[test]
fn test_compile_requires_output_mode() {
    let (service, _recorded) = RecordingService::new();
    let mut session = Session::new(service);
    let err = session.compile_string("int x;").unwrap_err();
    assert!(matches!(err, Error::Compile(CompileError::OutputModeNotSet)));
    let err = session.add_file(Path::new("main.c")).unwrap_err();
    assert!(matches!(err, Error::Compile(CompileError::OutputModeNotSet)));
}

#[test]
fn test_output_mode_locked_after_compile() {
    let (mut session, _recorded) = memory_session();
    session.compile_string("int x;").unwrap();
    let err = session.set_output_mode(OutputMode::Dll).unwrap_err();
    assert!(matches!(err, Error::Compile(CompileError::OutputModeLocked)));
    assert_eq!(session.output_mode(), Some(OutputMode::Memory));
}

#[test]
fn test_relocate_requires_compiled_code() {
    let (mut session, recorded) = memory_session();
    let err = session.relocate().unwrap_err();
    assert!(matches!(err, Error::Link(LinkError::NotCompiled)));
    assert!(!recorded.borrow().relocated);
}

#[test]
fn test_relocate_only_once() {
    let (mut session, _recorded) = memory_session();
    relocate(&mut session);
    let err = session.relocate().unwrap_err();
    assert!(matches!(err, Error::Link(LinkError::AlreadyRelocated)));
    let err = session.compile_string("int y;").unwrap_err();
    assert!(matches!(err, Error::Link(LinkError::AlreadyRelocated)));
}

#[test]
fn test_relocate_requires_memory_output() {
    let (service, _recorded) = RecordingService::new();
    let mut session = Session::new(service);
    session.set_output_mode(OutputMode::Exe).unwrap();
    session.compile_string("int main(void) { return 0; }").unwrap();
    let err = session.relocate().unwrap_err();
    assert!(matches!(
        err,
        Error::Link(LinkError::WrongOutputMode { ref expected, ref actual })
            if expected == "memory" && actual == "exe"
    ));
}

#[test]
fn test_lookup_requires_relocation() {
    let (mut session, _recorded) = memory_session();
    session.compile_string("int f(void) { return 1; }").unwrap();
    let err = unsafe { session.get_symbol("f", &ty(HostType::I32, vec![])) }.unwrap_err();
    assert!(matches!(err, Error::Link(LinkError::NotRelocated)));
}

#[test]
fn test_output_file_requires_file_mode() {
    let (mut session, recorded) = memory_session();
    session.compile_string("int main(void) { return 0; }").unwrap();
    let err = session.output_file(Path::new("a.out")).unwrap_err();
    assert!(matches!(err, Error::Link(LinkError::WrongOutputMode { .. })));
    assert!(recorded.borrow().outputs.is_empty());
}

#[test]
fn test_output_file_for_object_mode() {
    let (service, recorded) = RecordingService::new();
    let mut session = Session::new(service);
    session.set_output_mode(OutputMode::Obj).unwrap();
    let err = session.output_file(Path::new("lib.o")).unwrap_err();
    assert!(matches!(err, Error::Link(LinkError::NotCompiled)));

    session.compile_string("int f(void) { return 1; }").unwrap();
    session.output_file(Path::new("lib.o")).unwrap();
    assert_eq!(recorded.borrow().outputs, vec![Path::new("lib.o").to_path_buf()]);
}

#[test]
fn test_libraries_wait_for_output_mode() {
    let (service, recorded) = RecordingService::new();
    let mut session = Session::new(service);
    session.add_library("m").unwrap();
    assert!(recorded.borrow().libraries.is_empty());

    session.set_output_mode(OutputMode::Memory).unwrap();
    session.add_library("dl").unwrap();
    assert_eq!(recorded.borrow().libraries, vec!["m", "dl"]);
}

#[test]
fn test_configuration_passes_through() {
    let (mut session, recorded) = memory_session();
    session.add_include_path(Path::new("include")).unwrap();
    session.define_symbol("VERSION", Some("3")).unwrap();
    session.define_symbol("DEBUG", None).unwrap();
    session.undefine_symbol("DEBUG").unwrap();
    session.set_options("-Wall").unwrap();

    let recorded = recorded.borrow();
    assert_eq!(recorded.include_paths, vec![Path::new("include").to_path_buf()]);
    assert_eq!(
        recorded.defines,
        vec![("VERSION".to_string(), Some("3".to_string()))]
    );
    assert_eq!(recorded.options, vec!["-Wall"]);
}

// ===== Symbol registration =====

#[test]
fn test_add_symbol_registers_and_retains() {
    let (mut session, recorded) = memory_session();
    session.add_symbol("twice", |x: i32| x * 2).unwrap();
    assert_eq!(session.retained(), 1);
    assert_eq!(recorded.borrow().symbol_names(), vec!["twice"]);

    relocate(&mut session);
    let twice = unsafe { session.function::<(i32,), i32>("twice") }.unwrap();
    assert_eq!(twice.call((21,)).unwrap(), 42);
}

#[test]
fn test_add_symbol_rejects_bad_names() {
    let (mut session, _recorded) = memory_session();
    let err = session.add_symbol("2fast", || 0).unwrap_err();
    assert!(matches!(err, Error::Symbol(SymbolError::InvalidName(_))));
    let err = session.add_symbol("has space", || 0).unwrap_err();
    assert!(matches!(err, Error::Symbol(SymbolError::InvalidName(_))));
    assert_eq!(session.retained(), 0);
}

#[test]
fn test_add_symbol_rejects_duplicates() {
    let (mut session, _recorded) = memory_session();
    session.add_symbol("answer", || 42).unwrap();
    let err = session.add_symbol("answer", || 43).unwrap_err();
    assert!(matches!(err, Error::Symbol(SymbolError::Duplicate(ref name)) if name == "answer"));
}

#[test]
fn test_add_symbol_after_relocation() {
    let (mut session, _recorded) = memory_session();
    relocate(&mut session);
    let err = session.add_symbol("late", || 0).unwrap_err();
    assert!(matches!(err, Error::Symbol(SymbolError::AfterRelocation(_))));
}

#[test]
fn test_add_native_keeps_closure_alive() {
    let (mut session, _recorded) = memory_session();
    let callable = wrap(|a: f64, b: f64| a - b).unwrap();
    session.add_native("sub", callable).unwrap();
    relocate(&mut session);

    let sub = unsafe { session.function::<(f64, f64), f64>("sub") }.unwrap();
    assert_eq!(sub.call((5.5, 2.0)).unwrap(), 3.5);
}

#[test]
fn test_dynamic_symbol() {
    let (mut session, _recorded) = memory_session();
    let signature = ty(HostType::String, vec![HostType::String, HostType::I32]);
    session
        .add_dynamic_symbol("repeat", &signature, |args: Vec<Value>| match args.as_slice() {
            [Value::String(text), Value::I32(n)] => Ok(Value::String(text.repeat(*n as usize))),
            _ => Ok(Value::String(String::new())),
        })
        .unwrap();
    relocate(&mut session);

    let repeat = unsafe { session.get_symbol("repeat", &signature) }.unwrap();
    assert_eq!(
        repeat
            .call(&[Value::String("ab".to_string()), Value::I32(3)])
            .unwrap(),
        Value::String("ababab".to_string())
    );
}

// ===== Running =====

#[test]
fn test_run_returns_exit_code() {
    let (service, recorded) = RecordingService::new();
    let mut session = Session::new(service.with_exit_code(3));
    session.set_output_mode(OutputMode::Memory).unwrap();
    session.compile_string("int main(void) { return 3; }").unwrap();

    assert_eq!(session.run(&["prog", "--flag"]).unwrap(), 3);
    assert_eq!(
        recorded.borrow().runs,
        vec![vec!["prog".to_string(), "--flag".to_string()]]
    );

    let err = session.run(&["prog"]).unwrap_err();
    assert!(matches!(err, Error::Link(LinkError::AlreadyRelocated)));
}

#[test]
fn test_run_surfaces_host_fault() {
    let calls = Rc::new(Cell::new(0));
    let seen = calls.clone();
    let (service, _recorded) = RecordingService::new();
    let service = service.on_run(move |symbols| {
        let address = symbols["fail"] as *const std::os::raw::c_void;
        let fail = unsafe { reverse_wrap(address, &ty(HostType::I32, vec![])) }.unwrap();
        // A native caller only sees the zeroed return value.
        let raw = unsafe { fail.call_raw(&[]) }.unwrap();
        assert_eq!(raw.as_i64(), Some(0));
        seen.set(seen.get() + 1);
    });

    let mut session = Session::new(service);
    session.set_output_mode(OutputMode::Memory).unwrap();
    session
        .add_dynamic_symbol("fail", &ty(HostType::I32, vec![]), |_| {
            Err(SymbolError::InvalidName("raised by host".to_string()).into())
        })
        .unwrap();
    session.compile_string("int fail(void); int main(void) { return fail(); }").unwrap();

    let err = session.run::<&str>(&[]).unwrap_err();
    assert!(matches!(err, Error::Symbol(SymbolError::InvalidName(ref m)) if m == "raised by host"));
    assert_eq!(calls.get(), 1);
    assert!(!tccbind_runtime::fault::is_pending());
}

#[test]
fn test_run_requires_memory_output() {
    let (service, recorded) = RecordingService::new();
    let mut session = Session::new(service);
    session.set_output_mode(OutputMode::Dll).unwrap();
    session.compile_string("int main(void) { return 0; }").unwrap();
    assert!(session.run(&["prog"]).is_err());
    assert!(recorded.borrow().runs.is_empty());
}
