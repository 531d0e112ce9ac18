//! Callable types - native-ABI signatures, closures and foreign functions
//!
//! A `CallableType` is a C-ABI function signature with a prepared libffi
//! call interface. Identical signatures share one cached instance per
//! thread.
//!
//! Host → native: `wrap` turns a host closure into a `NativeCallable`, a
//! libffi closure whose code address native code can call.
//!
//! Native → host: `reverse_wrap` turns a raw native address into a
//! `ForeignFunction` that can be called with host values.

use crate::error::{CallableError, Error, MarshalError};
use crate::fault;
use crate::ffi::boundary::{self, Outbound};
use crate::marshal::{
    classify, AbiType, Classification, HostType, Marshal, MarshalPlan, RawValue, Value,
};
use crate::params::{HostFn, Params};
use libffi::low;
use libffi::middle::{Arg, Cif, CodePtr};
use libffi::raw::{ffi_cif, ffi_closure};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::os::raw::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::rc::Rc;
use tracing::debug;

/// Parameter and return types of a native-callable function
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub params: Vec<HostType>,
    pub ret: HostType,
}

impl Signature {
    pub fn new(params: Vec<HostType>, ret: HostType) -> Self {
        Self { params, ret }
    }

    /// Signature of a host function taking `A` and returning `R`
    pub fn of<A: Params, R: Marshal>() -> Self {
        Self::new(A::host_types(), R::host_type())
    }

    fn validate(&self) -> Result<(), CallableError> {
        for (i, param) in self.params.iter().enumerate() {
            if *param == HostType::Void {
                return Err(CallableError::VoidParameter(format!("parameter {}", i)));
            }
            if classify(param) == Classification::Opaque {
                return Err(CallableError::OpaqueSignature {
                    position: format!("parameter {}", i),
                    ty: param.to_string(),
                });
            }
        }
        if classify(&self.ret) == Classification::Opaque {
            return Err(CallableError::OpaqueSignature {
                position: "return".to_string(),
                ty: self.ret.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

thread_local! {
    static TYPE_CACHE: RefCell<HashMap<Signature, CallableType>> = RefCell::new(HashMap::new());
    static NEXT_TYPE_ID: Cell<usize> = const { Cell::new(1) };
}

struct TypeInner {
    id: usize,
    signature: Signature,
    cif: Cif,
}

/// A nominal C-ABI function type
///
/// Cheap to clone; clones of the same cached type compare equal.
#[derive(Clone)]
pub struct CallableType {
    inner: Rc<TypeInner>,
}

impl CallableType {
    /// Get the callable type for a signature, creating it on first use
    pub fn new(ret: HostType, params: Vec<HostType>) -> Result<Self, CallableError> {
        let signature = Signature::new(params, ret);
        signature.validate()?;

        TYPE_CACHE.with(|cache| {
            let cached = cache.borrow().get(&signature).cloned();
            if let Some(ty) = cached {
                return Ok(ty);
            }

            let cif = Cif::new(
                signature.params.iter().map(|p| p.abi().ffi_type()),
                signature.ret.abi().ffi_type(),
            );
            let id = NEXT_TYPE_ID.with(|next| {
                let id = next.get();
                next.set(id + 1);
                id
            });
            debug!(id, signature = %signature, "synthesized callable type");

            let ty = CallableType {
                inner: Rc::new(TypeInner {
                    id,
                    signature: signature.clone(),
                    cif,
                }),
            };
            cache.borrow_mut().insert(signature, ty.clone());
            Ok(ty)
        })
    }

    /// Callable type matching a host function taking `A` and returning `R`
    pub fn of<A: Params, R: Marshal>() -> Result<Self, CallableError> {
        let signature = Signature::of::<A, R>();
        Self::new(signature.ret, signature.params)
    }

    pub fn signature(&self) -> &Signature {
        &self.inner.signature
    }

    /// Nominal name, unique per signature within a thread
    pub fn name(&self) -> String {
        format!("callable{}", self.inner.id)
    }

    pub fn same_type(&self, other: &CallableType) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn cif(&self) -> &Cif {
        &self.inner.cif
    }
}

impl PartialEq for CallableType {
    fn eq(&self, other: &Self) -> bool {
        self.same_type(other)
    }
}

impl fmt::Debug for CallableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableType")
            .field("name", &self.name())
            .field("signature", &self.inner.signature.to_string())
            .finish()
    }
}

/// Number of callable types cached on this thread
pub fn cached_types() -> usize {
    TYPE_CACHE.with(|cache| cache.borrow().len())
}

/// Raw-level call handler behind a native closure
pub(crate) type Dispatcher = Box<dyn Fn(&[RawValue]) -> Result<RawValue, Error>>;

struct Entry {
    ty: CallableType,
    label: String,
    dispatch: Dispatcher,
}

/// A host function exposed at a native code address
///
/// The address stays valid until this value is dropped.
pub struct NativeCallable {
    closure: *mut ffi_closure,
    code: CodePtr,
    entry: Box<Entry>,
}

impl NativeCallable {
    pub(crate) fn new(
        ty: CallableType,
        label: impl Into<String>,
        dispatch: Dispatcher,
    ) -> Result<Self, CallableError> {
        let entry = Box::new(Entry {
            ty,
            label: label.into(),
            dispatch,
        });

        let (closure, code) = unsafe { low::closure_alloc() };
        if closure.is_null() {
            return Err(CallableError::ClosureAlloc);
        }

        let userdata: *const Entry = &*entry;
        let prepared = unsafe {
            low::prep_closure(
                closure,
                entry.ty.cif().as_raw_ptr(),
                entry_point,
                userdata,
                code,
            )
        };
        if let Err(err) = prepared {
            unsafe { low::closure_free(closure) };
            return Err(CallableError::ClosurePrep(format!("{:?}", err)));
        }

        debug!(label = %entry.label, ty = %entry.ty.name(), "allocated native closure");
        Ok(Self {
            closure,
            code,
            entry,
        })
    }

    /// Address native code calls through
    pub fn address(&self) -> *const c_void {
        self.code.0 as *const c_void
    }

    pub fn callable_type(&self) -> &CallableType {
        &self.entry.ty
    }

    pub fn label(&self) -> &str {
        &self.entry.label
    }
}

impl Drop for NativeCallable {
    fn drop(&mut self) {
        unsafe { low::closure_free(self.closure) };
    }
}

impl fmt::Debug for NativeCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCallable")
            .field("label", &self.entry.label)
            .field("address", &self.address())
            .field("ty", &self.entry.ty)
            .finish()
    }
}

unsafe extern "C" fn entry_point(
    _cif: &ffi_cif,
    result: &mut c_void,
    args: *const *const c_void,
    entry: &Entry,
) {
    let signature = entry.ty.signature();
    let raw_args: Vec<RawValue> = signature
        .params
        .iter()
        .enumerate()
        .map(|(i, param)| unsafe { read_arg(*args.add(i), param.abi()) })
        .collect();

    let ret = signature.ret.abi();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| (entry.dispatch)(&raw_args)));
    let value = match outcome {
        Ok(Ok(value)) if value.abi() == ret => value,
        Ok(Ok(value)) => {
            fault::raise(
                MarshalError::TypeMismatch {
                    expected: format!("{:?}", ret),
                    found: format!("{:?}", value.abi()),
                }
                .into(),
            );
            RawValue::zero(ret)
        }
        Ok(Err(err)) => {
            fault::raise(err);
            RawValue::zero(ret)
        }
        Err(payload) => {
            fault::raise(Error::Panicked(panic_message(payload.as_ref())));
            RawValue::zero(ret)
        }
    };

    unsafe { write_return(result as *mut c_void, value) };
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

unsafe fn read_arg(slot: *const c_void, abi: AbiType) -> RawValue {
    unsafe {
        match abi {
            AbiType::Void => RawValue::Void,
            AbiType::Pointer => RawValue::Pointer(ptr::read_unaligned(slot as *const usize)),
            AbiType::I8 => RawValue::I8(ptr::read_unaligned(slot as *const i8)),
            AbiType::U8 => RawValue::U8(ptr::read_unaligned(slot as *const u8)),
            AbiType::I16 => RawValue::I16(ptr::read_unaligned(slot as *const i16)),
            AbiType::U16 => RawValue::U16(ptr::read_unaligned(slot as *const u16)),
            AbiType::I32 => RawValue::I32(ptr::read_unaligned(slot as *const i32)),
            AbiType::U32 => RawValue::U32(ptr::read_unaligned(slot as *const u32)),
            AbiType::I64 => RawValue::I64(ptr::read_unaligned(slot as *const i64)),
            AbiType::U64 => RawValue::U64(ptr::read_unaligned(slot as *const u64)),
            AbiType::F32 => RawValue::F32(ptr::read_unaligned(slot as *const f32)),
            AbiType::F64 => RawValue::F64(ptr::read_unaligned(slot as *const f64)),
        }
    }
}

/// Integer returns narrower than a register are widened to a full `ffi_arg`
unsafe fn write_return(slot: *mut c_void, value: RawValue) {
    unsafe {
        match value {
            RawValue::Void => {}
            RawValue::Pointer(v) => ptr::write_unaligned(slot as *mut usize, v),
            RawValue::I8(v) => ptr::write_unaligned(slot as *mut isize, v as isize),
            RawValue::U8(v) => ptr::write_unaligned(slot as *mut usize, v as usize),
            RawValue::I16(v) => ptr::write_unaligned(slot as *mut isize, v as isize),
            RawValue::U16(v) => ptr::write_unaligned(slot as *mut usize, v as usize),
            RawValue::I32(v) => ptr::write_unaligned(slot as *mut isize, v as isize),
            RawValue::U32(v) => ptr::write_unaligned(slot as *mut usize, v as usize),
            RawValue::I64(v) => ptr::write_unaligned(slot as *mut i64, v),
            RawValue::U64(v) => ptr::write_unaligned(slot as *mut u64, v),
            RawValue::F32(v) => ptr::write_unaligned(slot as *mut f32, v),
            RawValue::F64(v) => ptr::write_unaligned(slot as *mut f64, v),
        }
    }
}

/// A native function callable from host code
#[derive(Clone)]
pub struct ForeignFunction {
    address: *const c_void,
    ty: CallableType,
}

impl ForeignFunction {
    /// Interpret a native address as a function of the given type
    ///
    /// # Safety
    ///
    /// `address` must point to a function with the C signature described by
    /// `ty`, and must stay valid for as long as the result is called.
    pub unsafe fn from_raw(
        address: *const c_void,
        ty: &CallableType,
    ) -> Result<Self, CallableError> {
        if address.is_null() {
            return Err(CallableError::NullAddress);
        }
        Ok(Self {
            address,
            ty: ty.clone(),
        })
    }

    pub fn address(&self) -> *const c_void {
        self.address
    }

    pub fn callable_type(&self) -> &CallableType {
        &self.ty
    }

    /// Call with host values
    ///
    /// Strings are passed as temporary C strings, string buffers as
    /// temporary `char*` buffers of their capacity, read back afterwards.
    /// A fault raised by host code reached during the call is returned as
    /// this call's error.
    pub fn call(&self, args: &[Value]) -> Result<Value, Error> {
        let signature = self.ty.signature();
        if args.len() != signature.params.len() {
            return Err(MarshalError::ArityMismatch {
                expected: signature.params.len(),
                got: args.len(),
            }
            .into());
        }

        let mut outbound = Outbound::default();
        let raw_args = outbound.encode(&signature.params, args)?;
        let (result, fault) = fault::isolate(|| unsafe { self.call_raw(&raw_args) });
        outbound.finish();

        if let Some(err) = fault {
            return Err(err);
        }
        boundary::decode_return(result?, &signature.ret)
    }

    /// Call with raw boundary values
    ///
    /// # Safety
    ///
    /// Pointer arguments must be valid for whatever the native function
    /// does with them.
    pub unsafe fn call_raw(&self, args: &[RawValue]) -> Result<RawValue, MarshalError> {
        let signature = self.ty.signature();
        if args.len() != signature.params.len() {
            return Err(MarshalError::ArityMismatch {
                expected: signature.params.len(),
                got: args.len(),
            });
        }
        for (arg, param) in args.iter().zip(&signature.params) {
            if arg.abi() != param.abi() {
                return Err(MarshalError::TypeMismatch {
                    expected: param.to_string(),
                    found: format!("{:?}", arg.abi()),
                });
            }
        }

        let ffi_args: Vec<Arg> = args.iter().map(raw_arg).collect();
        let code = CodePtr::from_ptr(self.address);
        let cif = self.ty.cif();

        let value = unsafe {
            match signature.ret.abi() {
                AbiType::Void => {
                    cif.call::<()>(code, &ffi_args);
                    RawValue::Void
                }
                AbiType::Pointer => RawValue::Pointer(cif.call::<usize>(code, &ffi_args)),
                AbiType::I8 => RawValue::I8(cif.call::<isize>(code, &ffi_args) as i8),
                AbiType::U8 => RawValue::U8(cif.call::<usize>(code, &ffi_args) as u8),
                AbiType::I16 => RawValue::I16(cif.call::<isize>(code, &ffi_args) as i16),
                AbiType::U16 => RawValue::U16(cif.call::<usize>(code, &ffi_args) as u16),
                AbiType::I32 => RawValue::I32(cif.call::<isize>(code, &ffi_args) as i32),
                AbiType::U32 => RawValue::U32(cif.call::<usize>(code, &ffi_args) as u32),
                AbiType::I64 => RawValue::I64(cif.call::<i64>(code, &ffi_args)),
                AbiType::U64 => RawValue::U64(cif.call::<u64>(code, &ffi_args)),
                AbiType::F32 => RawValue::F32(cif.call::<f32>(code, &ffi_args)),
                AbiType::F64 => RawValue::F64(cif.call::<f64>(code, &ffi_args)),
            }
        };
        Ok(value)
    }

    /// View this function through a static Rust signature
    pub fn typed<A: Params, R: Marshal>(self) -> Result<TypedFunction<A, R>, MarshalError> {
        let expected = Signature::of::<A, R>();
        if *self.ty.signature() != expected {
            return Err(MarshalError::TypeMismatch {
                expected: expected.to_string(),
                found: self.ty.signature().to_string(),
            });
        }
        Ok(TypedFunction {
            inner: self,
            _marker: PhantomData,
        })
    }
}

impl fmt::Debug for ForeignFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignFunction")
            .field("address", &self.address)
            .field("ty", &self.ty)
            .finish()
    }
}

fn raw_arg(value: &RawValue) -> Arg {
    match value {
        RawValue::Void => Arg::new(&0usize),
        RawValue::Pointer(v) => Arg::new(v),
        RawValue::I8(v) => Arg::new(v),
        RawValue::U8(v) => Arg::new(v),
        RawValue::I16(v) => Arg::new(v),
        RawValue::U16(v) => Arg::new(v),
        RawValue::I32(v) => Arg::new(v),
        RawValue::U32(v) => Arg::new(v),
        RawValue::I64(v) => Arg::new(v),
        RawValue::U64(v) => Arg::new(v),
        RawValue::F32(v) => Arg::new(v),
        RawValue::F64(v) => Arg::new(v),
    }
}

/// A foreign function with a statically known signature
pub struct TypedFunction<A, R> {
    inner: ForeignFunction,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A: Params, R: Marshal> TypedFunction<A, R> {
    pub fn call(&self, args: A) -> Result<R, Error> {
        let value = self.inner.call(&args.into_values())?;
        Ok(R::from_value(value)?)
    }

    pub fn untyped(&self) -> &ForeignFunction {
        &self.inner
    }
}

impl<A, R> Clone for TypedFunction<A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

/// Expose a host closure to native code
pub fn wrap<A, R, F>(f: F) -> Result<NativeCallable, Error>
where
    A: Params,
    R: Marshal,
    F: HostFn<A, R>,
{
    let ty = CallableType::of::<A, R>()?;
    wrap_labelled(&ty, "closure", move |args: Vec<Value>| {
        let args = A::from_values(args)?;
        Ok(f.invoke(args).into_value())
    })
}

/// Expose a dynamically typed host closure under an explicit callable type
pub fn wrap_dynamic<F>(ty: &CallableType, f: F) -> Result<NativeCallable, Error>
where
    F: Fn(Vec<Value>) -> Result<Value, Error> + 'static,
{
    wrap_labelled(ty, "closure", f)
}

pub(crate) fn wrap_labelled<F>(
    ty: &CallableType,
    label: &str,
    f: F,
) -> Result<NativeCallable, Error>
where
    F: Fn(Vec<Value>) -> Result<Value, Error> + 'static,
{
    let signature = ty.signature();
    let plan = MarshalPlan::new(&signature.params, &signature.ret);
    let dispatch = boundary::dispatcher(plan, None, Box::new(f))?;
    Ok(NativeCallable::new(ty.clone(), label, dispatch)?)
}

/// Interpret a native address as a host-callable function
///
/// # Safety
///
/// See [`ForeignFunction::from_raw`].
pub unsafe fn reverse_wrap(
    address: *const c_void,
    ty: &CallableType,
) -> Result<ForeignFunction, CallableError> {
    unsafe { ForeignFunction::from_raw(address, ty) }
}
