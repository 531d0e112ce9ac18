//! Boundary conversions between raw C values and host values
//!
//! Inbound (native code calling a host closure or thunk):
//! - `const char*` is copied into a `String`; NULL is rejected
//! - `char*` becomes a `StringBuffer` sized by the current C string and is
//!   written back, truncated, when the host call returns
//! - handles are resolved through the session registry
//! - returned strings are owned by the dispatcher and stay valid for as long
//!   as its closure lives, which for a session is the whole session
//! - returned objects get a fresh handle
//!
//! Outbound (host code calling native code) is handled by `Outbound`.

use crate::error::{CallableError, Error, MarshalError};
use crate::ffi::callable::Dispatcher;
use crate::handle::{Handle, HandleRegistry};
use crate::marshal::{HostType, MarshalPlan, MarshalSlot, RawValue, StringBuffer, Value};
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::rc::Rc;

/// Host-side call behind a dispatcher
pub(crate) type Invoke = Box<dyn Fn(Vec<Value>) -> Result<Value, Error>>;

/// Build the raw-level dispatcher for a marshal plan
///
/// Plans containing opaque slots need a registry to resolve and allocate
/// handles.
pub(crate) fn dispatcher(
    plan: MarshalPlan,
    registry: Option<Rc<HandleRegistry>>,
    invoke: Invoke,
) -> Result<Dispatcher, CallableError> {
    if registry.is_none() {
        if let Some((i, slot)) = plan.params.iter().enumerate().find(|(_, s)| s.opaque) {
            return Err(CallableError::OpaqueSignature {
                position: format!("parameter {}", i),
                ty: slot.ty.to_string(),
            });
        }
        if plan.ret.opaque {
            return Err(CallableError::OpaqueSignature {
                position: "return".to_string(),
                ty: plan.ret.ty.to_string(),
            });
        }
    }

    let returned: RefCell<Vec<CString>> = RefCell::new(Vec::new());
    Ok(Box::new(move |raw: &[RawValue]| {
        if raw.len() != plan.params.len() {
            return Err(MarshalError::ArityMismatch {
                expected: plan.params.len(),
                got: raw.len(),
            }
            .into());
        }

        let mut write_backs = Vec::new();
        let mut args = Vec::with_capacity(raw.len());
        for (slot, value) in plan.params.iter().zip(raw) {
            args.push(accept(slot, *value, registry.as_deref(), &mut write_backs)?);
        }

        let result = invoke(args);
        for write_back in &write_backs {
            unsafe { write_back.apply() };
        }
        give(&plan.ret, result?, registry.as_deref(), &returned)
    }))
}

fn pointer(raw: RawValue, ty: &HostType) -> Result<usize, MarshalError> {
    match raw {
        RawValue::Pointer(address) => Ok(address),
        other => Err(MarshalError::TypeMismatch {
            expected: ty.to_string(),
            found: format!("{:?}", other.abi()),
        }),
    }
}

/// Copy a C string, rejecting NULL
///
/// # Safety
///
/// A non-null `address` must point to a NUL-terminated string.
unsafe fn read_c_string(address: usize) -> Result<String, MarshalError> {
    if address == 0 {
        return Err(MarshalError::NullString);
    }
    let text = unsafe { CStr::from_ptr(address as *const c_char) };
    Ok(text.to_string_lossy().into_owned())
}

struct WriteBack {
    address: *mut u8,
    buffer: StringBuffer,
}

impl WriteBack {
    /// Copy the buffer contents back into native memory
    ///
    /// # Safety
    ///
    /// `address` must have room for `capacity + 1` bytes.
    unsafe fn apply(&self) {
        let text = self.buffer.truncated();
        unsafe {
            ptr::copy_nonoverlapping(text.as_ptr(), self.address, text.len());
            *self.address.add(text.len()) = 0;
        }
    }
}

fn accept(
    slot: &MarshalSlot,
    raw: RawValue,
    registry: Option<&HandleRegistry>,
    write_backs: &mut Vec<WriteBack>,
) -> Result<Value, Error> {
    match &slot.ty {
        HostType::Object(class) => {
            let address = pointer(raw, &slot.ty)?;
            let registry = registry.ok_or_else(|| CallableError::OpaqueSignature {
                position: "parameter".to_string(),
                ty: slot.ty.to_string(),
            })?;
            let object = registry.resolve(Handle::from_raw(address))?;
            object.expect_class(class)?;
            Ok(Value::Object(object))
        }
        HostType::String => {
            let address = pointer(raw, &slot.ty)?;
            Ok(Value::String(unsafe { read_c_string(address) }?))
        }
        HostType::StringBuffer => {
            let address = pointer(raw, &slot.ty)?;
            if address == 0 {
                return Err(MarshalError::NullString.into());
            }
            let bytes = unsafe { CStr::from_ptr(address as *const c_char) }.to_bytes();
            let buffer =
                StringBuffer::from_text(String::from_utf8_lossy(bytes).into_owned(), bytes.len());
            write_backs.push(WriteBack {
                address: address as *mut u8,
                buffer: buffer.clone(),
            });
            Ok(Value::StringBuffer(buffer))
        }
        ty => Ok(Value::from_raw(raw, ty)?),
    }
}

fn give(
    slot: &MarshalSlot,
    value: Value,
    registry: Option<&HandleRegistry>,
    returned: &RefCell<Vec<CString>>,
) -> Result<RawValue, Error> {
    match (&slot.ty, value) {
        (HostType::Void, _) => Ok(RawValue::Void),
        (HostType::Object(class), Value::Object(object)) => {
            object.expect_class(class)?;
            let registry = registry.ok_or_else(|| CallableError::OpaqueSignature {
                position: "return".to_string(),
                ty: slot.ty.to_string(),
            })?;
            Ok(RawValue::Pointer(registry.allocate(object).raw()))
        }
        (HostType::String, Value::String(text)) => retain(returned, text),
        (HostType::StringBuffer, Value::StringBuffer(buffer)) => {
            retain(returned, buffer.to_string())
        }
        (ty, value) => direct(ty, &value),
    }
}

/// Hand a string to native code; earlier strings stay valid
fn retain(returned: &RefCell<Vec<CString>>, text: String) -> Result<RawValue, Error> {
    let text = CString::new(text).map_err(|_| MarshalError::InteriorNul)?;
    // The heap buffer does not move when the CString itself is moved.
    let address = text.as_ptr() as usize;
    returned.borrow_mut().push(text);
    Ok(RawValue::Pointer(address))
}

fn direct(ty: &HostType, value: &Value) -> Result<RawValue, Error> {
    value
        .to_raw()
        .filter(|raw| raw.abi() == ty.abi())
        .ok_or_else(|| {
            MarshalError::TypeMismatch {
                expected: ty.to_string(),
                found: value.kind(),
            }
            .into()
        })
}

/// Temporary native storage for one host → native call
#[derive(Default)]
pub(crate) struct Outbound {
    strings: Vec<CString>,
    buffers: Vec<(Vec<u8>, StringBuffer)>,
}

impl Outbound {
    pub(crate) fn encode(
        &mut self,
        params: &[HostType],
        args: &[Value],
    ) -> Result<Vec<RawValue>, Error> {
        params
            .iter()
            .zip(args)
            .map(|(ty, value)| self.encode_one(ty, value))
            .collect()
    }

    fn encode_one(&mut self, ty: &HostType, value: &Value) -> Result<RawValue, Error> {
        match (ty, value) {
            (HostType::String, Value::String(text)) => {
                let text = CString::new(text.as_str()).map_err(|_| MarshalError::InteriorNul)?;
                let address = text.as_ptr() as usize;
                self.strings.push(text);
                Ok(RawValue::Pointer(address))
            }
            (HostType::StringBuffer, Value::StringBuffer(buffer)) => {
                let mut bytes = vec![0u8; buffer.capacity() + 1];
                let text = buffer.truncated();
                bytes[..text.len()].copy_from_slice(text.as_bytes());
                let address = bytes.as_mut_ptr() as usize;
                self.buffers.push((bytes, buffer.clone()));
                Ok(RawValue::Pointer(address))
            }
            (ty, value) => direct(ty, value),
        }
    }

    /// Read native edits back into the host string buffers
    pub(crate) fn finish(&self) {
        for (bytes, buffer) in &self.buffers {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            buffer.set(&String::from_utf8_lossy(&bytes[..end]));
        }
    }
}

/// Convert a native return value into a host value
pub(crate) fn decode_return(raw: RawValue, ty: &HostType) -> Result<Value, Error> {
    match ty {
        HostType::String => {
            let address = pointer(raw, ty)?;
            Ok(Value::String(unsafe { read_c_string(address) }?))
        }
        HostType::StringBuffer => {
            let address = pointer(raw, ty)?;
            let text = unsafe { read_c_string(address) }?;
            let capacity = text.len();
            Ok(Value::StringBuffer(StringBuffer::from_text(text, capacity)))
        }
        ty => Ok(Value::from_raw(raw, ty)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{HostObject, ObjectType};
    use crate::host_class;

    #[derive(Clone)]
    struct Point;
    host_class!(Point);

    fn echo() -> Invoke {
        Box::new(|mut args: Vec<Value>| Ok(args.pop().unwrap_or(Value::Void)))
    }

    #[test]
    fn test_opaque_plan_needs_registry() {
        let point = HostType::Object(ObjectType::value::<Point>());
        let plan = MarshalPlan::new(&[point], &HostType::Void);
        assert!(matches!(
            dispatcher(plan, None, echo()),
            Err(CallableError::OpaqueSignature { .. })
        ));
    }

    #[test]
    fn test_handles_resolved_and_allocated() {
        let registry = Rc::new(HandleRegistry::new());
        let point = HostType::Object(ObjectType::value::<Point>());
        let plan = MarshalPlan::new(&[point.clone()], &point);
        let dispatch = dispatcher(plan, Some(registry.clone()), echo()).unwrap();

        let handle = registry.allocate(HostObject::value(Point));
        let returned = dispatch(&[RawValue::Pointer(handle.raw())]).unwrap();
        let returned = match returned {
            RawValue::Pointer(raw) => Handle::from_raw(raw),
            other => panic!("expected pointer, got {:?}", other),
        };
        assert_ne!(returned, handle);
        assert!(registry
            .resolve(returned)
            .unwrap()
            .ptr_eq(&registry.resolve(handle).unwrap()));
    }

    #[test]
    fn test_unknown_handle_fails() {
        let registry = Rc::new(HandleRegistry::new());
        let point = HostType::Object(ObjectType::value::<Point>());
        let plan = MarshalPlan::new(&[point], &HostType::Void);
        let dispatch = dispatcher(plan, Some(registry), echo()).unwrap();
        assert!(matches!(
            dispatch(&[RawValue::Pointer(0x999)]),
            Err(Error::Handle(_))
        ));
    }

    #[test]
    fn test_null_string_rejected() {
        let plan = MarshalPlan::new(&[HostType::String], &HostType::Void);
        let dispatch = dispatcher(plan, None, echo()).unwrap();
        assert!(matches!(
            dispatch(&[RawValue::Pointer(0)]),
            Err(Error::Marshal(MarshalError::NullString))
        ));
    }

    #[test]
    fn test_returned_string_retained() {
        let plan = MarshalPlan::new(&[HostType::String], &HostType::String);
        let dispatch = dispatcher(plan, None, echo()).unwrap();
        let input = CString::new("kept").unwrap();
        let raw = dispatch(&[RawValue::Pointer(input.as_ptr() as usize)]).unwrap();
        let address = match raw {
            RawValue::Pointer(address) => address,
            other => panic!("expected pointer, got {:?}", other),
        };
        assert_ne!(address, input.as_ptr() as usize);
        let text = unsafe { CStr::from_ptr(address as *const c_char) };
        assert_eq!(text.to_str().unwrap(), "kept");
    }

    #[test]
    fn test_earlier_returned_strings_stay_valid() {
        let plan = MarshalPlan::new(&[HostType::String], &HostType::String);
        let dispatch = dispatcher(plan, None, echo()).unwrap();
        let first = CString::new("first-object-name").unwrap();
        let second = CString::new("second").unwrap();

        let a = dispatch(&[RawValue::Pointer(first.as_ptr() as usize)]).unwrap();
        let b = dispatch(&[RawValue::Pointer(second.as_ptr() as usize)]).unwrap();
        let (a, b) = match (a, b) {
            (RawValue::Pointer(a), RawValue::Pointer(b)) => (a, b),
            other => panic!("expected pointers, got {:?}", other),
        };
        let read = |address: usize| unsafe { CStr::from_ptr(address as *const c_char) };
        assert_eq!(read(a).to_str().unwrap(), "first-object-name");
        assert_eq!(read(b).to_str().unwrap(), "second");
    }

    #[test]
    fn test_buffer_write_back_truncates() {
        let plan = MarshalPlan::new(&[HostType::StringBuffer], &HostType::Void);
        let dispatch = dispatcher(
            plan,
            None,
            Box::new(|args: Vec<Value>| {
                if let Some(Value::StringBuffer(buffer)) = args.first() {
                    buffer.set("overflowing");
                }
                Ok(Value::Void)
            }),
        )
        .unwrap();
        let mut native = *b"abcd\0";
        dispatch(&[RawValue::Pointer(native.as_mut_ptr() as usize)]).unwrap();
        assert_eq!(&native, b"over\0");
    }

    #[test]
    fn test_outbound_buffer_read_back() {
        let buffer = StringBuffer::from_text("xy", 4);
        let mut outbound = Outbound::default();
        let raw = outbound
            .encode(&[HostType::StringBuffer], &[Value::StringBuffer(buffer.clone())])
            .unwrap();
        let address = match raw[0] {
            RawValue::Pointer(address) => address as *mut u8,
            other => panic!("expected pointer, got {:?}", other),
        };
        unsafe {
            ptr::copy_nonoverlapping(b"wxyz".as_ptr(), address, 4);
        }
        outbound.finish();
        assert_eq!(buffer.to_string(), "wxyz");
    }
}
