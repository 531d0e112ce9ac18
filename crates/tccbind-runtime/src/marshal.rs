//! Marshaling policy - which host types cross the boundary directly
//!
//! Defines:
//! - `HostType`: the host-side view of a parameter or return type
//! - `AbiType`: the C calling-convention type it occupies on the boundary
//! - `classify`: the direct/opaque decision over a fixed allow-list
//! - `Value` / `RawValue`: host values and raw boundary values
//! - `Marshal`: conversion between Rust types and `Value`
//!
//! Type mapping:
//! - integers, floats → the same-width C type
//! - `char` → `uint32_t` code point
//! - `String` → `const char*`
//! - `StringBuffer` → `char*`
//! - enums → their underlying integer
//! - host objects → opaque `void*` handle

use crate::error::MarshalError;
use crate::handle::{HostClass, HostObject, ObjectType, Ref, Val};
use libffi::middle::Type;
use std::cell::RefCell;
use std::fmt;
use std::os::raw::c_void;
use std::rc::Rc;

/// C calling-convention types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbiType {
    Void,
    Pointer,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl AbiType {
    /// libffi type descriptor for this ABI type
    pub fn ffi_type(self) -> Type {
        match self {
            AbiType::Void => Type::void(),
            AbiType::Pointer => Type::pointer(),
            AbiType::I8 => Type::i8(),
            AbiType::U8 => Type::u8(),
            AbiType::I16 => Type::i16(),
            AbiType::U16 => Type::u16(),
            AbiType::I32 => Type::i32(),
            AbiType::U32 => Type::u32(),
            AbiType::I64 => Type::i64(),
            AbiType::U64 => Type::u64(),
            AbiType::F32 => Type::f32(),
            AbiType::F64 => Type::f64(),
        }
    }

    /// C spelling
    pub fn c_name(self) -> &'static str {
        match self {
            AbiType::Void => "void",
            AbiType::Pointer => "void*",
            AbiType::I8 => "int8_t",
            AbiType::U8 => "uint8_t",
            AbiType::I16 => "int16_t",
            AbiType::U16 => "uint16_t",
            AbiType::I32 => "int32_t",
            AbiType::U32 => "uint32_t",
            AbiType::I64 => "int64_t",
            AbiType::U64 => "uint64_t",
            AbiType::F32 => "float",
            AbiType::F64 => "double",
        }
    }
}

/// Host-side parameter and return types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostType {
    Void,
    /// Raw address, passed through untouched
    Pointer,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    Char,
    F32,
    F64,
    String,
    StringBuffer,
    /// Enumeration crossing as its underlying integer
    Enum { name: &'static str, repr: AbiType },
    /// Host object crossing as a handle
    Object(ObjectType),
}

impl HostType {
    /// The boundary type this host type occupies
    pub fn abi(&self) -> AbiType {
        match self {
            HostType::Void => AbiType::Void,
            HostType::Pointer => AbiType::Pointer,
            HostType::I8 => AbiType::I8,
            HostType::U8 => AbiType::U8,
            HostType::I16 => AbiType::I16,
            HostType::U16 => AbiType::U16,
            HostType::I32 => AbiType::I32,
            HostType::U32 => AbiType::U32,
            HostType::I64 => AbiType::I64,
            HostType::U64 => AbiType::U64,
            HostType::Char => AbiType::U32,
            HostType::F32 => AbiType::F32,
            HostType::F64 => AbiType::F64,
            HostType::String | HostType::StringBuffer => AbiType::Pointer,
            HostType::Enum { repr, .. } => *repr,
            HostType::Object(_) => AbiType::Pointer,
        }
    }

    /// Name used when encoding parameter lists into symbol names
    pub fn name(&self) -> &'static str {
        match self {
            HostType::Void => "void",
            HostType::Pointer => "pointer",
            HostType::I8 => "i8",
            HostType::U8 => "u8",
            HostType::I16 => "i16",
            HostType::U16 => "u16",
            HostType::I32 => "i32",
            HostType::U32 => "u32",
            HostType::I64 => "i64",
            HostType::U64 => "u64",
            HostType::Char => "char",
            HostType::F32 => "f32",
            HostType::F64 => "f64",
            HostType::String => "string",
            HostType::StringBuffer => "stringbuffer",
            HostType::Enum { name, .. } => name,
            HostType::Object(class) => class.name(),
        }
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of the marshaling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Passed by value in its native representation
    Direct,
    /// Passed as a handle
    Opaque,
}

/// Classify a host type against the direct allow-list
pub fn classify(ty: &HostType) -> Classification {
    match ty {
        HostType::Object(_) => Classification::Opaque,
        _ => Classification::Direct,
    }
}

/// Marshaling decision for one parameter or return slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarshalSlot {
    pub ty: HostType,
    pub opaque: bool,
}

impl MarshalSlot {
    pub fn new(ty: HostType) -> Self {
        let opaque = classify(&ty) == Classification::Opaque;
        Self { ty, opaque }
    }

    /// Type seen by native code
    pub fn boundary_type(&self) -> HostType {
        if self.opaque {
            HostType::Pointer
        } else {
            self.ty.clone()
        }
    }
}

/// Marshaling decisions for a whole signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarshalPlan {
    pub params: Vec<MarshalSlot>,
    pub ret: MarshalSlot,
}

impl MarshalPlan {
    pub fn new(params: &[HostType], ret: &HostType) -> Self {
        Self {
            params: params.iter().cloned().map(MarshalSlot::new).collect(),
            ret: MarshalSlot::new(ret.clone()),
        }
    }

    /// True when nothing in the signature needs a handle
    pub fn is_direct(&self) -> bool {
        !self.ret.opaque && self.params.iter().all(|slot| !slot.opaque)
    }

    pub fn boundary_params(&self) -> Vec<HostType> {
        self.params.iter().map(MarshalSlot::boundary_type).collect()
    }

    pub fn boundary_ret(&self) -> HostType {
        self.ret.boundary_type()
    }
}

/// A raw value as it sits in a native argument or return slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    Void,
    Pointer(usize),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl RawValue {
    /// The zero value for an ABI type
    pub fn zero(abi: AbiType) -> Self {
        match abi {
            AbiType::Void => RawValue::Void,
            AbiType::Pointer => RawValue::Pointer(0),
            AbiType::I8 => RawValue::I8(0),
            AbiType::U8 => RawValue::U8(0),
            AbiType::I16 => RawValue::I16(0),
            AbiType::U16 => RawValue::U16(0),
            AbiType::I32 => RawValue::I32(0),
            AbiType::U32 => RawValue::U32(0),
            AbiType::I64 => RawValue::I64(0),
            AbiType::U64 => RawValue::U64(0),
            AbiType::F32 => RawValue::F32(0.0),
            AbiType::F64 => RawValue::F64(0.0),
        }
    }

    pub fn abi(&self) -> AbiType {
        match self {
            RawValue::Void => AbiType::Void,
            RawValue::Pointer(_) => AbiType::Pointer,
            RawValue::I8(_) => AbiType::I8,
            RawValue::U8(_) => AbiType::U8,
            RawValue::I16(_) => AbiType::I16,
            RawValue::U16(_) => AbiType::U16,
            RawValue::I32(_) => AbiType::I32,
            RawValue::U32(_) => AbiType::U32,
            RawValue::I64(_) => AbiType::I64,
            RawValue::U64(_) => AbiType::U64,
            RawValue::F32(_) => AbiType::F32,
            RawValue::F64(_) => AbiType::F64,
        }
    }

    /// Integer payload widened to i64
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            RawValue::I8(v) => Some(v as i64),
            RawValue::U8(v) => Some(v as i64),
            RawValue::I16(v) => Some(v as i64),
            RawValue::U16(v) => Some(v as i64),
            RawValue::I32(v) => Some(v as i64),
            RawValue::U32(v) => Some(v as i64),
            RawValue::I64(v) => Some(v),
            RawValue::U64(v) => Some(v as i64),
            RawValue::Pointer(v) => Some(v as i64),
            _ => None,
        }
    }
}

/// Growable character buffer shared between host code and a native buffer
///
/// Clones share the same text. When native code passes a `char*` buffer,
/// edits made by host code are copied back into it after the call,
/// truncated to `capacity()` bytes.
#[derive(Clone, Default)]
pub struct StringBuffer {
    text: Rc<RefCell<String>>,
    capacity: usize,
}

impl StringBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            text: Rc::new(RefCell::new(String::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn from_text(text: impl Into<String>, capacity: usize) -> Self {
        Self {
            text: Rc::new(RefCell::new(text.into())),
            capacity,
        }
    }

    /// Bytes available in the native buffer, excluding the terminator
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.text.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.borrow().is_empty()
    }

    pub fn set(&self, text: &str) {
        let mut current = self.text.borrow_mut();
        current.clear();
        current.push_str(text);
    }

    pub fn push_str(&self, text: &str) {
        self.text.borrow_mut().push_str(text);
    }

    pub fn clear(&self) {
        self.text.borrow_mut().clear();
    }

    /// Contents truncated to the buffer capacity on a char boundary
    pub fn truncated(&self) -> String {
        let text = self.text.borrow();
        let mut end = text.len().min(self.capacity);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    }
}

impl fmt::Display for StringBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text.borrow())
    }
}

impl fmt::Debug for StringBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringBuffer")
            .field("text", &*self.text.borrow())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl PartialEq for StringBuffer {
    fn eq(&self, other: &Self) -> bool {
        *self.text.borrow() == *other.text.borrow()
    }
}

/// A host value flowing into or out of a call
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Pointer(*mut c_void),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Char(char),
    F32(f32),
    F64(f64),
    String(String),
    StringBuffer(StringBuffer),
    Object(HostObject),
}

impl Value {
    /// Short description used in type mismatch errors
    pub fn kind(&self) -> String {
        match self {
            Value::Void => "void".to_string(),
            Value::Pointer(_) => "pointer".to_string(),
            Value::I8(_) => "i8".to_string(),
            Value::U8(_) => "u8".to_string(),
            Value::I16(_) => "i16".to_string(),
            Value::U16(_) => "u16".to_string(),
            Value::I32(_) => "i32".to_string(),
            Value::U32(_) => "u32".to_string(),
            Value::I64(_) => "i64".to_string(),
            Value::U64(_) => "u64".to_string(),
            Value::Char(_) => "char".to_string(),
            Value::F32(_) => "f32".to_string(),
            Value::F64(_) => "f64".to_string(),
            Value::String(_) => "string".to_string(),
            Value::StringBuffer(_) => "stringbuffer".to_string(),
            Value::Object(object) => object.class().name().to_string(),
        }
    }

    /// Convert a direct, non-string value into its raw form
    pub fn to_raw(&self) -> Option<RawValue> {
        Some(match *self {
            Value::Void => RawValue::Void,
            Value::Pointer(p) => RawValue::Pointer(p as usize),
            Value::I8(v) => RawValue::I8(v),
            Value::U8(v) => RawValue::U8(v),
            Value::I16(v) => RawValue::I16(v),
            Value::U16(v) => RawValue::U16(v),
            Value::I32(v) => RawValue::I32(v),
            Value::U32(v) => RawValue::U32(v),
            Value::I64(v) => RawValue::I64(v),
            Value::U64(v) => RawValue::U64(v),
            Value::Char(c) => RawValue::U32(c as u32),
            Value::F32(v) => RawValue::F32(v),
            Value::F64(v) => RawValue::F64(v),
            _ => return None,
        })
    }

    /// Interpret a raw value as a direct, non-string host type
    pub fn from_raw(raw: RawValue, ty: &HostType) -> Result<Value, MarshalError> {
        let mismatch = || MarshalError::TypeMismatch {
            expected: ty.to_string(),
            found: format!("{:?}", raw.abi()),
        };
        Ok(match (ty, raw) {
            (HostType::Void, _) => Value::Void,
            (HostType::Pointer, RawValue::Pointer(p)) => Value::Pointer(p as *mut c_void),
            (HostType::I8, RawValue::I8(v)) => Value::I8(v),
            (HostType::U8, RawValue::U8(v)) => Value::U8(v),
            (HostType::I16, RawValue::I16(v)) => Value::I16(v),
            (HostType::U16, RawValue::U16(v)) => Value::U16(v),
            (HostType::I32, RawValue::I32(v)) => Value::I32(v),
            (HostType::U32, RawValue::U32(v)) => Value::U32(v),
            (HostType::I64, RawValue::I64(v)) => Value::I64(v),
            (HostType::U64, RawValue::U64(v)) => Value::U64(v),
            (HostType::Char, RawValue::U32(v)) => {
                Value::Char(char::from_u32(v).ok_or(MarshalError::InvalidChar(v))?)
            }
            (HostType::F32, RawValue::F32(v)) => Value::F32(v),
            (HostType::F64, RawValue::F64(v)) => Value::F64(v),
            (HostType::Enum { repr, .. }, raw) if raw.abi() == *repr => {
                let as_int = HostType::from_abi(*repr).ok_or_else(mismatch)?;
                return Value::from_raw(raw, &as_int);
            }
            _ => return Err(mismatch()),
        })
    }
}

impl HostType {
    /// Integer or float host type with the given ABI layout
    fn from_abi(abi: AbiType) -> Option<HostType> {
        Some(match abi {
            AbiType::I8 => HostType::I8,
            AbiType::U8 => HostType::U8,
            AbiType::I16 => HostType::I16,
            AbiType::U16 => HostType::U16,
            AbiType::I32 => HostType::I32,
            AbiType::U32 => HostType::U32,
            AbiType::I64 => HostType::I64,
            AbiType::U64 => HostType::U64,
            _ => return None,
        })
    }
}

/// Rust types that can appear in a bound signature
pub trait Marshal: Sized + 'static {
    fn host_type() -> HostType;

    fn into_value(self) -> Value;

    fn from_value(value: Value) -> Result<Self, MarshalError>;
}

fn mismatch<T: Marshal>(found: &Value) -> MarshalError {
    MarshalError::TypeMismatch {
        expected: T::host_type().to_string(),
        found: found.kind(),
    }
}

macro_rules! marshal_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Marshal for $ty {
                fn host_type() -> HostType {
                    HostType::$variant
                }

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: Value) -> Result<Self, MarshalError> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(mismatch::<Self>(&other)),
                    }
                }
            }
        )*
    };
}

marshal_scalar! {
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    char => Char,
    f32 => F32,
    f64 => F64,
    String => String,
    StringBuffer => StringBuffer,
}

impl Marshal for () {
    fn host_type() -> HostType {
        HostType::Void
    }

    fn into_value(self) -> Value {
        Value::Void
    }

    fn from_value(value: Value) -> Result<Self, MarshalError> {
        match value {
            Value::Void => Ok(()),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl Marshal for *mut c_void {
    fn host_type() -> HostType {
        HostType::Pointer
    }

    fn into_value(self) -> Value {
        Value::Pointer(self)
    }

    fn from_value(value: Value) -> Result<Self, MarshalError> {
        match value {
            Value::Pointer(p) => Ok(p),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl<T: HostClass> Marshal for Ref<T> {
    fn host_type() -> HostType {
        HostType::Object(ObjectType::reference::<T>())
    }

    fn into_value(self) -> Value {
        Value::Object(self.into_object())
    }

    fn from_value(value: Value) -> Result<Self, MarshalError> {
        match value {
            Value::Object(object) => Ref::from_object(object),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl<T: HostClass + Clone> Marshal for Val<T> {
    fn host_type() -> HostType {
        HostType::Object(ObjectType::value::<T>())
    }

    fn into_value(self) -> Value {
        Value::Object(HostObject::value(self.0))
    }

    fn from_value(value: Value) -> Result<Self, MarshalError> {
        let object = match value {
            Value::Object(object) => object,
            other => return Err(mismatch::<Self>(&other)),
        };
        object.expect_class(&ObjectType::value::<T>())?;
        let guard = object.try_borrow().map_err(|_| MarshalError::TypeMismatch {
            expected: T::NAME.to_string(),
            found: "busy instance".to_string(),
        })?;
        let copied = guard.downcast_ref::<T>().map(|v| Val(v.clone()));
        copied.ok_or_else(|| mismatch::<Self>(&Value::Object(object.clone())))
    }
}

/// Make a fieldless enum usable in bound signatures
///
/// The enum crosses the boundary as its underlying integer. Unknown
/// discriminants coming from native code are rejected.
///
/// ```
/// use tccbind_runtime::host_enum;
///
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// #[repr(i32)]
/// enum Mode { Fast = 1, Safe = 2 }
///
/// host_enum!(Mode: i32 { Fast, Safe });
/// ```
#[macro_export]
macro_rules! host_enum {
    ($ty:ident : $repr:ty { $($variant:ident),+ $(,)? }) => {
        impl $crate::Marshal for $ty {
            fn host_type() -> $crate::HostType {
                $crate::HostType::Enum {
                    name: stringify!($ty),
                    repr: <$repr as $crate::Marshal>::host_type().abi(),
                }
            }

            fn into_value(self) -> $crate::Value {
                <$repr as $crate::Marshal>::into_value(self as $repr)
            }

            fn from_value(value: $crate::Value) -> Result<Self, $crate::MarshalError> {
                let raw = <$repr as $crate::Marshal>::from_value(value)?;
                $(
                    if raw == $ty::$variant as $repr {
                        return Ok($ty::$variant);
                    }
                )+
                Err($crate::MarshalError::InvalidEnum {
                    name: stringify!($ty),
                    value: raw as i64,
                })
            }
        }
    };
}
