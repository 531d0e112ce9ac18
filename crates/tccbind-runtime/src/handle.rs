//! Opaque handles for host objects held by native code
//!
//! Host values that cannot cross the boundary directly are parked in a
//! `HandleRegistry` and native code receives an address-sized `Handle`
//! instead. A handle stays valid until it is released; resolving or
//! releasing an unknown handle is always an error.
//!
//! Nothing reclaims a handle automatically. Native code owns every handle
//! it receives and must hand it back through the release symbol.

use crate::error::{Error, HandleError, MarshalError};
use std::any::{Any, TypeId};
use std::cell::{self, Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::os::raw::c_void;
use std::rc::Rc;
use tracing::debug;

/// A Rust type that can be described to native code
pub trait HostClass: 'static {
    /// Class name used in generated symbol names
    const NAME: &'static str;
}

/// Implement `HostClass` for a type
///
/// ```
/// use tccbind_runtime::host_class;
///
/// struct Counter(i32);
/// host_class!(Counter);
///
/// trait Shape { fn area(&self) -> f64; }
/// host_class!(Box<dyn Shape> as "Shape");
/// ```
#[macro_export]
macro_rules! host_class {
    ($ty:ty as $name:expr) => {
        impl $crate::HostClass for $ty {
            const NAME: &'static str = $name;
        }
    };
    ($ty:ty) => {
        impl $crate::HostClass for $ty {
            const NAME: &'static str = stringify!($ty);
        }
    };
}

/// How instances of a class behave when they cross the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Semantics {
    /// One shared instance; members run against the live object
    Reference,
    /// Copied out for every call; edits never reach the stored instance
    Value,
}

/// Runtime identity of a bindable class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectType {
    name: &'static str,
    type_id: TypeId,
    semantics: Semantics,
}

impl ObjectType {
    pub fn reference<T: HostClass>() -> Self {
        Self {
            name: T::NAME,
            type_id: TypeId::of::<T>(),
            semantics: Semantics::Reference,
        }
    }

    pub fn value<T: HostClass + Clone>() -> Self {
        Self {
            name: T::NAME,
            type_id: TypeId::of::<T>(),
            semantics: Semantics::Value,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn semantics(&self) -> Semantics {
        self.semantics
    }

    /// Check whether this class describes `T`
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

type Copier = fn(&dyn Any) -> Option<Box<dyn Any>>;

fn copy_any<T: Clone + 'static>(value: &dyn Any) -> Option<Box<dyn Any>> {
    value
        .downcast_ref::<T>()
        .map(|v| Box::new(v.clone()) as Box<dyn Any>)
}

/// A type-erased host instance
#[derive(Clone)]
pub struct HostObject {
    inner: Rc<RefCell<dyn Any>>,
    class: ObjectType,
    copier: Option<Copier>,
}

impl HostObject {
    /// Wrap a shared instance of a reference class
    pub fn reference<T: HostClass>(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(value)),
            class: ObjectType::reference::<T>(),
            copier: None,
        }
    }

    /// Wrap an instance of a value class
    pub fn value<T: HostClass + Clone>(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(value)),
            class: ObjectType::value::<T>(),
            copier: Some(copy_any::<T>),
        }
    }

    pub fn class(&self) -> &ObjectType {
        &self.class
    }

    /// Check that this object is an instance of `expected`
    pub fn expect_class(&self, expected: &ObjectType) -> Result<(), MarshalError> {
        if &self.class == expected {
            Ok(())
        } else {
            Err(MarshalError::TypeMismatch {
                expected: expected.name().to_string(),
                found: self.class.name().to_string(),
            })
        }
    }

    /// Whether both values refer to the same instance
    pub fn ptr_eq(&self, other: &HostObject) -> bool {
        Rc::as_ptr(&self.inner) as *const () == Rc::as_ptr(&other.inner) as *const ()
    }

    /// Number of owners of the underlying instance
    pub fn owners(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// Borrow the live instance for a call
    pub fn try_borrow_mut(&self) -> Result<cell::RefMut<'_, dyn Any>, HandleError> {
        self.inner
            .try_borrow_mut()
            .map_err(|_| HandleError::ReceiverBusy {
                class: self.class.name().to_string(),
            })
    }

    /// Borrow the live instance read-only
    pub fn try_borrow(&self) -> Result<cell::Ref<'_, dyn Any>, HandleError> {
        self.inner.try_borrow().map_err(|_| HandleError::ReceiverBusy {
            class: self.class.name().to_string(),
        })
    }

    /// Copy a value-class instance into a fresh local
    pub fn copy_out(&self) -> Result<Box<dyn Any>, Error> {
        let copier = self.copier.ok_or_else(|| MarshalError::TypeMismatch {
            expected: format!("value class {}", self.class),
            found: format!("reference class {}", self.class),
        })?;
        let guard = self.try_borrow()?;
        copier(&*guard).ok_or_else(|| {
            MarshalError::TypeMismatch {
                expected: self.class.name().to_string(),
                found: "foreign instance".to_string(),
            }
            .into()
        })
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostObject({} @ {:p})", self.class, Rc::as_ptr(&self.inner))
    }
}

impl PartialEq for HostObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

/// A shared reference-class instance
///
/// Parameters and returns of this type cross the boundary as handles.
pub struct Ref<T> {
    object: HostObject,
    _marker: PhantomData<T>,
}

impl<T: HostClass> Ref<T> {
    /// Create a new shared instance
    pub fn new(value: T) -> Self {
        Self {
            object: HostObject::reference(value),
            _marker: PhantomData,
        }
    }

    /// View an erased object as `T`
    pub fn from_object(object: HostObject) -> Result<Self, MarshalError> {
        object.expect_class(&ObjectType::reference::<T>())?;
        Ok(Self {
            object,
            _marker: PhantomData,
        })
    }

    pub fn try_borrow(&self) -> Result<cell::Ref<'_, T>, Error> {
        let guard = self.object.try_borrow()?;
        cell::Ref::filter_map(guard, |any| any.downcast_ref::<T>())
            .map_err(|_| self.mismatch())
    }

    pub fn try_borrow_mut(&self) -> Result<cell::RefMut<'_, T>, Error> {
        let guard = self.object.try_borrow_mut()?;
        cell::RefMut::filter_map(guard, |any| any.downcast_mut::<T>())
            .map_err(|_| self.mismatch())
    }

    pub fn object(&self) -> &HostObject {
        &self.object
    }

    pub fn into_object(self) -> HostObject {
        self.object
    }

    pub fn ptr_eq(&self, other: &Ref<T>) -> bool {
        self.object.ptr_eq(&other.object)
    }

    fn mismatch(&self) -> Error {
        MarshalError::TypeMismatch {
            expected: T::NAME.to_string(),
            found: self.object.class().name().to_string(),
        }
        .into()
    }
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            object: self.object.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({:?})", self.object)
    }
}

/// A value-class instance copied across the boundary
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Val<T>(pub T);

impl<T> Deref for Val<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Val<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// Address-sized token identifying one registered host object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

impl Handle {
    pub fn from_raw(raw: usize) -> Self {
        Handle(raw)
    }

    pub fn raw(self) -> usize {
        self.0
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Table of live handles
///
/// Handle values are never reused within a registry. Every operation takes
/// the table borrow only for the lookup itself, so host code running inside
/// a member may allocate and release freely.
pub struct HandleRegistry {
    slots: RefCell<HashMap<usize, HostObject>>,
    next: Cell<usize>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            slots: RefCell::new(HashMap::new()),
            next: Cell::new(1),
        }
    }

    /// Register an object and return a fresh handle for it
    pub fn allocate(&self, object: HostObject) -> Handle {
        let raw = self.next.get();
        self.next.set(raw.wrapping_add(1).max(1));
        debug!(handle = raw, class = object.class().name(), "allocated handle");
        self.slots.borrow_mut().insert(raw, object);
        Handle(raw)
    }

    /// Look up the object behind a handle
    pub fn resolve(&self, handle: Handle) -> Result<HostObject, HandleError> {
        self.slots
            .borrow()
            .get(&handle.0)
            .cloned()
            .ok_or(HandleError::InvalidHandle(handle.0))
    }

    /// Invalidate a handle
    ///
    /// The object is dropped once no other owner holds it.
    pub fn release(&self, handle: Handle) -> Result<(), HandleError> {
        let removed = self.slots.borrow_mut().remove(&handle.0);
        match removed {
            Some(object) => {
                debug!(handle = handle.0, class = object.class().name(), "released handle");
                drop(object);
                Ok(())
            }
            None => Err(HandleError::InvalidHandle(handle.0)),
        }
    }

    pub fn is_live(&self, handle: Handle) -> bool {
        self.slots.borrow().contains_key(&handle.0)
    }

    /// Number of handles not yet released
    pub fn live(&self) -> usize {
        self.slots.borrow().len()
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("live", &self.live())
            .field("next", &self.next.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }
    host_class!(Point);

    struct Widget {
        label: String,
    }
    host_class!(Widget as "Gadget");

    #[test]
    fn test_class_names() {
        assert_eq!(ObjectType::value::<Point>().name(), "Point");
        assert_eq!(ObjectType::reference::<Widget>().name(), "Gadget");
        assert_ne!(
            ObjectType::value::<Point>(),
            ObjectType::reference::<Point>()
        );
    }

    #[test]
    fn test_allocate_resolve_release() {
        let registry = HandleRegistry::new();
        let object = HostObject::reference(Widget {
            label: "w".to_string(),
        });
        let handle = registry.allocate(object.clone());

        assert_ne!(handle.raw(), 0);
        assert!(registry.resolve(handle).unwrap().ptr_eq(&object));

        registry.release(handle).unwrap();
        assert_eq!(
            registry.resolve(handle),
            Err(HandleError::InvalidHandle(handle.raw()))
        );
        assert_eq!(
            registry.release(handle),
            Err(HandleError::InvalidHandle(handle.raw()))
        );
    }

    #[test]
    fn test_zero_handle_is_invalid() {
        let registry = HandleRegistry::new();
        assert!(registry.resolve(Handle::from_raw(0)).is_err());
    }

    #[test]
    fn test_release_drops_last_owner() {
        let registry = HandleRegistry::new();
        let object = HostObject::reference(Widget {
            label: "w".to_string(),
        });
        let handle = registry.allocate(object.clone());
        assert_eq!(object.owners(), 2);
        registry.release(handle).unwrap();
        assert_eq!(object.owners(), 1);
    }

    #[test]
    fn test_ref_views_shared_instance() {
        let widget = Ref::new(Widget {
            label: "before".to_string(),
        });
        let alias = Ref::<Widget>::from_object(widget.object().clone()).unwrap();
        alias.try_borrow_mut().unwrap().label = "after".to_string();
        assert_eq!(widget.try_borrow().unwrap().label, "after");
    }

    #[test]
    fn test_ref_rejects_other_class() {
        let point = HostObject::value(Point { x: 1, y: 2 });
        assert!(Ref::<Widget>::from_object(point).is_err());
    }

    #[test]
    fn test_busy_receiver() {
        let widget = HostObject::reference(Widget {
            label: "w".to_string(),
        });
        let _guard = widget.try_borrow_mut().unwrap();
        assert!(matches!(
            widget.try_borrow_mut(),
            Err(HandleError::ReceiverBusy { .. })
        ));
    }

    #[test]
    fn test_copy_out_detaches_value() {
        let point = HostObject::value(Point { x: 1, y: 2 });
        let mut copy = point.copy_out().unwrap();
        copy.downcast_mut::<Point>().unwrap().x = 99;

        let stored = point.try_borrow().unwrap();
        assert_eq!(stored.downcast_ref::<Point>(), Some(&Point { x: 1, y: 2 }));
    }

    #[test]
    fn test_copy_out_requires_value_class() {
        let widget = HostObject::reference(Widget {
            label: "w".to_string(),
        });
        assert!(widget.copy_out().is_err());
    }
}
