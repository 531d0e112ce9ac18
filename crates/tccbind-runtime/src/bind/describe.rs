//! Type descriptions - the member table a binder walks
//!
//! Rust has no runtime reflection, so a bindable type lists its surface
//! explicitly through `TypeBuilder`. Each builder call captures one or two
//! `MemberDescriptor`s together with a type-erased invoker that performs
//! the real call.
//!
//! ```
//! use tccbind_runtime::{host_class, TypeDescription};
//!
//! #[derive(Default)]
//! struct Counter { count: i32 }
//! host_class!(Counter);
//!
//! let description = TypeDescription::reference::<Counter>()
//!     .constructor(Counter::default)
//!     .method("bump", |c: &mut Counter, by: i32| { c.count += by; c.count })
//!     .field("count", |c: &Counter| c.count, |c: &mut Counter, v: i32| c.count = v)
//!     .build();
//!
//! assert_eq!(description.members().len(), 4);
//! ```

use crate::error::{Error, MarshalError};
use crate::handle::{HostClass, HostObject, ObjectType};
use crate::marshal::{HostType, Marshal, Value};
use crate::params::{HostFn, MethodFn, Params};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Range;
use std::rc::Rc;

/// Type-erased member call: optional receiver plus decoded arguments
pub type Invoker = Rc<dyn Fn(Option<&mut dyn Any>, Vec<Value>) -> Result<Value, Error>>;

/// What kind of member a descriptor stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Constructor,
    Method,
    PropertyGetter,
    PropertySetter,
    FieldGetter,
    FieldSetter,
}

impl MemberKind {
    /// `get` / `set` for accessors
    pub fn mutator(self) -> Option<&'static str> {
        match self {
            MemberKind::PropertyGetter | MemberKind::FieldGetter => Some("get"),
            MemberKind::PropertySetter | MemberKind::FieldSetter => Some("set"),
            MemberKind::Constructor | MemberKind::Method => None,
        }
    }

    pub fn is_accessor(self) -> bool {
        self.mutator().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Private,
}

/// One bindable member of a host type
#[derive(Clone)]
pub struct MemberDescriptor {
    pub kind: MemberKind,
    pub owner: ObjectType,
    pub name: String,
    pub is_static: bool,
    pub params: Vec<HostType>,
    pub ret: HostType,
    pub visibility: Visibility,
    /// Explicit symbol name, bypassing the naming templates
    pub symbol: Option<String>,
    pub(crate) invoker: Invoker,
}

impl MemberDescriptor {
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    /// Call the member directly, outside any thunk
    pub fn invoke(&self, receiver: Option<&mut dyn Any>, args: Vec<Value>) -> Result<Value, Error> {
        (self.invoker)(receiver, args)
    }
}

impl fmt::Debug for MemberDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberDescriptor")
            .field("kind", &self.kind)
            .field("owner", &self.owner.name())
            .field("name", &self.name)
            .field("is_static", &self.is_static)
            .field("params", &self.params)
            .field("ret", &self.ret)
            .field("visibility", &self.visibility)
            .field("symbol", &self.symbol)
            .finish()
    }
}

/// The full bindable surface of one host type
#[derive(Debug, Clone)]
pub struct TypeDescription {
    class: ObjectType,
    members: Vec<MemberDescriptor>,
}

impl TypeDescription {
    /// Describe a shared (reference-semantics) class
    pub fn reference<T: HostClass>() -> TypeBuilder<T> {
        TypeBuilder::new(ObjectType::reference::<T>(), HostObject::reference::<T>)
    }

    /// Describe a copied (value-semantics) class
    pub fn value<T: HostClass + Clone>() -> TypeBuilder<T> {
        TypeBuilder::new(ObjectType::value::<T>(), HostObject::value::<T>)
    }

    pub fn class(&self) -> &ObjectType {
        &self.class
    }

    pub fn members(&self) -> &[MemberDescriptor] {
        &self.members
    }

    /// Members a binder will expose
    pub fn public_members(&self) -> impl Iterator<Item = &MemberDescriptor> {
        self.members.iter().filter(|m| m.is_public())
    }
}

/// Types that can describe themselves
pub trait Describe: HostClass {
    fn describe() -> TypeDescription;
}

/// Builder collecting the members of `T`
pub struct TypeBuilder<T> {
    class: ObjectType,
    wrap: fn(T) -> HostObject,
    members: Vec<MemberDescriptor>,
    group: Range<usize>,
    _marker: PhantomData<fn() -> T>,
}

fn receiver<'a, T: 'static>(
    receiver: Option<&'a mut dyn Any>,
    class: &ObjectType,
) -> Result<&'a mut T, Error> {
    receiver
        .and_then(|r| r.downcast_mut::<T>())
        .ok_or_else(|| {
            MarshalError::TypeMismatch {
                expected: class.name().to_string(),
                found: "missing receiver".to_string(),
            }
            .into()
        })
}

fn single<V: Marshal>(mut args: Vec<Value>) -> Result<V, Error> {
    if args.len() != 1 {
        return Err(MarshalError::ArityMismatch {
            expected: 1,
            got: args.len(),
        }
        .into());
    }
    Ok(V::from_value(args.remove(0))?)
}

impl<T: HostClass> TypeBuilder<T> {
    fn new(class: ObjectType, wrap: fn(T) -> HostObject) -> Self {
        Self {
            class,
            wrap,
            members: Vec::new(),
            group: 0..0,
            _marker: PhantomData,
        }
    }

    fn descriptor(
        &self,
        kind: MemberKind,
        name: &str,
        is_static: bool,
        params: Vec<HostType>,
        ret: HostType,
        invoker: Invoker,
    ) -> MemberDescriptor {
        MemberDescriptor {
            kind,
            owner: self.class,
            name: name.to_string(),
            is_static,
            params,
            ret,
            visibility: Visibility::Public,
            symbol: None,
            invoker,
        }
    }

    fn push_group(mut self, group: Vec<MemberDescriptor>) -> Self {
        let start = self.members.len();
        self.members.extend(group);
        self.group = start..self.members.len();
        self
    }

    /// Add a constructor; its parameter list becomes part of the symbol name
    pub fn constructor<A, F>(self, f: F) -> Self
    where
        A: Params,
        F: HostFn<A, T>,
    {
        let wrap = self.wrap;
        let invoker: Invoker = Rc::new(move |_: Option<&mut dyn Any>, args: Vec<Value>| {
            let args = A::from_values(args)?;
            Ok(Value::Object(wrap(f.invoke(args))))
        });
        let member = self.descriptor(
            MemberKind::Constructor,
            T::NAME,
            true,
            A::host_types(),
            HostType::Object(self.class),
            invoker,
        );
        self.push_group(vec![member])
    }

    /// Add an instance method
    pub fn method<A, R, F>(self, name: &str, f: F) -> Self
    where
        A: Params,
        R: Marshal,
        F: MethodFn<T, A, R>,
    {
        let class = self.class;
        let invoker: Invoker = Rc::new(move |recv: Option<&mut dyn Any>, args: Vec<Value>| {
            let this = receiver::<T>(recv, &class)?;
            let args = A::from_values(args)?;
            Ok(f.invoke(this, args).into_value())
        });
        let member = self.descriptor(
            MemberKind::Method,
            name,
            false,
            A::host_types(),
            R::host_type(),
            invoker,
        );
        self.push_group(vec![member])
    }

    /// Add a static method
    pub fn static_method<A, R, F>(self, name: &str, f: F) -> Self
    where
        A: Params,
        R: Marshal,
        F: HostFn<A, R>,
    {
        let invoker: Invoker = Rc::new(move |_: Option<&mut dyn Any>, args: Vec<Value>| {
            let args = A::from_values(args)?;
            Ok(f.invoke(args).into_value())
        });
        let member = self.descriptor(
            MemberKind::Method,
            name,
            true,
            A::host_types(),
            R::host_type(),
            invoker,
        );
        self.push_group(vec![member])
    }

    fn instance_getter<R, G>(&self, kind: MemberKind, name: &str, get: G) -> MemberDescriptor
    where
        R: Marshal,
        G: Fn(&T) -> R + 'static,
    {
        let class = self.class;
        let invoker: Invoker = Rc::new(move |recv: Option<&mut dyn Any>, args: Vec<Value>| {
            <()>::from_values(args)?;
            let this = receiver::<T>(recv, &class)?;
            Ok(get(this).into_value())
        });
        self.descriptor(kind, name, false, Vec::new(), R::host_type(), invoker)
    }

    fn instance_setter<V, S>(&self, kind: MemberKind, name: &str, set: S) -> MemberDescriptor
    where
        V: Marshal,
        S: Fn(&mut T, V) + 'static,
    {
        let class = self.class;
        let invoker: Invoker = Rc::new(move |recv: Option<&mut dyn Any>, args: Vec<Value>| {
            let value = single::<V>(args)?;
            let this = receiver::<T>(recv, &class)?;
            set(this, value);
            Ok(Value::Void)
        });
        self.descriptor(kind, name, false, vec![V::host_type()], HostType::Void, invoker)
    }

    fn static_getter_member<R, G>(&self, kind: MemberKind, name: &str, get: G) -> MemberDescriptor
    where
        R: Marshal,
        G: Fn() -> R + 'static,
    {
        let invoker: Invoker = Rc::new(move |_: Option<&mut dyn Any>, args: Vec<Value>| {
            <()>::from_values(args)?;
            Ok(get().into_value())
        });
        self.descriptor(kind, name, true, Vec::new(), R::host_type(), invoker)
    }

    fn static_setter_member<V, S>(&self, kind: MemberKind, name: &str, set: S) -> MemberDescriptor
    where
        V: Marshal,
        S: Fn(V) + 'static,
    {
        let invoker: Invoker = Rc::new(move |_: Option<&mut dyn Any>, args: Vec<Value>| {
            set(single::<V>(args)?);
            Ok(Value::Void)
        });
        self.descriptor(kind, name, true, vec![V::host_type()], HostType::Void, invoker)
    }

    /// Add a property with both accessors
    pub fn property<V, G, S>(self, name: &str, get: G, set: S) -> Self
    where
        V: Marshal,
        G: Fn(&T) -> V + 'static,
        S: Fn(&mut T, V) + 'static,
    {
        let getter = self.instance_getter(MemberKind::PropertyGetter, name, get);
        let setter = self.instance_setter(MemberKind::PropertySetter, name, set);
        self.push_group(vec![getter, setter])
    }

    /// Add a property getter on its own
    pub fn getter<V, G>(self, name: &str, get: G) -> Self
    where
        V: Marshal,
        G: Fn(&T) -> V + 'static,
    {
        let getter = self.instance_getter(MemberKind::PropertyGetter, name, get);
        self.push_group(vec![getter])
    }

    /// Add a property setter on its own
    pub fn setter<V, S>(self, name: &str, set: S) -> Self
    where
        V: Marshal,
        S: Fn(&mut T, V) + 'static,
    {
        let setter = self.instance_setter(MemberKind::PropertySetter, name, set);
        self.push_group(vec![setter])
    }

    pub fn static_getter<V, G>(self, name: &str, get: G) -> Self
    where
        V: Marshal,
        G: Fn() -> V + 'static,
    {
        let getter = self.static_getter_member(MemberKind::PropertyGetter, name, get);
        self.push_group(vec![getter])
    }

    pub fn static_setter<V, S>(self, name: &str, set: S) -> Self
    where
        V: Marshal,
        S: Fn(V) + 'static,
    {
        let setter = self.static_setter_member(MemberKind::PropertySetter, name, set);
        self.push_group(vec![setter])
    }

    /// Add a field; fields always expose a getter and a setter
    pub fn field<V, G, S>(self, name: &str, get: G, set: S) -> Self
    where
        V: Marshal,
        G: Fn(&T) -> V + 'static,
        S: Fn(&mut T, V) + 'static,
    {
        let getter = self.instance_getter(MemberKind::FieldGetter, name, get);
        let setter = self.instance_setter(MemberKind::FieldSetter, name, set);
        self.push_group(vec![getter, setter])
    }

    pub fn static_field<V, G, S>(self, name: &str, get: G, set: S) -> Self
    where
        V: Marshal,
        G: Fn() -> V + 'static,
        S: Fn(V) + 'static,
    {
        let getter = self.static_getter_member(MemberKind::FieldGetter, name, get);
        let setter = self.static_setter_member(MemberKind::FieldSetter, name, set);
        self.push_group(vec![getter, setter])
    }

    /// Hide the members added by the previous call
    pub fn private(mut self) -> Self {
        for member in &mut self.members[self.group.clone()] {
            member.visibility = Visibility::Private;
        }
        self
    }

    /// Give the last added member an explicit symbol name
    ///
    /// After `property` or `field` the last member is the setter; use
    /// `getter_symbol` and `setter_symbol` to name the accessors of such a
    /// pair individually.
    pub fn symbol(mut self, name: &str) -> Self {
        if let Some(member) = self.members.last_mut() {
            member.symbol = Some(name.to_string());
        }
        self
    }

    /// Explicit symbol for the getter added by the previous call
    pub fn getter_symbol(self, name: &str) -> Self {
        self.accessor_symbol("get", name)
    }

    /// Explicit symbol for the setter added by the previous call
    pub fn setter_symbol(self, name: &str) -> Self {
        self.accessor_symbol("set", name)
    }

    fn accessor_symbol(mut self, mutator: &str, name: &str) -> Self {
        let group = self.group.clone();
        if let Some(member) = self.members[group]
            .iter_mut()
            .find(|m| m.kind.mutator() == Some(mutator))
        {
            member.symbol = Some(name.to_string());
        }
        self
    }

    pub fn build(self) -> TypeDescription {
        TypeDescription {
            class: self.class,
            members: self.members,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_class;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Account {
        owner: String,
        balance: i64,
    }
    host_class!(Account);

    fn describe() -> TypeDescription {
        TypeDescription::value::<Account>()
            .constructor(Account::default)
            .constructor(|owner: String| Account { owner, balance: 0 })
            .method("deposit", |a: &mut Account, amount: i64| {
                a.balance += amount;
                a.balance
            })
            .property(
                "owner",
                |a: &Account| a.owner.clone(),
                |a: &mut Account, v: String| a.owner = v,
            )
            .field("balance", |a: &Account| a.balance, |a: &mut Account, v: i64| a.balance = v)
            .private()
            .static_method("bank", || "central".to_string())
            .symbol("account_bank_name")
            .build()
    }

    #[test]
    fn test_member_table() {
        let description = describe();
        let kinds: Vec<_> = description.members().iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MemberKind::Constructor,
                MemberKind::Constructor,
                MemberKind::Method,
                MemberKind::PropertyGetter,
                MemberKind::PropertySetter,
                MemberKind::FieldGetter,
                MemberKind::FieldSetter,
                MemberKind::Method,
            ]
        );
        assert_eq!(description.members()[1].params, vec![HostType::String]);
        assert_eq!(description.members()[4].params, vec![HostType::String]);
        assert_eq!(description.members()[4].ret, HostType::Void);
    }

    #[test]
    fn test_private_applies_to_whole_group() {
        let description = describe();
        let hidden: Vec<_> = description
            .members()
            .iter()
            .filter(|m| !m.is_public())
            .map(|m| m.kind)
            .collect();
        assert_eq!(hidden, vec![MemberKind::FieldGetter, MemberKind::FieldSetter]);
        assert_eq!(description.public_members().count(), 6);
    }

    #[test]
    fn test_symbol_override_on_last_member() {
        let description = describe();
        let last = description.members().last().unwrap();
        assert!(last.is_static);
        assert_eq!(last.symbol.as_deref(), Some("account_bank_name"));
    }

    #[test]
    fn test_accessor_symbols_target_each_half() {
        let description = TypeDescription::reference::<Account>()
            .property(
                "owner",
                |a: &Account| a.owner.clone(),
                |a: &mut Account, v: String| a.owner = v,
            )
            .getter_symbol("account_owner")
            .setter_symbol("account_rename")
            .field("balance", |a: &Account| a.balance, |a: &mut Account, v: i64| a.balance = v)
            .getter_symbol("account_balance")
            .build();
        let symbols: Vec<_> = description
            .members()
            .iter()
            .map(|m| m.symbol.as_deref())
            .collect();
        assert_eq!(
            symbols,
            vec![
                Some("account_owner"),
                Some("account_rename"),
                Some("account_balance"),
                None,
            ]
        );
    }

    #[test]
    fn test_invoke_method_on_receiver() {
        let description = describe();
        let mut account = Account::default();
        let result = description.members()[2]
            .invoke(Some(&mut account), vec![Value::I64(25)])
            .unwrap();
        assert_eq!(result, Value::I64(25));
        assert_eq!(account.balance, 25);
    }

    #[test]
    fn test_constructor_wraps_instance() {
        let description = describe();
        let created = description.members()[1]
            .invoke(None, vec![Value::String("ada".to_string())])
            .unwrap();
        match created {
            Value::Object(object) => {
                assert_eq!(object.class(), description.class());
                let stored = object.try_borrow().unwrap();
                assert_eq!(
                    stored.downcast_ref::<Account>().map(|a| a.owner.as_str()),
                    Some("ada")
                );
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_receiver_is_an_error() {
        let description = describe();
        assert!(description.members()[2]
            .invoke(None, vec![Value::I64(1)])
            .is_err());
    }
}
