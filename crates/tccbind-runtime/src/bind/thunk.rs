//! Thunk synthesis
//!
//! A thunk is the C-ABI entry point for one bound member. Its boundary
//! signature is the member's signature with every host object replaced by
//! an address-sized handle, plus a leading receiver handle for instance
//! members. Calls flow:
//!
//! ```text
//! native code
//!   → libffi closure (NativeCallable)
//!   → boundary dispatcher: resolve handles, copy strings
//!   → receiver dispatch (static / virtual / copied)
//!   → member invoker
//!   ← result: fresh handle for objects, retained C string for strings
//! ```

use crate::bind::describe::MemberDescriptor;
use crate::error::{Error, MarshalError};
use crate::ffi::{dispatcher, CallableType, Invoke, NativeCallable, Signature};
use crate::handle::{HandleRegistry, Semantics};
use crate::marshal::{HostType, MarshalPlan, Value};
use std::os::raw::c_void;
use std::rc::Rc;
use tracing::{debug, trace};

/// How a thunk reaches the member's receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// No receiver: static members and constructors
    Static,
    /// The live shared instance behind the handle
    Virtual,
    /// A private copy of the value behind the handle; never written back
    Copied,
}

impl Dispatch {
    pub fn for_member(member: &MemberDescriptor) -> Self {
        if member.is_static {
            return Dispatch::Static;
        }
        match member.owner.semantics() {
            Semantics::Reference => Dispatch::Virtual,
            Semantics::Value => Dispatch::Copied,
        }
    }
}

/// A synthesized native entry point for one member
#[derive(Debug)]
pub struct Thunk {
    symbol: String,
    dispatch: Dispatch,
    plan: MarshalPlan,
    callable: NativeCallable,
}

impl Thunk {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn address(&self) -> *const c_void {
        self.callable.address()
    }

    /// Signature native code sees
    pub fn boundary_signature(&self) -> &Signature {
        self.callable.callable_type().signature()
    }

    pub fn plan(&self) -> &MarshalPlan {
        &self.plan
    }

    pub fn dispatch(&self) -> Dispatch {
        self.dispatch
    }

    pub fn callable_type(&self) -> &CallableType {
        self.callable.callable_type()
    }

    pub fn into_callable(self) -> NativeCallable {
        self.callable
    }
}

/// Build the thunk for `member`, exported as `symbol`
pub fn synthesize(
    member: &MemberDescriptor,
    symbol: &str,
    registry: &Rc<HandleRegistry>,
) -> Result<Thunk, Error> {
    let dispatch = Dispatch::for_member(member);

    let mut params = Vec::with_capacity(member.params.len() + 1);
    if dispatch != Dispatch::Static {
        params.push(HostType::Object(member.owner));
    }
    params.extend(member.params.iter().cloned());
    let plan = MarshalPlan::new(&params, &member.ret);

    let ty = CallableType::new(plan.boundary_ret(), plan.boundary_params())?;
    let invoke = receiver_dispatch(member.clone(), symbol.to_string(), dispatch);
    let raw = dispatcher(plan.clone(), Some(registry.clone()), invoke)?;
    let callable = NativeCallable::new(ty, symbol, raw)?;

    debug!(
        symbol,
        member = %member.name,
        class = member.owner.name(),
        ?dispatch,
        signature = %callable.callable_type().signature(),
        "synthesized thunk"
    );
    Ok(Thunk {
        symbol: symbol.to_string(),
        dispatch,
        plan,
        callable,
    })
}

fn receiver_dispatch(member: MemberDescriptor, symbol: String, dispatch: Dispatch) -> Invoke {
    Box::new(move |mut args: Vec<Value>| {
        trace!(symbol = %symbol, args = args.len(), "thunk call");

        if dispatch == Dispatch::Static {
            return member.invoke(None, args);
        }

        if args.is_empty() {
            return Err(MarshalError::ArityMismatch {
                expected: member.params.len() + 1,
                got: 0,
            }
            .into());
        }
        let receiver = match args.remove(0) {
            Value::Object(object) => object,
            other => {
                return Err(MarshalError::TypeMismatch {
                    expected: member.owner.name().to_string(),
                    found: other.kind(),
                }
                .into())
            }
        };

        match dispatch {
            Dispatch::Virtual => {
                let mut live = receiver.try_borrow_mut()?;
                let result = member.invoke(Some(&mut *live), args);
                drop(live);
                result
            }
            _ => {
                let mut local = receiver.copy_out()?;
                member.invoke(Some(&mut *local), args)
            }
        }
    })
}
