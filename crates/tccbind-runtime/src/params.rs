//! Parameter lists and callable shapes
//!
//! `Params` is implemented for tuples of up to eight `Marshal` types and
//! gives a parameter list its host types and value conversions. `HostFn`
//! and `MethodFn` let plain closures of matching arity be bound without
//! boxing them by hand.

use crate::error::MarshalError;
use crate::marshal::{HostType, Marshal, Value};

/// A tuple of marshalable parameters
pub trait Params: Sized + 'static {
    fn host_types() -> Vec<HostType>;

    fn from_values(values: Vec<Value>) -> Result<Self, MarshalError>;

    fn into_values(self) -> Vec<Value>;
}

/// A free-standing host function taking the tuple `A`
pub trait HostFn<A, R>: 'static {
    fn invoke(&self, args: A) -> R;
}

/// A member function of `T` taking the tuple `A` after the receiver
pub trait MethodFn<T, A, R>: 'static {
    fn invoke(&self, this: &mut T, args: A) -> R;
}

impl Params for () {
    fn host_types() -> Vec<HostType> {
        Vec::new()
    }

    fn from_values(values: Vec<Value>) -> Result<Self, MarshalError> {
        if values.is_empty() {
            Ok(())
        } else {
            Err(MarshalError::ArityMismatch {
                expected: 0,
                got: values.len(),
            })
        }
    }

    fn into_values(self) -> Vec<Value> {
        Vec::new()
    }
}

impl<F, R> HostFn<(), R> for F
where
    F: Fn() -> R + 'static,
{
    fn invoke(&self, _args: ()) -> R {
        self()
    }
}

impl<T, F, R> MethodFn<T, (), R> for F
where
    F: Fn(&mut T) -> R + 'static,
{
    fn invoke(&self, this: &mut T, _args: ()) -> R {
        self(this)
    }
}

macro_rules! impl_params {
    ($count:expr; $($name:ident),+) => {
        impl<$($name: Marshal),+> Params for ($($name,)+) {
            fn host_types() -> Vec<HostType> {
                vec![$($name::host_type()),+]
            }

            fn from_values(values: Vec<Value>) -> Result<Self, MarshalError> {
                if values.len() != $count {
                    return Err(MarshalError::ArityMismatch {
                        expected: $count,
                        got: values.len(),
                    });
                }
                let mut values = values.into_iter();
                Ok(($(
                    $name::from_value(values.next().unwrap_or(Value::Void))?,
                )+))
            }

            #[allow(non_snake_case)]
            fn into_values(self) -> Vec<Value> {
                let ($($name,)+) = self;
                vec![$($name.into_value()),+]
            }
        }

        impl<Func, Ret, $($name),+> HostFn<($($name,)+), Ret> for Func
        where
            Func: Fn($($name),+) -> Ret + 'static,
        {
            #[allow(non_snake_case)]
            fn invoke(&self, ($($name,)+): ($($name,)+)) -> Ret {
                self($($name),+)
            }
        }

        impl<This, Func, Ret, $($name),+> MethodFn<This, ($($name,)+), Ret> for Func
        where
            Func: Fn(&mut This, $($name),+) -> Ret + 'static,
        {
            #[allow(non_snake_case)]
            fn invoke(&self, this: &mut This, ($($name,)+): ($($name,)+)) -> Ret {
                self(this, $($name),+)
            }
        }
    };
}

impl_params!(1; A1);
impl_params!(2; A1, A2);
impl_params!(3; A1, A2, A3);
impl_params!(4; A1, A2, A3, A4);
impl_params!(5; A1, A2, A3, A4, A5);
impl_params!(6; A1, A2, A3, A4, A5, A6);
impl_params!(7; A1, A2, A3, A4, A5, A6, A7);
impl_params!(8; A1, A2, A3, A4, A5, A6, A7, A8);
