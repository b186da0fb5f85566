//! Zero-sized field types that declare relations inside a plain entity struct.
//!
//! The plain struct only records *that* a relation exists; the loaded target,
//! the identity subscription and the loaded flag all live in the proxy.

use std::fmt;
use std::marker::PhantomData;

/// Declares a `ReferenceOne` property pointing at `T`.
pub struct Reference<T>(PhantomData<fn() -> T>);

/// Declares a `ReferenceMany` property holding `T`s.
pub struct Collection<T>(PhantomData<fn() -> T>);

macro_rules! marker_impls {
    ($marker:ident) => {
        impl<T> $marker<T> {
            pub const fn new() -> Self {
                Self(PhantomData)
            }
        }

        impl<T> Default for $marker<T> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<T> Clone for $marker<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $marker<T> {}

        impl<T> PartialEq for $marker<T> {
            fn eq(&self, _other: &Self) -> bool {
                true
            }
        }

        impl<T> Eq for $marker<T> {}

        impl<T> fmt::Debug for $marker<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}<{}>", stringify!($marker), std::any::type_name::<T>())
            }
        }
    };
}

marker_impls!(Reference);
marker_impls!(Collection);
