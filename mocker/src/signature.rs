//! Typed targets and the replacements synthesized for them.
//!
//! Every patchable function maps to a [`Target`]: a type that knows the function's
//! argument tuple, its output and the shape of the `dyn Fn` a `patchable!` entry
//! check expects. Synthesizing a replacement builds that `dyn Fn` with a body that
//! only forwards to the dispatcher.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use mocker_intercept::Replacement;

use crate::dispatch::{respond, Response};
use crate::identity::TargetId;
use crate::registry::Registry;

/// Argument and result types of a patch target, as type names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    receiver: Option<&'static str>,
    inputs: Vec<&'static str>,
    output: &'static str,
    replacement: TypeId,
}

impl Signature {
    fn of<T: Target>(receiver: Option<&'static str>, inputs: Vec<&'static str>, output: &'static str) -> Self {
        Self {
            receiver,
            inputs,
            output,
            replacement: TypeId::of::<T>(),
        }
    }

    /// Receiver type for methods, e.g. `&demo::Counter`.
    pub fn receiver(&self) -> Option<&'static str> {
        self.receiver
    }

    pub fn inputs(&self) -> &[&'static str] {
        &self.inputs
    }

    pub fn output(&self) -> &'static str {
        self.output
    }

    /// Number of arguments, not counting the receiver.
    pub fn arity(&self) -> usize {
        self.inputs.len()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&str> = self.receiver.iter().chain(self.inputs.iter()).copied().collect();
        write!(f, "fn({})", params.join(", "))?;
        if self.output != "()" {
            write!(f, " -> {}", self.output)?;
        }
        Ok(())
    }
}

/// A function shape the mock core can patch.
pub trait Target: Sized + 'static {
    /// Owned argument tuple, receiver excluded. This is what recording captures.
    type Args: Clone + Send + 'static;
    type Output: 'static;
    /// Callable type accepted by `do_and_return`.
    type Handler: ?Sized + Send + Sync + 'static;

    fn signature() -> Signature;

    /// Build the replacement installed over `entry`. Its body hands every call to
    /// `registry` under `target`.
    #[doc(hidden)]
    fn synthesize(target: TargetId, entry: Arc<str>, registry: &'static Registry) -> Replacement;
}

/// A free function or associated function taking owned `Args`.
pub struct FnTarget<Args, R>(PhantomData<fn(Args) -> R>);

/// An inherent method taking `&S` followed by owned `Args`.
pub struct MethodTarget<S, Args, R>(PhantomData<fn(*const S, Args) -> R>);

/// Fn items that can be patched as free functions.
///
/// `Marker` only disambiguates the per-arity impls and is always inferred.
pub trait IntoTarget<Marker>: Copy + 'static {
    type Target: Target;
}

/// Fn items and helper closures of shape `Fn(&S, ..) -> R`.
pub trait IntoMethodTarget<Marker>: Copy + 'static {
    type Receiver: 'static;
    type Target: Target;
}

macro_rules! impl_targets {
    ($(($($A:ident $a:ident),*)),* $(,)?) => {$(
        impl<R, $($A,)*> Target for FnTarget<($($A,)*), R>
        where
            R: 'static,
            $($A: Clone + Send + 'static,)*
        {
            type Args = ($($A,)*);
            type Output = R;
            type Handler = dyn Fn($($A),*) -> R + Send + Sync;

            fn signature() -> Signature {
                Signature::of::<Self>(None, vec![$(type_name::<$A>()),*], type_name::<R>())
            }

            fn synthesize(target: TargetId, entry: Arc<str>, registry: &'static Registry) -> Replacement {
                let replacement: Box<Self::Handler> = Box::new(move |$($a: $A),*| {
                    let response = registry.dispatch(&target, &entry, &|| {
                        Box::new(($($a.clone(),)*)) as Box<dyn Any + Send>
                    });
                    match &*respond::<Self>(&target, response) {
                        Response::Fixed(value) => value(),
                        Response::Call(handler) => handler($($a),*),
                    }
                });
                Arc::new(replacement)
            }
        }

        impl<S, R, $($A,)*> Target for MethodTarget<S, ($($A,)*), R>
        where
            S: 'static,
            R: 'static,
            $($A: Clone + Send + 'static,)*
        {
            type Args = ($($A,)*);
            type Output = R;
            type Handler = dyn Fn(&S, $($A),*) -> R + Send + Sync;

            fn signature() -> Signature {
                Signature::of::<Self>(
                    Some(type_name::<&S>()),
                    vec![$(type_name::<$A>()),*],
                    type_name::<R>(),
                )
            }

            fn synthesize(target: TargetId, entry: Arc<str>, registry: &'static Registry) -> Replacement {
                let replacement: Box<Self::Handler> = Box::new(move |this: &S, $($a: $A),*| {
                    let response = registry.dispatch(&target, &entry, &|| {
                        Box::new(($($a.clone(),)*)) as Box<dyn Any + Send>
                    });
                    match &*respond::<Self>(&target, response) {
                        Response::Fixed(value) => value(),
                        Response::Call(handler) => handler(this, $($a),*),
                    }
                });
                Arc::new(replacement)
            }
        }

        impl<F, R, $($A,)*> IntoTarget<fn($($A),*) -> R> for F
        where
            F: Fn($($A),*) -> R + Copy + 'static,
            R: 'static,
            $($A: Clone + Send + 'static,)*
        {
            type Target = FnTarget<($($A,)*), R>;
        }

        impl<F, S, R, $($A,)*> IntoMethodTarget<fn(&S, $($A),*) -> R> for F
        where
            F: Fn(&S, $($A),*) -> R + Copy + 'static,
            S: 'static,
            R: 'static,
            $($A: Clone + Send + 'static,)*
        {
            type Receiver = S;
            type Target = MethodTarget<S, ($($A,)*), R>;
        }
    )*};
}

impl_targets! {
    (),
    (A0 a0),
    (A0 a0, A1 a1),
    (A0 a0, A1 a1, A2 a2),
    (A0 a0, A1 a1, A2 a2, A3 a3),
    (A0 a0, A1 a1, A2 a2, A3 a3, A4 a4),
    (A0 a0, A1 a1, A2 a2, A3 a3, A4 a4, A5 a5),
}
