/// Declare functions whose entry can be redirected at runtime.
///
/// Each function is emitted unchanged except for an entry check: when the
/// [`Interceptor`](crate::Interceptor) holds a replacement for the function's entry
/// symbol (`core::any::type_name_of_val` of the fn item), the arguments are forwarded
/// to it and the original body is skipped.
///
/// Free functions and `impl` blocks are accepted. Inside an `impl` block, methods
/// taking `&self` and associated functions without a receiver are supported. The
/// installed replacement must have type `Box<dyn Fn(Args..) -> R + Send + Sync>`,
/// with `&Self` as the first argument for methods.
///
/// ```ignore
/// mocker_intercept::patchable! {
///     pub fn add(a: i64, b: i64) -> i64 {
///         a + b
///     }
///
///     impl Counter {
///         fn unique(&self, a: i64, b: i64) -> i64 {
///             a + b
///         }
///     }
/// }
/// ```
#[macro_export]
macro_rules! patchable {
    () => {};

    (
        $(#[$meta:meta])*
        $vis:vis fn $name:ident($($arg:ident: $ty:ty),* $(,)?) $(-> $ret:ty)? $body:block
        $($rest:tt)*
    ) => {
        $(#[$meta])*
        #[inline(never)]
        $vis fn $name($($arg: $ty),*) $(-> $ret)? {
            if let ::core::option::Option::Some(__redirect) = $crate::Interceptor::obtain()
                .replacement::<dyn Fn($($ty),*) $(-> $ret)? + Send + Sync>(
                    ::core::any::type_name_of_val(&$name),
                )
            {
                return (**__redirect)($($arg),*);
            }
            $body
        }

        $crate::patchable! { $($rest)* }
    };

    (
        impl $self_ty:ident { $($items:tt)* }
        $($rest:tt)*
    ) => {
        impl $self_ty {
            $crate::__patchable_methods! { $($items)* }
        }

        $crate::patchable! { $($rest)* }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __patchable_methods {
    () => {};

    (
        $(#[$meta:meta])*
        $vis:vis fn $name:ident(&$this:ident $(, $arg:ident: $ty:ty)* $(,)?) $(-> $ret:ty)? $body:block
        $($rest:tt)*
    ) => {
        $(#[$meta])*
        #[inline(never)]
        $vis fn $name(&$this $(, $arg: $ty)*) $(-> $ret)? {
            if let ::core::option::Option::Some(__redirect) = $crate::Interceptor::obtain()
                .replacement::<dyn Fn(&Self $(, $ty)*) $(-> $ret)? + Send + Sync>(
                    ::core::any::type_name_of_val(&Self::$name),
                )
            {
                return (**__redirect)($this $(, $arg)*);
            }
            $body
        }

        $crate::__patchable_methods! { $($rest)* }
    };

    (
        $(#[$meta:meta])*
        $vis:vis fn $name:ident($($arg:ident: $ty:ty),* $(,)?) $(-> $ret:ty)? $body:block
        $($rest:tt)*
    ) => {
        $(#[$meta])*
        #[inline(never)]
        $vis fn $name($($arg: $ty),*) $(-> $ret)? {
            if let ::core::option::Option::Some(__redirect) = $crate::Interceptor::obtain()
                .replacement::<dyn Fn($($ty),*) $(-> $ret)? + Send + Sync>(
                    ::core::any::type_name_of_val(&Self::$name),
                )
            {
                return (**__redirect)($($arg),*);
            }
            $body
        }

        $crate::__patchable_methods! { $($rest)* }
    };
}
