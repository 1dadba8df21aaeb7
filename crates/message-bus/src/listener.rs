//! # Listener Contracts
//!
//! The [`listener!`](crate::listener) macro declares a listener trait and
//! generates the two halves the bus needs to route calls without reflection:
//!
//! - `impl Contract for dyn Trait`: the operation table plus a dispatcher
//!   that decodes a [`Message`](crate::Message) and calls the trait method.
//! - `impl Trait for Publisher<'_, dyn Trait>`: the broadcaster, so that
//!   `bus.sync_publisher(&topic).op(args)` publishes to every subscriber.
//!
//! ```ignore
//! message_bus::listener! {
//!     /// Project lifecycle notifications.
//!     pub trait ProjectListener {
//!         fn project_opened(&self, name: String);
//!         fn project_closed(&self, name: String);
//!         /// Added later; older handlers inherit the empty body.
//!         fn project_renamed(&self, _from: String, _to: String) {}
//!     }
//! }
//! ```
//!
//! Arguments must be `Clone + Send + Sync + 'static`; each subscriber receives
//! its own clone of the published values.

/// Declare a listener contract. See the [module docs](crate::listener).
#[macro_export]
macro_rules! listener {
    (
        $(#[$attr:meta])*
        $vis:vis trait $name:ident {
            $(
                $(#[$op_attr:meta])*
                fn $op:ident(&self $(, $arg:ident : $ty:ty)*) $body:tt
            )*
        }
    ) => {
        $(#[$attr])*
        $vis trait $name: ::core::marker::Send + ::core::marker::Sync {
            $(
                $(#[$op_attr])*
                fn $op(&self $(, $arg: $ty)*) $body
            )*

            /// Whether this handler implements `operation`.
            ///
            /// Handlers written against an older revision of the contract
            /// return `false` for operations they predate; the bus then skips
            /// them silently.
            fn supports(&self, operation: &str) -> bool {
                let _ = operation;
                true
            }
        }

        impl $crate::Contract for dyn $name {
            const NAME: &'static str = ::core::stringify!($name);

            const OPERATIONS: &'static [$crate::Operation] = &[
                $(
                    $crate::Operation {
                        name: ::core::stringify!($op),
                        params: &[$(::core::stringify!($ty)),*],
                    },
                )*
            ];

            fn dispatch(
                listener: &Self,
                message: &$crate::Message,
            ) -> ::core::result::Result<(), $crate::DispatchError> {
                match message.operation().name {
                    $(
                        ::core::stringify!($op) => {
                            let ($($arg,)*) =
                                ::core::clone::Clone::clone(message.args::<($($ty,)*)>()?);
                            listener.$op($($arg),*);
                            ::core::result::Result::Ok(())
                        }
                    )*
                    other => ::core::result::Result::Err($crate::DispatchError::UnknownOperation {
                        contract: ::core::stringify!($name),
                        operation: other,
                    }),
                }
            }

            fn supports(listener: &Self, operation: &str) -> bool {
                <dyn $name as $name>::supports(listener, operation)
            }
        }

        impl $name for $crate::Publisher<'_, dyn $name> {
            $(
                fn $op(&self $(, $arg: $ty)*) {
                    self.fire(::core::stringify!($op), ($($arg,)*));
                }
            )*
        }
    };
}
