//! Signal primitives: `LazySignal<T>` for read-only server-pushed
//! observables, `OwlSignal<T>` for optimistic writable ones.

pub mod lazy;
pub mod owl;
pub mod typed;

pub use lazy::{LazySignal, LazySubscription, Observed, SignalError};
pub use owl::{OwlSignal, OwlSubscription, UpstreamWrite};
pub use typed::{Signal, TypedSubscription};

pub(crate) use owl::OwlInner;
