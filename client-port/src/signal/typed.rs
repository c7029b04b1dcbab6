//! `Signal<T>`: the typed, read-only view a [`crate::port::ClientPort`]
//! hands back from `create_signal`. Thin wrapper over `LazySignal<Value>`,
//! mirroring how [`crate::signal::owl::OwlSignal`] wraps the same raw-JSON
//! signal for the writable case, so the port only ever has to reason about
//! one untyped signal primitive.

use crate::signal::lazy::{LazySignal, LazySubscription, Observed, SignalError};
use client_port_core::WriteTag;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;

/// A read-only observable value, typed at the boundary.
pub struct Signal<T> {
    inner: LazySignal<Value>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Signal<T> {
    pub(crate) fn new(inner: LazySignal<Value>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// The raw, untyped signal this wraps. Used by the port to install
    /// confirmed updates and deliver out-of-band errors without having to
    /// know `T`.
    pub(crate) fn raw(&self) -> &LazySignal<Value> {
        &self.inner
    }

    pub fn get(&self) -> Option<T> {
        self.inner
            .get()
            .map(|v| serde_json::from_value(v).expect("signal value must deserialize to T"))
    }

    pub fn subscribe(&self) -> TypedSubscription<T> {
        TypedSubscription {
            inner: self.inner.subscribe(),
            _marker: PhantomData,
        }
    }
}

/// A typed observer handle for a [`Signal`].
pub struct TypedSubscription<T> {
    inner: LazySubscription<Value>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> TypedSubscription<T> {
    pub async fn recv(&mut self) -> Option<Result<(T, Vec<WriteTag>), SignalError>> {
        match self.inner.recv().await {
            Some(Observed::Value(v, tags)) => Some(Ok((
                serde_json::from_value(v).expect("signal value must deserialize to T"),
                tags,
            ))),
            Some(Observed::Error(e)) => Some(Err(e)),
            None => None,
        }
    }
}
