//! `OwlSignal<T>`: an Optimistic Writable Lazy signal. Writes apply
//! locally first, are queued as pending patches, and are sent upstream; the
//! queue drains as confirmed server echoes arrive.

use crate::setter::{resolve, PrimitiveUpdater, Setter, Write};
use crate::signal::lazy::{
    EqualsPredicate, LazySignal, LazySubscription, Observed, SignalError, SubscribeUpstream,
};
use client_port_core::{Error, Patch, Result, WriteTag};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

/// Sends a confirmed write upstream. Returns `Err(NotSubscribed)` if no
/// upstream session is currently active.
pub type UpstreamWrite = Arc<dyn Fn(Vec<Patch>, Vec<WriteTag>) -> Result<()> + Send + Sync>;

/// The untyped core of an `OwlSignal<T>`. Deliberately *not* generic over
/// `T`: [`crate::port::ClientPort`] stores this directly (type-erased, since
/// one `Arc<OwlInner>` serves every `T`) in its writable-signal-subscription
/// table, so it can read/commit confirmed server state without knowing the
/// caller's type.
pub(crate) struct OwlInner {
    /// Tracked at the JSON level: patches and diffing are JSON-pointer
    /// based, so the raw document is what optimistic writes and pending
    /// reconciliation actually operate on. Typed access goes through
    /// `OwlSignal::get`/`subscribe`, which (de)serialize at the boundary.
    lazy: LazySignal<Value>,
    pending: Mutex<VecDeque<(Vec<Patch>, Vec<WriteTag>)>>,
    upstream_write: UpstreamWrite,
}

impl OwlInner {
    /// The current (post-optimistic) raw value, or `Null` if not yet
    /// available. Used by the port to apply an inbound server patch list
    /// against the right base value: current must reflect any pending
    /// writes that have already been applied locally, not just the last
    /// confirmed server state.
    pub(crate) fn current_raw(&self) -> Value {
        self.lazy.get().unwrap_or(Value::Null)
    }

    /// Installs an already-validated reconciled value and retires the
    /// oldest pending local write. The port calls this only after applying
    /// and schema-validating the server's patches itself, so a failure never
    /// reaches here: invalid inbound payloads are dropped before any
    /// observer state changes. Goes through the same `equals_predicate`
    /// gate as any other confirmed delivery, so a server echo that happens
    /// to match the current value is not re-emitted.
    pub(crate) fn commit(&self, new_value: Value, tags: Vec<WriteTag>) {
        self.lazy.set_checked(new_value, tags);
        self.pending.lock().unwrap().pop_front();
    }

    pub(crate) fn deliver_error(&self, error: SignalError) {
        self.lazy.deliver_error(error);
    }
}

/// An observable, optimistically-writable value.
pub struct OwlSignal<T> {
    inner: Arc<OwlInner>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for OwlSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned + Send + Sync + Clone + 'static> OwlSignal<T> {
    pub fn new(subscribe_upstream: SubscribeUpstream<Value>, upstream_write: UpstreamWrite) -> Self {
        let lazy = LazySignal::with_equals(
            subscribe_upstream,
            Arc::new(|a: &Value, b: &Value| a == b) as EqualsPredicate<Value>,
        );
        Self {
            inner: Arc::new(OwlInner {
                lazy,
                pending: Mutex::new(VecDeque::new()),
                upstream_write,
            }),
            _marker: PhantomData,
        }
    }

    pub fn get(&self) -> Option<T> {
        self.inner
            .lazy
            .get()
            .map(|v| serde_json::from_value(v).expect("signal value must deserialize to T"))
    }

    pub fn subscribe(&self) -> OwlSubscription<T> {
        OwlSubscription {
            inner: self.inner.lazy.subscribe(),
            _marker: PhantomData,
        }
    }

    /// Reconciliation policy: pending writes are retired strictly FIFO, one
    /// per confirmed echo, without attempting to match by tag. Exposed here
    /// only for the crate's own tests; the port drives reconciliation
    /// through [`OwlInner`] directly so it can validate the result against
    /// the signal's data schema before committing it.
    #[cfg(test)]
    pub(crate) fn reconcile(
        &self,
        server_patches: &[Patch],
        tags: Vec<WriteTag>,
    ) -> std::result::Result<(), Error> {
        let reconciled =
            client_port_core::apply_patches(&self.inner.current_raw(), server_patches)?;
        self.inner.commit(reconciled, tags);
        Ok(())
    }

    pub fn deliver_error(&self, error: SignalError) {
        self.inner.deliver_error(error);
    }

    /// The number of local writes sent upstream but not yet confirmed by a
    /// server echo.
    pub fn pending_write_count(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }

    pub fn setter(&self) -> Setter<T> {
        let inner = self.inner.clone();
        let primitive: PrimitiveUpdater = Arc::new(move |write, tags| {
            handle_write(&inner, write, tags)
        });
        Setter::new(primitive)
    }

    /// The untyped core backing this signal. [`crate::port::ClientPort`]
    /// stashes this in its writable-signal-subscription table so it can
    /// drive reconciliation without depending on `T`.
    pub(crate) fn raw(&self) -> Arc<OwlInner> {
        self.inner.clone()
    }

    /// Builds a typed handle over an already-constructed untyped core.
    /// Used by the port once it has set up the table entry for a fresh
    /// subscription and needs to hand the caller back a `T`-typed view.
    pub(crate) fn from_raw(inner: Arc<OwlInner>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }
}

fn handle_write(inner: &OwlInner, write: Write, tags: Vec<WriteTag>) -> Result<()> {
    let current = inner.lazy.get().unwrap_or(Value::Null);
    let (new_value, patches) = resolve(&current, write);
    // Send upstream first: if there is no active subscription this fails
    // fast and the optimistic state is never applied, so a rejected write
    // never becomes locally visible.
    (inner.upstream_write)(patches.clone(), tags.clone())?;
    inner.lazy.force_set(new_value, tags.clone());
    inner.pending.lock().unwrap().push_back((patches, tags));
    Ok(())
}

/// A typed observer handle for an [`OwlSignal`].
pub struct OwlSubscription<T> {
    inner: LazySubscription<Value>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> OwlSubscription<T> {
    pub async fn recv(&mut self) -> Option<std::result::Result<(T, Vec<WriteTag>), SignalError>> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Counter {
        n: i64,
    }

    fn test_signal() -> (OwlSignal<Counter>, Arc<AtomicBool>, Arc<Mutex<Vec<Vec<Patch>>>>) {
        let subscribed = Arc::new(AtomicBool::new(true));
        let sent: Arc<Mutex<Vec<Vec<Patch>>>> = Arc::new(Mutex::new(Vec::new()));
        let subscribed_clone = subscribed.clone();
        let sent_clone = sent.clone();
        let upstream_write: UpstreamWrite = Arc::new(move |patches, _tags| {
            if !subscribed_clone.load(Ordering::SeqCst) {
                return Err(Error::NotSubscribed);
            }
            sent_clone.lock().unwrap().push(patches);
            Ok(())
        });
        let subscribe_upstream: SubscribeUpstream<Value> =
            Arc::new(|_v, _e| Box::new(|| {}));
        let signal = OwlSignal::new(subscribe_upstream, upstream_write);
        signal.inner.lazy.force_set(json!({"n": 0}), Vec::new());
        (signal, subscribed, sent)
    }

    #[test]
    fn optimistic_write_applies_locally_and_queues() {
        let (signal, _subscribed, sent) = test_signal();
        signal.setter().with_producer(|c| c.n += 1, Vec::new()).unwrap();
        assert_eq!(signal.get(), Some(Counter { n: 1 }));
        assert_eq!(signal.pending_write_count(), 1);
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn write_fails_fast_when_not_subscribed() {
        let (signal, subscribed, _sent) = test_signal();
        subscribed.store(false, Ordering::SeqCst);
        let err = signal.setter().with_producer(|c| c.n += 1, Vec::new()).unwrap_err();
        assert!(matches!(err, Error::NotSubscribed));
        // Rejected write must not become locally visible.
        assert_eq!(signal.get(), Some(Counter { n: 0 }));
    }

    #[test]
    fn reconcile_drains_one_pending_entry_per_echo() {
        let (signal, _subscribed, _sent) = test_signal();
        signal.setter().with_producer(|c| c.n += 1, Vec::new()).unwrap();
        signal.setter().with_producer(|c| c.n += 1, Vec::new()).unwrap();
        assert_eq!(signal.pending_write_count(), 2);

        let server_patches = vec![Patch::replace_root(json!({"n": 5}))];
        signal.reconcile(&server_patches, Vec::new()).unwrap();
        assert_eq!(signal.pending_write_count(), 1);
        assert_eq!(signal.get(), Some(Counter { n: 5 }));
    }
}
