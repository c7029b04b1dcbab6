//! `LazySignal<T>`: an observable of `T` that subscribes upstream exactly
//! when the first observer attaches and tears down exactly when the last
//! one detaches.

use client_port_core::WriteTag;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast;

/// The opaque error type delivered to a signal's error sink. `Arc` so it can
/// be broadcast to every current observer without requiring the underlying
/// error to implement `Clone`.
pub type SignalError = Arc<dyn std::error::Error + Send + Sync>;

pub type ValueListener<T> = Arc<dyn Fn(T, Vec<WriteTag>) + Send + Sync>;
pub type ErrorListener = Arc<dyn Fn(SignalError) + Send + Sync>;
pub type Teardown = Box<dyn FnOnce() + Send>;
pub type SubscribeUpstream<T> = Arc<dyn Fn(ValueListener<T>, ErrorListener) -> Teardown + Send + Sync>;
pub type EqualsPredicate<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

#[derive(Clone)]
enum Event<T> {
    Value(T, Vec<WriteTag>),
    Error(SignalError),
}

struct State<T> {
    current: Option<T>,
    observer_count: usize,
    teardown: Option<Teardown>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    sender: broadcast::Sender<Event<T>>,
    subscribe_upstream: SubscribeUpstream<T>,
    equals: EqualsPredicate<T>,
}

/// An observable value with lazy upstream subscription.
pub struct LazySignal<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for LazySignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> LazySignal<T> {
    pub fn new(subscribe_upstream: SubscribeUpstream<T>) -> Self
    where
        T: PartialEq,
    {
        Self::with_equals(subscribe_upstream, Arc::new(|a: &T, b: &T| a == b))
    }

    pub fn with_equals(subscribe_upstream: SubscribeUpstream<T>, equals: EqualsPredicate<T>) -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    current: None,
                    observer_count: 0,
                    teardown: None,
                }),
                sender,
                subscribe_upstream,
                equals,
            }),
        }
    }

    /// The current value, or `None` if not-available.
    pub fn get(&self) -> Option<T> {
        self.inner.state.lock().unwrap().current.clone()
    }

    /// Sets the current value unconditionally and notifies observers with
    /// the given write tags, bypassing both `equals_predicate` and the
    /// upstream subscription. Used by [`crate::signal::owl::OwlSignal`] for
    /// optimistic local writes, which are always worth showing immediately
    /// regardless of whether they happen to equal the previous value.
    pub(crate) fn force_set(&self, value: T, tags: Vec<WriteTag>) {
        let mut state = self.inner.state.lock().unwrap();
        state.current = Some(value.clone());
        drop(state);
        let _ = self.inner.sender.send(Event::Value(value, tags));
    }

    /// Sets the current value through the same `equals_predicate` gate that
    /// guards upstream deliveries, so equal values are not re-emitted. Used
    /// by [`crate::port::ClientPort`] to install confirmed
    /// `signalUpdate`/`writableSignalUpdate` state, which must honor the
    /// gate the same way a value arriving through `subscribe_upstream`
    /// would.
    pub(crate) fn set_checked(&self, value: T, tags: Vec<WriteTag>) {
        deliver_value(&self.inner, value, tags);
    }

    /// Delivers an out-of-band error to every current observer.
    pub(crate) fn deliver_error(&self, error: SignalError) {
        let _ = self.inner.sender.send(Event::Error(error));
    }

    /// Subscribes an observer. The first observer triggers
    /// `subscribe_upstream`; the value already available (if any) is
    /// delivered to every new observer immediately, so a fresh subscription
    /// never has to wait for the next upstream push just to see where
    /// things stand (delivered with no tags, since it is a replay rather
    /// than a fresh update).
    pub fn subscribe(&self) -> LazySubscription<T> {
        let receiver = self.inner.sender.subscribe();
        let initial = {
            let mut state = self.inner.state.lock().unwrap();
            state.observer_count += 1;
            if state.observer_count == 1 {
                let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
                let value_weak = weak.clone();
                let error_weak = weak;
                let value_listener: ValueListener<T> = Arc::new(move |value, tags| {
                    if let Some(inner) = value_weak.upgrade() {
                        deliver_value(&inner, value, tags);
                    }
                });
                let error_listener: ErrorListener = Arc::new(move |err| {
                    if let Some(inner) = error_weak.upgrade() {
                        let _ = inner.sender.send(Event::Error(err));
                    }
                });
                let teardown = (self.inner.subscribe_upstream)(value_listener, error_listener);
                state.teardown = Some(teardown);
            }
            state.current.clone()
        };
        LazySubscription {
            inner: self.inner.clone(),
            receiver,
            initial: initial.map(|v| Event::Value(v, Vec::new())),
        }
    }
}

fn deliver_value<T: Clone + Send + Sync + 'static>(inner: &Inner<T>, value: T, tags: Vec<WriteTag>) {
    let mut state = inner.state.lock().unwrap();
    let changed = match &state.current {
        Some(existing) => !(inner.equals)(existing, &value),
        None => true,
    };
    if !changed {
        return;
    }
    state.current = Some(value.clone());
    drop(state);
    let _ = inner.sender.send(Event::Value(value, tags));
}

/// A handle returned by [`LazySignal::subscribe`]. Implements nothing fancy
/// on purpose: call [`LazySubscription::recv`] in a loop.
pub struct LazySubscription<T> {
    inner: Arc<Inner<T>>,
    receiver: broadcast::Receiver<Event<T>>,
    initial: Option<Event<T>>,
}

/// What one [`LazySubscription::recv`] step yielded.
#[derive(Debug, Clone)]
pub enum Observed<T> {
    Value(T, Vec<WriteTag>),
    Error(SignalError),
}

impl<T: Clone + Send + Sync + 'static> LazySubscription<T> {
    pub async fn recv(&mut self) -> Option<Observed<T>> {
        if let Some(initial) = self.initial.take() {
            return Some(to_observed(initial));
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(to_observed(event)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

fn to_observed<T>(event: Event<T>) -> Observed<T> {
    match event {
        Event::Value(v, tags) => Observed::Value(v, tags),
        Event::Error(e) => Observed::Error(e),
    }
}

impl<T> Drop for LazySubscription<T> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().unwrap();
        state.observer_count = state.observer_count.saturating_sub(1);
        if state.observer_count == 0 {
            if let Some(teardown) = state.teardown.take() {
                drop(state);
                teardown();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn lazy_subscribes_on_first_observer_only() {
        let subscribe_calls = Arc::new(AtomicUsize::new(0));
        let teardown_calls = Arc::new(AtomicUsize::new(0));
        let subscribe_calls_clone = subscribe_calls.clone();
        let teardown_calls_clone = teardown_calls.clone();
        let signal: LazySignal<i64> = LazySignal::new(Arc::new(move |_value, _err| {
            subscribe_calls_clone.fetch_add(1, Ordering::SeqCst);
            let teardown_calls = teardown_calls_clone.clone();
            Box::new(move || {
                teardown_calls.fetch_add(1, Ordering::SeqCst);
            })
        }));

        let sub1 = signal.subscribe();
        let sub2 = signal.subscribe();
        assert_eq!(subscribe_calls.load(Ordering::SeqCst), 1);

        drop(sub1);
        assert_eq!(teardown_calls.load(Ordering::SeqCst), 0);
        drop(sub2);
        assert_eq!(teardown_calls.load(Ordering::SeqCst), 1);

        // Re-subscribing after full teardown starts a fresh upstream session.
        let _sub3 = signal.subscribe();
        assert_eq!(subscribe_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn equal_values_are_not_re_emitted() {
        let signal: LazySignal<i64> = LazySignal::new(Arc::new(|_v, _e| Box::new(|| {})));
        let mut sub = signal.subscribe();
        deliver_value(&signal.inner, 1, Vec::new());
        deliver_value(&signal.inner, 1, Vec::new());
        deliver_value(&signal.inner, 2, vec!["user".into()]);
        let mut values = Vec::new();
        for _ in 0..2 {
            if let Some(Observed::Value(v, _tags)) = sub.recv().await {
                values.push(v);
            }
        }
        assert_eq!(values, vec![1, 2]);
    }

    #[tokio::test]
    async fn tags_are_delivered_alongside_the_value() {
        let signal: LazySignal<i64> = LazySignal::new(Arc::new(|_v, _e| Box::new(|| {})));
        let mut sub = signal.subscribe();
        deliver_value(&signal.inner, 1, vec!["server-push".into()]);
        match sub.recv().await {
            Some(Observed::Value(1, tags)) => assert_eq!(tags, vec!["server-push".into()]),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
