//! The Setter façade: a uniform write surface over a primitive updater,
//! offering value/updater/producer/patch flavors plus write tags.

use client_port_core::{apply_patches, produce, Patch, Result, WriteTag};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// What a single write asks the primitive updater to do: either mutate a
/// draft of the current value (patches are derived by diffing), or apply an
/// explicit patch list verbatim (used by [`Setter::with_patches`], where the
/// caller already knows exactly which patches they want sent, and diffing
/// would risk synthesizing a different, merely-equivalent, patch list).
pub enum Write {
    Mutate(Box<dyn FnOnce(&mut Value) + Send>),
    Patches(Vec<Patch>),
}

/// The primitive updater every [`Setter`] is built on top of. Returns an
/// error when the write cannot be sent upstream at all: a writable signal
/// with no active subscription fails the write immediately with
/// `NotSubscribed` rather than silently dropping it.
pub type PrimitiveUpdater = Arc<dyn Fn(Write, Vec<WriteTag>) -> Result<()> + Send + Sync>;

/// Computes the new document and the patch list a [`Write`] produces,
/// against `current`. Shared by the primitive updater implementations in
/// [`crate::signal::owl::OwlSignal`] so the diff/patch policy lives in one
/// place.
pub fn resolve(current: &Value, write: Write) -> (Value, Vec<Patch>) {
    match write {
        Write::Mutate(f) => produce(current, f),
        Write::Patches(patches) => {
            let new_value = apply_patches(current, &patches)
                .expect("caller-supplied patches must apply to the current value");
            (new_value, patches)
        }
    }
}

/// A uniform write surface over `T`, offered by every writable signal.
/// Cheap to clone; all instances for one signal share the same primitive
/// updater.
pub struct Setter<T> {
    primitive: PrimitiveUpdater,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Self {
            primitive: self.primitive.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Setter<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(primitive: PrimitiveUpdater) -> Self {
        Self {
            primitive,
            _marker: PhantomData,
        }
    }

    /// Replaces the value outright.
    pub fn set(&self, value: T, tags: impl Into<Vec<WriteTag>>) -> Result<()> {
        let serialized = serde_json::to_value(value).expect("T must serialize to JSON");
        (self.primitive)(
            Write::Mutate(Box::new(move |draft| *draft = serialized)),
            tags.into(),
        )
    }

    /// Computes the new value from the old one.
    pub fn with_updater(
        &self,
        updater: impl FnOnce(T) -> T + Send + 'static,
        tags: impl Into<Vec<WriteTag>>,
    ) -> Result<()>
    where
        T: Send + 'static,
    {
        (self.primitive)(
            Write::Mutate(Box::new(move |draft| {
                let old: T = serde_json::from_value(draft.take())
                    .expect("current signal value must deserialize to T");
                let new = updater(old);
                *draft = serde_json::to_value(new).expect("T must serialize to JSON");
            })),
            tags.into(),
        )
    }

    /// Runs an in-place mutator against a draft of the current value.
    pub fn with_producer(
        &self,
        producer: impl FnOnce(&mut T) + Send + 'static,
        tags: impl Into<Vec<WriteTag>>,
    ) -> Result<()>
    where
        T: Send + 'static,
    {
        (self.primitive)(
            Write::Mutate(Box::new(move |draft| {
                let mut value: T = serde_json::from_value(draft.take())
                    .expect("current signal value must deserialize to T");
                producer(&mut value);
                *draft = serde_json::to_value(value).expect("T must serialize to JSON");
            })),
            tags.into(),
        )
    }

    /// Applies a patch list directly, bypassing diffing.
    pub fn with_patches(&self, patches: Vec<Patch>, tags: impl Into<Vec<WriteTag>>) -> Result<()> {
        (self.primitive)(Write::Patches(patches), tags.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Counter {
        n: i64,
    }

    fn test_setter() -> (Setter<Counter>, Arc<Mutex<Value>>, Arc<Mutex<Vec<(Vec<Patch>, Vec<WriteTag>)>>>) {
        let current = Arc::new(Mutex::new(json!({"n": 0})));
        let writes = Arc::new(Mutex::new(Vec::new()));
        let current_clone = current.clone();
        let writes_clone = writes.clone();
        let primitive: PrimitiveUpdater = Arc::new(move |write, tags| {
            let mut guard = current_clone.lock().unwrap();
            let (new_value, patches) = resolve(&guard, write);
            *guard = new_value;
            writes_clone.lock().unwrap().push((patches, tags));
            Ok(())
        });
        (Setter::new(primitive), current, writes)
    }

    #[test]
    fn set_replaces_value() {
        let (setter, current, _writes) = test_setter();
        setter.set(Counter { n: 5 }, vec!["user".into()]).unwrap();
        assert_eq!(*current.lock().unwrap(), json!({"n": 5}));
    }

    #[test]
    fn with_updater_transforms_old_value() {
        let (setter, current, writes) = test_setter();
        setter
            .with_updater(|old| Counter { n: old.n + 1 }, Vec::new())
            .unwrap();
        assert_eq!(*current.lock().unwrap(), json!({"n": 1}));
        assert_eq!(writes.lock().unwrap().len(), 1);
    }

    #[test]
    fn with_producer_mutates_in_place() {
        let (setter, current, _writes) = test_setter();
        setter.with_producer(|c| c.n += 10, Vec::new()).unwrap();
        assert_eq!(*current.lock().unwrap(), json!({"n": 10}));
    }

    #[test]
    fn with_patches_applies_verbatim() {
        let (setter, current, writes) = test_setter();
        let patches = vec![Patch::replace_root(json!({"n": 42}))];
        setter
            .with_patches(patches.clone(), vec![7i64.into()])
            .unwrap();
        assert_eq!(*current.lock().unwrap(), json!({"n": 42}));
        assert_eq!(writes.lock().unwrap()[0].0, patches);
    }
}
