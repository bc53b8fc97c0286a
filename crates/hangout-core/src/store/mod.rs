//! Reactive attribute store
//!
//! A [`Store`] holds JSON attributes and notifies observers synchronously,
//! after the backing data has been updated, whenever an attribute changes.
//! Every stateful entity in the crate (peers, media) keeps its attributes in
//! a store.
//!
//! Notifications, in order:
//!
//! - `set`: [`StoreTopic::Updated`] (unless strict), [`StoreTopic::Change`],
//!   [`StoreTopic::ChangeOf`]
//! - `del`: [`StoreTopic::Updated`] (unless strict), [`StoreTopic::Deleted`],
//!   [`StoreTopic::DeletedOf`]
//! - `reset`: deletion notifications for removed keys, then change
//!   notifications for changed or new keys
//!
//! A handler that mutates the key it is being notified about gets
//! [`Error::ReentrantUpdate`].

mod attributes;

pub use attributes::Attributes;

use crate::error::{Error, Result};
use crate::events::{EventQueue, ListenerId};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tracing::{debug, trace, warn};

/// Read-time attribute transform
pub type Formatter = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Notification topics
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreTopic {
    /// Any non-strict set or delete
    Updated,
    /// Any value change
    Change,
    /// Value change of one key
    ChangeOf(String),
    /// Any deletion
    Deleted,
    /// Deletion of one key
    DeletedOf(String),
}

/// Payload delivered to store observers
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeEvent {
    /// Attribute name (an index for sequence-backed stores)
    pub key: String,
    /// New value, `None` for deletions
    pub value: Option<Value>,
    /// Value before the mutation
    pub previous: Option<Value>,
}

struct StoreInner {
    data: RwLock<Attributes>,
    formatters: RwLock<HashMap<String, Formatter>>,
    events: EventQueue<StoreTopic, AttributeEvent>,
    notifying: Mutex<HashSet<(String, ThreadId)>>,
}

/// Key/value attribute container with change notification
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("data", &*self.inner.data.read())
            .field("formatters", &self.inner.formatters.read().len())
            .finish()
    }
}

/// Marks a key as being notified on the current thread until dropped
struct Notifying<'a> {
    store: &'a StoreInner,
    entry: (String, ThreadId),
}

impl Drop for Notifying<'_> {
    fn drop(&mut self) {
        self.store.notifying.lock().remove(&self.entry);
    }
}

impl StoreInner {
    fn check_reentrant(&self, key: &str) -> Result<()> {
        let entry = (key.to_string(), thread::current().id());
        if self.notifying.lock().contains(&entry) {
            warn!(key, "rejecting reentrant update");
            return Err(Error::reentrant(key));
        }
        Ok(())
    }

    fn notifying(&self, key: &str) -> Notifying<'_> {
        let entry = (key.to_string(), thread::current().id());
        self.notifying.lock().insert(entry.clone());
        Notifying { store: self, entry }
    }

    fn notify_change(&self, key: &str, value: Value, previous: Option<Value>, strict: bool) {
        let _guard = self.notifying(key);
        let event = AttributeEvent {
            key: key.to_string(),
            value: Some(value),
            previous,
        };
        if !strict {
            self.events.emit(&StoreTopic::Updated, event.clone());
        }
        self.events.emit(&StoreTopic::Change, event.clone());
        self.events.emit(&StoreTopic::ChangeOf(key.to_string()), event);
    }

    fn notify_delete(&self, key: &str, previous: Value, strict: bool) {
        let _guard = self.notifying(key);
        let event = AttributeEvent {
            key: key.to_string(),
            value: None,
            previous: Some(previous),
        };
        if !strict {
            self.events.emit(&StoreTopic::Updated, event.clone());
        }
        self.events.emit(&StoreTopic::Deleted, event.clone());
        self.events.emit(&StoreTopic::DeletedOf(key.to_string()), event);
    }
}

impl Store {
    /// Create an empty map-backed store
    pub fn new() -> Self {
        Self::from_attributes(Attributes::default())
    }

    /// Create a store seeded with a map
    pub fn with_data(data: Map<String, Value>) -> Self {
        Self::from_attributes(Attributes::Map(data))
    }

    /// Create a sequence-backed store; keys are indices
    pub fn from_list(items: Vec<Value>) -> Self {
        Self::from_attributes(Attributes::List(items))
    }

    /// Create a store from a JSON object or array
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(Self::from_attributes(Attributes::from_value(value)?))
    }

    fn from_attributes(data: Attributes) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                data: RwLock::new(data),
                formatters: RwLock::new(HashMap::new()),
                events: EventQueue::new(),
                notifying: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Set an attribute, notifying observers. Returns whether it changed.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<bool> {
        self.set_with(key.into(), value.into(), false)
    }

    /// Set an attribute without the `Updated` notification
    pub fn set_strict(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<bool> {
        self.set_with(key.into(), value.into(), true)
    }

    fn set_with(&self, key: String, value: Value, strict: bool) -> Result<bool> {
        self.inner.check_reentrant(&key)?;
        let previous = {
            let mut data = self.inner.data.write();
            if data.get(&key) == Some(&value) {
                return Ok(false);
            }
            data.insert(&key, value.clone())?
        };
        trace!(key = %key, "attribute changed");
        self.inner.notify_change(&key, value, previous, strict);
        Ok(true)
    }

    /// Set several attributes in iteration order.
    ///
    /// Stops at the first failing key. Returns the number of changed keys.
    pub fn set_many<I>(&self, attributes: I) -> Result<usize>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut changed = 0;
        for (key, value) in attributes {
            if self.set_with(key, value, false)? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Read an attribute through its formatter, if any
    pub fn get(&self, key: &str) -> Option<Value> {
        let value = self.inner.data.read().get(key).cloned()?;
        let formatter = self.inner.formatters.read().get(key).cloned();
        Some(match formatter {
            Some(format) => format(&value),
            None => value,
        })
    }

    /// Whether the attribute is present
    pub fn has(&self, key: &str) -> bool {
        self.inner.data.read().get(key).is_some()
    }

    /// Delete an attribute, notifying observers. Returns whether it existed.
    pub fn del(&self, key: &str) -> Result<bool> {
        self.del_with(key, false)
    }

    /// Delete an attribute without the `Updated` notification
    pub fn del_strict(&self, key: &str) -> Result<bool> {
        self.del_with(key, true)
    }

    fn del_with(&self, key: &str, strict: bool) -> Result<bool> {
        self.inner.check_reentrant(key)?;
        let removed = self.inner.data.write().remove(key);
        let Some(previous) = removed else {
            return Ok(false);
        };
        trace!(key, "attribute deleted");
        self.inner.notify_delete(key, previous, strict);
        Ok(true)
    }

    /// Register a read-time formatter, replacing any previous one
    pub fn format<F>(&self, key: impl Into<String>, formatter: F) -> &Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.inner
            .formatters
            .write()
            .insert(key.into(), Arc::new(formatter));
        self
    }

    /// Replace all data with a JSON object or array.
    ///
    /// Keys missing from `data` get deletion notifications, then changed or
    /// new keys get change notifications carrying their previous value.
    pub fn reset(&self, data: Value) -> Result<()> {
        self.reset_with(data, false)
    }

    /// Replace all data without `Updated` notifications
    pub fn reset_strict(&self, data: Value) -> Result<()> {
        self.reset_with(data, true)
    }

    fn reset_with(&self, data: Value, strict: bool) -> Result<()> {
        let next = Attributes::from_value(data)?;
        {
            let current = thread::current().id();
            if let Some((key, _)) = self
                .inner
                .notifying
                .lock()
                .iter()
                .find(|(_, thread)| *thread == current)
            {
                return Err(Error::reentrant(key.clone()));
            }
        }
        let previous = std::mem::replace(&mut *self.inner.data.write(), next.clone());
        debug!(
            before = previous.len(),
            after = next.len(),
            "store reset"
        );

        for (key, value) in previous.entries() {
            if next.get(&key).is_none() {
                self.inner.notify_delete(&key, value, strict);
            }
        }
        for (key, value) in next.entries() {
            let old = previous.get(&key);
            if old != Some(&value) {
                self.inner.notify_change(&key, value, old.cloned(), strict);
            }
        }
        Ok(())
    }

    /// Replicate this store into `target`: copy current data now, then
    /// forward every non-strict set and delete.
    pub fn pipe(&self, target: &Store) -> Result<ListenerId> {
        target.set_many(self.inner.data.read().entries())?;
        let target = target.clone();
        Ok(self.on_updated(move |event| {
            let forwarded = match &event.value {
                Some(value) => target.set(event.key.clone(), value.clone()).map(|_| ()),
                None => target.del(&event.key).map(|_| ()),
            };
            if let Err(e) = forwarded {
                warn!(key = %event.key, error = %e, "pipe could not forward update");
            }
        }))
    }

    /// Define a derived attribute recomputed whenever a dependency changes
    pub fn compute<F>(&self, name: impl Into<String>, dependencies: &[&str], compute: F) -> Result<()>
    where
        F: Fn(&Store) -> Value + Send + Sync + 'static,
    {
        let name = name.into();
        if dependencies.iter().any(|dependency| *dependency == name) {
            return Err(Error::validation(format!(
                "computed attribute '{}' depends on itself",
                name
            )));
        }
        self.set(name.clone(), compute(self))?;

        let compute = Arc::new(compute);
        for dependency in dependencies {
            let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
            let compute = compute.clone();
            let name = name.clone();
            self.on_change_of(*dependency, move |_| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let store = Store { inner };
                if let Err(e) = store.set(name.clone(), compute(&store)) {
                    warn!(attribute = %name, error = %e, "failed to recompute attribute");
                }
            });
        }
        Ok(())
    }

    /// Run a plugin against this store
    pub fn apply<P>(&self, plugin: P) -> &Self
    where
        P: FnOnce(&Store),
    {
        plugin(self);
        self
    }

    /// Set a flag attribute to `true`
    pub fn enable(&self, key: impl Into<String>) -> Result<bool> {
        self.set(key, true)
    }

    /// Set a flag attribute to `false`
    pub fn disable(&self, key: impl Into<String>) -> Result<bool> {
        self.set(key, false)
    }

    /// Visit every raw attribute in order
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &Value),
    {
        for (key, value) in self.inner.data.read().entries() {
            visit(&key, &value);
        }
    }

    /// Attribute names in order
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .data
            .read()
            .entries()
            .into_iter()
            .map(|(key, _)| key)
            .collect()
    }

    /// Number of attributes
    pub fn len(&self) -> usize {
        self.inner.data.read().len()
    }

    /// Whether the store has no attributes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw data as a JSON value
    pub fn snapshot(&self) -> Value {
        self.inner.data.read().to_value()
    }

    /// Raw data serialised as JSON text
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    /// Observe every non-strict set and delete
    pub fn on_updated<F>(&self, observer: F) -> ListenerId
    where
        F: Fn(&AttributeEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(StoreTopic::Updated, observer)
    }

    /// Observe every value change
    pub fn on_change<F>(&self, observer: F) -> ListenerId
    where
        F: Fn(&AttributeEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(StoreTopic::Change, observer)
    }

    /// Observe value changes of one key
    pub fn on_change_of<F>(&self, key: impl Into<String>, observer: F) -> ListenerId
    where
        F: Fn(&AttributeEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(StoreTopic::ChangeOf(key.into()), observer)
    }

    /// Observe every deletion
    pub fn on_deleted<F>(&self, observer: F) -> ListenerId
    where
        F: Fn(&AttributeEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(StoreTopic::Deleted, observer)
    }

    /// Observe deletion of one key
    pub fn on_deleted_of<F>(&self, key: impl Into<String>, observer: F) -> ListenerId
    where
        F: Fn(&AttributeEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(StoreTopic::DeletedOf(key.into()), observer)
    }

    /// Detach an observer
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(store: &Store, topic: StoreTopic) -> Arc<Mutex<Vec<AttributeEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store
            .inner
            .events
            .on(topic, move |event: &AttributeEvent| sink.lock().push(event.clone()));
        seen
    }

    #[test]
    fn test_set_and_get() {
        let store = Store::new();
        assert!(store.set("name", "bredele").unwrap());
        assert_eq!(store.get("name"), Some(json!("bredele")));
        assert!(store.has("name"));
        assert!(!store.has("other"));
        assert_eq!(store.get("other"), None);
    }

    #[test]
    fn test_set_same_value_is_noop() {
        let store = Store::new();
        let updated = record(&store, StoreTopic::Updated);
        let changed = record(&store, StoreTopic::Change);

        store.set("a", 1).unwrap();
        assert!(!store.set("a", 1).unwrap());
        assert_eq!(updated.lock().len(), 1);
        assert_eq!(changed.lock().len(), 1);
    }

    #[test]
    fn test_change_carries_previous() {
        let store = Store::new();
        let changed = record(&store, StoreTopic::ChangeOf("a".into()));
        store.set("a", 1).unwrap();
        store.set("a", 2).unwrap();

        let changed = changed.lock();
        assert_eq!(changed[0].previous, None);
        assert_eq!(changed[1].value, Some(json!(2)));
        assert_eq!(changed[1].previous, Some(json!(1)));
    }

    #[test]
    fn test_notifications_fire_after_update_in_order() {
        let store = Store::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (topic, label) in [
            (StoreTopic::Updated, "updated"),
            (StoreTopic::Change, "change"),
            (StoreTopic::ChangeOf("a".into()), "change:a"),
        ] {
            let order = order.clone();
            let reader = store.clone();
            store.inner.events.on(topic, move |_| {
                assert_eq!(reader.get("a"), Some(json!(1)));
                order.lock().push(label);
            });
        }
        store.set("a", 1).unwrap();
        assert_eq!(*order.lock(), vec!["updated", "change", "change:a"]);
    }

    #[test]
    fn test_strict_skips_updated() {
        let store = Store::new();
        let updated = record(&store, StoreTopic::Updated);
        let changed = record(&store, StoreTopic::Change);
        store.set_strict("a", 1).unwrap();
        store.del_strict("a").unwrap();
        assert!(updated.lock().is_empty());
        assert_eq!(changed.lock().len(), 1);
    }

    #[test]
    fn test_del() {
        let store = Store::with_data(json!({"a": 1}).as_object().cloned().unwrap());
        let deleted = record(&store, StoreTopic::DeletedOf("a".into()));
        assert!(store.del("a").unwrap());
        assert!(!store.del("a").unwrap());
        assert!(!store.has("a"));
        assert_eq!(deleted.lock().len(), 1);
        assert_eq!(deleted.lock()[0].previous, Some(json!(1)));
    }

    #[test]
    fn test_list_backed_store() {
        let store = Store::from_list(vec![json!("a"), json!("b"), json!("c")]);
        assert_eq!(store.get("1"), Some(json!("b")));
        store.del("0").unwrap();
        assert_eq!(store.snapshot(), json!(["b", "c"]));
        store.set("2", "d").unwrap();
        assert_eq!(store.snapshot(), json!(["b", "c", "d"]));
        assert!(matches!(store.set("9", "x"), Err(Error::Validation { .. })));
        assert!(matches!(store.set("name", "x"), Err(Error::Validation { .. })));
    }

    #[test]
    fn test_formatter_does_not_mutate() {
        let store = Store::new();
        store.set("name", "bredele").unwrap();
        store.format("name", |value| {
            json!(value.as_str().unwrap_or_default().to_uppercase())
        });
        assert_eq!(store.get("name"), Some(json!("BREDELE")));
        assert_eq!(store.snapshot(), json!({"name": "bredele"}));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn test_reset_diff() {
        let store = Store::from_value(json!({"a": 1, "b": 2, "c": 3})).unwrap();
        let deleted = record(&store, StoreTopic::Deleted);
        let changed = record(&store, StoreTopic::Change);

        store.reset(json!({"b": 2, "c": 4, "d": 5})).unwrap();

        let deleted = deleted.lock();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].key, "a");
        assert_eq!(deleted[0].previous, Some(json!(1)));

        let changed = changed.lock();
        let keys: Vec<_> = changed.iter().map(|event| event.key.as_str()).collect();
        assert_eq!(keys, vec!["c", "d"]);
        assert_eq!(changed[0].previous, Some(json!(3)));
        assert_eq!(changed[1].previous, None);
    }

    #[test]
    fn test_reset_rejects_non_container() {
        let store = Store::new();
        store.set("a", 1).unwrap();
        assert!(matches!(store.reset(json!(42)), Err(Error::Validation { .. })));
        assert_eq!(store.get("a"), Some(json!(1)));
    }

    #[test]
    fn test_pipe() {
        let source = Store::from_value(json!({"a": 1})).unwrap();
        let target = Store::new();
        source.pipe(&target).unwrap();
        assert_eq!(target.get("a"), Some(json!(1)));

        source.set("b", false).unwrap();
        assert_eq!(target.get("b"), Some(json!(false)));
        source.del("a").unwrap();
        assert!(!target.has("a"));

        source.set_strict("c", 1).unwrap();
        assert!(!target.has("c"));
    }

    #[test]
    fn test_reentrant_set_is_rejected() {
        let store = Store::new();
        let result = Arc::new(Mutex::new(None));
        let sink = result.clone();
        let inner = store.clone();
        store.on_change_of("a", move |_| {
            *sink.lock() = Some(inner.set("a", 99));
        });
        store.set("a", 1).unwrap();

        assert!(matches!(
            result.lock().take(),
            Some(Err(Error::ReentrantUpdate { .. }))
        ));
        assert_eq!(store.get("a"), Some(json!(1)));
    }

    #[test]
    fn test_handler_may_set_other_keys() {
        let store = Store::new();
        let inner = store.clone();
        store.on_change_of("a", move |event| {
            inner.set("b", event.value.clone().unwrap_or_default()).unwrap();
        });
        store.set("a", 7).unwrap();
        assert_eq!(store.get("b"), Some(json!(7)));
    }

    #[test]
    fn test_compute() {
        let store = Store::from_value(json!({"first": "Olivier", "last": "Wietrich"})).unwrap();
        store
            .compute("name", &["first", "last"], |store| {
                let first = store.get("first").unwrap_or_default();
                let last = store.get("last").unwrap_or_default();
                json!(format!(
                    "{} {}",
                    first.as_str().unwrap_or_default(),
                    last.as_str().unwrap_or_default()
                ))
            })
            .unwrap();
        assert_eq!(store.get("name"), Some(json!("Olivier Wietrich")));
        store.set("first", "Bredele").unwrap();
        assert_eq!(store.get("name"), Some(json!("Bredele Wietrich")));

        assert!(store.compute("loop", &["loop"], |_| json!(1)).is_err());
    }

    #[test]
    fn test_off() {
        let store = Store::new();
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        let id = store.on_change(move |_| *counter.lock() += 1);
        store.set("a", 1).unwrap();
        assert!(store.off(id));
        store.set("a", 2).unwrap();
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_toggle_and_iteration() {
        let store = Store::new();
        store
            .apply(|store| {
                store.enable("audio").unwrap();
            })
            .disable("video")
            .unwrap();

        let mut seen = Vec::new();
        store.for_each(|key, value| seen.push((key.to_string(), value.clone())));
        assert_eq!(
            seen,
            vec![
                ("audio".to_string(), json!(true)),
                ("video".to_string(), json!(false))
            ]
        );
        assert_eq!(store.keys(), vec!["audio", "video"]);
        assert_eq!(store.to_json().unwrap(), r#"{"audio":true,"video":false}"#);
    }
}
