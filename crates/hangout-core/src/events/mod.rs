//! Buffering event emitter
//!
//! [`EventQueue`] is a per-topic publish/subscribe primitive with one extra
//! operation: [`EventQueue::queue`] delivers immediately when somebody is
//! listening and otherwise buffers the event. The first listener to subscribe
//! to a topic with buffered events receives all of them, in arrival order,
//! before any later event on that topic.
//!
//! Delivery is synchronous. A reentrant delivery lock serialises deliveries
//! across threads while still letting a listener emit further events from
//! inside its callback.

use parking_lot::{Mutex, ReentrantMutex};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tracing::trace;

/// Listener callback
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by [`EventQueue::on`], used to detach the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration<T> {
    id: ListenerId,
    once: bool,
    callback: Callback<T>,
}

struct QueueState<K, T> {
    listeners: HashMap<K, Vec<Registration<T>>>,
    buffered: HashMap<K, VecDeque<T>>,
    next_id: u64,
}

/// Emitter that buffers events published before anyone listens
pub struct EventQueue<K, T> {
    state: Mutex<QueueState<K, T>>,
    delivery: ReentrantMutex<()>,
}

impl<K, T> Default for EventQueue<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> fmt::Debug for EventQueue<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventQueue")
            .field("topics", &state.listeners.len())
            .field("buffered_topics", &state.buffered.len())
            .finish()
    }
}

impl<K, T> EventQueue<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                listeners: HashMap::new(),
                buffered: HashMap::new(),
                next_id: 0,
            }),
            delivery: ReentrantMutex::new(()),
        }
    }

    fn register(&self, topic: K, callback: Callback<T>) -> (ListenerId, Vec<T>) {
        let mut state = self.state.lock();
        let id = ListenerId(state.next_id);
        state.next_id += 1;
        state
            .listeners
            .entry(topic.clone())
            .or_default()
            .push(Registration {
                id,
                once: false,
                callback,
            });
        let replay = state
            .buffered
            .remove(&topic)
            .map(Vec::from)
            .unwrap_or_default();
        (id, replay)
    }

    /// Subscribe to a topic.
    ///
    /// Buffered events for the topic are replayed through `callback` before
    /// this returns, and the buffer is cleared.
    pub fn on<F>(&self, topic: K, callback: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let _delivering = self.delivery.lock();
        let callback: Callback<T> = Arc::new(callback);
        let (id, replay) = self.register(topic.clone(), callback.clone());
        if !replay.is_empty() {
            trace!(?topic, count = replay.len(), "replaying buffered events");
        }
        for event in &replay {
            callback(event);
        }
        id
    }

    /// Subscribe for a single delivery.
    ///
    /// If the topic has buffered events, all of them are replayed through
    /// `callback` in order, the buffer is cleared and the listener is not
    /// kept. Otherwise it stays registered until the next delivery.
    pub fn once<F>(&self, topic: K, callback: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let _delivering = self.delivery.lock();
        let (id, replay) = {
            let mut state = self.state.lock();
            let id = ListenerId(state.next_id);
            state.next_id += 1;
            match state.buffered.remove(&topic) {
                Some(events) if !events.is_empty() => (id, events),
                _ => {
                    state.listeners.entry(topic).or_default().push(Registration {
                        id,
                        once: true,
                        callback: Arc::new(callback),
                    });
                    return id;
                }
            }
        };
        trace!(?topic, count = replay.len(), "replaying buffered events once");
        for event in &replay {
            callback(event);
        }
        id
    }

    /// Detach a listener. Returns whether it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut state = self.state.lock();
        let mut found = false;
        state.listeners.retain(|_, registrations| {
            let before = registrations.len();
            registrations.retain(|registration| registration.id != id);
            found |= registrations.len() != before;
            !registrations.is_empty()
        });
        found
    }

    /// Deliver an event to current listeners without buffering.
    ///
    /// Returns the number of listeners that received it.
    pub fn emit(&self, topic: &K, event: T) -> usize {
        let _delivering = self.delivery.lock();
        self.deliver(topic, &event)
    }

    /// Deliver an event now if the topic has listeners, otherwise buffer it
    pub fn queue(&self, topic: K, event: T) {
        let _delivering = self.delivery.lock();
        {
            let mut state = self.state.lock();
            let listening = state
                .listeners
                .get(&topic)
                .is_some_and(|registrations| !registrations.is_empty());
            if !listening {
                trace!(?topic, "buffering event until a listener subscribes");
                state.buffered.entry(topic).or_default().push_back(event);
                return;
            }
        }
        self.deliver(&topic, &event);
    }

    fn deliver(&self, topic: &K, event: &T) -> usize {
        let callbacks: Vec<Callback<T>> = {
            let mut state = self.state.lock();
            let Some(registrations) = state.listeners.get_mut(topic) else {
                return 0;
            };
            let callbacks = registrations
                .iter()
                .map(|registration| registration.callback.clone())
                .collect();
            registrations.retain(|registration| !registration.once);
            if registrations.is_empty() {
                state.listeners.remove(topic);
            }
            callbacks
        };
        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }

    /// Number of listeners registered for a topic
    pub fn listener_count(&self, topic: &K) -> usize {
        self.state
            .lock()
            .listeners
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Number of buffered events waiting for a listener on a topic
    pub fn pending(&self, topic: &K) -> usize {
        self.state.lock().buffered.get(topic).map_or(0, VecDeque::len)
    }

    /// Drop every buffered event, keeping listeners
    pub fn clear_pending(&self) {
        self.state.lock().buffered.clear();
    }

    /// Drop every listener and buffered event
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.listeners.clear();
        state.buffered.clear();
    }
}
