//! Subscriber registry for connection events.
//!
//! A [`Subscribers`] list holds explicit callback handles. Collaborators
//! register a callback (or a channel) and unregister it on teardown; the
//! connection never keeps a subscriber alive past [`Subscribers::clear`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

/// Handle returned by [`Subscribers::register`].
pub type SubscriptionId = u64;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Ordered list of event callbacks.
pub struct Subscribers<E> {
    next_id: AtomicU64,
    callbacks: RwLock<Vec<(SubscriptionId, Callback<E>)>>,
}

impl<E> Subscribers<E> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Register a callback.
    ///
    /// Callbacks run on whichever task produced the event and must not block.
    ///
    /// # Example
    ///
    /// ```
    /// use upnp_transport::events::Subscribers;
    ///
    /// let subscribers: Subscribers<u32> = Subscribers::new();
    /// let id = subscribers.register(|value| println!("event {value}"));
    /// subscribers.emit(&7);
    /// assert!(subscribers.unregister(id));
    /// ```
    pub fn register<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.write().push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns `false` if it was not registered.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(sid, _)| *sid != id);
        callbacks.len() != before
    }

    /// Invoke every registered callback in registration order.
    ///
    /// The list is snapshotted first so a callback may unregister itself.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Callback<E>> = self
            .callbacks
            .read()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in snapshot {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }

    /// Drop every callback.
    pub fn clear(&self) {
        self.callbacks.write().clear();
    }
}

impl<E: Clone + Send + 'static> Subscribers<E> {
    /// Register a channel subscriber and return its receiving end.
    ///
    /// Events are dropped silently once the receiver is gone.
    pub fn channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.register(move |event: &E| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}
