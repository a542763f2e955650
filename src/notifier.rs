//! Named-channel publish/subscribe
//!
//! Decouples whoever finishes an operation from whichever panel asked for
//! it. Panels subscribe when they are built and hold the returned
//! `Subscription`; dropping it removes the listener, so a torn-down panel
//! never receives a late callback.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    channels: HashMap<String, Vec<(u64, Listener<E>)>>,
}

fn lock<E>(registry: &Mutex<Registry<E>>) -> MutexGuard<'_, Registry<E>> {
    // A listener panicking elsewhere must not wedge the whole bus
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

/// Event bus shared by the application root, the runner and the panels
///
/// Clones share the same channel map.
pub struct Notifier<E> {
    inner: Arc<Mutex<Registry<E>>>,
}

impl<E> Clone for Notifier<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: 'static> Default for Notifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> Notifier<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                channels: HashMap::new(),
            })),
        }
    }

    /// Register a listener on `channel`
    ///
    /// The listener stays registered until the returned guard is dropped
    /// or detached.
    pub fn subscribe<F>(&self, channel: &str, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = lock(&self.inner);
            let id = registry.next_id;
            registry.next_id += 1;
            registry
                .channels
                .entry(channel.to_string())
                .or_default()
                .push((id, Arc::new(listener)));
            id
        };
        log::debug!("Listener {} subscribed to '{}'", id, channel);

        let weak: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.inner);
        let channel_name = channel.to_string();
        Subscription {
            channel: channel.to_string(),
            id,
            remove: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    remove_listener(&inner, &channel_name, id);
                }
            })),
        }
    }

    /// Deliver `event` to every listener currently on `channel`
    ///
    /// Returns how many listeners were called. Publishing to an empty
    /// channel does nothing. Listeners run without the registry lock held,
    /// so they may subscribe or unsubscribe themselves.
    pub fn publish(&self, channel: &str, event: &E) -> usize {
        let listeners: Vec<Listener<E>> = {
            let registry = lock(&self.inner);
            match registry.channels.get(channel) {
                Some(list) => list.iter().map(|(_, l)| l.clone()).collect(),
                None => Vec::new(),
            }
        };

        if listeners.is_empty() {
            log::debug!("No listeners on '{}', event dropped", channel);
            return 0;
        }

        for listener in &listeners {
            listener(event);
        }
        listeners.len()
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        lock(&self.inner)
            .channels
            .get(channel)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    /// Channels that currently have at least one listener
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.inner).channels.keys().cloned().collect();
        names.sort();
        names
    }
}

fn remove_listener<E>(inner: &Mutex<Registry<E>>, channel: &str, id: u64) {
    let mut registry = lock(inner);
    if let Some(list) = registry.channels.get_mut(channel) {
        list.retain(|(existing, _)| *existing != id);
        if list.is_empty() {
            registry.channels.remove(channel);
        }
    }
    log::debug!("Listener {} unsubscribed from '{}'", id, channel);
}

/// Registration handle returned by `Notifier::subscribe`
///
/// Dropping it unsubscribes the listener.
pub struct Subscription {
    channel: String,
    id: u64,
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }

    /// Keep the listener registered for the life of the notifier
    pub fn detach(mut self) {
        self.remove = None;
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .field("active", &self.remove.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}
