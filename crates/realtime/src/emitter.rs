//! Ordered, keyed listener registry.
//!
//! Used for message subscriptions, presence hooks, channel events and
//! connection events. Listeners registered under a key fire before wildcard
//! listeners; within each group they fire in registration order.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::warn;

/// A registered callback.
///
/// Clones compare equal to the original, which is how a listener is
/// identified for removal.
pub struct Listener<T: ?Sized>(Arc<dyn Fn(&T) + Send + Sync>);

impl<T: ?Sized> Listener<T> {
    pub fn new(f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    fn call(&self, value: &T) {
        (self.0)(value)
    }
}

impl<T: ?Sized> Clone for Listener<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: ?Sized> PartialEq for Listener<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: ?Sized> Eq for Listener<T> {}

impl<T: ?Sized> fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", Arc::as_ptr(&self.0))
    }
}

/// Listener registry keyed by `K`, with a wildcard group.
pub struct EventEmitter<K, T: ?Sized> {
    keyed: HashMap<K, Vec<Listener<T>>>,
    any: Vec<Listener<T>>,
}

impl<K, T: ?Sized> Default for EventEmitter<K, T> {
    fn default() -> Self {
        Self {
            keyed: HashMap::new(),
            any: Vec::new(),
        }
    }
}

impl<K: Eq + Hash + fmt::Debug, T: ?Sized> EventEmitter<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener under `key`, or for every event when `None`.
    pub fn on(&mut self, key: Option<K>, listener: Listener<T>) {
        match key {
            Some(key) => self.keyed.entry(key).or_default().push(listener),
            None => self.any.push(listener),
        }
    }

    /// Removes listeners.
    ///
    /// With a key, removes every listener under it, or only registrations of
    /// the given listener. Without a key, removes the given listener wherever
    /// it is registered, or everything when no listener is given.
    pub fn off(&mut self, key: Option<&K>, listener: Option<&Listener<T>>) {
        match (key, listener) {
            (Some(key), Some(listener)) => {
                if let Some(group) = self.keyed.get_mut(key) {
                    group.retain(|l| l != listener);
                    if group.is_empty() {
                        self.keyed.remove(key);
                    }
                }
            }
            (Some(key), None) => {
                self.keyed.remove(key);
            }
            (None, Some(listener)) => {
                self.any.retain(|l| l != listener);
                self.keyed.retain(|_, group| {
                    group.retain(|l| l != listener);
                    !group.is_empty()
                });
            }
            (None, None) => self.clear(),
        }
    }

    /// Calls listeners registered under `key`, then wildcard listeners.
    /// Events without a key only reach wildcard listeners.
    ///
    /// A panicking listener is logged and skipped; the rest still run.
    pub fn emit(&self, key: Option<&K>, value: &T) {
        let keyed = key
            .and_then(|key| self.keyed.get(key))
            .map(Vec::as_slice)
            .unwrap_or_default();
        for listener in keyed.iter().chain(self.any.iter()) {
            if catch_unwind(AssertUnwindSafe(|| listener.call(value))).is_err() {
                warn!(key = ?key, "listener panicked");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.any.len() + self.keyed.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.keyed.clear();
        self.any.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> Listener<str> {
        let log = log.clone();
        let tag = tag.to_string();
        Listener::new(move |value: &str| log.lock().unwrap().push(format!("{tag}:{value}")))
    }

    #[test]
    fn keyed_listeners_fire_before_wildcard() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut emitter = EventEmitter::<&str, str>::new();
        emitter.on(None, recorder(&log, "any"));
        emitter.on(Some("click"), recorder(&log, "a"));
        emitter.on(Some("click"), recorder(&log, "b"));

        emitter.emit(Some(&"click"), "x");
        emitter.emit(Some(&"move"), "y");
        emitter.emit(None, "z");

        assert_eq!(*log.lock().unwrap(), vec!["a:x", "b:x", "any:x", "any:y", "any:z"]);
    }

    #[test]
    fn off_with_listener_removes_exact_match_only() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut emitter = EventEmitter::<&str, str>::new();
        let kept = recorder(&log, "kept");
        let removed = recorder(&log, "removed");
        emitter.on(Some("click"), kept.clone());
        emitter.on(Some("click"), removed.clone());

        emitter.off(Some(&"click"), Some(&removed));
        emitter.off(Some(&"click"), Some(&removed));
        emitter.off(Some(&"absent"), Some(&kept));
        emitter.emit(Some(&"click"), "x");

        assert_eq!(*log.lock().unwrap(), vec!["kept:x"]);
    }

    #[test]
    fn off_without_listener_clears_key() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut emitter = EventEmitter::<&str, str>::new();
        emitter.on(Some("click"), recorder(&log, "a"));
        emitter.on(Some("click"), recorder(&log, "b"));
        emitter.on(None, recorder(&log, "any"));

        emitter.off(Some(&"click"), None);
        emitter.emit(Some(&"click"), "x");

        assert_eq!(*log.lock().unwrap(), vec!["any:x"]);
        assert_eq!(emitter.len(), 1);
    }

    #[test]
    fn off_without_key_drops_listener_everywhere() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut emitter = EventEmitter::<&str, str>::new();
        let listener = recorder(&log, "l");
        let other = recorder(&log, "other");
        emitter.on(Some("a"), listener.clone());
        emitter.on(Some("b"), listener.clone());
        emitter.on(Some("b"), other.clone());
        emitter.on(None, listener.clone());

        emitter.off(None, Some(&listener));
        assert_eq!(emitter.len(), 1);

        emitter.off(None, None);
        assert!(emitter.is_empty());
    }

    #[test]
    fn distinct_closures_are_not_equal() {
        let a = Listener::<str>::new(|_| {});
        let b = Listener::<str>::new(|_| {});
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn panicking_listener_is_contained() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut emitter = EventEmitter::<&str, str>::new();
        emitter.on(Some("k"), Listener::new(|_: &str| panic!("boom")));
        emitter.on(Some("k"), recorder(&log, "after"));

        emitter.emit(Some(&"k"), "v");
        assert_eq!(*log.lock().unwrap(), vec!["after:v"]);
    }
}
