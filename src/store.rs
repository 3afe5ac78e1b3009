//! State propagation between nodes
//!
//! A [`StateStore`] decides how a producer's output becomes a consumer's
//! input, and holds the single global value every operator can read.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Keyed state shared by every node of a run
///
/// 1. A parent's output is its child's input.
/// 2. The same output may be shaped differently for different children;
///    implement [`StateStore::input_from`] with consumer-aware logic for that.
///
/// All methods are called concurrently from node tasks.
pub trait StateStore<V, G = ()>: Send + Sync {
    /// Seeds a value for `id` before a run
    fn set_input(&self, id: &str, input: V);

    /// Value `producer` makes visible to `consumer`
    fn input_from(&self, producer: &str, consumer: &str) -> Option<V>;

    /// Records the output of node `id`, replacing any earlier one
    fn set_output(&self, id: &str, output: V);

    /// Current output of node `id`
    fn output(&self, id: &str) -> Option<V>;

    /// Forgets the output of node `id`, if any
    fn remove_output(&self, id: &str);

    /// Snapshot of every identifier that currently has a value
    fn all_outputs(&self) -> HashMap<String, V>;

    /// Replaces the global value handed to every operator
    fn set_global(&self, global: G);

    /// Shared handle to the global value
    fn global(&self) -> Option<Arc<G>>;

    /// Drops all per-identifier state, leaving the global value alone
    fn clear(&self);

    /// Drops the global value
    fn clear_global(&self);
}

/// Default in-memory store
///
/// Inputs and outputs share one map, so [`StateStore::set_input`] on an id is
/// the same as setting its output. `input_from` ignores the consumer and
/// returns the producer's raw output.
pub struct MemoryStore<V, G = ()> {
    state: RwLock<HashMap<String, V>>,
    global: RwLock<Option<Arc<G>>>,
}

impl<V, G> MemoryStore<V, G> {
    /// Creates an empty store with no global value
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
            global: RwLock::new(None),
        }
    }

    /// Number of identifiers holding a value
    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    /// Returns true if no identifier holds a value
    pub fn is_empty(&self) -> bool {
        self.state.read().is_empty()
    }
}

impl<V, G> Default for MemoryStore<V, G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, G> StateStore<V, G> for MemoryStore<V, G>
where
    V: Clone + Send + Sync,
    G: Send + Sync,
{
    fn set_input(&self, id: &str, input: V) {
        self.state.write().insert(id.to_string(), input);
    }

    fn input_from(&self, producer: &str, _consumer: &str) -> Option<V> {
        self.state.read().get(producer).cloned()
    }

    fn set_output(&self, id: &str, output: V) {
        self.state.write().insert(id.to_string(), output);
    }

    fn output(&self, id: &str) -> Option<V> {
        self.state.read().get(id).cloned()
    }

    fn remove_output(&self, id: &str) {
        self.state.write().remove(id);
    }

    fn all_outputs(&self) -> HashMap<String, V> {
        self.state.read().clone()
    }

    fn set_global(&self, global: G) {
        *self.global.write() = Some(Arc::new(global));
    }

    fn global(&self) -> Option<Arc<G>> {
        self.global.read().clone()
    }

    fn clear(&self) {
        self.state.write().clear();
    }

    fn clear_global(&self) {
        *self.global.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_last_write_wins() {
        let store: MemoryStore<String> = MemoryStore::new();
        assert!(store.output("a").is_none());

        store.set_output("a", "one".into());
        store.set_output("a", "two".into());
        assert_eq!(store.output("a").as_deref(), Some("two"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_input_from_ignores_consumer() {
        let store: MemoryStore<u32> = MemoryStore::new();
        store.set_output("producer", 7);

        assert_eq!(store.input_from("producer", "left"), Some(7));
        assert_eq!(store.input_from("producer", "right"), Some(7));
        assert_eq!(store.input_from("nobody", "left"), None);
    }

    #[test]
    fn test_set_input_shares_namespace_with_outputs() {
        let store: MemoryStore<u32> = MemoryStore::new();
        store.set_input("seed", 3);
        assert_eq!(store.output("seed"), Some(3));
        assert_eq!(store.input_from("seed", "anyone"), Some(3));
    }

    #[test]
    fn test_remove_output() {
        let store: MemoryStore<u32> = MemoryStore::new();
        store.set_output("a", 1);
        store.set_output("b", 2);

        store.remove_output("a");
        store.remove_output("missing");
        assert!(store.output("a").is_none());
        assert_eq!(store.output("b"), Some(2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_all_outputs_is_a_snapshot() {
        let store: MemoryStore<u32> = MemoryStore::new();
        store.set_output("a", 1);
        store.set_output("b", 2);

        let snapshot = store.all_outputs();
        store.set_output("c", 3);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["a"], 1);
        assert_eq!(snapshot["b"], 2);
        assert_eq!(store.all_outputs().len(), 3);
    }

    #[test]
    fn test_global_is_shared_and_independently_cleared() {
        let store: MemoryStore<u32, String> = MemoryStore::new();
        assert!(store.global().is_none());

        store.set_global("config".into());
        store.set_output("a", 1);
        let first = store.global().unwrap();
        let second = store.global().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.global().as_deref().map(String::as_str), Some("config"));

        store.clear_global();
        assert!(store.global().is_none());
    }

    #[test]
    fn test_concurrent_writers() {
        let store: Arc<MemoryStore<usize>> = Arc::new(MemoryStore::new());

        std::thread::scope(|s| {
            for t in 0..8 {
                let store = store.clone();
                s.spawn(move || {
                    for i in 0..100 {
                        let id = format!("node_{t}_{i}");
                        store.set_output(&id, i);
                        assert_eq!(store.output(&id), Some(i));
                        let _ = store.all_outputs();
                    }
                });
            }
        });

        assert_eq!(store.len(), 800);
    }
}
