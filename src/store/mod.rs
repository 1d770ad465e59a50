pub mod notification_store;
pub mod rate_limit;
pub mod scheduler_store;
pub mod webhook_store;

pub use notification_store::{InMemoryNotificationStore, NotificationStore};
pub use rate_limit::RateLimitStore;
pub use scheduler_store::{InMemoryTaskStore, TaskStore};
pub use webhook_store::{InMemoryWebhookStore, WebhookStore};

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Shared index bookkeeping used by all three in-memory stores (§4.C): a
/// secondary set keyed by some field value, mapping to the ids currently
/// holding that value.
#[derive(Debug, Default)]
pub(crate) struct Index<K, V> {
    map: HashMap<K, HashSet<V>>,
}

impl<K: Eq + Hash + Clone, V: Eq + Hash + Clone> Index<K, V> {
    pub fn new() -> Self {
        Index { map: HashMap::new() }
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.map.entry(key).or_default().insert(value);
    }

    pub fn remove(&mut self, key: &K, value: &V) {
        if let Some(set) = self.map.get_mut(key) {
            set.remove(value);
            if set.is_empty() {
                self.map.remove(key);
            }
        }
    }

    pub fn get(&self, key: &K) -> Vec<V> {
        self.map.get(key).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }
}
