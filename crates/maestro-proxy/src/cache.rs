//! Per-backend client cache.
//!
//! One client per `(host, port)`, created on first use and kept for the life
//! of the cache. There is no eviction.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use maestro_core::{BackendKey, Result};
use std::sync::Arc;
use tracing::debug;

/// Concurrent map from backend address to a shared client.
#[derive(Debug)]
pub struct ClientCache<C> {
    clients: DashMap<BackendKey, Arc<C>>,
}

impl<C> Default for ClientCache<C> {
    fn default() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }
}

impl<C> ClientCache<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The client for `key`, built with `make` if none exists yet.
    ///
    /// Concurrent callers for the same key get the same instance; `make`
    /// runs at most once per key.
    pub fn get_or_try_insert(
        &self,
        key: &BackendKey,
        make: impl FnOnce(&BackendKey) -> Result<C>,
    ) -> Result<Arc<C>> {
        if let Some(client) = self.clients.get(key) {
            return Ok(client.clone());
        }

        match self.clients.entry(key.clone()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let client = Arc::new(make(key)?);
                entry.insert(client.clone());
                debug!(backend = %key, cached = self.clients.len(), "Created backend client");
                Ok(client)
            }
        }
    }

    /// The cached client for `key`, if one was built.
    pub fn get(&self, key: &BackendKey) -> Option<Arc<C>> {
        self.clients.get(key).map(|client| client.clone())
    }

    /// Number of cached clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Addresses of every cached client, in no particular order.
    pub fn keys(&self) -> Vec<BackendKey> {
        self.clients.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshot of every cached client.
    pub fn clients(&self) -> Vec<Arc<C>> {
        self.clients.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_core::MaestroError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_same_key_returns_same_client() {
        let cache = ClientCache::new();
        let key = BackendKey::new("10.0.0.5", 11434);

        let first = cache.get_or_try_insert(&key, |k| Ok(k.to_string())).unwrap();
        let second = cache
            .get_or_try_insert(&key, |_| Ok("other".to_string()))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.as_str(), "10.0.0.5:11434");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_distinct_ports_get_distinct_clients() {
        let cache = ClientCache::new();
        cache
            .get_or_try_insert(&BackendKey::new("h", 1), |_| Ok(1))
            .unwrap();
        cache
            .get_or_try_insert(&BackendKey::new("h", 2), |_| Ok(2))
            .unwrap();

        let mut keys = cache.keys();
        keys.sort();
        assert_eq!(keys, vec![BackendKey::new("h", 1), BackendKey::new("h", 2)]);
    }

    #[test]
    fn test_failed_creation_caches_nothing() {
        let cache: ClientCache<u32> = ClientCache::new();
        let key = BackendKey::new("h", 1);

        let result = cache.get_or_try_insert(&key, |_| {
            Err(MaestroError::Config {
                message: "bad".into(),
            })
        });

        assert!(result.is_err());
        assert!(cache.is_empty());
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_concurrent_creation_runs_once() {
        let cache = Arc::new(ClientCache::new());
        let built = Arc::new(AtomicUsize::new(0));
        let key = BackendKey::new("h", 1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let built = built.clone();
                let key = key.clone();
                std::thread::spawn(move || {
                    cache
                        .get_or_try_insert(&key, |_| {
                            built.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }
}
