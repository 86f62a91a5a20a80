//! The set of loaded threads.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use skein_shared::ThreadId;

use crate::thread::Thread;

/// Loaded threads keyed by id. Every operation takes the lock once, so
/// enumeration never observes a half-applied add or remove.
#[derive(Default)]
pub struct ThreadRegistry {
    threads: RwLock<HashMap<ThreadId, Arc<Thread>>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `thread`. Returns `false` if one with the same id or key is
    /// already loaded.
    pub fn add(&self, thread: Arc<Thread>) -> bool {
        let mut threads = self.write();
        if threads.contains_key(&thread.id()) || threads.values().any(|t| t.key() == thread.key()) {
            return false;
        }
        threads.insert(thread.id(), thread);
        true
    }

    pub fn remove(&self, id: &ThreadId) -> Option<Arc<Thread>> {
        self.write().remove(id)
    }

    pub fn get(&self, id: &ThreadId) -> Option<Arc<Thread>> {
        self.read().get(id).cloned()
    }

    pub fn get_by_key(&self, key: &str) -> Option<Arc<Thread>> {
        self.read().values().find(|t| t.key() == key).cloned()
    }

    pub fn contains(&self, id: &ThreadId) -> bool {
        self.read().contains_key(id)
    }

    /// All loaded threads, ordered by name then id.
    pub fn snapshot(&self) -> Vec<Arc<Thread>> {
        let mut threads: Vec<Arc<Thread>> = self.read().values().cloned().collect();
        threads.sort_by(|a, b| a.name().cmp(&b.name()).then(a.id().cmp(&b.id())));
        threads
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ThreadId, Arc<Thread>>> {
        self.threads.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ThreadId, Arc<Thread>>> {
        self.threads.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{new_record, TestPeer};

    #[tokio::test]
    async fn test_add_rejects_duplicate_id_and_key() {
        let peer = TestPeer::new("a").await;
        let registry = ThreadRegistry::new();

        let first = new_record(&peer.services, "b-thread");
        let thread = Arc::new(Thread::new(peer.services.clone(), first.clone()));
        assert!(registry.add(thread.clone()));
        assert!(!registry.add(thread));

        let clash = new_record(&peer.services, "b-thread");
        assert!(!registry.add(Arc::new(Thread::new(peer.services.clone(), clash))));

        let second = new_record(&peer.services, "a-thread");
        assert!(registry.add(Arc::new(Thread::new(peer.services.clone(), second.clone()))));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get_by_key("a-thread").unwrap().id(), second.id);
        let names: Vec<String> = registry.snapshot().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["a-thread", "b-thread"]);

        assert!(registry.remove(&first.id).is_some());
        assert!(!registry.contains(&first.id));
        assert!(registry.get_by_key("b-thread").is_none());
    }
}
