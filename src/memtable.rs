//! Rwlock wrapper over the skiplist. Readers share the lock; writers and
//! transaction commits take the write side. A delete is recorded as a put
//! of the tombstone value so lookups that fall through to the sstables see
//! the deletion first.

use crate::kv::{tombstone_value, KeyValue, TTL_NONE};
use crate::skiplist::SkipList;
use std::sync::{RwLock, RwLockWriteGuard};

pub struct Memtable {
    inner: RwLock<SkipList>,
}

impl Memtable {
    pub fn new(max_level: usize, probability: f64) -> Memtable {
        Memtable {
            inner: RwLock::new(SkipList::new(max_level, probability)),
        }
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>, ttl: i64) {
        self.inner.write().unwrap().put(key, value, ttl);
    }

    /// Record a deletion by inserting the tombstone value.
    pub fn delete(&self, key: Vec<u8>) {
        self.inner
            .write()
            .unwrap()
            .put(key, tombstone_value(), TTL_NONE);
    }

    /// Physically remove a key's node (transaction rollback only; normal
    /// deletes must go through [`Memtable::delete`]).
    pub fn remove(&self, key: &[u8]) -> bool {
        self.inner.write().unwrap().remove(key)
    }

    pub fn get(&self, key: &[u8]) -> Option<KeyValue> {
        self.inner.read().unwrap().get(key)
    }

    pub fn total_size(&self) -> usize {
        self.inner.read().unwrap().total_size()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }

    /// Deep copy of the current contents, for cursors.
    pub fn snapshot(&self) -> SkipList {
        self.inner.read().unwrap().copy()
    }

    /// Deep-copy the contents and clear the live table in one critical
    /// section; the copy becomes the flush worker's input.
    pub fn snapshot_and_clear(&self) -> SkipList {
        let mut guard = self.inner.write().unwrap();
        let snapshot = guard.copy();
        guard.clear();
        snapshot
    }

    /// Write guard for multi-op critical sections (transaction commit).
    pub fn lock_write(&self) -> RwLockWriteGuard<'_, SkipList> {
        self.inner.write().unwrap()
    }
}
