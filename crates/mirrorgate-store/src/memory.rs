//! In-memory store adapter.
//!
//! Honors the same TTL and atomicity semantics as the Redis adapter, with
//! atomicity coming from a single process-wide mutex. Backs tests (where
//! several strategy instances share one `Arc<MemoryStore>` to emulate a
//! fleet) and deployments without a configured Redis.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{KvStore, StoreError};

enum Slot {
    Value(String),
    List(VecDeque<String>),
}

struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the map and drop the entry if its TTL elapsed.
    fn live<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(Entry::expired) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }

    fn deadline(ttl_ms: u64) -> Option<Instant> {
        Some(Instant::now() + Duration::from_millis(ttl_ms))
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock();
        match Self::live(&mut entries, key) {
            Some(Entry { slot: Slot::Value(v), .. }) => Ok(Some(v.clone())),
            _ => Ok(None),
        }
    }

    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Value(value.to_string()),
                expires_at: Self::deadline(ttl_ms),
            },
        );
        Ok(())
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock();
        if Self::live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Value(value.to_string()),
                expires_at: Self::deadline(ttl_ms),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock();
        Ok(Self::live(&mut entries, key).is_some())
    }

    async fn list_push_head(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        match Self::live(&mut entries, key) {
            Some(Entry { slot: Slot::List(items), .. }) => items.push_front(value.to_string()),
            _ => {
                let mut items = VecDeque::new();
                items.push_front(value.to_string());
                entries.insert(
                    key.to_string(),
                    Entry { slot: Slot::List(items), expires_at: None },
                );
            }
        }
        Ok(())
    }

    async fn list_pop_tail(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock();
        match Self::live(&mut entries, key) {
            Some(Entry { slot: Slot::List(items), .. }) => Ok(items.pop_back()),
            _ => Ok(None),
        }
    }

    async fn list_index(&self, key: &str, index: i64) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock();
        match Self::live(&mut entries, key) {
            Some(Entry { slot: Slot::List(items), .. }) => {
                let len = items.len() as i64;
                let position = if index < 0 { len + index } else { index };
                if position < 0 || position >= len {
                    return Ok(None);
                }
                Ok(items.get(position as usize).cloned())
            }
            _ => Ok(None),
        }
    }

    async fn list_remove(&self, key: &str, count: i64, value: &str) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock();
        match Self::live(&mut entries, key) {
            Some(Entry { slot: Slot::List(items), .. }) => {
                let budget = if count == 0 { u64::MAX } else { count.unsigned_abs() };
                let mut removed = 0u64;
                // count < 0 means remove scanning from the tail
                let mut keep: VecDeque<String> = VecDeque::with_capacity(items.len());
                if count < 0 {
                    while let Some(item) = items.pop_back() {
                        if item == value && removed < budget {
                            removed += 1;
                        } else {
                            keep.push_front(item);
                        }
                    }
                } else {
                    while let Some(item) = items.pop_front() {
                        if item == value && removed < budget {
                            removed += 1;
                        } else {
                            keep.push_back(item);
                        }
                    }
                }
                *items = keep;
                Ok(removed)
            }
            _ => Ok(0),
        }
    }

    async fn list_len(&self, key: &str) -> Result<u64, StoreError> {
        let mut entries = self.entries.lock();
        match Self::live(&mut entries, key) {
            Some(Entry { slot: Slot::List(items), .. }) => Ok(items.len() as u64),
            _ => Ok(0),
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock();
        match Self::live(&mut entries, key) {
            Some(Entry { slot: Slot::Value(v), .. }) if v == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn incr_px(&self, key: &str, ttl_ms: u64) -> Result<i64, StoreError> {
        let mut entries = self.entries.lock();
        match Self::live(&mut entries, key) {
            Some(entry) => {
                let Slot::Value(current) = &entry.slot else {
                    return Err(StoreError::Command("INCR on a list key".to_string()));
                };
                let next = current
                    .parse::<i64>()
                    .map_err(|_| StoreError::Command("INCR on non-integer value".to_string()))?
                    + 1;
                entry.slot = Slot::Value(next.to_string());
                Ok(next)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        slot: Slot::Value("1".to_string()),
                        expires_at: Self::deadline(ttl_ms),
                    },
                );
                Ok(1)
            }
        }
    }

    fn is_ready(&self) -> bool {
        true
    }
}
