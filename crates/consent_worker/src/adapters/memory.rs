use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::adapters::blob_store::BlobStore;
use crate::adapters::kv_store::{KeyValueStore, ListPage, StoreError};

/// In-process store backing both traits, with injectable backend failures.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    content_types: Mutex<HashMap<String, String>>,
    denied_writes: Mutex<Vec<String>>,
    denied_deletes: Mutex<Vec<String>>,
    flaky_reads: Mutex<HashMap<String, usize>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("poisoned mutex")
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, key: &str, body: &[u8]) {
        locked(&self.entries).insert(key.to_string(), body.to_vec());
    }

    pub fn keys(&self) -> Vec<String> {
        locked(&self.entries).keys().cloned().collect()
    }

    pub fn body(&self, key: &str) -> Option<Vec<u8>> {
        locked(&self.entries).get(key).cloned()
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        locked(&self.content_types).get(key).cloned()
    }

    pub fn len(&self) -> usize {
        locked(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes to keys containing `fragment` fail with a backend error.
    pub fn deny_writes_containing(&self, fragment: &str) {
        locked(&self.denied_writes).push(fragment.to_string());
    }

    /// Deletes of keys containing `fragment` fail with a backend error.
    pub fn deny_deletes_containing(&self, fragment: &str) {
        locked(&self.denied_deletes).push(fragment.to_string());
    }

    /// The next `failures` reads of `key` fail before succeeding.
    pub fn fail_reads(&self, key: &str, failures: usize) {
        locked(&self.flaky_reads).insert(key.to_string(), failures);
    }

    pub fn clear_failures(&self) {
        locked(&self.denied_writes).clear();
        locked(&self.denied_deletes).clear();
        locked(&self.flaky_reads).clear();
    }

    fn denied(list: &Mutex<Vec<String>>, key: &str) -> bool {
        locked(list).iter().any(|fragment| key.contains(fragment.as_str()))
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(remaining) = locked(&self.flaky_reads).get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Backend(format!(
                    "simulated read failure for key: {key}"
                )));
            }
        }
        Ok(self.body(key))
    }

    fn write(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        if Self::denied(&self.denied_writes, key) {
            return Err(StoreError::Backend(format!(
                "simulated write failure for key: {key}"
            )));
        }
        self.seed(key, body);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        if Self::denied(&self.denied_deletes, key) {
            return Err(StoreError::Backend(format!(
                "simulated delete failure for key: {key}"
            )));
        }
        locked(&self.entries).remove(key);
        locked(&self.content_types).remove(key);
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.read(key)
    }

    fn put(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        self.write(key, body)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.remove(key)
    }

    fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, StoreError> {
        let entries = locked(&self.entries);
        let mut matching = entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .filter(|key| cursor.map_or(true, |after| key.as_str() > after));

        let keys: Vec<String> = matching.by_ref().take(limit).cloned().collect();
        let has_more = matching.next().is_some();
        let cursor = if has_more { keys.last().cloned() } else { None };
        Ok(ListPage { keys, cursor })
    }
}

impl BlobStore for MemoryStore {
    fn get_blob(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.read(path)
    }

    fn put_blob(&self, path: &str, body: &[u8], content_type: &str) -> Result<(), StoreError> {
        self.write(path, body)?;
        locked(&self.content_types).insert(path.to_string(), content_type.to_string());
        Ok(())
    }

    fn delete_blob(&self, path: &str) -> Result<(), StoreError> {
        self.remove(path)
    }
}
