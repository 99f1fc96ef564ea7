use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::KeyValueStore;

/// Process-local store, used when nothing should touch the disk
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    async fn set(&self, key: &str, value: &str) -> bool {
        self.values
            .write()
            .insert(key.to_owned(), value.to_owned());
        true
    }

    async fn delete(&self, key: &str) -> bool {
        self.values.write().remove(key);
        true
    }
}
