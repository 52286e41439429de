//! Key-value storage seam for session persistence.
//!
//! In the browser this is backed by `localStorage`; tests and native hosts
//! use the in-memory implementation.

use std::collections::HashMap;
use std::sync::Mutex;

/// Well-known key the session record is stored under
pub const SESSION_STORAGE_KEY: &str = "tamariba.session";

/// Minimal string key-value store, `localStorage`-shaped.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}

/// In-memory store used by tests and non-browser embeddings.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("session store lock poisoned")
            .get(key)
            .cloned()
    }

    fn put(&self, key: &str, value: String) {
        self.entries
            .lock()
            .expect("session store lock poisoned")
            .insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.entries
            .lock()
            .expect("session store lock poisoned")
            .remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_overwrites_previous_value() {
        // テスト項目: 同じキーへの put が以前の値を置き換える
        // given (前提条件):
        let store = InMemorySessionStore::new();
        store.put("k", "old".to_string());

        // when (操作):
        store.put("k", "new".to_string());

        // then (期待する結果):
        assert_eq!(store.get("k"), Some("new".to_string()));
    }

    #[test]
    fn test_remove_clears_entry() {
        // テスト項目: remove でエントリが消える
        // given (前提条件):
        let store = InMemorySessionStore::new();
        store.put("k", "v".to_string());

        // when (操作):
        store.remove("k");

        // then (期待する結果):
        assert_eq!(store.get("k"), None);
    }
}
