//! In-memory cache backend for testing.

use crate::backend::{BoxSyncRead, Cacher};
use crate::error::{ErrorKind, Result};
use crate::key::validate as validate_key;
use async_trait::async_trait;
use exn::ResultExt;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// In-memory cache backend for testing.
///
/// Entries live in a `HashMap` behind a [`RwLock`], so all trait methods can
/// operate on `&self`. Calls are counted so tests can assert which backends
/// were consulted.
///
/// # Examples
///
/// ```
/// use modcache_storage::{Cacher, backend::MockBackend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_entries([("key", b"archive")]);
/// assert!(backend.has("key").await?);
/// assert!(!backend.has("other").await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    failure: Option<MockFailure>,
    storage: RwLock<HashMap<String, Vec<u8>>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

impl MockBackend {
    /// Create a mock backend pre-populated with entries.
    ///
    /// Panics if any key fails validation. If test setup is wrong, then test
    /// should not pass.
    pub fn with_entries(entries: impl IntoIterator<Item = (impl Into<String>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        for (key, data) in entries {
            let key = key.into();
            if validate_key(&key).is_err() {
                panic!("MockBackend::with_entries: invalid key {key:?}");
            }
            map.insert(key, data.into());
        }
        Self {
            name: "mock".to_string(),
            failure: None,
            storage: RwLock::new(map),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make every call of one operation fail with a network error.
    pub fn with_failure(mut self, failure: MockFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    fn check(&self, operation: MockFailure, key: &str) -> Result<()> {
        if self.failure == Some(operation) {
            exn::bail!(ErrorKind::Network(format!("{operation:?} {key}: injected failure")));
        }
        Ok(())
    }

    /// Copy of the entry stored under `key`.
    pub async fn entry(&self, key: &str) -> Option<Vec<u8>> {
        self.storage.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.storage.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.storage.read().await.is_empty()
    }

    /// Number of successful [`get`](Cacher::get) calls.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of successful [`put`](Cacher::put) calls.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

/// Operation a [`MockBackend`] can be told to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockFailure {
    Has,
    Get,
    Put,
}

impl Default for MockBackend {
    fn default() -> Self {
        let entries: [(&str, &str); 0] = [];
        Self::with_entries(entries)
    }
}

#[async_trait]
impl Cacher for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let key = validate_key(key)?;
        self.check(MockFailure::Has, key)?;
        Ok(self.storage.read().await.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<BoxSyncRead> {
        let key = validate_key(key)?;
        self.check(MockFailure::Get, key)?;
        let data = self
            .storage
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(key.to_string())))?;
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Cursor::new(data)))
    }

    async fn put(&self, key: &str, mut reader: BoxSyncRead) -> Result<()> {
        let key = validate_key(key)?;
        self.check(MockFailure::Put, key)?;
        let key = key.to_string();
        let data = tokio::task::spawn_blocking(move || {
            let mut data = Vec::new();
            reader.read_to_end(&mut data).map(|_| data)
        })
        .await
        .or_raise(|| ErrorKind::Backend("mock put task failed".to_string()))?
        .map_err(ErrorKind::Io)?;
        self.storage.write().await.insert(key, data);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
