//! Key-value backends for session state and the matrix cache
//!
//! Production runs on NATS JetStream key-value buckets; eviction is purely
//! time-based via the bucket's `max_age`, refreshed by every put. Tests use
//! the in-memory backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_nats::jetstream;
use async_nats::jetstream::kv;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

/// Abstraction over the shared key-value store.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;

    /// Cheap reachability check for the health probe.
    async fn ping(&self) -> Result<()>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// JetStream key-value bucket backend.
pub struct NatsKvBackend {
    store: kv::Store,
    bucket: String,
}

impl NatsKvBackend {
    /// Open the named bucket, creating it with the given `max_age` TTL if it
    /// does not exist yet.
    pub async fn open(js: &jetstream::Context, bucket: &str, max_age: Duration) -> Result<Self> {
        let store = match js.get_key_value(bucket).await {
            Ok(store) => store,
            Err(_) => {
                let store = js
                    .create_key_value(kv::Config {
                        bucket: bucket.to_string(),
                        history: 1,
                        max_age,
                        ..Default::default()
                    })
                    .await
                    .with_context(|| format!("failed to create KV bucket '{bucket}'"))?;
                info!("JetStream KV bucket '{}' created (max_age={:?})", bucket, max_age);
                store
            }
        };

        Ok(Self { store, bucket: bucket.to_string() })
    }
}

#[async_trait]
impl KvBackend for NatsKvBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entry = self
            .store
            .get(key)
            .await
            .with_context(|| format!("KV get failed: {}/{}", self.bucket, key))?;
        Ok(entry.map(|bytes| bytes.to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.store
            .put(key, value.into())
            .await
            .with_context(|| format!("KV put failed: {}/{}", self.bucket, key))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store
            .purge(key)
            .await
            .with_context(|| format!("KV purge failed: {}/{}", self.bucket, key))?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.store
            .status()
            .await
            .with_context(|| format!("KV bucket '{}' unreachable", self.bucket))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "nats-kv"
    }
}

/// In-memory backend for tests. Ignores TTLs.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
