//! In-memory cache backend.

use hashbrown::HashMap;
use shellcache_common::Result;

use super::{CacheBackend, CachedResponse};

/// Ephemeral backend; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    /// Bucket names in creation order.
    order: Vec<String>,
    buckets: HashMap<String, HashMap<String, CachedResponse>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket_mut(&mut self, name: &str) -> &mut HashMap<String, CachedResponse> {
        if !self.buckets.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.buckets.entry(name.to_string()).or_default()
    }
}

impl CacheBackend for MemoryBackend {
    fn bucket_names(&self) -> Result<Vec<String>> {
        Ok(self.order.clone())
    }

    fn create_bucket(&mut self, name: &str) -> Result<()> {
        self.bucket_mut(name);
        Ok(())
    }

    fn delete_bucket(&mut self, name: &str) -> Result<bool> {
        self.order.retain(|n| n != name);
        Ok(self.buckets.remove(name).is_some())
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Option<CachedResponse>> {
        Ok(self
            .buckets
            .get(bucket)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn put(&mut self, bucket: &str, entry: CachedResponse) -> Result<()> {
        self.bucket_mut(bucket).insert(entry.key.clone(), entry);
        Ok(())
    }

    fn put_all(&mut self, bucket: &str, entries: Vec<CachedResponse>) -> Result<()> {
        let target = self.bucket_mut(bucket);
        for entry in entries {
            target.insert(entry.key.clone(), entry);
        }
        Ok(())
    }

    fn keys(&self, bucket: &str) -> Result<Vec<String>> {
        Ok(self
            .buckets
            .get(bucket)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }
}
