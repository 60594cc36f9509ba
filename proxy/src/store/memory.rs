/// In-process correlation store
///
/// Used when no Redis address is configured. Correlation then only works
/// within this process, which is all a single proxy instance needs.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::{CorrelationStore, JobSource};
use crate::error::Result;

/// Expired entries are swept once the map grows past this size.
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (JobSource, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|(_, expires)| *expires > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CorrelationStore for MemoryStore {
    async fn set(&self, job_id: &str, source: JobSource, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if entries.len() >= SWEEP_THRESHOLD {
            entries.retain(|_, (_, expires)| *expires > now);
        }

        entries.insert(job_id.to_string(), (source, now + ttl));
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobSource>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get(job_id) {
            Some((source, expires)) if *expires > now => Ok(Some(*source)),
            Some(_) => {
                entries.remove(job_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryStore::new();
        store.set("job42", JobSource::Develop, Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.get("job42").await.unwrap(), Some(JobSource::Develop));
        assert_eq!(store.get("job43").await.unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_absent() {
        let store = MemoryStore::new();
        store.set("stale", JobSource::Inject, Duration::ZERO).await.unwrap();

        assert_eq!(store.get("stale").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_source() {
        let store = MemoryStore::new();
        store.set("job", JobSource::Inject, Duration::from_secs(60)).await.unwrap();
        store.set("job", JobSource::Develop, Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.get("job").await.unwrap(), Some(JobSource::Develop));
    }

    #[tokio::test]
    async fn test_sweep_drops_expired_entries() {
        let store = MemoryStore::new();
        for i in 0..SWEEP_THRESHOLD {
            store.set(&format!("old{}", i), JobSource::Inject, Duration::ZERO).await.unwrap();
        }
        store.set("fresh", JobSource::Develop, Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.entries.lock().len(), 1);
        assert_eq!(store.get("fresh").await.unwrap(), Some(JobSource::Develop));
    }
}
