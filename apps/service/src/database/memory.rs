use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

use super::models::SampleFilter;
use super::repository::SampleStore;
use crate::monitoring::types::Sample;

/// In-process store for `--memory` runs and tests
#[derive(Debug, Default)]
pub struct MemorySampleStore {
    samples: Mutex<Vec<Sample>>,
}

impl MemorySampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Sample>>> {
        self.samples.lock().map_err(|_| anyhow::anyhow!("sample store lock poisoned"))
    }
}

#[async_trait]
impl SampleStore for MemorySampleStore {
    async fn insert(&self, sample: &Sample) -> Result<i64> {
        let mut samples = self.lock()?;
        samples.push(sample.clone());
        Ok(samples.len() as i64)
    }

    async fn query_ordered_by_timestamp(&self, filter: Option<&SampleFilter>) -> Result<Vec<Sample>> {
        let filter = filter.cloned().unwrap_or_default();
        let mut matching: Vec<Sample> =
            self.lock()?.iter().filter(|sample| filter.matches(sample)).cloned().collect();
        matching.sort_by_key(|sample| sample.timestamp_millis());
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    async fn prune_keeping_most_recent(&self, keep: u64) -> Result<u64> {
        let mut samples = self.lock()?;
        let keep = keep as usize;
        if samples.len() <= keep && keep != 0 {
            return Ok(0);
        }
        samples.sort_by_key(|sample| sample.timestamp_millis());
        let excess = samples.len().saturating_sub(keep);
        samples.drain(..excess);
        Ok(excess as u64)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.lock()?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::Fields;

    #[tokio::test]
    async fn test_prune_and_query() -> Result<()> {
        let store = MemorySampleStore::new();
        for timestamp in [5, 1, 4, 2, 3] {
            store.insert(&Sample::new(timestamp, Fields::new())).await?;
        }

        assert_eq!(store.prune_keeping_most_recent(10).await?, 0);
        assert_eq!(store.prune_keeping_most_recent(2).await?, 3);

        let timestamps: Vec<_> = store
            .query_ordered_by_timestamp(None)
            .await?
            .iter()
            .map(|s| s.timestamp_millis())
            .collect();
        assert_eq!(timestamps, vec![4, 5]);

        assert_eq!(store.prune_keeping_most_recent(0).await?, 2);
        assert_eq!(store.count().await?, 0);
        Ok(())
    }
}
