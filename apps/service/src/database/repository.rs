use anyhow::Result;
use async_trait::async_trait;
use libsql::params;

use super::models::{SampleFilter, SampleRow};
use crate::monitoring::types::Sample;
use crate::pool::LibsqlPool;

/// Append-only sample store
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Append a sample, returning its row id
    async fn insert(&self, sample: &Sample) -> Result<i64>;

    /// Samples matching `filter`, oldest first
    async fn query_ordered_by_timestamp(&self, filter: Option<&SampleFilter>) -> Result<Vec<Sample>>;

    /// Delete all but the `keep` most recent samples; `0` deletes everything.
    /// Returns the number of samples removed.
    async fn prune_keeping_most_recent(&self, keep: u64) -> Result<u64>;

    async fn count(&self) -> Result<u64>;
}

/// LibSQL-backed store
pub struct LibsqlSampleStore {
    pool: LibsqlPool,
}

impl LibsqlSampleStore {
    /// Create a store over a pool whose schema is already initialized
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Open a local database file and bring its schema up to date
    pub async fn open(path: &str) -> Result<Self> {
        let pool = crate::pool::open_local(path).await?;
        let conn = pool.get().await?;
        super::initialize_database(&conn).await?;
        drop(conn);
        Ok(Self::new_from_pool(pool))
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::LibsqlManager>> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl SampleStore for LibsqlSampleStore {
    async fn insert(&self, sample: &Sample) -> Result<i64> {
        let conn = self.get_conn().await?;
        let row = SampleRow::from_sample(sample)?;

        conn.execute(
            "INSERT INTO samples (timestamp, fields) VALUES (?, ?)",
            params![row.timestamp, row.fields_json],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn query_ordered_by_timestamp(&self, filter: Option<&SampleFilter>) -> Result<Vec<Sample>> {
        let conn = self.get_conn().await?;
        let (since, until, limit) = filter.cloned().unwrap_or_default().sql_bounds();

        let stmt = conn
            .prepare("SELECT timestamp, fields FROM samples WHERE timestamp >= ? AND timestamp <= ? ORDER BY timestamp ASC, id ASC LIMIT ?")
            .await?;
        let mut rows = stmt.query(params![since, until, limit]).await?;

        let mut samples = Vec::new();
        while let Some(row) = rows.next().await? {
            let row = SampleRow { timestamp: row.get(0)?, fields_json: row.get(1)? };
            samples.push(row.into_sample()?);
        }

        Ok(samples)
    }

    async fn prune_keeping_most_recent(&self, keep: u64) -> Result<u64> {
        let conn = self.get_conn().await?;

        let deleted = if keep == 0 {
            conn.execute("DELETE FROM samples", ()).await?
        } else {
            conn.execute(
                "DELETE FROM samples WHERE id NOT IN (SELECT id FROM samples ORDER BY timestamp DESC, id DESC LIMIT ?)",
                params![keep as i64],
            )
            .await?
        };

        Ok(deleted)
    }

    async fn count(&self) -> Result<u64> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query("SELECT COUNT(*) FROM samples", ()).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)? as u64),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::{Fields, ProbeOutcome, ProbeResult};
    use tempfile::tempdir;

    async fn create_test_store() -> Result<(LibsqlSampleStore, tempfile::TempDir)> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test.db");
        let store = LibsqlSampleStore::open(&db_path.to_string_lossy()).await?;
        Ok((store, temp_dir))
    }

    fn sample(timestamp: i64) -> Sample {
        let mut fields = Fields::new();
        fields.insert("NETWORK_TYPE", "WIFI");
        fields.extend(ProbeOutcome::new(ProbeResult::Pass, ProbeResult::Slow).into_fields());
        Sample::new(timestamp, fields)
    }

    #[tokio::test]
    async fn test_insert_and_query_in_order() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        for timestamp in [300, 100, 200] {
            store.insert(&sample(timestamp)).await?;
        }

        let samples = store.query_ordered_by_timestamp(None).await?;
        let timestamps: Vec<_> = samples.iter().map(|s| s.timestamp_millis()).collect();
        assert_eq!(timestamps, vec![100, 200, 300]);
        assert_eq!(samples[0], sample(100));

        let since = SampleFilter::since(150).with_limit(1);
        let samples = store.query_ordered_by_timestamp(Some(&since)).await?;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].timestamp_millis(), 200);
        Ok(())
    }

    #[tokio::test]
    async fn test_prune_keeps_most_recent() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        for timestamp in 1..=10 {
            store.insert(&sample(timestamp)).await?;
        }

        assert_eq!(store.prune_keeping_most_recent(3).await?, 7);
        let timestamps: Vec<_> = store
            .query_ordered_by_timestamp(None)
            .await?
            .iter()
            .map(|s| s.timestamp_millis())
            .collect();
        assert_eq!(timestamps, vec![8, 9, 10]);

        assert_eq!(store.prune_keeping_most_recent(0).await?, 3);
        assert_eq!(store.count().await?, 0);
        Ok(())
    }
}
