use anyhow::Result;

use crate::monitoring::types::{Fields, Sample};

/// Selection for reading samples back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleFilter {
    /// Inclusive lower bound on the sample timestamp (ms since epoch)
    pub since_millis: Option<i64>,
    /// Inclusive upper bound on the sample timestamp (ms since epoch)
    pub until_millis: Option<i64>,
    /// Maximum number of samples, oldest first
    pub limit: Option<usize>,
}

impl SampleFilter {
    pub fn since(since_millis: i64) -> Self {
        Self { since_millis: Some(since_millis), ..Self::default() }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, sample: &Sample) -> bool {
        let timestamp = sample.timestamp_millis();
        self.since_millis.is_none_or(|since| timestamp >= since)
            && self.until_millis.is_none_or(|until| timestamp <= until)
    }

    /// Bounds in the form the SQL query binds: full range when unset,
    /// and `-1` (no limit in SQLite) for an absent limit.
    pub(crate) fn sql_bounds(&self) -> (i64, i64, i64) {
        (
            self.since_millis.unwrap_or(i64::MIN),
            self.until_millis.unwrap_or(i64::MAX),
            self.limit.map(|limit| limit as i64).unwrap_or(-1),
        )
    }
}

/// Row layout of the `samples` table
pub(crate) struct SampleRow {
    pub timestamp: i64,
    pub fields_json: String,
}

impl SampleRow {
    pub fn from_sample(sample: &Sample) -> Result<Self> {
        Ok(Self {
            timestamp: sample.timestamp_millis(),
            fields_json: serde_json::to_string(sample.fields())?,
        })
    }

    pub fn into_sample(self) -> Result<Sample> {
        let fields: Fields = serde_json::from_str(&self.fields_json)?;
        Ok(Sample::new(self.timestamp, fields))
    }
}
