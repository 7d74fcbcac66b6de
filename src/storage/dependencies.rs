//! Service dependency graph reads.

use crate::core::{DependencyLink, Result, TraceStoreError};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Dependency reader. The store keeps no dependency links, so every read
/// reports [`TraceStoreError::NotImplemented`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DependencyReader;

impl DependencyReader {
    pub fn new() -> Self {
        Self
    }

    /// Links observed in `[end_ts - lookback, end_ts]`.
    pub async fn get_dependencies(
        &self,
        end_ts: DateTime<Utc>,
        lookback: Duration,
    ) -> Result<Vec<DependencyLink>> {
        tracing::debug!(%end_ts, ?lookback, "Dependency read requested");
        Err(TraceStoreError::NotImplemented(
            "dependency links are not stored".to_string(),
        ))
    }
}
