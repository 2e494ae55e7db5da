/// Storage contract used by the ingestion and publishing pipelines
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

use crate::error::StorageError;
use crate::models::Reading;

/// Filter for reporting queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    pub device_address: Option<String>,
    pub since_hours_ago: u32,
    pub limit: u32,
}

/// Append-only record store of readings
///
/// Implementations must be safe to share between the ingestion and
/// publisher tasks: an append running concurrently with a query is never
/// observed half-written.
pub trait TelemetryStore: Send + Sync + 'static {
    /// Record one reading. Existing readings are never modified.
    fn append(&self, reading: &Reading) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Newest reading of every device that has one, keyed by address
    ///
    /// Newest means greatest `time`; ties go to the reading inserted last.
    fn latest_per_device(
        &self,
    ) -> impl Future<Output = Result<BTreeMap<String, Reading>, StorageError>> + Send;

    /// Readings matching `query`, newest first
    fn query_range(
        &self,
        query: &RangeQuery,
    ) -> impl Future<Output = Result<Vec<Reading>, StorageError>> + Send;

    fn list_device_ids(
        &self,
    ) -> impl Future<Output = Result<BTreeSet<String>, StorageError>> + Send;
}
