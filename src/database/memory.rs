/// In-memory store used by the pipeline tests
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use time::{Duration, OffsetDateTime};

use crate::database::store::{RangeQuery, TelemetryStore};
use crate::error::StorageError;
use crate::models::{PowerTier, Reading};

#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<Reading>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following operation fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<Reading> {
        self.rows.read().map(|rows| rows.clone()).unwrap_or_default()
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::StorageUnavailable("memory store offline".into()))
        } else {
            Ok(())
        }
    }

    fn snapshot(&self) -> Result<Vec<Reading>, StorageError> {
        self.check()?;
        self.rows
            .read()
            .map(|rows| rows.clone())
            .map_err(|e| StorageError::StorageUnavailable(e.to_string()))
    }
}

impl TelemetryStore for MemoryStore {
    async fn append(&self, reading: &Reading) -> Result<(), StorageError> {
        self.check()?;
        self.rows
            .write()
            .map_err(|e| StorageError::StorageUnavailable(e.to_string()))?
            .push(reading.clone());
        Ok(())
    }

    async fn latest_per_device(&self) -> Result<BTreeMap<String, Reading>, StorageError> {
        let mut latest: BTreeMap<String, Reading> = BTreeMap::new();
        // Later rows win ties because insertion order is iteration order.
        for reading in self.snapshot()? {
            match latest.get(&reading.device_address) {
                Some(current) if current.time > reading.time => {}
                _ => {
                    latest.insert(reading.device_address.clone(), reading);
                }
            }
        }
        Ok(latest)
    }

    async fn query_range(&self, query: &RangeQuery) -> Result<Vec<Reading>, StorageError> {
        let since = OffsetDateTime::now_utc() - Duration::hours(i64::from(query.since_hours_ago));
        let mut rows: Vec<(usize, Reading)> = self
            .snapshot()?
            .into_iter()
            .enumerate()
            .filter(|(_, r)| r.time >= since)
            .filter(|(_, r)| {
                query
                    .device_address
                    .as_ref()
                    .map_or(true, |device| &r.device_address == device)
            })
            .collect();
        rows.sort_by(|(ia, a), (ib, b)| b.time.cmp(&a.time).then(ib.cmp(ia)));
        Ok(rows
            .into_iter()
            .map(|(_, r)| r)
            .take(query.limit as usize)
            .collect())
    }

    async fn list_device_ids(&self) -> Result<BTreeSet<String>, StorageError> {
        Ok(self
            .snapshot()?
            .into_iter()
            .map(|r| r.device_address)
            .collect())
    }
}

/// Reading with fixed environmental values, for building store fixtures
pub fn sample_reading(address: &str, time: OffsetDateTime, temperature: f64) -> Reading {
    Reading {
        device_address: address.to_string(),
        device_name: None,
        time,
        node_timestamp: 0,
        temperature,
        pressure: 1000.0,
        humidity: 50.0,
        battery_mv: 3900,
        power_tier: PowerTier::Normal,
        rssi: Some(-70),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[tokio::test]
    async fn latest_prefers_newest_then_last_inserted() {
        let store = MemoryStore::new();
        let t0 = datetime!(2024-05-01 12:00 UTC);
        let t1 = datetime!(2024-05-01 12:05 UTC);

        store.append(&sample_reading("AA", t1, 1.0)).await.unwrap();
        store.append(&sample_reading("AA", t0, 2.0)).await.unwrap();
        store.append(&sample_reading("AA", t1, 3.0)).await.unwrap();
        store.append(&sample_reading("BB", t0, 4.0)).await.unwrap();

        let latest = store.latest_per_device().await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest["AA"].temperature, 3.0);
        assert_eq!(latest["BB"].temperature, 4.0);
    }

    #[tokio::test]
    async fn range_query_filters_and_orders_newest_first() {
        let store = MemoryStore::new();
        let now = OffsetDateTime::now_utc();

        store.append(&sample_reading("AA", now - Duration::hours(30), 1.0)).await.unwrap();
        store.append(&sample_reading("AA", now - Duration::hours(2), 2.0)).await.unwrap();
        store.append(&sample_reading("BB", now - Duration::hours(1), 3.0)).await.unwrap();
        store.append(&sample_reading("AA", now - Duration::minutes(5), 4.0)).await.unwrap();

        let all = store
            .query_range(&RangeQuery { device_address: None, since_hours_ago: 24, limit: 10 })
            .await
            .unwrap();
        let temps: Vec<f64> = all.iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![4.0, 3.0, 2.0]);

        let only_aa = store
            .query_range(&RangeQuery {
                device_address: Some("AA".into()),
                since_hours_ago: 48,
                limit: 2,
            })
            .await
            .unwrap();
        let temps: Vec<f64> = only_aa.iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![4.0, 2.0]);
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = store
            .append(&sample_reading("AA", OffsetDateTime::now_utc(), 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::StorageUnavailable(_)));
        assert!(store.list_device_ids().await.is_err());

        store.set_unavailable(false);
        assert!(store.list_device_ids().await.unwrap().is_empty());
    }
}
