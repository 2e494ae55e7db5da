/// PostgreSQL implementation of the telemetry store
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tokio_postgres::{Client, Row};

use crate::database::connection::connect;
use crate::database::store::{RangeQuery, TelemetryStore};
use crate::error::StorageError;
use crate::models::{PowerTier, Reading};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS sensor_readings (
    id BIGSERIAL PRIMARY KEY,
    device_address TEXT NOT NULL,
    device_name TEXT,
    time TIMESTAMPTZ NOT NULL,
    node_timestamp BIGINT NOT NULL,
    temperature DOUBLE PRECISION NOT NULL,
    pressure DOUBLE PRECISION NOT NULL,
    humidity DOUBLE PRECISION NOT NULL,
    battery_mv INTEGER NOT NULL,
    power_tier SMALLINT NOT NULL,
    rssi INTEGER,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)";

const CREATE_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_sensor_readings_device_time
    ON sensor_readings(device_address, time)";

// Tables created before RSSI became optional
const RELAX_RSSI: &str = "ALTER TABLE sensor_readings ALTER COLUMN rssi DROP NOT NULL";

const READING_COLUMNS: &str = "device_address, device_name, time, node_timestamp, temperature, \
     pressure, humidity, battery_mv, power_tier, rssi";

/// Shared handle to the `sensor_readings` table
///
/// Holds one client for all tasks. A closed client is replaced by a fresh
/// connection on the next operation, and every fresh connection makes sure
/// the schema exists before it is handed out.
pub struct PostgresStore {
    database_url: String,
    client: Mutex<Option<Arc<Client>>>,
}

impl PostgresStore {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            client: Mutex::new(None),
        }
    }

    /// Connect now and create the readings table and index if missing
    ///
    /// Failing here is not final: the next operation dials again.
    pub async fn init_schema(&self) -> Result<(), StorageError> {
        self.client().await.map(|_| ())
    }

    async fn client(&self) -> Result<Arc<Client>, StorageError> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            if !client.is_closed() {
                return Ok(client.clone());
            }
            warn!("Database connection closed, reconnecting");
            *guard = None;
        }
        let client = connect(&self.database_url).await?;
        client.batch_execute(CREATE_TABLE).await?;
        client.batch_execute(CREATE_INDEX).await?;
        client.batch_execute(RELAX_RSSI).await?;
        info!("Database connected, schema ready");

        let client = Arc::new(client);
        *guard = Some(client.clone());
        Ok(client)
    }
}

fn reading_from_row(row: &Row) -> Result<Reading, StorageError> {
    let node_timestamp: i64 = row.try_get("node_timestamp")?;
    let battery_mv: i32 = row.try_get("battery_mv")?;
    let power_tier: i16 = row.try_get("power_tier")?;
    let rssi: Option<i32> = row.try_get("rssi")?;

    Ok(Reading {
        device_address: row.try_get("device_address")?,
        device_name: row.try_get("device_name")?,
        time: row.try_get("time")?,
        node_timestamp: u32::try_from(node_timestamp).map_err(|_| StorageError::InvalidValue {
            column: "node_timestamp",
            value: node_timestamp,
        })?,
        temperature: row.try_get("temperature")?,
        pressure: row.try_get("pressure")?,
        humidity: row.try_get("humidity")?,
        battery_mv: u16::try_from(battery_mv).map_err(|_| StorageError::InvalidValue {
            column: "battery_mv",
            value: i64::from(battery_mv),
        })?,
        power_tier: u8::try_from(power_tier)
            .ok()
            .and_then(PowerTier::from_u8)
            .ok_or(StorageError::InvalidValue {
                column: "power_tier",
                value: i64::from(power_tier),
            })?,
        rssi: rssi
            .map(|rssi| {
                i16::try_from(rssi).map_err(|_| StorageError::InvalidValue {
                    column: "rssi",
                    value: i64::from(rssi),
                })
            })
            .transpose()?,
    })
}

impl TelemetryStore for PostgresStore {
    async fn append(&self, reading: &Reading) -> Result<(), StorageError> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO sensor_readings(device_address, device_name, time, node_timestamp,
                     temperature, pressure, humidity, battery_mv, power_tier, rssi)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &reading.device_address,
                    &reading.device_name,
                    &reading.time,
                    &i64::from(reading.node_timestamp),
                    &reading.temperature,
                    &reading.pressure,
                    &reading.humidity,
                    &i32::from(reading.battery_mv),
                    &i16::from(reading.power_tier.as_u8()),
                    &reading.rssi.map(i32::from),
                ],
            )
            .await?;
        Ok(())
    }

    async fn latest_per_device(&self) -> Result<BTreeMap<String, Reading>, StorageError> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT DISTINCT ON (device_address) {}
             FROM sensor_readings
             ORDER BY device_address, time DESC, id DESC",
            READING_COLUMNS
        );
        let rows = client.query(sql.as_str(), &[]).await?;

        rows.iter()
            .map(|row| reading_from_row(row).map(|r| (r.device_address.clone(), r)))
            .collect()
    }

    async fn query_range(&self, query: &RangeQuery) -> Result<Vec<Reading>, StorageError> {
        let client = self.client().await?;
        let since = OffsetDateTime::now_utc() - Duration::hours(i64::from(query.since_hours_ago));
        let sql = format!(
            "SELECT {}
             FROM sensor_readings
             WHERE time >= $1 AND ($2::TEXT IS NULL OR device_address = $2)
             ORDER BY time DESC, id DESC
             LIMIT $3",
            READING_COLUMNS
        );
        let rows = client
            .query(
                sql.as_str(),
                &[&since, &query.device_address, &i64::from(query.limit)],
            )
            .await?;

        rows.iter().map(reading_from_row).collect()
    }

    async fn list_device_ids(&self) -> Result<BTreeSet<String>, StorageError> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT DISTINCT device_address FROM sensor_readings ORDER BY device_address",
                &[],
            )
            .await?;

        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(StorageError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::sample_reading;
    use time::macros::datetime;

    // Nothing listens on port 1
    const UNREACHABLE: &str = "postgres://bridge@127.0.0.1:1/telemetry";

    #[tokio::test]
    async fn unreachable_database_fails_each_operation_and_redials() {
        let store = PostgresStore::new(UNREACHABLE);

        assert!(matches!(
            store.init_schema().await,
            Err(StorageError::StorageUnavailable(_))
        ));
        assert!(store.client.lock().await.is_none());

        let reading = sample_reading("AA", datetime!(2024-05-01 12:00 UTC), 20.0);
        assert!(matches!(
            store.append(&reading).await,
            Err(StorageError::StorageUnavailable(_))
        ));
        assert!(matches!(
            store.latest_per_device().await,
            Err(StorageError::StorageUnavailable(_))
        ));
        assert!(store.client.lock().await.is_none());
    }
}
