/// Aggregate statistics over stored readings, logged periodically
use log::{error, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use crate::database::{RangeQuery, TelemetryStore};
use crate::error::StorageError;
use crate::models::{PowerTier, Reading};
use crate::utils::format_datetime;

/// Maximum number of rows pulled per device for one summary
pub const SUMMARY_ROW_LIMIT: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl Range {
    fn of(values: impl Iterator<Item = f64>) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for value in values {
            count += 1;
            sum += value;
            min = min.min(value);
            max = max.max(value);
        }
        (count > 0).then(|| Range {
            min,
            max,
            avg: sum / count as f64,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadingStatistics {
    pub samples: usize,
    pub temperature: Range,
    pub pressure: Range,
    pub humidity: Range,
    pub battery_mv: Range,
    pub tiers: BTreeMap<PowerTier, usize>,
}

/// Min / max / average per measurement and a tier histogram
///
/// Returns `None` for an empty slice.
pub fn compute_statistics(readings: &[Reading]) -> Option<ReadingStatistics> {
    let temperature = Range::of(readings.iter().map(|r| r.temperature))?;
    let pressure = Range::of(readings.iter().map(|r| r.pressure))?;
    let humidity = Range::of(readings.iter().map(|r| r.humidity))?;
    let battery_mv = Range::of(readings.iter().map(|r| f64::from(r.battery_mv)))?;

    let mut tiers = BTreeMap::new();
    for reading in readings {
        *tiers.entry(reading.power_tier).or_insert(0) += 1;
    }

    Some(ReadingStatistics {
        samples: readings.len(),
        temperature,
        pressure,
        humidity,
        battery_mv,
        tiers,
    })
}

/// Statistics for every known device over the last `hours`
pub async fn summarize<S: TelemetryStore>(
    store: &S,
    hours: u32,
    limit: u32,
) -> Result<BTreeMap<String, ReadingStatistics>, StorageError> {
    let mut summary = BTreeMap::new();
    for device in store.list_device_ids().await? {
        let query = RangeQuery {
            device_address: Some(device.clone()),
            since_hours_ago: hours,
            limit,
        };
        let readings = store.query_range(&query).await?;
        if let Some(stats) = compute_statistics(&readings) {
            summary.insert(device, stats);
        }
    }
    Ok(summary)
}

fn log_summary(hours: u32, summary: &BTreeMap<String, ReadingStatistics>) {
    info!(
        "Summary at {} (last {} hours):",
        format_datetime(&OffsetDateTime::now_utc()),
        hours
    );
    for (device, stats) in summary {
        info!("Summary for {}:", device);
        info!(
            "  Temperature: {:.2}°C - {:.2}°C (avg: {:.2}°C)",
            stats.temperature.min, stats.temperature.max, stats.temperature.avg
        );
        info!(
            "  Pressure: {:.1} - {:.1} hPa (avg: {:.1} hPa)",
            stats.pressure.min, stats.pressure.max, stats.pressure.avg
        );
        info!(
            "  Humidity: {:.2} - {:.2}% (avg: {:.2}%)",
            stats.humidity.min, stats.humidity.max, stats.humidity.avg
        );
        info!(
            "  Battery: {:.0} - {:.0} mV (avg: {:.0} mV)",
            stats.battery_mv.min, stats.battery_mv.max, stats.battery_mv.avg
        );
        info!("  Power tiers: {:?}", stats.tiers);
        info!("  Based on {} samples", stats.samples);
    }
    if summary.is_empty() {
        warn!("No readings stored during the last {} hours!", hours);
    }
}

/// Log a summary every `interval` until shutdown
pub async fn run_summary<S: TelemetryStore>(
    store: Arc<S>,
    interval: Duration,
    hours: u32,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(interval) => {}
        }

        match summarize(store.as_ref(), hours, SUMMARY_ROW_LIMIT).await {
            Ok(summary) => log_summary(hours, &summary),
            Err(e) => error!("Failed to build summary: {}", e),
        }
    }
}
