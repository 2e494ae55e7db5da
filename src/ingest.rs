/// Turns raw advertisements into stored readings
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};

use crate::bluetooth::decoder::{decode_advertisement, vendor_id, SENSOR_MANUFACTURER_ID};
use crate::database::TelemetryStore;
use crate::error::IngestError;
use crate::models::{AdvertisementEvent, Reading};
use crate::power_tier::TierTracker;

/// Consecutive storage failures after which an operational alert is logged
pub const STORAGE_ALERT_THRESHOLD: u32 = 10;

/// Run of consecutive storage failures
#[derive(Debug, Default)]
struct FailureStreak {
    count: u32,
}

impl FailureStreak {
    /// Count a failure; true only for the one that reaches the alert threshold
    fn record_failure(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        self.count == STORAGE_ALERT_THRESHOLD
    }

    fn record_success(&mut self) {
        self.count = 0;
    }
}

pub struct IngestionPipeline<S> {
    store: Arc<S>,
    name_pattern: String,
    known_devices: HashSet<String>,
    tiers: TierTracker,
}

impl<S: TelemetryStore> IngestionPipeline<S> {
    pub fn new(store: Arc<S>, name_pattern: impl Into<String>) -> Self {
        Self {
            store,
            name_pattern: name_pattern.into(),
            known_devices: HashSet::new(),
            tiers: TierTracker::new(),
        }
    }

    /// Whether the event comes from a sensor node
    ///
    /// Accepted devices are remembered so later advertisements without the
    /// name or vendor hint still pass.
    fn accept(&mut self, event: &AdvertisementEvent) -> bool {
        if self.known_devices.contains(&event.address) {
            return true;
        }

        let name_matches = event
            .local_name
            .as_deref()
            .is_some_and(|name| name.contains(&self.name_pattern));
        let vendor_matches = event
            .manufacturer_data
            .iter()
            .any(|record| vendor_id(record) == Some(SENSOR_MANUFACTURER_ID));

        if name_matches || vendor_matches {
            debug!("Recognized sensor node {}", event.address);
            self.known_devices.insert(event.address.clone());
            true
        } else {
            false
        }
    }

    /// Decode, classify and store one event
    ///
    /// Returns `Ok(None)` when the event is not from a sensor node.
    pub async fn handle_event(
        &mut self,
        event: &AdvertisementEvent,
    ) -> Result<Option<Reading>, IngestError> {
        if !self.accept(event) {
            return Ok(None);
        }

        let record = event
            .manufacturer_data
            .iter()
            .find(|record| vendor_id(record) == Some(SENSOR_MANUFACTURER_ID))
            .or_else(|| event.manufacturer_data.first())
            .ok_or(IngestError::MissingPayload)?;
        let decoded = decode_advertisement(record)?;
        debug!("Decoded v{} payload from {}", decoded.version, event.address);

        let tier = self.tiers.update(&event.address, decoded.battery_mv);
        if tier.as_u8() != decoded.tier_hint {
            debug!(
                "Tier hint {} from {} overridden by {}",
                decoded.tier_hint, event.address, tier
            );
        }

        let reading = Reading {
            device_address: event.address.clone(),
            device_name: event.local_name.clone(),
            time: OffsetDateTime::now_utc(),
            node_timestamp: decoded.node_timestamp,
            temperature: decoded.temperature,
            pressure: decoded.pressure,
            humidity: decoded.humidity,
            battery_mv: decoded.battery_mv,
            power_tier: tier,
            rssi: event.rssi,
        };

        self.store.append(&reading).await?;

        info!(
            "Sensor: {} | T: {:.2}°C | P: {:.1} hPa | H: {:.2}% | Battery: {} mV | Tier: {} | RSSI: {}",
            reading.device_address,
            reading.temperature,
            reading.pressure,
            reading.humidity,
            reading.battery_mv,
            reading.power_tier,
            reading
                .rssi
                .map_or_else(|| "n/a".to_string(), |rssi| format!("{} dBm", rssi))
        );
        Ok(Some(reading))
    }

    /// Consume events until the channel closes or shutdown is signalled
    ///
    /// Shutdown is only observed between events, so a store append that has
    /// started always finishes.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<AdvertisementEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Ingestion pipeline started");
        let mut storage_failures = FailureStreak::default();

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match self.handle_event(&event).await {
                Ok(Some(_)) => storage_failures.record_success(),
                Ok(None) => {}
                Err(IngestError::Storage(e)) => {
                    error!("Failed to store reading from {}: {}", event.address, e);
                    if storage_failures.record_failure() {
                        error!(
                            "ALERT: {} consecutive storage failures, readings are being lost",
                            STORAGE_ALERT_THRESHOLD
                        );
                    }
                }
                Err(e) => warn!("Dropping advertisement from {}: {}", event.address, e),
            }
        }

        info!("Ingestion pipeline stopped");
    }
}
