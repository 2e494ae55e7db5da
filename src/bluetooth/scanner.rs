/// Bluetooth Low Energy discovery feeding advertisements to the ingestion loop
use bluer::{Adapter, AdapterEvent, Address};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration, Instant};

use crate::bluetooth::decoder::{vendor_id, SENSOR_MANUFACTURER_ID};
use crate::models::AdvertisementEvent;

const SESSION_PAUSE_SECS: u64 = 1;
const RETRY_DELAY_SECS: u64 = 5;

/// Why a scan loop iteration ended
enum SessionEnd {
    Elapsed,
    Shutdown,
    ChannelClosed,
}

/// Re-attach the manufacturer id to each payload, as advertised on air
fn raw_records(manufacturer_data: HashMap<u16, Vec<u8>>) -> Vec<Vec<u8>> {
    let mut ids: Vec<u16> = manufacturer_data.keys().copied().collect();
    ids.sort_unstable();
    ids.into_iter()
        .filter_map(|id| {
            manufacturer_data.get(&id).map(|payload| {
                let mut record = id.to_le_bytes().to_vec();
                record.extend_from_slice(payload);
                record
            })
        })
        .collect()
}

/// Records last forwarded per sensor device
///
/// BlueZ reports cached properties again, which must not look like a new
/// sample. Only advertisements carrying our vendor id or a matching name are
/// cached and forwarded, so the map holds sensor nodes only.
struct PayloadCache {
    name_pattern: String,
    last: HashMap<String, Vec<Vec<u8>>>,
}

impl PayloadCache {
    fn new(name_pattern: impl Into<String>) -> Self {
        Self {
            name_pattern: name_pattern.into(),
            last: HashMap::new(),
        }
    }

    fn is_candidate(&self, event: &AdvertisementEvent) -> bool {
        let vendor_matches = event
            .manufacturer_data
            .iter()
            .any(|record| vendor_id(record) == Some(SENSOR_MANUFACTURER_ID));
        let name_matches = event
            .local_name
            .as_deref()
            .is_some_and(|name| name.contains(&self.name_pattern));
        vendor_matches || name_matches
    }

    /// Whether `event` should be forwarded; remembers its records if so
    fn admit(&mut self, event: &AdvertisementEvent) -> bool {
        if event.manufacturer_data.is_empty() || !self.is_candidate(event) {
            return false;
        }
        if self.last.get(&event.address) == Some(&event.manufacturer_data) {
            return false;
        }
        self.last.insert(event.address.clone(), event.manufacturer_data.clone());
        true
    }
}

async fn read_event(adapter: &Adapter, addr: Address) -> bluer::Result<AdvertisementEvent> {
    let device = adapter.device(addr)?;
    let manufacturer_data = device.manufacturer_data().await?.unwrap_or_default();

    Ok(AdvertisementEvent {
        address: device.address().to_string().to_uppercase(),
        local_name: device.name().await?,
        rssi: device.rssi().await?,
        manufacturer_data: raw_records(manufacturer_data),
    })
}

/// Run one bounded discovery session and forward what it sees
async fn scan_session(
    scan_duration: Duration,
    events: &mpsc::Sender<AdvertisementEvent>,
    shutdown: &mut watch::Receiver<bool>,
    cache: &mut PayloadCache,
) -> Result<SessionEnd, Box<dyn std::error::Error + Send + Sync>> {
    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let filter = bluer::DiscoveryFilter {
        transport: bluer::DiscoveryTransport::Le,
        duplicate_data: true,
        ..Default::default()
    };
    if let Err(e) = adapter.set_discovery_filter(filter).await {
        warn!("Failed to set discovery filter: {}", e);
    }

    let discovery = adapter.discover_devices_with_changes().await?;
    tokio::pin!(discovery);
    let deadline = Instant::now() + scan_duration;

    loop {
        let addr = tokio::select! {
            _ = shutdown.changed() => return Ok(SessionEnd::Shutdown),
            _ = tokio::time::sleep_until(deadline) => return Ok(SessionEnd::Elapsed),
            event = discovery.next() => match event {
                Some(AdapterEvent::DeviceAdded(addr)) => addr,
                Some(_) => continue,
                None => return Ok(SessionEnd::Elapsed),
            },
        };

        let event = match read_event(&adapter, addr).await {
            Ok(event) => event,
            Err(e) => {
                debug!("Failed to read properties of {}: {}", addr, e);
                continue;
            }
        };
        if !cache.admit(&event) {
            continue;
        }

        // Waits for capacity when ingestion falls behind
        if events.send(event).await.is_err() {
            return Ok(SessionEnd::ChannelClosed);
        }
    }
}

/// Scan continuously until shutdown, restarting discovery sessions
pub async fn run_scanner(
    scan_duration: Duration,
    name_pattern: &str,
    events: mpsc::Sender<AdvertisementEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        "Starting BLE scanner (scan duration: {}s)",
        scan_duration.as_secs()
    );
    let mut cache = PayloadCache::new(name_pattern);

    loop {
        let session = scan_session(scan_duration, &events, &mut shutdown, &mut cache);
        let pause = match session.await {
            Ok(SessionEnd::Elapsed) => Duration::from_secs(SESSION_PAUSE_SECS),
            Ok(SessionEnd::Shutdown) | Ok(SessionEnd::ChannelClosed) => break,
            Err(e) => {
                error!("Scan error: {}", e);
                Duration::from_secs(RETRY_DELAY_SECS)
            }
        };

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(pause) => {}
        }
    }

    info!("BLE scanner stopped");
}
