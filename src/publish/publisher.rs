/// Forwards each device's newest reading to the message sink once
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use crate::database::TelemetryStore;
use crate::error::{SinkError, StorageError};
use crate::models::Reading;
use crate::publish::messages::{discovery_messages, reading_messages, Message};
use crate::publish::sink::{MessageSink, SinkConnector};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Storage(StorageError),
    #[error(transparent)]
    Sink(SinkError),
}

pub struct ChangePublisher<S, C> {
    store: Arc<S>,
    connector: C,
    topic_prefix: String,
    publish_interval: Duration,
    reconnect_delay: Duration,
    /// Last forwarded reading time per device
    cursor: HashMap<String, OffsetDateTime>,
    /// Devices whose discovery configs went out on the current connection
    announced: HashSet<String>,
}

async fn send<K: MessageSink>(sink: &mut K, message: &Message) -> Result<(), SinkError> {
    debug!("Publishing {}", message.topic);
    sink.publish(&message.topic, message.payload_bytes(), message.retain)
        .await
}

impl<S: TelemetryStore, C: SinkConnector> ChangePublisher<S, C> {
    pub fn new(
        store: Arc<S>,
        connector: C,
        topic_prefix: impl Into<String>,
        publish_interval: Duration,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            store,
            connector,
            topic_prefix: topic_prefix.into(),
            publish_interval,
            reconnect_delay,
            cursor: HashMap::new(),
            announced: HashSet::new(),
        }
    }

    /// Timestamp of the last reading forwarded for `device`
    pub fn last_forwarded(&self, device: &str) -> Option<OffsetDateTime> {
        self.cursor.get(device).copied()
    }

    fn is_new(&self, reading: &Reading) -> bool {
        self.last_forwarded(&reading.device_address)
            .map_or(true, |last| reading.time > last)
    }

    async fn announce<K: MessageSink>(
        &mut self,
        sink: &mut K,
        reading: &Reading,
    ) -> Result<(), SinkError> {
        for message in discovery_messages(&self.topic_prefix, reading) {
            send(sink, &message).await?;
        }
        self.announced.insert(reading.device_address.clone());
        info!("Published discovery info for {}", reading.topic_name());
        Ok(())
    }

    /// Run one poll-and-forward pass, returning how many readings went out
    ///
    /// The cursor of a device advances only after all of its messages were
    /// accepted by the sink; devices already forwarded stay forwarded when a
    /// later device fails.
    pub async fn publish_cycle<K: MessageSink>(
        &mut self,
        sink: &mut K,
    ) -> Result<usize, CycleError> {
        let latest = self
            .store
            .latest_per_device()
            .await
            .map_err(CycleError::Storage)?;
        let mut forwarded = 0;

        for (device, reading) in latest {
            if !self.announced.contains(&device) {
                self.announce(sink, &reading).await.map_err(CycleError::Sink)?;
            }
            if !self.is_new(&reading) {
                continue;
            }

            for message in reading_messages(&self.topic_prefix, &reading) {
                send(sink, &message).await.map_err(CycleError::Sink)?;
            }
            self.cursor.insert(device, reading.time);
            forwarded += 1;
            info!("Published data for device {}", reading.topic_name());
        }

        Ok(forwarded)
    }

    /// Drive connect / publish cycles until shutdown is signalled
    ///
    /// A sink failure abandons the connection and waits `reconnect_delay`
    /// before dialling again. A store failure only skips the current cycle.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Change publisher started");

        'session: while !*shutdown.borrow() {
            let mut sink = match self.connector.connect().await {
                Ok(sink) => sink,
                Err(e) => {
                    error!("MQTT connection error: {}", e);
                    tokio::select! {
                        _ = shutdown.changed() => break 'session,
                        _ = sleep(self.reconnect_delay) => continue 'session,
                    }
                }
            };
            info!("Connected to message broker");
            self.announced.clear();

            loop {
                match self.publish_cycle(&mut sink).await {
                    Ok(0) => debug!("No new readings to publish"),
                    Ok(count) => debug!("Published {} new readings", count),
                    Err(CycleError::Storage(e)) => {
                        warn!("Skipping publish cycle, store unavailable: {}", e)
                    }
                    Err(CycleError::Sink(e)) => {
                        error!("Publish cycle abandoned: {}", e);
                        tokio::select! {
                            _ = shutdown.changed() => break 'session,
                            _ = sleep(self.reconnect_delay) => continue 'session,
                        }
                    }
                }

                tokio::select! {
                    _ = shutdown.changed() => break 'session,
                    _ = sleep(self.publish_interval) => {}
                }
            }
        }

        info!("Change publisher stopped");
    }
}
