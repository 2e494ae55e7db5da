/// MQTT transport for the change publisher
use log::{debug, error};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use crate::config::MqttConfig;
use crate::error::SinkError;
use crate::publish::sink::{MessageSink, SinkConnector};

const CONNECT_TIMEOUT_SECS: u64 = 10;
const KEEP_ALIVE_SECS: u64 = 30;
const REQUEST_CAPACITY: usize = 64;

pub struct MqttConnector {
    config: MqttConfig,
}

impl MqttConnector {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(Duration::from_secs(KEEP_ALIVE_SECS));
        if let Some((username, password)) = &self.config.credentials {
            options.set_credentials(username.clone(), password.clone());
        }
        options
    }
}

/// Poll the event loop until the broker acknowledges the session
async fn await_connack(eventloop: &mut EventLoop) -> Result<(), SinkError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(event) => debug!("MQTT event before ConnAck: {:?}", event),
            Err(e) => return Err(SinkError::Connection(e.to_string())),
        }
    }
}

impl SinkConnector for MqttConnector {
    type Sink = MqttSink;

    async fn connect(&self) -> Result<MqttSink, SinkError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);

        timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            await_connack(&mut eventloop),
        )
        .await
        .map_err(|_| SinkError::Connection("timed out waiting for ConnAck".to_string()))??;

        let alive = Arc::new(AtomicBool::new(true));
        let driver_alive = alive.clone();
        let driver = tokio::spawn(async move {
            loop {
                if let Err(e) = eventloop.poll().await {
                    error!("MQTT event loop error: {}", e);
                    driver_alive.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });

        Ok(MqttSink {
            client,
            alive,
            driver,
        })
    }
}

/// Connected MQTT session; stops its event loop when dropped
pub struct MqttSink {
    client: AsyncClient,
    alive: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

impl MessageSink for MqttSink {
    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), SinkError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(SinkError::Disconnected);
        }
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| SinkError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
