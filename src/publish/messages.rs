/// Topic layout and JSON payloads for published readings
use serde_json::{json, Value};

use crate::models::Reading;
use crate::utils::iso_timestamp;

pub const DISCOVERY_PREFIX: &str = "homeassistant";
const MANUFACTURER: &str = "Custom BLE Sensor";

/// One message ready to hand to a sink
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Value,
    pub retain: bool,
}

impl Message {
    pub fn payload_bytes(&self) -> Vec<u8> {
        self.payload.to_string().into_bytes()
    }
}

/// Per-channel value messages followed by the aggregate state message
///
/// All of them carry the reading's timestamp. Channels without a value
/// (a missing RSSI) get no message of their own.
pub fn reading_messages(prefix: &str, reading: &Reading) -> Vec<Message> {
    let timestamp = iso_timestamp(&reading.time);
    let base = format!("{}/{}", prefix, reading.topic_name());

    let channels: [(&str, Option<Value>); 7] = [
        ("temperature", Some(json!(reading.temperature))),
        ("pressure", Some(json!(reading.pressure))),
        ("humidity", Some(json!(reading.humidity))),
        ("battery", Some(json!(reading.battery_mv))),
        ("power_tier", Some(json!(reading.power_tier.as_u8()))),
        ("rssi", reading.rssi.map(|rssi| json!(rssi))),
        ("timestamp", Some(json!(timestamp))),
    ];

    let mut messages: Vec<Message> = channels
        .into_iter()
        .filter_map(|(channel, value)| {
            value.map(|value| Message {
                topic: format!("{}/{}", base, channel),
                payload: json!({
                    "value": value,
                    "timestamp": timestamp,
                    "device": reading.device_address,
                }),
                retain: false,
            })
        })
        .collect();

    messages.push(Message {
        topic: format!("{}/state", base),
        payload: json!({
            "device_address": reading.device_address,
            "device_name": reading.device_name,
            "temperature": reading.temperature,
            "pressure": reading.pressure,
            "humidity": reading.humidity,
            "battery_mv": reading.battery_mv,
            "power_tier": reading.power_tier.as_u8(),
            "rssi": reading.rssi,
            "node_timestamp": reading.node_timestamp,
            "timestamp": timestamp,
        }),
        retain: false,
    });

    messages
}

/// Retained Home Assistant discovery configs for a device
pub fn discovery_messages(prefix: &str, reading: &Reading) -> Vec<Message> {
    let device_name = reading.topic_name();
    let device_id = reading.device_id();

    [
        ("temperature", "Temperature", "temperature", "°C"),
        ("humidity", "Humidity", "humidity", "%"),
        ("pressure", "Pressure", "pressure", "hPa"),
        ("battery", "Battery", "voltage", "mV"),
    ]
    .into_iter()
    .map(|(channel, label, device_class, unit)| Message {
        topic: format!("{}/sensor/{}_{}/config", DISCOVERY_PREFIX, device_id, channel),
        payload: json!({
            "name": format!("{} {}", device_name, label),
            "unique_id": format!("{}_{}", device_id, channel),
            "device_class": device_class,
            "unit_of_measurement": unit,
            "state_topic": format!("{}/{}/{}", prefix, device_name, channel),
            "value_template": "{{ value_json.value }}",
            "device": {
                "identifiers": [reading.device_address],
                "name": device_name,
                "manufacturer": MANUFACTURER,
            },
        }),
        retain: true,
    })
    .collect()
}
