use log::info;
use std::env;
use std::str::FromStr;
use tokio::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub topic_prefix: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub database_url: String,
    pub sensor_name_pattern: String,
    pub scan_duration: Duration,
    pub event_queue_capacity: usize,
    pub mqtt: MqttConfig,
    pub publish_interval: Duration,
    pub reconnect_delay: Duration,
    pub summary_interval: Duration,
    pub summary_hours: u32,
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

fn secs_or(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    match parse_or(lookup, var, default)? {
        0 => Err(ConfigError::Invalid {
            var,
            value: "0".to_string(),
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

impl BridgeConfig {
    pub fn new() -> Result<Self, ConfigError> {
        // Load environment variables
        dotenv::dotenv().ok();

        let config = Self::from_lookup(|key| env::var(key).ok())?;
        info!("Sensor name pattern: '{}'", config.sensor_name_pattern);
        info!(
            "MQTT broker: {}:{} (prefix '{}')",
            config.mqtt.host, config.mqtt.port, config.mqtt.topic_prefix
        );
        Ok(config)
    }

    /// Build the configuration from any key/value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |var: &'static str| {
            lookup(var)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(var))
        };

        let database_url = required("DATABASE_URL")?;
        let host = required("MQTT_HOST")?;

        let credentials = match (lookup("MQTT_USERNAME"), lookup("MQTT_PASSWORD")) {
            (Some(user), Some(password)) => Some((user, password)),
            (None, None) => None,
            _ => return Err(ConfigError::PartialCredentials),
        };

        let event_queue_capacity = parse_or(&lookup, "EVENT_QUEUE_CAPACITY", 256usize)?;
        if event_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                var: "EVENT_QUEUE_CAPACITY",
                value: "0".to_string(),
            });
        }

        // An empty pattern would match every named device
        let sensor_name_pattern =
            lookup("SENSOR_NAME_PATTERN").unwrap_or_else(|| "TempSensor".to_string());
        if sensor_name_pattern.trim().is_empty() {
            return Err(ConfigError::Invalid {
                var: "SENSOR_NAME_PATTERN",
                value: sensor_name_pattern,
            });
        }

        Ok(BridgeConfig {
            database_url,
            sensor_name_pattern,
            scan_duration: secs_or(&lookup, "SCAN_DURATION_SECS", 30)?,
            event_queue_capacity,
            mqtt: MqttConfig {
                host,
                port: parse_or(&lookup, "MQTT_PORT", 1883)?,
                client_id: lookup("MQTT_CLIENT_ID")
                    .unwrap_or_else(|| "sensornode-bridge".to_string()),
                credentials,
                topic_prefix: lookup("MQTT_TOPIC_PREFIX").unwrap_or_else(|| "sensors".to_string()),
            },
            publish_interval: secs_or(&lookup, "PUBLISH_INTERVAL_SECS", 60)?,
            reconnect_delay: secs_or(&lookup, "RECONNECT_DELAY_SECS", 30)?,
            summary_interval: secs_or(&lookup, "SUMMARY_INTERVAL_SECS", 1800)?,
            summary_hours: parse_or(&lookup, "SUMMARY_HOURS", 24)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<BridgeConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BridgeConfig::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://bridge@localhost/telemetry"),
        ("MQTT_HOST", "broker.local"),
    ];

    #[test]
    fn defaults_apply() {
        let config = config(&REQUIRED).unwrap();
        assert_eq!(config.sensor_name_pattern, "TempSensor");
        assert_eq!(config.scan_duration, Duration::from_secs(30));
        assert_eq!(config.event_queue_capacity, 256);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.topic_prefix, "sensors");
        assert_eq!(config.mqtt.credentials, None);
        assert_eq!(config.publish_interval, Duration::from_secs(60));
        assert_eq!(config.reconnect_delay, Duration::from_secs(30));
        assert_eq!(config.summary_hours, 24);
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("MQTT_PORT", "8883"),
            ("MQTT_USERNAME", "bridge"),
            ("MQTT_PASSWORD", "secret"),
            ("PUBLISH_INTERVAL_SECS", " 15 "),
            ("SENSOR_NAME_PATTERN", "EnvNode"),
        ]);
        let config = config(&vars).unwrap();
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(
            config.mqtt.credentials,
            Some(("bridge".to_string(), "secret".to_string()))
        );
        assert_eq!(config.publish_interval, Duration::from_secs(15));
        assert_eq!(config.sensor_name_pattern, "EnvNode");
    }

    #[test]
    fn missing_required_variables() {
        assert_eq!(
            config(&[("MQTT_HOST", "broker")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
        assert_eq!(
            config(&[("DATABASE_URL", "postgres://x"), ("MQTT_HOST", " ")]).unwrap_err(),
            ConfigError::Missing("MQTT_HOST")
        );
    }

    #[test]
    fn invalid_values_are_reported() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("MQTT_PORT", "seventy"));
        assert_eq!(
            config(&vars).unwrap_err(),
            ConfigError::Invalid {
                var: "MQTT_PORT",
                value: "seventy".to_string()
            }
        );

        let mut vars = REQUIRED.to_vec();
        vars.push(("PUBLISH_INTERVAL_SECS", "0"));
        assert!(matches!(
            config(&vars),
            Err(ConfigError::Invalid { var: "PUBLISH_INTERVAL_SECS", .. })
        ));
    }

    #[test]
    fn blank_name_pattern_is_rejected() {
        for pattern in ["", "   "] {
            let mut vars = REQUIRED.to_vec();
            vars.push(("SENSOR_NAME_PATTERN", pattern));
            assert_eq!(
                config(&vars).unwrap_err(),
                ConfigError::Invalid {
                    var: "SENSOR_NAME_PATTERN",
                    value: pattern.to_string()
                }
            );
        }
    }

    #[test]
    fn credentials_come_in_pairs() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("MQTT_USERNAME", "bridge"));
        assert_eq!(config(&vars).unwrap_err(), ConfigError::PartialCredentials);
    }
}
