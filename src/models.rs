use std::fmt;
use time::OffsetDateTime;

/// Discrete power-conservation mode of a sensor node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PowerTier {
    #[default]
    Normal = 0,
    Conserve = 1,
    Reserve = 2,
    Survival = 3,
}

impl PowerTier {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PowerTier::Normal),
            1 => Some(PowerTier::Conserve),
            2 => Some(PowerTier::Reserve),
            3 => Some(PowerTier::Survival),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for PowerTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Fields carried by one sensor advertisement payload, already scaled
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAdvertisement {
    pub version: u8,
    /// Firmware's own tier; advisory only, the host recomputes it
    pub tier_hint: u8,
    pub battery_mv: u16,
    pub temperature: f64,
    pub pressure: f64,
    pub humidity: f64,
    pub node_timestamp: u32,
}

/// One raw advertisement as delivered by the wireless discovery layer
#[derive(Debug, Clone, Default)]
pub struct AdvertisementEvent {
    pub address: String,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
    /// Raw manufacturer records, each `vendor_id (u16 LE) ++ payload`
    pub manufacturer_data: Vec<Vec<u8>>,
}

/// A stored telemetry sample
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub device_address: String,
    pub device_name: Option<String>,
    /// Host receipt time; orders readings per device
    pub time: OffsetDateTime,
    /// Node's own seconds counter, restarts on node reboot
    pub node_timestamp: u32,
    pub temperature: f64,
    pub pressure: f64,
    pub humidity: f64,
    pub battery_mv: u16,
    pub power_tier: PowerTier,
    /// Not every advertisement report carries a signal strength
    pub rssi: Option<i16>,
}

impl Reading {
    /// Device segment used in topic names
    pub fn topic_name(&self) -> String {
        match &self.device_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self.device_id(),
        }
    }

    /// Address with separators replaced, safe for identifiers
    pub fn device_id(&self) -> String {
        self.device_address.replace(':', "_")
    }
}
