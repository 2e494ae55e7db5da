/// Battery voltage to power tier classification with hysteresis
use log::info;
use std::collections::HashMap;

use crate::models::PowerTier;

pub const NORMAL_HIGH_MV: u16 = 3800;
pub const CONSERVE_HIGH_MV: u16 = 3600;
pub const RESERVE_HIGH_MV: u16 = 3400;

pub const NORMAL_LOW_MV: u16 = 3600;
pub const CONSERVE_LOW_MV: u16 = 3400;
pub const RESERVE_LOW_MV: u16 = 3200;

/// Tier implied by voltage alone, ignoring the current state
pub fn baseline_tier(battery_mv: u16) -> PowerTier {
    if battery_mv >= NORMAL_HIGH_MV {
        PowerTier::Normal
    } else if battery_mv >= CONSERVE_HIGH_MV {
        PowerTier::Conserve
    } else if battery_mv >= RESERVE_HIGH_MV {
        PowerTier::Reserve
    } else {
        PowerTier::Survival
    }
}

/// Next tier for a node currently in `current` that reports `battery_mv`
///
/// Falling voltage moves a node to the next tier only at the lower trigger
/// point of its current tier; rising voltage only at the upper trigger
/// point. One call moves at most one tier.
pub fn classify(battery_mv: u16, current: PowerTier) -> PowerTier {
    use PowerTier::*;

    let target = baseline_tier(battery_mv);
    if target == current {
        return current;
    }

    if target > current {
        match current {
            Normal if battery_mv <= NORMAL_LOW_MV => Conserve,
            Conserve if battery_mv <= CONSERVE_LOW_MV => Reserve,
            Reserve if battery_mv <= RESERVE_LOW_MV => Survival,
            _ => current,
        }
    } else {
        match current {
            Conserve if battery_mv >= NORMAL_HIGH_MV => Normal,
            Reserve if battery_mv >= CONSERVE_HIGH_MV => Conserve,
            Survival if battery_mv >= RESERVE_HIGH_MV => Reserve,
            _ => current,
        }
    }
}

/// Per-device classifier state, held for the life of the process
#[derive(Debug, Default)]
pub struct TierTracker {
    tiers: HashMap<String, PowerTier>,
}

impl TierTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one battery sample for `device` and return its new tier
    ///
    /// Devices seen for the first time start from `PowerTier::Normal`.
    pub fn update(&mut self, device: &str, battery_mv: u16) -> PowerTier {
        let current = self.tier(device).unwrap_or_default();
        let next = classify(battery_mv, current);
        if next != current {
            info!(
                "Power tier changed for {}: {} -> {} (battery: {} mV)",
                device, current, next, battery_mv
            );
        }
        self.tiers.insert(device.to_string(), next);
        next
    }

    pub fn tier(&self, device: &str) -> Option<PowerTier> {
        self.tiers.get(device).copied()
    }
}
