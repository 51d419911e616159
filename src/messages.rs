use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde_derive::{Deserialize, Serialize};
use uuid::Uuid;

pub const BATTERY_RANGE: std::ops::RangeInclusive<u8> = 10..=100;
pub const SEED_BATTERY_RANGE: std::ops::RangeInclusive<u8> = 20..=100;
pub const CPU_RANGE: std::ops::RangeInclusive<u8> = 10..=100;
pub const RAM_RANGE: std::ops::RangeInclusive<u16> = 100..=16000;
pub const LATITUDE_RANGE: std::ops::RangeInclusive<f64> = -90.0..=90.0;
pub const LONGITUDE_RANGE: std::ops::RangeInclusive<f64> = -180.0..=180.0;

/// Devices below this battery level report as offline.
pub const LOW_BATTERY_THRESHOLD: u8 = 20;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    pub fn from_battery(battery: u8) -> Self {
        if battery < LOW_BATTERY_THRESHOLD {
            DeviceStatus::Offline
        } else {
            DeviceStatus::Online
        }
    }
}

/// (latitude, longitude), serialized as a two element array.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Location(pub f64, pub f64);

impl Location {
    fn random(rng: &mut impl Rng) -> Self {
        Location(
            rng.random_range(LATITUDE_RANGE),
            rng.random_range(LONGITUDE_RANGE),
        )
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DeviceRecord {
    pub id: Uuid,
    pub status: DeviceStatus,
    pub battery: u8,
    pub cpu: u8,
    /// Megabytes
    pub ram: u16,
    pub last_updated: DateTime<Utc>,
    pub location: Location,
}

impl DeviceRecord {
    /// A freshly provisioned device. Seeded batteries never start below the
    /// offline threshold, so every device comes up online.
    pub fn seed(rng: &mut impl Rng, now: DateTime<Utc>) -> Self {
        let battery = rng.random_range(SEED_BATTERY_RANGE);
        DeviceRecord {
            id: Uuid::new_v4(),
            status: DeviceStatus::from_battery(battery),
            battery,
            cpu: rng.random_range(CPU_RANGE),
            ram: rng.random_range(RAM_RANGE),
            last_updated: now,
            location: Location::random(rng),
        }
    }

    /// Returns a copy with every telemetry field drawn again, independently of
    /// its previous value. Only `id` carries over.
    pub fn redrawn(&self, rng: &mut impl Rng, now: DateTime<Utc>) -> Self {
        let battery = rng.random_range(BATTERY_RANGE);
        DeviceRecord {
            id: self.id,
            status: DeviceStatus::from_battery(battery),
            battery,
            cpu: rng.random_range(CPU_RANGE),
            ram: rng.random_range(RAM_RANGE),
            last_updated: now,
            location: Location::random(rng),
        }
    }
}

/// An immutable view of the whole fleet as produced by one tick.
///
/// Cloning is cheap: every observer of a tick shares the same device list.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    /// Sequence number of the tick that produced this snapshot; 0 for the
    /// seeded state.
    pub tick: u64,
    pub devices: Arc<[DeviceRecord]>,
}

impl Snapshot {
    pub fn new(tick: u64, devices: Vec<DeviceRecord>) -> Self {
        Snapshot {
            tick,
            devices: devices.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// JSON payload pushed to clients: the bare device array.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&*self.devices)
    }
}
