use chrono::Utc;
use log::debug;
use parking_lot::RwLock;

use crate::messages::{DeviceRecord, Snapshot};

/// Owns the canonical fleet state.
///
/// The current fleet is published as an immutable [`Snapshot`]. Readers clone
/// the snapshot handle and never see a tick half applied; the writer builds
/// the next fleet off to the side and swaps it in under the write lock.
pub struct FleetStore {
    current: RwLock<Snapshot>,
}

impl FleetStore {
    pub fn seed(count: usize) -> Self {
        let mut rng = rand::rng();
        let now = Utc::now();
        let devices = (0..count)
            .map(|_| DeviceRecord::seed(&mut rng, now))
            .collect::<Vec<_>>();

        debug!("Seeded fleet with {} devices", devices.len());

        FleetStore {
            current: RwLock::new(Snapshot::new(0, devices)),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.current.read().clone()
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    /// Redraws the telemetry of every device and publishes the result.
    pub fn advance_tick(&self) -> Snapshot {
        let mut current = self.current.write();

        let mut rng = rand::rng();
        let now = Utc::now();
        let devices = current
            .devices
            .iter()
            .map(|device| device.redrawn(&mut rng, now))
            .collect::<Vec<_>>();

        *current = Snapshot::new(current.tick + 1, devices);
        current.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::messages::{
        BATTERY_RANGE, CPU_RANGE, DeviceStatus, LATITUDE_RANGE, LONGITUDE_RANGE, RAM_RANGE,
        SEED_BATTERY_RANGE,
    };

    fn ids(snapshot: &Snapshot) -> Vec<uuid::Uuid> {
        snapshot.devices.iter().map(|d| d.id).collect()
    }

    fn assert_in_update_ranges(snapshot: &Snapshot) {
        for device in snapshot.devices.iter() {
            assert!(BATTERY_RANGE.contains(&device.battery));
            assert!(CPU_RANGE.contains(&device.cpu));
            assert!(RAM_RANGE.contains(&device.ram));
            assert!(LATITUDE_RANGE.contains(&device.location.0));
            assert!(LONGITUDE_RANGE.contains(&device.location.1));
            assert_eq!(
                device.status == DeviceStatus::Offline,
                device.battery < 20,
                "status {:?} inconsistent with battery {}",
                device.status,
                device.battery
            );
        }
    }

    #[test]
    fn test_seed_three_devices() {
        let store = FleetStore::seed(3);
        let snapshot = store.snapshot();

        assert_eq!(snapshot.tick, 0);
        assert_eq!(snapshot.len(), 3);
        assert_eq!(ids(&snapshot).into_iter().collect::<HashSet<_>>().len(), 3);
        for device in snapshot.devices.iter() {
            assert!(SEED_BATTERY_RANGE.contains(&device.battery));
            assert!(CPU_RANGE.contains(&device.cpu));
            assert!(RAM_RANGE.contains(&device.ram));
        }

        let next = store.advance_tick();
        assert_eq!(next.tick, 1);
        assert_eq!(ids(&next), ids(&snapshot));
        assert_in_update_ranges(&next);
    }

    #[test]
    fn test_ids_stable_across_ticks() {
        let store = FleetStore::seed(10);
        let before = ids(&store.snapshot());

        for _ in 0..500 {
            let snapshot = store.advance_tick();
            assert_in_update_ranges(&snapshot);
        }

        assert_eq!(ids(&store.snapshot()), before);
        assert_eq!(store.len(), 10);
    }

    #[test]
    fn test_snapshot_matches_last_tick() {
        let store = FleetStore::seed(4);
        let ticked = store.advance_tick();
        assert_eq!(store.snapshot(), ticked);
    }

    #[test]
    fn test_earlier_snapshot_is_unchanged_by_tick() {
        let store = FleetStore::seed(4);
        let before = store.snapshot();
        let copy = before.devices.to_vec();

        store.advance_tick();

        assert_eq!(before.devices.to_vec(), copy);
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_state() {
        let store = std::sync::Arc::new(FleetStore::seed(8));

        let readers = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let snapshot = store.snapshot();
                        let stamp = snapshot.devices[0].last_updated;
                        assert!(snapshot.devices.iter().all(|d| d.last_updated == stamp));
                    }
                })
            })
            .collect::<Vec<_>>();

        for _ in 0..200 {
            store.advance_tick();
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn test_empty_fleet() {
        let store = FleetStore::seed(0);
        assert_eq!(store.advance_tick().len(), 0);
    }
}
