//! Driver binder
//!
//! Runs once per completed browse session, after reconciliation has produced
//! the added/removed UUID diffs: probes registered drivers whose declared
//! UUIDs overlap the additions, releases bound drivers whose UUIDs were
//! removed, rewrites the device's canonical UUID set, and persists it. A
//! failed probe or a failed record deletion is logged and skipped; nothing
//! here aborts the reconciliation.

use crate::{
    Notification,
    address::AddressPair,
    constants::{MAX_PENDING_NOTIFICATIONS, MAX_SESSION_RECORDS},
    device::Device,
    driver::{DriverBinding, DriverRegistry},
    sdp::ServiceRecord,
    storage::ServiceStore,
    uuid::UuidSet,
};
use heapless::Vec;

/// Reconcile drivers and the UUID set of `device` against a session's diffs
pub async fn apply<S: ServiceStore>(
    device: &mut Device,
    registry: &DriverRegistry,
    added: &UuidSet,
    removed: &UuidSet,
    records: &[ServiceRecord],
    pair: AddressPair,
    store: &mut S,
    notifications: &mut Vec<Notification, MAX_PENDING_NOTIFICATIONS>,
) {
    probe_drivers(device, registry, added, records);
    remove_drivers(device, removed, pair, store).await;
    rewrite_uuid_set(device, added, removed);

    let csv = device.uuids.to_csv();
    if store
        .write_device_profiles(pair, csv.as_str())
        .await
        .is_err()
    {
        warn!("[BINDER] failed to persist profiles for {}", device.path);
    }

    if notifications
        .push(Notification::UuidsChanged {
            path: device.path.clone(),
            uuids: device.uuids.clone(),
        })
        .is_err()
    {
        warn!("[BINDER] notification queue full, dropping");
    }
}

/// Probe every registered driver whose declared UUIDs overlap `added`,
/// handing it the records whose primary class it declared
fn probe_drivers(
    device: &mut Device,
    registry: &DriverRegistry,
    added: &UuidSet,
    records: &[ServiceRecord],
) {
    for driver in registry.iter() {
        let declared = driver.0.uuids();
        let wanted = declared
            .iter()
            .any(|decl| added.iter().any(|uuid| uuid.matches(decl)));
        if !wanted {
            continue;
        }

        let mut matched: Vec<ServiceRecord, MAX_SESSION_RECORDS> = Vec::new();
        for record in records {
            let class_match = record
                .primary_service_class()
                .is_some_and(|class| declared.iter().any(|decl| class.matches(decl)));
            if class_match {
                matched.push(record.clone()).ok();
            }
        }
        if matched.is_empty() {
            continue;
        }

        match driver.0.probe(device, &matched) {
            Ok(data) => {
                debug!("[BINDER] probed {} for {}", driver.0.name(), device.path);
                if device.bindings.push(DriverBinding { driver, data }).is_err() {
                    warn!("[BINDER] binding table full for {}", device.path);
                    driver.0.remove(device, data);
                }
            }
            Err(e) => {
                warn!(
                    "[BINDER] probe {} failed for {}: {:?}",
                    driver.0.name(),
                    device.path,
                    e
                );
            }
        }
    }
}

/// Release bound drivers whose declared UUIDs overlap `removed` and delete
/// the stored record of every removed UUID
async fn remove_drivers<S: ServiceStore>(
    device: &mut Device,
    removed: &UuidSet,
    pair: AddressPair,
    store: &mut S,
) {
    let mut i = 0;
    while i < device.bindings.len() {
        let binding = device.bindings[i];
        let gone = binding
            .driver
            .0
            .uuids()
            .iter()
            .any(|decl| removed.iter().any(|uuid| uuid.matches(decl)));
        if gone {
            device.bindings.remove(i);
            debug!(
                "[BINDER] removing {} from {}",
                binding.driver.0.name(),
                device.path
            );
            binding.driver.0.remove(device, binding.data);
        } else {
            i += 1;
        }
    }

    for uuid in removed.iter() {
        let Some(handle) = store.record_handle(pair, uuid).await else {
            continue;
        };
        if store.delete_record(pair, handle).await.is_err() {
            warn!(
                "[BINDER] failed to delete record {:#x} for {}",
                handle, device.path
            );
        }
    }
}

fn rewrite_uuid_set(device: &mut Device, added: &UuidSet, removed: &UuidSet) {
    for uuid in added.iter() {
        if device.uuids.insert(uuid.clone()).is_err() {
            warn!("[BINDER] uuid set full for {}", device.path);
        }
    }
    for uuid in removed.iter() {
        device.uuids.remove(uuid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterId;
    use crate::storage::MemoryStore;
    use crate::testing::{
        AUDIO_UUID, HID_UUID, TestDriver, classless_record, record, remote_addr, test_pair,
    };
    use crate::uuid::{GENERIC_AUDIO_SVCLASS, HID_SVCLASS, ProfileUuid};
    use embassy_futures::block_on;

    fn uuid_set(classes: &[u16]) -> UuidSet {
        let mut set = UuidSet::new();
        for class in classes {
            set.insert(ProfileUuid::from_u16(*class)).unwrap();
        }
        set
    }

    #[test]
    fn test_added_hid_uuid_binds_hid_driver() {
        static HID_DRIVER: TestDriver = TestDriver::new("hid", &[HID_UUID]);

        let mut registry = DriverRegistry::new();
        registry.register(&HID_DRIVER).unwrap();

        let mut device = Device::new(AdapterId(0), remote_addr());
        let added = uuid_set(&[HID_SVCLASS]);
        let removed = UuidSet::new();
        let records = [record(0x10001, HID_SVCLASS)];
        let mut store = MemoryStore::new();
        let mut notifications = Vec::new();

        block_on(apply(
            &mut device,
            &registry,
            &added,
            &removed,
            &records,
            test_pair(),
            &mut store,
            &mut notifications,
        ));

        assert_eq!(HID_DRIVER.probes(), 1);
        assert_eq!(HID_DRIVER.last_matched(), 1);
        assert_eq!(device.bindings.len(), 1);
        assert!(device.uuids.contains(&ProfileUuid::from_u16(HID_SVCLASS)));
        assert_eq!(
            store.profiles(test_pair()),
            Some("00001124-0000-1000-8000-00805f9b34fb")
        );
        assert!(matches!(
            notifications.first(),
            Some(Notification::UuidsChanged { uuids, .. }) if uuids.len() == 1
        ));
    }

    #[test]
    fn test_removed_uuids_unbind_and_clear_storage() {
        static HID_DRIVER: TestDriver = TestDriver::new("hid", &[HID_UUID]);
        static AUDIO_DRIVER: TestDriver = TestDriver::new("audio", &[AUDIO_UUID]);

        let registry = DriverRegistry::new();
        let mut device = Device::new(AdapterId(0), remote_addr());
        device.uuids = uuid_set(&[HID_SVCLASS, GENERIC_AUDIO_SVCLASS]);
        device
            .bindings
            .push(DriverBinding {
                driver: crate::driver::DriverRef(&HID_DRIVER),
                data: crate::driver::DriverData(1),
            })
            .unwrap();
        device
            .bindings
            .push(DriverBinding {
                driver: crate::driver::DriverRef(&AUDIO_DRIVER),
                data: crate::driver::DriverData(2),
            })
            .unwrap();

        let mut store = MemoryStore::new();
        block_on(store.store_record(test_pair(), &record(0x1, HID_SVCLASS))).unwrap();
        block_on(store.store_record(test_pair(), &record(0x2, GENERIC_AUDIO_SVCLASS))).unwrap();

        let added = UuidSet::new();
        let removed = uuid_set(&[HID_SVCLASS, GENERIC_AUDIO_SVCLASS]);
        let mut notifications = Vec::new();

        block_on(apply(
            &mut device,
            &registry,
            &added,
            &removed,
            &[],
            test_pair(),
            &mut store,
            &mut notifications,
        ));

        assert_eq!(HID_DRIVER.removes(), 1);
        assert_eq!(AUDIO_DRIVER.removes(), 1);
        assert!(device.bindings.is_empty());
        assert!(device.uuids.is_empty());
        assert_eq!(store.profiles(test_pair()), Some(""));
        assert_eq!(store.record_count(test_pair()), 0);
    }

    #[test]
    fn test_probe_failure_skips_driver_without_aborting() {
        static REJECTING: TestDriver = TestDriver::new("rejecting", &[HID_UUID]);
        static ACCEPTING: TestDriver = TestDriver::new("accepting", &[HID_UUID]);

        REJECTING.set_reject(true);
        let mut registry = DriverRegistry::new();
        registry.register(&REJECTING).unwrap();
        registry.register(&ACCEPTING).unwrap();

        let mut device = Device::new(AdapterId(0), remote_addr());
        let added = uuid_set(&[HID_SVCLASS]);
        let records = [record(0x10001, HID_SVCLASS)];
        let mut store = MemoryStore::new();
        let mut notifications = Vec::new();

        block_on(apply(
            &mut device,
            &registry,
            &added,
            &UuidSet::new(),
            &records,
            test_pair(),
            &mut store,
            &mut notifications,
        ));

        assert_eq!(REJECTING.probes(), 1);
        assert_eq!(ACCEPTING.probes(), 1);
        assert_eq!(device.bindings.len(), 1);
        assert_eq!(device.bindings[0].driver.0.name(), "accepting");
    }

    #[test]
    fn test_removed_uuid_without_binding_is_noop() {
        let registry = DriverRegistry::new();
        let mut device = Device::new(AdapterId(0), remote_addr());
        device.uuids = uuid_set(&[GENERIC_AUDIO_SVCLASS]);

        let removed = uuid_set(&[GENERIC_AUDIO_SVCLASS]);
        let mut store = MemoryStore::new();
        let mut notifications = Vec::new();

        block_on(apply(
            &mut device,
            &registry,
            &UuidSet::new(),
            &removed,
            &[],
            test_pair(),
            &mut store,
            &mut notifications,
        ));

        assert!(device.bindings.is_empty());
        assert!(device.uuids.is_empty());
        assert_eq!(store.profiles(test_pair()), Some(""));
    }

    #[test]
    fn test_probe_receives_only_declared_records() {
        static HID_DRIVER: TestDriver = TestDriver::new("hid", &[HID_UUID]);

        let mut registry = DriverRegistry::new();
        registry.register(&HID_DRIVER).unwrap();

        let mut device = Device::new(AdapterId(0), remote_addr());
        let added = uuid_set(&[HID_SVCLASS, GENERIC_AUDIO_SVCLASS]);
        let records = [
            record(0x1, HID_SVCLASS),
            record(0x2, GENERIC_AUDIO_SVCLASS),
            classless_record(0x3),
        ];
        let mut store = MemoryStore::new();
        let mut notifications = Vec::new();

        block_on(apply(
            &mut device,
            &registry,
            &added,
            &UuidSet::new(),
            &records,
            test_pair(),
            &mut store,
            &mut notifications,
        ));

        assert_eq!(HID_DRIVER.probes(), 1);
        assert_eq!(HID_DRIVER.last_matched(), 1);
    }
}
