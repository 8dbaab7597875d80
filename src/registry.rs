//! The class driver registry and the wildcard-tolerant matcher.

use crate::config::MAX_CLASS_DRIVERS;
use crate::descriptor::DescriptorRecord;
use crate::device::SlotHandle;
use crate::packet::Completion;
use crate::services::Services;

/// Eight-field match criteria for a class driver. `-1` means wildcard.
/// Mirrors the original `usbh_dev_driver_info_t` layout exactly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverInfo {
    pub device_class: i32,
    pub device_sub_class: i32,
    pub device_protocol: i32,
    pub id_vendor: i32,
    pub id_product: i32,
    pub iface_class: i32,
    pub iface_sub_class: i32,
    pub iface_protocol: i32,
}

impl DriverInfo {
    /// Device-level fields only (used for the device-descriptor based checks).
    const fn check(field: i32, want: i32) -> bool {
        field == -1 || field == want
    }

    /// Matches against the fields extracted from a device's descriptors.
    /// All non-wildcard fields must match; order of checks mirrors the
    /// original (interface fields checked first).
    pub fn matches(&self, probe: &DriverInfo) -> bool {
        Self::check(self.iface_class, probe.iface_class)
            && Self::check(self.iface_sub_class, probe.iface_sub_class)
            && Self::check(self.iface_protocol, probe.iface_protocol)
            && Self::check(self.device_class, probe.device_class)
            && Self::check(self.device_sub_class, probe.device_sub_class)
            && Self::check(self.device_protocol, probe.device_protocol)
            && Self::check(self.id_vendor, probe.id_vendor)
            && Self::check(self.id_product, probe.id_product)
    }
}

/// An opaque handle a class driver hands back from `init`, identifying which
/// of its own internal instance slots now owns the device. The core never
/// interprets this value; it only stores and returns it.
pub type DriverHandle = usize;

/// The contract a class driver (hub, HID, XBOX, MIDI, ...) implements.
///
/// `init`/`analyze_descriptor`/`poll`/`remove` take `&mut self` because each
/// driver owns a fixed array of its own per-device state; there is no shared
/// mutable device-table access here, only the driver's private pool.
pub trait ClassDriver {
    fn info(&self) -> DriverInfo;

    /// Attempt to claim `slot`. Returns `Some(handle)` if the driver accepted
    /// the device and allocated a state slot for it; `None` if it has no
    /// capacity (its instance pool is full). This is the corrected polarity
    /// of the source's `init`, which inverted the null check (see
    /// `find_driver` below and the note in DESIGN.md).
    fn init(&mut self, slot: SlotHandle) -> Option<DriverHandle>;

    /// Feed one descriptor record. Returns `true` once the driver has
    /// everything it needs (endpoints found, config captured) and is ready
    /// to run.
    fn analyze_descriptor(&mut self, handle: DriverHandle, record: &DescriptorRecord<'_>) -> bool;

    /// Called once per tick for every bound instance. Issues whatever
    /// transfer the driver's state machine wants next (e.g. the periodic
    /// interrupt-IN read).
    fn poll(&mut self, handle: DriverHandle, services: &mut Services<'_>, time_us: u32);

    /// Called when a transfer previously submitted for `handle`'s slot
    /// completes. `data` holds any IN bytes transferred (empty for OUT/status
    /// stages).
    fn on_completion(&mut self, handle: DriverHandle, services: &mut Services<'_>, completion: Completion, data: &[u8]);

    fn remove(&mut self, handle: DriverHandle, services: &mut Services<'_>);
}

/// Ordered, fixed-capacity list of registered class drivers, walked in
/// registration order by [`find_driver`].
pub struct DriverRegistry<'a> {
    drivers: heapless::Vec<&'a mut dyn ClassDriver, MAX_CLASS_DRIVERS>,
}

impl<'a> DriverRegistry<'a> {
    pub fn new() -> Self {
        DriverRegistry {
            drivers: heapless::Vec::new(),
        }
    }

    /// Registers a driver. Returns `false` if the registry is already at
    /// `MAX_CLASS_DRIVERS`.
    pub fn register(&mut self, driver: &'a mut dyn ClassDriver) -> bool {
        self.drivers.push(driver).is_ok()
    }

    pub fn driver_mut(&mut self, index: usize) -> Option<&mut &'a mut dyn ClassDriver> {
        self.drivers.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Walks the registry in order looking for a driver whose `info` matches
    /// `probe`, attempting `init` on each candidate in turn. Returns the
    /// `(registry_index, driver_handle)` of the first driver that accepts the
    /// device, or `None` if every matching candidate declined (pool full) or
    /// none matched.
    ///
    /// This corrects the source's inverted null check: there, `init`
    /// returning a non-null pointer was (incorrectly) treated as failure and
    /// the loop kept scanning; here, `Some(handle)` means success and the
    /// scan stops.
    pub fn find_driver(&mut self, slot: SlotHandle, probe: &DriverInfo) -> Option<(usize, DriverHandle)> {
        for (i, driver) in self.drivers.iter_mut().enumerate() {
            if !driver.info().matches(probe) {
                continue;
            }
            if let Some(handle) = driver.init(slot) {
                return Some((i, handle));
            }
            log::debug!("driver at registry index {i} declined device, trying next candidate");
        }
        None
    }
}

impl<'a> Default for DriverRegistry<'a> {
    fn default() -> Self {
        Self::new()
    }
}
