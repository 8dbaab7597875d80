//! Per-LLD device table and the free-slot allocator.

use crate::config::MAX_DEVICES;
use crate::enumeration::EnumState;
use crate::packet::Speed;
use crate::registry::DriverHandle;

/// Identifies one device slot without holding a pointer to it: the owning
/// LLD's index into the top-level context, plus the slot's index in that
/// LLD's device table. Per the design note on cyclic back-pointers (slot ->
/// drvdata -> slot), this is the only thing ever stored or passed around;
/// the slot itself is looked up through the owning context on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHandle {
    pub lld_index: usize,
    pub slot_index: usize,
}

/// One USB device on one LLD.
pub struct DeviceSlot {
    /// Bus address, or -1 if the slot is free.
    pub address: i16,
    pub speed: Speed,
    /// `bMaxPacketSize0`; 8 while in the Default state on a LOW speed link,
    /// else the negotiated value (initially 64 until the device descriptor
    /// is read).
    pub max_packet_size_ep0: u16,
    pub toggle0: bool,
    /// `(registry_index, driver_handle)` of the bound class driver, if any.
    pub bound: Option<(usize, DriverHandle)>,
    /// Enumeration state for this slot; `Idle` once bound or never started.
    pub enum_state: EnumState,
}

impl DeviceSlot {
    pub const fn free() -> Self {
        DeviceSlot {
            address: -1,
            speed: Speed::Full,
            max_packet_size_ep0: 64,
            toggle0: false,
            bound: None,
            enum_state: EnumState::Idle,
        }
    }

    pub fn is_free(&self) -> bool {
        self.address < 0
    }

    /// Tears the slot down to its free state. Does not call the bound
    /// driver's `remove` — the caller is responsible for that before calling
    /// this, since only the caller has access to the driver registry.
    pub fn clear(&mut self) {
        self.address = -1;
        self.bound = None;
        self.enum_state = EnumState::Idle;
    }
}

/// Fixed-size table of device slots belonging to one LLD. Slot 0 is always
/// the device directly attached to that LLD's root port.
pub struct DeviceTable {
    pub slots: [DeviceSlot; MAX_DEVICES],
}

impl DeviceTable {
    pub const fn new() -> Self {
        DeviceTable {
            slots: [const { DeviceSlot::free() }; MAX_DEVICES],
        }
    }

    /// Resets every slot to free, as done at LLD init.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = DeviceSlot::free();
        }
    }

    /// Scans from index 0 for the first free slot and assigns it address
    /// `index + 1`. Returns its index, or `None` if the table is full.
    pub fn allocate(&mut self) -> Option<usize> {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_free() {
                slot.address = (i + 1) as i16;
                return Some(i);
            }
        }
        None
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new()
    }
}
