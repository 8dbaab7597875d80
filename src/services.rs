//! The context a [`crate::registry::ClassDriver`] is given on every call: a
//! scoped handle onto its own LLD's transport, device table, and the shared
//! enumeration lock. Replaces the global functions the original drivers
//! reached for directly (`usbh_get_free_device`, `device_enumeration_start`,
//! `usbh_enum_available`) with an explicit, instantiable context object.

use heapless::Vec;

use crate::config::MAX_DEVICES;
use crate::device::{DeviceSlot, DeviceTable, SlotHandle};
use crate::enumeration::EnumContext;
use crate::lld::{EndpointMeta, Lld};
use crate::packet::{Speed, request};

pub struct Services<'a> {
    pub lld: &'a mut dyn Lld,
    pub table: &'a mut DeviceTable,
    pub enum_ctx: &'a mut EnumContext,
    pub lld_index: usize,
    pub teardown: &'a mut Vec<SlotHandle, MAX_DEVICES>,
}

impl<'a> Services<'a> {
    pub fn slot(&self, slot_index: usize) -> &DeviceSlot {
        &self.table.slots[slot_index]
    }

    pub fn slot_mut(&mut self, slot_index: usize) -> &mut DeviceSlot {
        &mut self.table.slots[slot_index]
    }

    pub fn submit_write(&mut self, slot_index: usize, ep: EndpointMeta, data: &[u8]) {
        let tag = SlotHandle { lld_index: self.lld_index, slot_index };
        self.lld.submit_write(tag, ep, data);
    }

    pub fn submit_read(&mut self, slot_index: usize, ep: EndpointMeta, len: u16) {
        let tag = SlotHandle { lld_index: self.lld_index, slot_index };
        self.lld.submit_read(tag, ep, len);
    }

    /// `usbh_get_free_device`: allocates a slot in this LLD's table, setting
    /// its address to `index + 1`.
    pub fn allocate_child_slot(&mut self) -> Option<usize> {
        self.table.allocate()
    }

    /// `usbh_enum_available`.
    pub fn enum_available(&self) -> bool {
        self.enum_ctx.available()
    }

    /// `device_enumeration_start`: captures the slot's real address, drops it
    /// to the Default-state address 0, and issues the SET_ADDRESS SETUP.
    /// The caller must already hold the enumeration lock unavailable to
    /// other ports (the hub's `busy` flag plus this check together enforce
    /// that, see §4.6).
    pub fn start_enumeration(&mut self, slot_index: usize, speed: Speed) {
        let tag = SlotHandle { lld_index: self.lld_index, slot_index };
        self.enum_ctx.begin(tag, self.table.slots[slot_index].address);

        let slot = &mut self.table.slots[slot_index];
        let address = slot.address;
        slot.address = 0;
        slot.speed = speed;
        slot.max_packet_size_ep0 = if speed == Speed::Low { 8 } else { 64 };
        slot.enum_state = crate::enumeration::EnumState::SetAddressEmptyRead;

        let setup = crate::packet::SetupData {
            bm_request_type: 0,
            b_request: request::SET_ADDRESS,
            w_value: address as u16,
            w_index: 0,
            w_length: 0,
        };
        let ep = EndpointMeta {
            address: 0,
            endpoint_address: 0,
            endpoint_type: crate::packet::EndpointType::Control,
            endpoint_size_max: slot.max_packet_size_ep0,
            speed,
            toggle: false,
        };
        self.submit_write(slot_index, ep, &setup.to_bytes());
    }

    /// Marks a slot for teardown by the top-level poll loop once the current
    /// driver call returns, avoiding a reentrant borrow of the driver
    /// registry from within a driver's own event handling.
    pub fn request_removal(&mut self, slot_index: usize) {
        let _ = self.teardown.push(SlotHandle { lld_index: self.lld_index, slot_index });
    }
}
