//! Embedded USB host stack: enumeration core, hub driver, and class-driver
//! dispatch, all driven by one cooperative [`UsbHost::poll`] tick.
//!
//! An [`UsbHost`] owns one or more low-level drivers ([`lld::Lld`]), each with
//! its own per-LLD device table, sharing one process-wide enumeration lock
//! ([`enumeration::EnumContext`]) and one class-driver registry
//! ([`registry::DriverRegistry`]). See the module docs on [`enumeration`],
//! [`hub`], and [`registry`] for the state machines this type wires together.

#![cfg_attr(not(test), no_std)]
#![allow(dead_code)]

pub mod config;
pub mod descriptor;
pub mod device;
pub mod drivers;
pub mod enumeration;
pub mod error;
pub mod hub;
pub mod lld;
pub mod packet;
pub mod registry;
pub mod services;

use heapless::Vec;

use config::{MAX_DEVICES, MAX_LLDS};
use device::{DeviceSlot, DeviceTable, SlotHandle};
use enumeration::{EnumContext, EnumState};
use error::UsbError;
use lld::{Lld, PollEvent};
use packet::{Completion, Speed};
use registry::DriverRegistry;
use services::Services;

/// The USB host stack. Built once from the list of host controllers and the
/// registry of class drivers the host application wants linked in — the
/// equivalent of the original's link-time `USE_*_DRIVER_{FS,HS}` feature
/// flags, expressed here as ordinary constructor arguments instead.
pub struct UsbHost<'a> {
    llds: Vec<&'a mut dyn Lld, MAX_LLDS>,
    tables: [DeviceTable; MAX_LLDS],
    enum_ctx: EnumContext,
    registry: DriverRegistry<'a>,
    teardown: Vec<SlotHandle, MAX_DEVICES>,
}

impl<'a> UsbHost<'a> {
    /// `init(lld_list, driver_list)`: initialises every LLD and resets every
    /// device table to all-free (every slot's address set to −1).
    pub fn init(mut llds: Vec<&'a mut dyn Lld, MAX_LLDS>, registry: DriverRegistry<'a>) -> Result<Self, UsbError> {
        if llds.is_empty() {
            return Err(UsbError::NoLowLevelDrivers);
        }
        for lld in llds.iter_mut() {
            lld.init();
        }
        let mut tables = [const { DeviceTable::new() }; MAX_LLDS];
        for table in tables.iter_mut() {
            table.reset();
        }
        Ok(UsbHost { llds, tables, enum_ctx: EnumContext::new(), registry, teardown: Vec::new() })
    }

    /// `enum_available()`: true iff no enumeration is in progress anywhere in
    /// this stack.
    pub fn enum_available(&self) -> bool {
        self.enum_ctx.available()
    }

    /// Advances every LLD by one tick: detects root-port connect/disconnect,
    /// routes completions to the enumeration core or a bound class driver,
    /// polls every bound driver, and processes any teardown a driver
    /// requested during this tick.
    pub fn poll(&mut self, time_us: u32) {
        for lld_index in 0..self.llds.len() {
            self.poll_one_lld(lld_index, time_us);
        }
        self.drain_teardown();
    }

    fn poll_one_lld(&mut self, lld_index: usize, time_us: u32) {
        match self.llds[lld_index].poll(time_us) {
            PollEvent::DeviceConnected => {
                let speed = self.llds[lld_index].root_speed();
                log::info!("usbh: lld {lld_index} root device connected at {speed:?}");
                self.tables[lld_index].slots[0] = DeviceSlot::free();
                self.tables[lld_index].slots[0].address = 1;
                self.tables[lld_index].slots[0].speed = speed;

                let mut services = Services {
                    lld: &mut *self.llds[lld_index],
                    table: &mut self.tables[lld_index],
                    enum_ctx: &mut self.enum_ctx,
                    lld_index,
                    teardown: &mut self.teardown,
                };
                services.start_enumeration(0, speed);
            }
            PollEvent::DeviceDisconnected => {
                log::info!("usbh: lld {lld_index} root device disconnected");
                self.teardown_lld(lld_index);
            }
            PollEvent::None => {}
        }

        while let Some((tag, completion, _toggle, data)) = self.llds[lld_index].take_completion() {
            self.route_completion(tag, completion, &data);
        }

        for slot_index in 0..MAX_DEVICES {
            let (bound, gated) = {
                let slot = &self.tables[lld_index].slots[slot_index];
                (slot.bound, slot_index == 0 || self.enum_ctx.available())
            };
            let Some((registry_index, handle)) = bound else { continue };
            if !gated {
                continue;
            }
            let mut services = Services {
                lld: &mut *self.llds[lld_index],
                table: &mut self.tables[lld_index],
                enum_ctx: &mut self.enum_ctx,
                lld_index,
                teardown: &mut self.teardown,
            };
            if let Some(driver) = self.registry.driver_mut(registry_index) {
                driver.poll(handle, &mut services, time_us);
            }
        }
    }

    /// Routes one completion to the slot's enumeration continuation if it is
    /// still mid-enumeration, otherwise to its bound driver. Stray
    /// completions for a slot that is neither enumerating nor bound are
    /// dropped with a trace log (can happen right after a disconnect clears
    /// the slot out from under an in-flight transfer).
    fn route_completion(&mut self, tag: SlotHandle, completion: Completion, data: &[u8]) {
        let lld_index = tag.lld_index;
        let slot_index = tag.slot_index;
        let enumerating = self.tables[lld_index].slots[slot_index].enum_state != EnumState::Idle;

        let mut services = Services {
            lld: &mut *self.llds[lld_index],
            table: &mut self.tables[lld_index],
            enum_ctx: &mut self.enum_ctx,
            lld_index,
            teardown: &mut self.teardown,
        };

        if enumerating {
            enumeration::on_completion(slot_index, &mut services, &mut self.registry, completion, data);
            return;
        }

        let Some((registry_index, handle)) = services.slot(slot_index).bound else {
            log::trace!("usbh: completion for unbound slot ({lld_index}, {slot_index}), dropping");
            return;
        };
        if let Some(driver) = self.registry.driver_mut(registry_index) {
            driver.on_completion(handle, &mut services, completion, data);
        }
    }

    /// Clears every slot in `lld_index`'s table, calling each bound driver's
    /// `remove` first, and releases the enumeration lock if it was held for a
    /// slot in this table (§5 Cancellation: disconnect is the only abort).
    fn teardown_lld(&mut self, lld_index: usize) {
        for slot_index in 0..MAX_DEVICES {
            let bound = self.tables[lld_index].slots[slot_index].bound;
            let Some((registry_index, handle)) = bound else { continue };
            let mut services = Services {
                lld: &mut *self.llds[lld_index],
                table: &mut self.tables[lld_index],
                enum_ctx: &mut self.enum_ctx,
                lld_index,
                teardown: &mut self.teardown,
            };
            if let Some(driver) = self.registry.driver_mut(registry_index) {
                driver.remove(handle, &mut services);
            }
        }
        if self.enum_ctx.active_slot().is_some_and(|s| s.lld_index == lld_index) {
            self.enum_ctx.finish();
        }
        self.tables[lld_index].reset();
    }

    /// Processes slots a driver asked to tear down mid-tick (e.g. the hub
    /// driver on a detected child disconnect), deferred to avoid a reentrant
    /// borrow of the driver registry from within a driver's own callback.
    fn drain_teardown(&mut self) {
        while let Some(tag) = self.teardown.pop() {
            let bound = self.tables[tag.lld_index].slots[tag.slot_index].bound;
            if let Some((registry_index, handle)) = bound {
                let mut services = Services {
                    lld: &mut *self.llds[tag.lld_index],
                    table: &mut self.tables[tag.lld_index],
                    enum_ctx: &mut self.enum_ctx,
                    lld_index: tag.lld_index,
                    teardown: &mut self.teardown,
                };
                if let Some(driver) = self.registry.driver_mut(registry_index) {
                    driver.remove(handle, &mut services);
                }
            }
            self.tables[tag.lld_index].slots[tag.slot_index].clear();
        }
    }
}
