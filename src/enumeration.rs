//! The enumeration state machine (§4.5): drives one device from "just
//! connected" to "bound to a class driver".

use crate::config::{CONFIGURATION_DESCRIPTOR_SIZE, ENUM_SCRATCH_BUFFER};
use crate::descriptor::bind_driver;
use crate::device::SlotHandle;
use crate::lld::EndpointMeta;
use crate::packet::{desc_type, request, Completion, EndpointType, PacketStatus, SetupData, DEVICE_DESCRIPTOR_SIZE};
use crate::registry::DriverRegistry;
use crate::services::Services;

/// States of a single device's enumeration. Numbered 1..8 in the original;
/// named here since nothing outside this module inspects the ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumState {
    /// Not enumerating; either never started or finished (bound or failed).
    Idle,
    SetAddressEmptyRead,
    SetAddressEmptyReadComplete,
    DeviceDtReadSetup,
    DeviceDtRead,
    DeviceDtReadComplete,
    ConfigurationDtHeaderReadSetup,
    ConfigurationDtHeaderRead,
    ConfigurationDtHeaderReadComplete,
    ConfigurationDtReadSetup,
    ConfigurationDtRead,
    ConfigurationDtReadComplete,
    FindDriver,
}

/// The process-wide enumeration lock and address-handoff scratch, collected
/// into one instantiable struct (per the design note on avoiding true
/// statics) rather than module-level globals. Only one [`SlotHandle`] may be
/// mid-enumeration at a time across every LLD this context manages.
///
/// The descriptor scratch buffer lives here too, not on `Services`: since at
/// most one enumeration runs at a time across the whole stack, one shared
/// buffer is enough and avoids giving every LLD its own copy.
pub struct EnumContext {
    running: bool,
    address_temporary: i16,
    active: Option<SlotHandle>,
    scratch: [u8; ENUM_SCRATCH_BUFFER],
    /// Bytes of `scratch` currently holding the device + configuration
    /// descriptor pair, valid only while `running`.
    config_total_length: u16,
}

impl EnumContext {
    pub const fn new() -> Self {
        EnumContext {
            running: false,
            address_temporary: -1,
            active: None,
            scratch: [0; ENUM_SCRATCH_BUFFER],
            config_total_length: 0,
        }
    }

    /// `usbh_enum_available()`: true iff no enumeration is in progress.
    pub fn available(&self) -> bool {
        !self.running
    }

    pub fn active_slot(&self) -> Option<SlotHandle> {
        self.active
    }

    pub fn begin(&mut self, slot: SlotHandle, address: i16) {
        self.running = true;
        self.active = Some(slot);
        self.address_temporary = address;
    }

    pub fn address_temporary(&self) -> i16 {
        self.address_temporary
    }

    /// Releases the lock on every enumeration exit path, successful or not
    /// (§7: "the enumeration lock is released on every enumeration exit
    /// path").
    pub fn finish(&mut self) {
        self.running = false;
        self.active = None;
    }

    fn copy_into_scratch(&mut self, offset: usize, data: &[u8]) {
        let end = (offset + data.len()).min(self.scratch.len());
        if end > offset {
            self.scratch[offset..end].copy_from_slice(&data[..end - offset]);
        }
    }
}

impl Default for EnumContext {
    fn default() -> Self {
        Self::new()
    }
}

fn ep0(services: &Services<'_>, slot_index: usize) -> EndpointMeta {
    let slot = services.slot(slot_index);
    EndpointMeta {
        address: slot.address as i8,
        endpoint_address: 0,
        endpoint_type: EndpointType::Control,
        endpoint_size_max: slot.max_packet_size_ep0,
        speed: slot.speed,
        toggle: slot.toggle0,
    }
}

fn write_setup(services: &mut Services<'_>, slot_index: usize, setup: SetupData) {
    let ep = ep0(services, slot_index);
    services.submit_write(slot_index, ep, &setup.to_bytes());
}

fn read_control(services: &mut Services<'_>, slot_index: usize, len: u16) {
    let ep = ep0(services, slot_index);
    services.submit_read(slot_index, ep, len);
}

fn device_descriptor_get(length: u16) -> SetupData {
    SetupData {
        bm_request_type: crate::packet::RequestType::DIR_IN.bits(),
        b_request: request::GET_DESCRIPTOR,
        w_value: (desc_type::DEVICE as u16) << 8,
        w_index: 0,
        w_length: length,
    }
}

fn configuration_descriptor_get(length: u16) -> SetupData {
    SetupData {
        bm_request_type: crate::packet::RequestType::DIR_IN.bits(),
        b_request: request::GET_DESCRIPTOR,
        w_value: (desc_type::CONFIGURATION as u16) << 8,
        w_index: 0,
        w_length: length,
    }
}

/// Reads the little-endian `wTotalLength` field out of a CONFIGURATION
/// descriptor header stored at `scratch[DEVICE_DESCRIPTOR_SIZE..]`.
fn read_w_total_length(scratch: &[u8]) -> u16 {
    let off = DEVICE_DESCRIPTOR_SIZE + 2;
    u16::from_le_bytes([scratch[off], scratch[off + 1]])
}

/// Frees the slot and releases the enumeration lock. Entered on any
/// unrecoverable failure, mirroring `device_enumeration_terminate`.
fn terminate(slot_index: usize, services: &mut Services<'_>) {
    let slot = services.slot_mut(slot_index);
    slot.address = -1;
    slot.enum_state = EnumState::Idle;
    services.enum_ctx.finish();
}

/// Entry point: feeds one completion to the slot's enumeration state
/// machine. `registry` is only consulted in the terminal `FindDriver` state.
pub fn on_completion(
    slot_index: usize,
    services: &mut Services<'_>,
    registry: &mut DriverRegistry<'_>,
    completion: Completion,
    data: &[u8],
) {
    let state = services.slot(slot_index).enum_state;
    advance(state, slot_index, services, registry, completion, data);
}

/// The continuation itself. Recurses directly (no trampoline) for the
/// original's `CONTINUE_WITH` pattern: an unconditional transition that
/// re-enters the dispatcher immediately with the stale completion value,
/// which the next state ignores.
fn advance(
    state: EnumState,
    slot_index: usize,
    services: &mut Services<'_>,
    registry: &mut DriverRegistry<'_>,
    completion: Completion,
    data: &[u8],
) {
    match state {
        EnumState::SetAddressEmptyRead => match completion.status {
            PacketStatus::Ok => {
                services.slot_mut(slot_index).enum_state = EnumState::SetAddressEmptyReadComplete;
                read_control(services, slot_index, 0);
            }
            PacketStatus::Efatal | PacketStatus::Eagain | PacketStatus::ErrSiz => {
                log::error!("usbh: fatal error assigning address to slot {slot_index}");
                terminate(slot_index, services);
            }
        },

        EnumState::SetAddressEmptyReadComplete => match completion.status {
            PacketStatus::Ok => {
                let address_temporary = services.enum_ctx.address_temporary();
                let slot = services.slot_mut(slot_index);
                if slot.address == 0 {
                    slot.address = address_temporary;
                    log::debug!("usbh: slot {slot_index} assigned address {address_temporary}");
                }
                advance(EnumState::DeviceDtReadSetup, slot_index, services, registry, completion, data);
            }
            PacketStatus::Efatal | PacketStatus::Eagain | PacketStatus::ErrSiz => {
                log::error!("usbh: fatal error confirming address for slot {slot_index}");
                terminate(slot_index, services);
            }
        },

        EnumState::DeviceDtReadSetup => {
            services.slot_mut(slot_index).enum_state = EnumState::DeviceDtRead;
            write_setup(services, slot_index, device_descriptor_get(DEVICE_DESCRIPTOR_SIZE as u16));
        }

        EnumState::DeviceDtRead => match completion.status {
            PacketStatus::Ok => {
                services.slot_mut(slot_index).enum_state = EnumState::DeviceDtReadComplete;
                read_control(services, slot_index, DEVICE_DESCRIPTOR_SIZE as u16);
            }
            PacketStatus::Eagain => {
                advance(EnumState::DeviceDtReadSetup, slot_index, services, registry, completion, data);
            }
            PacketStatus::Efatal | PacketStatus::ErrSiz => {
                log::error!("usbh: fatal error reading device descriptor for slot {slot_index}");
                terminate(slot_index, services);
            }
        },

        EnumState::DeviceDtReadComplete => match completion.status {
            PacketStatus::Ok => {
                services.enum_ctx.copy_into_scratch(0, data);
                if data.len() > 7 {
                    services.slot_mut(slot_index).max_packet_size_ep0 = data[7] as u16;
                }
                log::debug!("usbh: slot {slot_index} device descriptor read complete");
                advance(EnumState::ConfigurationDtHeaderReadSetup, slot_index, services, registry, completion, data);
            }
            PacketStatus::ErrSiz => {
                if completion.transferred_length >= 8 && data.len() > 7 {
                    services.enum_ctx.copy_into_scratch(0, data);
                    services.slot_mut(slot_index).max_packet_size_ep0 = data[7] as u16;
                    advance(EnumState::DeviceDtReadSetup, slot_index, services, registry, completion, data);
                } else {
                    log::error!("usbh: device descriptor short read unusable for slot {slot_index}");
                    terminate(slot_index, services);
                }
            }
            PacketStatus::Eagain | PacketStatus::Efatal => {
                log::error!("usbh: fatal error completing device descriptor read for slot {slot_index}");
                terminate(slot_index, services);
            }
        },

        EnumState::ConfigurationDtHeaderReadSetup => {
            let max_packet_size_ep0 = services.slot(slot_index).max_packet_size_ep0;
            services.slot_mut(slot_index).enum_state = EnumState::ConfigurationDtHeaderRead;
            write_setup(services, slot_index, configuration_descriptor_get(max_packet_size_ep0));
        }

        EnumState::ConfigurationDtHeaderRead => match completion.status {
            PacketStatus::Ok => {
                let max_packet_size_ep0 = services.slot(slot_index).max_packet_size_ep0;
                services.slot_mut(slot_index).enum_state = EnumState::ConfigurationDtHeaderReadComplete;
                read_control(services, slot_index, max_packet_size_ep0);
            }
            _ => {
                log::error!("usbh: fatal error requesting configuration descriptor header for slot {slot_index}");
                terminate(slot_index, services);
            }
        },

        EnumState::ConfigurationDtHeaderReadComplete => match completion.status {
            PacketStatus::Ok => {
                services.enum_ctx.copy_into_scratch(DEVICE_DESCRIPTOR_SIZE, data);
                advance(EnumState::ConfigurationDtReadSetup, slot_index, services, registry, completion, data);
            }
            PacketStatus::ErrSiz => {
                if completion.transferred_length as usize >= CONFIGURATION_DESCRIPTOR_SIZE && data.len() >= 4 {
                    let w_total_length = u16::from_le_bytes([data[2], data[3]]);
                    if completion.transferred_length == w_total_length {
                        services.enum_ctx.copy_into_scratch(DEVICE_DESCRIPTOR_SIZE, data);
                        services.enum_ctx.config_total_length = w_total_length;
                        log::debug!("usbh: slot {slot_index} configuration descriptor read complete, length {w_total_length}");
                        advance(EnumState::FindDriver, slot_index, services, registry, completion, data);
                    } else {
                        log::trace!("usbh: slot {slot_index} short configuration header, awaiting full length");
                    }
                }
            }
            PacketStatus::Eagain | PacketStatus::Efatal => {
                log::error!("usbh: fatal error reading configuration descriptor header for slot {slot_index}");
                terminate(slot_index, services);
            }
        },

        EnumState::ConfigurationDtReadSetup => {
            let w_total_length = read_w_total_length(&services.enum_ctx.scratch);
            services.enum_ctx.config_total_length = w_total_length;
            services.slot_mut(slot_index).enum_state = EnumState::ConfigurationDtRead;
            write_setup(services, slot_index, configuration_descriptor_get(w_total_length));
        }

        EnumState::ConfigurationDtRead => match completion.status {
            PacketStatus::Ok => {
                let w_total_length = services.enum_ctx.config_total_length;
                services.slot_mut(slot_index).enum_state = EnumState::ConfigurationDtReadComplete;
                read_control(services, slot_index, w_total_length);
            }
            _ => {
                log::error!("usbh: fatal error requesting full configuration descriptor for slot {slot_index}");
                terminate(slot_index, services);
            }
        },

        EnumState::ConfigurationDtReadComplete => match completion.status {
            PacketStatus::Ok => {
                services.enum_ctx.copy_into_scratch(DEVICE_DESCRIPTOR_SIZE, data);
                log::debug!("usbh: slot {slot_index} full configuration descriptor read complete");
                advance(EnumState::FindDriver, slot_index, services, registry, completion, data);
            }
            _ => {
                log::error!("usbh: fatal error completing full configuration descriptor read for slot {slot_index}");
                terminate(slot_index, services);
            }
        },

        EnumState::FindDriver => {
            let total_len = (DEVICE_DESCRIPTOR_SIZE as u16 + services.enum_ctx.config_total_length) as usize;
            let total_len = total_len.min(services.enum_ctx.scratch.len());
            let slot_handle = SlotHandle { lld_index: services.lld_index, slot_index };

            let mut buf = [0u8; ENUM_SCRATCH_BUFFER];
            buf[..total_len].copy_from_slice(&services.enum_ctx.scratch[..total_len]);

            match bind_driver(&buf[..total_len], slot_handle, services, registry) {
                Some((registry_index, handle)) => {
                    services.slot_mut(slot_index).bound = Some((registry_index, handle));
                    log::info!("usbh: slot {slot_index} bound to driver at registry index {registry_index}");
                }
                None => {
                    log::info!("usbh: slot {slot_index} found no compatible driver, freeing");
                    services.slot_mut(slot_index).address = -1;
                }
            }
            services.slot_mut(slot_index).enum_state = EnumState::Idle;
            services.enum_ctx.finish();
        }

        EnumState::Idle => {
            log::warn!("usbh: stray completion for slot {slot_index} with no enumeration in progress");
        }
    }
}
