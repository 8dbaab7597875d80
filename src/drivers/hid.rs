//! Generic HID class driver: the §4.7 template with no payload decoding of
//! its own — each report is forwarded to the user callback verbatim, the
//! way the source's boot-protocol mouse driver does (it interprets none of
//! the report's bytes itself beyond treating it as an opaque buffer).

use crate::config::{HID_REPORT_BUFFER, MAX_HID_DEVICES};
use crate::descriptor::{DescriptorRecord, EndpointDescriptorRaw, ENDPOINT_ATTR_INTERRUPT};
use crate::device::SlotHandle;
use crate::lld::EndpointMeta;
use crate::packet::{desc_type, request, Completion, EndpointType, PacketStatus, SetupData};
use crate::registry::{ClassDriver, DriverHandle, DriverInfo};
use crate::services::Services;
use zerocopy::FromBytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Inactive,
    ReadingRequest,
    ReadingComplete,
    SetConfigurationRequest,
    SetConfigurationEmptyRead,
    SetConfigurationComplete,
}

/// User callback surface, mirroring `hid_mouse_config_t`'s single function
/// pointer. `data`'s length carries what the original passes as a separate
/// `length` out-parameter.
#[derive(Default)]
pub struct HidConfig {
    pub in_message_handler: Option<fn(device_id: u8, data: &[u8])>,
}

struct HidInstance {
    in_use: bool,
    state: State,
    own_slot: usize,
    buffer: [u8; HID_REPORT_BUFFER],
    endpoint_in_address: u8,
    endpoint_in_maxpacketsize: u16,
    endpoint_in_toggle: bool,
    configuration_value: u8,
    device_id: u8,
}

impl HidInstance {
    const fn new() -> Self {
        HidInstance {
            in_use: false,
            state: State::Inactive,
            own_slot: 0,
            buffer: [0; HID_REPORT_BUFFER],
            endpoint_in_address: 0,
            endpoint_in_maxpacketsize: 0,
            endpoint_in_toggle: false,
            configuration_value: 0,
            device_id: 0,
        }
    }

    fn ep0(&self, services: &Services<'_>) -> EndpointMeta {
        let slot = services.slot(self.own_slot);
        EndpointMeta {
            address: slot.address as i8,
            endpoint_address: 0,
            endpoint_type: EndpointType::Control,
            endpoint_size_max: slot.max_packet_size_ep0,
            speed: slot.speed,
            toggle: slot.toggle0,
        }
    }

    fn read_report(&self, services: &mut Services<'_>) {
        let slot = services.slot(self.own_slot);
        let ep = EndpointMeta {
            address: slot.address as i8,
            endpoint_address: self.endpoint_in_address,
            endpoint_type: EndpointType::Interrupt,
            endpoint_size_max: self.endpoint_in_maxpacketsize,
            speed: slot.speed,
            toggle: self.endpoint_in_toggle,
        };
        let len = self.endpoint_in_maxpacketsize;
        services.submit_read(self.own_slot, ep, len);
    }

    fn poll(&mut self, services: &mut Services<'_>) {
        match self.state {
            State::ReadingRequest => {
                self.state = State::ReadingComplete;
                self.read_report(services);
            }
            State::SetConfigurationRequest => {
                self.state = State::SetConfigurationEmptyRead;
                let setup = SetupData {
                    bm_request_type: 0,
                    b_request: request::SET_CONFIGURATION,
                    w_value: self.configuration_value as u16,
                    w_index: 0,
                    w_length: 0,
                };
                let ep = self.ep0(services);
                services.submit_write(self.own_slot, ep, &setup.to_bytes());
            }
            _ => {}
        }
    }

    fn advance(&mut self, services: &mut Services<'_>, completion: Completion, data: &[u8], config: &HidConfig) {
        match self.state {
            State::SetConfigurationEmptyRead => match completion.status {
                PacketStatus::Ok => {
                    self.state = State::SetConfigurationComplete;
                    let ep = self.ep0(services);
                    services.submit_read(self.own_slot, ep, 0);
                }
                _ => {
                    log::error!("hid: fatal error during SET_CONFIGURATION");
                    self.state = State::Inactive;
                }
            },
            State::SetConfigurationComplete => match completion.status {
                PacketStatus::Ok => {
                    self.state = State::ReadingRequest;
                    self.endpoint_in_toggle = false;
                    log::info!("hid: device {} configured", self.device_id);
                }
                _ => {
                    log::error!("hid: fatal error completing SET_CONFIGURATION");
                    self.state = State::Inactive;
                }
            },
            State::ReadingComplete => {
                match completion.status {
                    PacketStatus::Ok => {
                        let len = data.len().min(self.buffer.len());
                        self.buffer[..len].copy_from_slice(&data[..len]);
                        if let Some(handler) = config.in_message_handler {
                            handler(self.device_id, &self.buffer[..len]);
                        }
                    }
                    PacketStatus::ErrSiz if completion.transferred_length as usize == data.len() => {
                        let len = data.len().min(self.buffer.len());
                        self.buffer[..len].copy_from_slice(&data[..len]);
                        if let Some(handler) = config.in_message_handler {
                            handler(self.device_id, &self.buffer[..len]);
                        }
                    }
                    PacketStatus::ErrSiz => {}
                    PacketStatus::Efatal | PacketStatus::Eagain => {
                        log::error!("hid: fatal error reading report");
                        self.state = State::Inactive;
                        return;
                    }
                }
                self.state = State::ReadingRequest;
            }
            State::Inactive | State::ReadingRequest | State::SetConfigurationRequest => {
                log::warn!("hid: unexpected completion in state {:?}", self.state);
            }
        }
    }
}

/// Instance pool for the generic HID class driver, up to `MAX_HID_DEVICES`
/// attached devices.
pub struct HidDriver {
    instances: [HidInstance; MAX_HID_DEVICES],
    config: HidConfig,
}

impl HidDriver {
    pub const fn new(config: HidConfig) -> Self {
        HidDriver { instances: [const { HidInstance::new() }; MAX_HID_DEVICES], config }
    }
}

impl ClassDriver for HidDriver {
    fn info(&self) -> DriverInfo {
        DriverInfo {
            device_class: -1,
            device_sub_class: -1,
            device_protocol: -1,
            id_vendor: -1,
            id_product: -1,
            iface_class: 0x03,
            iface_sub_class: -1,
            iface_protocol: -1,
        }
    }

    fn init(&mut self, slot: SlotHandle) -> Option<DriverHandle> {
        let (idx, inst) = self.instances.iter_mut().enumerate().find(|(_, i)| !i.in_use)?;
        *inst = HidInstance::new();
        inst.in_use = true;
        inst.device_id = idx as u8;
        inst.own_slot = slot.slot_index;
        Some(idx)
    }

    fn analyze_descriptor(&mut self, handle: DriverHandle, record: &DescriptorRecord<'_>) -> bool {
        let hid = &mut self.instances[handle];
        match record.descriptor_type {
            t if t == desc_type::CONFIGURATION => {
                if let Ok((cfg, _)) = crate::descriptor::ConfigurationDescriptorRaw::ref_from_prefix(record.bytes) {
                    hid.configuration_value = cfg.b_configuration_value;
                }
            }
            t if t == desc_type::ENDPOINT => {
                if let Ok((ep, _)) = EndpointDescriptorRaw::ref_from_prefix(record.bytes) {
                    if ep.bm_attributes & 0x03 == ENDPOINT_ATTR_INTERRUPT && ep.b_endpoint_address & 0x80 != 0 {
                        hid.endpoint_in_address = ep.b_endpoint_address & 0x7f;
                        hid.endpoint_in_maxpacketsize = ep.w_max_packet_size.min(HID_REPORT_BUFFER as u16);
                        if hid.endpoint_in_address != 0 {
                            hid.state = State::SetConfigurationRequest;
                            return true;
                        }
                    }
                }
            }
            _ => {}
        }
        false
    }

    fn poll(&mut self, handle: DriverHandle, services: &mut Services<'_>, _time_us: u32) {
        self.instances[handle].poll(services);
    }

    fn on_completion(&mut self, handle: DriverHandle, services: &mut Services<'_>, completion: Completion, data: &[u8]) {
        let config = &self.config;
        self.instances[handle].advance(services, completion, data, config);
    }

    fn remove(&mut self, handle: DriverHandle, _services: &mut Services<'_>) {
        let hid = &mut self.instances[handle];
        log::info!("hid: device {} removed", hid.device_id);
        *hid = HidInstance::new();
    }
}
