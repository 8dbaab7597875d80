//! USB-MIDI class driver (§4.7): the same control-transfer skeleton as
//! HID/XBOX, but the steady-state read decodes the buffer as a stream of
//! 4-byte USB-MIDI Event Packets rather than one fixed-layout report. No
//! original source exists for this driver (grepping `original_source/` for
//! "midi" turns up nothing); it is built from the template the other two
//! class drivers share.

use crate::config::{MAX_MIDI_DEVICES, MIDI_REPORT_BUFFER};
use crate::descriptor::{DescriptorRecord, EndpointDescriptorRaw, ENDPOINT_ATTR_INTERRUPT};
use crate::device::SlotHandle;
use crate::lld::EndpointMeta;
use crate::packet::{desc_type, request, Completion, EndpointType, PacketStatus, SetupData};
use crate::registry::{ClassDriver, DriverHandle, DriverInfo};
use crate::services::Services;
use zerocopy::FromBytes;

const ENDPOINT_ATTR_BULK: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Inactive,
    ReadingRequest,
    ReadingComplete,
    SetConfigurationRequest,
    SetConfigurationEmptyRead,
    SetConfigurationComplete,
}

/// One decoded 4-byte USB-MIDI Event Packet: Cable Number + Code Index
/// Number in the high byte, followed by up to three MIDI data bytes (unused
/// trailing bytes are zero-filled by the device, not meaningful).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub cable_number: u8,
    pub code_index_number: u8,
    pub data: [u8; 3],
}

impl MidiEvent {
    fn decode(group: [u8; 4]) -> Self {
        MidiEvent {
            cable_number: group[0] >> 4,
            code_index_number: group[0] & 0x0f,
            data: [group[1], group[2], group[3]],
        }
    }
}

#[derive(Default)]
pub struct MidiConfig {
    pub event: Option<fn(device_id: u8, event: MidiEvent)>,
}

struct MidiInstance {
    in_use: bool,
    state: State,
    own_slot: usize,
    buffer: [u8; MIDI_REPORT_BUFFER],
    endpoint_in_address: u8,
    endpoint_in_maxpacketsize: u16,
    endpoint_in_toggle: bool,
    endpoint_in_type: EndpointType,
    configuration_value: u8,
    device_id: u8,
}

impl MidiInstance {
    const fn new() -> Self {
        MidiInstance {
            in_use: false,
            state: State::Inactive,
            own_slot: 0,
            buffer: [0; MIDI_REPORT_BUFFER],
            endpoint_in_address: 0,
            endpoint_in_maxpacketsize: 0,
            endpoint_in_toggle: false,
            endpoint_in_type: EndpointType::Bulk,
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
            endpoint_type: self.endpoint_in_type,
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

    fn advance(&mut self, services: &mut Services<'_>, completion: Completion, data: &[u8], config: &MidiConfig) {
        match self.state {
            State::SetConfigurationEmptyRead => match completion.status {
                PacketStatus::Ok => {
                    self.state = State::SetConfigurationComplete;
                    let ep = self.ep0(services);
                    services.submit_read(self.own_slot, ep, 0);
                }
                _ => {
                    log::error!("midi: fatal error during SET_CONFIGURATION");
                    self.state = State::Inactive;
                }
            },
            State::SetConfigurationComplete => match completion.status {
                PacketStatus::Ok => {
                    self.state = State::ReadingRequest;
                    self.endpoint_in_toggle = false;
                    log::info!("midi: device {} configured", self.device_id);
                }
                _ => {
                    log::error!("midi: fatal error completing SET_CONFIGURATION");
                    self.state = State::Inactive;
                }
            },
            State::ReadingComplete => {
                match completion.status {
                    PacketStatus::Ok => self.dispatch_events(data, config),
                    PacketStatus::ErrSiz if completion.transferred_length as usize == data.len() => {
                        self.dispatch_events(data, config);
                    }
                    PacketStatus::ErrSiz => {}
                    PacketStatus::Efatal | PacketStatus::Eagain => {
                        log::error!("midi: fatal error reading event packets");
                        self.state = State::Inactive;
                        return;
                    }
                }
                self.state = State::ReadingRequest;
            }
            State::Inactive | State::ReadingRequest | State::SetConfigurationRequest => {
                log::warn!("midi: unexpected completion in state {:?}", self.state);
            }
        }
    }

    /// Decodes every complete 4-byte group in `data` independently and
    /// delivers each through the user callback, rather than treating the
    /// whole buffer as one fixed-layout report.
    fn dispatch_events(&mut self, data: &[u8], config: &MidiConfig) {
        let len = data.len().min(self.buffer.len());
        self.buffer[..len].copy_from_slice(&data[..len]);
        for group in self.buffer[..len].chunks_exact(4) {
            let event = MidiEvent::decode([group[0], group[1], group[2], group[3]]);
            if let Some(handler) = config.event {
                handler(self.device_id, event);
            }
        }
    }
}

/// Instance pool for the USB-MIDI class driver, up to `MAX_MIDI_DEVICES`
/// attached devices.
pub struct MidiDriver {
    instances: [MidiInstance; MAX_MIDI_DEVICES],
    config: MidiConfig,
}

impl MidiDriver {
    pub const fn new(config: MidiConfig) -> Self {
        MidiDriver { instances: [const { MidiInstance::new() }; MAX_MIDI_DEVICES], config }
    }
}

impl ClassDriver for MidiDriver {
    fn info(&self) -> DriverInfo {
        DriverInfo {
            device_class: -1,
            device_sub_class: -1,
            device_protocol: -1,
            id_vendor: -1,
            id_product: -1,
            iface_class: 0x01,
            iface_sub_class: 0x03,
            iface_protocol: -1,
        }
    }

    fn init(&mut self, slot: SlotHandle) -> Option<DriverHandle> {
        let (idx, inst) = self.instances.iter_mut().enumerate().find(|(_, i)| !i.in_use)?;
        *inst = MidiInstance::new();
        inst.in_use = true;
        inst.device_id = idx as u8;
        inst.own_slot = slot.slot_index;
        Some(idx)
    }

    fn analyze_descriptor(&mut self, handle: DriverHandle, record: &DescriptorRecord<'_>) -> bool {
        let midi = &mut self.instances[handle];
        match record.descriptor_type {
            t if t == desc_type::CONFIGURATION => {
                if let Ok((cfg, _)) = crate::descriptor::ConfigurationDescriptorRaw::ref_from_prefix(record.bytes) {
                    midi.configuration_value = cfg.b_configuration_value;
                }
            }
            t if t == desc_type::ENDPOINT => {
                if let Ok((ep, _)) = EndpointDescriptorRaw::ref_from_prefix(record.bytes) {
                    let kind = ep.bm_attributes & 0x03;
                    let is_bulk_or_interrupt = kind == ENDPOINT_ATTR_BULK || kind == ENDPOINT_ATTR_INTERRUPT;
                    if is_bulk_or_interrupt && ep.b_endpoint_address & 0x80 != 0 {
                        midi.endpoint_in_address = ep.b_endpoint_address & 0x7f;
                        midi.endpoint_in_maxpacketsize = ep.w_max_packet_size.min(MIDI_REPORT_BUFFER as u16);
                        midi.endpoint_in_type =
                            if kind == ENDPOINT_ATTR_BULK { EndpointType::Bulk } else { EndpointType::Interrupt };
                        if midi.endpoint_in_address != 0 {
                            midi.state = State::SetConfigurationRequest;
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
        let midi = &mut self.instances[handle];
        log::info!("midi: device {} removed", midi.device_id);
        *midi = MidiInstance::new();
    }
}
