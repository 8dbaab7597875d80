//! XBOX 360-style gamepad class driver: the §4.7 template plus a fixed-offset
//! payload decoder for the 20-byte interrupt-IN report.

use bitflags::bitflags;

use crate::config::{MAX_XBOX_DEVICES, XBOX_REPORT_BUFFER};
use crate::descriptor::{DescriptorRecord, EndpointDescriptorRaw, ENDPOINT_ATTR_INTERRUPT};
use crate::device::SlotHandle;
use crate::lld::EndpointMeta;
use crate::packet::{desc_type, request, Completion, EndpointType, PacketStatus, SetupData};
use crate::registry::{ClassDriver, DriverHandle, DriverInfo};
use crate::services::Services;
use zerocopy::FromBytes;

/// Expected byte length of a well-formed report; a short ERRSIZ read of
/// exactly this length is still decoded (mirrors the source's tolerance).
const CORRECT_TRANSFERRED_LENGTH: u16 = 20;

bitflags! {
    /// Mirrors `GP_XBOX_DPAD_*`/`GP_XBOX_BUTTON_*` bit-for-bit, including the
    /// DPAD layout documented in DESIGN.md as a known, deliberately
    /// preserved quirk (bit1=BOTTOM, bit2=LEFT rather than the more common
    /// bit1=LEFT, bit2=BOTTOM).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct XboxButtons: u32 {
        const DPAD_TOP = 1 << 0;
        const DPAD_LEFT = 1 << 1;
        const DPAD_BOTTOM = 1 << 2;
        const DPAD_RIGHT = 1 << 3;
        const BUTTON_X = 1 << 4;
        const BUTTON_Y = 1 << 5;
        const BUTTON_A = 1 << 6;
        const BUTTON_B = 1 << 7;
        const BUTTON_SELECT = 1 << 8;
        const BUTTON_START = 1 << 9;
        const BUTTON_LT = 1 << 10;
        const BUTTON_RT = 1 << 11;
        const BUTTON_XBOX = 1 << 12;
        const BUTTON_AXIS_LEFT = 1 << 13;
        const BUTTON_AXIS_RIGHT = 1 << 14;
    }
}

/// A fully decoded gamepad report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XboxPacket {
    pub buttons: XboxButtons,
    pub axis_left_x: i16,
    pub axis_left_y: i16,
    pub axis_right_x: i16,
    pub axis_right_y: i16,
    pub axis_rear_left: u8,
    pub axis_rear_right: u8,
}

/// User callback surface, mirroring `gp_xbox_config_t`'s three function
/// pointers.
#[derive(Default)]
pub struct XboxConfig {
    pub update: Option<fn(device_id: u8, packet: XboxPacket)>,
    pub notify_connected: Option<fn(device_id: u8)>,
    pub notify_disconnected: Option<fn(device_id: u8)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Inactive,
    ReadingRequest,
    ReadingComplete,
    SetConfigurationRequest,
    SetConfigurationEmptyRead,
    SetConfigurationComplete,
}

/// Decodes a 20-byte report at the documented fixed offsets. `data1` (byte 2)
/// carries DPAD + START/SELECT + the stick-click buttons; `data2` (byte 3)
/// carries A/B/X/Y and the rear shoulder/guide buttons. This bit assignment
/// (bit1=BOTTOM, bit2=LEFT) is the source's exact layout — see DESIGN.md.
fn parse_data(buf: &[u8]) -> XboxPacket {
    let data1 = buf[2];
    let data2 = buf[3];
    let mut buttons = XboxButtons::empty();

    if data1 & (1 << 0) != 0 {
        buttons |= XboxButtons::DPAD_TOP;
    }
    if data1 & (1 << 1) != 0 {
        buttons |= XboxButtons::DPAD_BOTTOM;
    }
    if data1 & (1 << 2) != 0 {
        buttons |= XboxButtons::DPAD_LEFT;
    }
    if data1 & (1 << 3) != 0 {
        buttons |= XboxButtons::DPAD_RIGHT;
    }
    if data1 & (1 << 4) != 0 {
        buttons |= XboxButtons::BUTTON_START;
    }
    if data1 & (1 << 5) != 0 {
        buttons |= XboxButtons::BUTTON_SELECT;
    }
    if data1 & (1 << 6) != 0 {
        buttons |= XboxButtons::BUTTON_AXIS_LEFT;
    }
    if data1 & (1 << 7) != 0 {
        buttons |= XboxButtons::BUTTON_AXIS_RIGHT;
    }
    if data2 & (1 << 4) != 0 {
        buttons |= XboxButtons::BUTTON_A;
    }
    if data2 & (1 << 5) != 0 {
        buttons |= XboxButtons::BUTTON_B;
    }
    if data2 & (1 << 6) != 0 {
        buttons |= XboxButtons::BUTTON_X;
    }
    if data2 & (1 << 7) != 0 {
        buttons |= XboxButtons::BUTTON_Y;
    }
    if data2 & (1 << 0) != 0 {
        buttons |= XboxButtons::BUTTON_LT;
    }
    if data2 & (1 << 1) != 0 {
        buttons |= XboxButtons::BUTTON_RT;
    }
    if data2 & (1 << 2) != 0 {
        buttons |= XboxButtons::BUTTON_XBOX;
    }

    XboxPacket {
        buttons,
        axis_rear_left: buf[4],
        axis_rear_right: buf[5],
        axis_left_x: i16::from_le_bytes([buf[6], buf[7]]),
        axis_left_y: i16::from_le_bytes([buf[8], buf[9]]),
        axis_right_x: i16::from_le_bytes([buf[10], buf[11]]),
        axis_right_y: i16::from_le_bytes([buf[12], buf[13]]),
    }
}

struct XboxInstance {
    in_use: bool,
    state: State,
    own_slot: usize,
    buffer: [u8; XBOX_REPORT_BUFFER],
    endpoint_in_address: u8,
    endpoint_in_maxpacketsize: u16,
    endpoint_in_toggle: bool,
    configuration_value: u8,
    device_id: u8,
}

impl XboxInstance {
    const fn new() -> Self {
        XboxInstance {
            in_use: false,
            state: State::Inactive,
            own_slot: 0,
            buffer: [0; XBOX_REPORT_BUFFER],
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

    fn advance(&mut self, services: &mut Services<'_>, completion: Completion, data: &[u8], config: &XboxConfig) {
        match self.state {
            State::SetConfigurationEmptyRead => match completion.status {
                PacketStatus::Ok => {
                    self.state = State::SetConfigurationComplete;
                    let ep = self.ep0(services);
                    services.submit_read(self.own_slot, ep, 0);
                }
                _ => {
                    log::error!("xbox: fatal error during SET_CONFIGURATION");
                    self.state = State::Inactive;
                }
            },
            State::SetConfigurationComplete => match completion.status {
                PacketStatus::Ok => {
                    self.state = State::ReadingRequest;
                    self.endpoint_in_toggle = false;
                    log::info!("xbox: device {} configured", self.device_id);
                    if let Some(notify) = config.notify_connected {
                        notify(self.device_id);
                    }
                }
                _ => {
                    log::error!("xbox: fatal error completing SET_CONFIGURATION");
                    self.state = State::Inactive;
                }
            },
            State::ReadingComplete => {
                match completion.status {
                    PacketStatus::Ok => {
                        let len = data.len().min(self.buffer.len());
                        self.buffer[..len].copy_from_slice(&data[..len]);
                        if len >= 14 {
                            let packet = parse_data(&self.buffer[..len]);
                            if let Some(update) = config.update {
                                update(self.device_id, packet);
                            }
                        }
                    }
                    PacketStatus::ErrSiz if completion.transferred_length == CORRECT_TRANSFERRED_LENGTH => {
                        let len = data.len().min(self.buffer.len());
                        self.buffer[..len].copy_from_slice(&data[..len]);
                        if len >= 14 {
                            let packet = parse_data(&self.buffer[..len]);
                            if let Some(update) = config.update {
                                update(self.device_id, packet);
                            }
                        }
                    }
                    PacketStatus::ErrSiz => {}
                    PacketStatus::Efatal | PacketStatus::Eagain => {
                        log::error!("xbox: fatal error reading report");
                        self.state = State::Inactive;
                        return;
                    }
                }
                self.state = State::ReadingRequest;
            }
            State::Inactive | State::ReadingRequest | State::SetConfigurationRequest => {
                log::warn!("xbox: unexpected completion in state {:?}", self.state);
            }
        }
    }
}

/// Instance pool for the XBOX gamepad class driver, up to `MAX_XBOX_DEVICES`
/// attached controllers.
pub struct XboxDriver {
    instances: [XboxInstance; MAX_XBOX_DEVICES],
    config: XboxConfig,
}

impl XboxDriver {
    pub const fn new(config: XboxConfig) -> Self {
        XboxDriver { instances: [const { XboxInstance::new() }; MAX_XBOX_DEVICES], config }
    }
}

impl ClassDriver for XboxDriver {
    fn info(&self) -> DriverInfo {
        DriverInfo {
            device_class: 0xff,
            device_sub_class: 0xff,
            device_protocol: 0xff,
            id_vendor: 0x045e,
            id_product: 0x028e,
            iface_class: 0xff,
            iface_sub_class: 93,
            iface_protocol: 1,
        }
    }

    fn init(&mut self, slot: SlotHandle) -> Option<DriverHandle> {
        let (idx, inst) = self.instances.iter_mut().enumerate().find(|(_, i)| !i.in_use)?;
        *inst = XboxInstance::new();
        inst.in_use = true;
        inst.device_id = idx as u8;
        inst.own_slot = slot.slot_index;
        Some(idx)
    }

    fn analyze_descriptor(&mut self, handle: DriverHandle, record: &DescriptorRecord<'_>) -> bool {
        let xbox = &mut self.instances[handle];
        match record.descriptor_type {
            t if t == desc_type::CONFIGURATION => {
                if let Ok((cfg, _)) = crate::descriptor::ConfigurationDescriptorRaw::ref_from_prefix(record.bytes) {
                    xbox.configuration_value = cfg.b_configuration_value;
                }
            }
            t if t == desc_type::ENDPOINT => {
                if let Ok((ep, _)) = EndpointDescriptorRaw::ref_from_prefix(record.bytes) {
                    if ep.bm_attributes & 0x03 == ENDPOINT_ATTR_INTERRUPT && ep.b_endpoint_address & 0x80 != 0 {
                        xbox.endpoint_in_address = ep.b_endpoint_address & 0x7f;
                        xbox.endpoint_in_maxpacketsize = ep.w_max_packet_size.min(XBOX_REPORT_BUFFER as u16);
                        if xbox.endpoint_in_address != 0 {
                            xbox.state = State::SetConfigurationRequest;
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
        let xbox = &mut self.instances[handle];
        log::info!("xbox: device {} removed", xbox.device_id);
        if let Some(notify) = self.config.notify_disconnected {
            notify(xbox.device_id);
        }
        *xbox = XboxInstance::new();
    }
}
