//! The hub class driver (§4.6): manages port power, status-change polling,
//! debounce, reset, and recursive handoff of newly reset downstream devices
//! to the enumeration core.
//!
//! State numbers in the original (`hub->state == 3`, `== 26`, ...) are given
//! names here; the comments carry the original numbers for cross-reference
//! since nothing else in the crate depends on the ordinals.

use crate::config::{HUB_DEBOUNCE_US, HUB_MAX_PORTS, MAX_HUBS};
use crate::descriptor::{DescriptorRecord, EndpointDescriptorRaw, HubDescriptorHeadRaw, ENDPOINT_ATTR_INTERRUPT};
use crate::device::SlotHandle;
use crate::packet::{
    desc_type, hub_feature, request, Completion, EndpointType, PacketStatus, RequestType, SetupData, Speed,
};
use crate::registry::{ClassDriver, DriverHandle, DriverInfo};
use crate::services::Services;
use zerocopy::FromBytes;

const CURRENT_PORT_NONE: i8 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HubState {
    Inactive,
    AwaitingSetConfiguration, // 1
    EmptyPacketRead,          // EMPTY_PACKET_READ_STATE
    GetHubDescriptorWrite,    // 3
    GetHubDescriptorRead,     // 4
    HubDescriptorFound,       // 5
    EnablePorts,              // 6
    HubStatusWrite,           // 7
    HubStatusRead,            // 8
    PortStatusWrite,          // 9
    PortStatusRead,           // 10
    PortStatusLoop,           // 11
    Idle,                     // 25
    ReadStatusChangeComplete, // 26
    PortStatusReadIssued,     // 31
    PortStatusComplete,       // 32
    ConnectionChange,         // 33
    ResetComplete,            // 35
    Debounce,                 // 100
    /// Entered on a malformed/fatal status-change read; the source leaves
    /// the hub in a state no case handles, so it never recovers. Preserved
    /// rather than smoothed into an automatic restart.
    Halted,
}

#[derive(Debug, Clone, Copy, Default)]
struct PortStatus {
    sts: u16,
    stc: u16,
}

impl PortStatus {
    fn from_bytes(buf: &[u8]) -> Self {
        let mut sts = 0u16;
        let mut stc = 0u16;
        if buf.len() >= 2 {
            sts = u16::from_le_bytes([buf[0], buf[1]]);
        }
        if buf.len() >= 4 {
            stc = u16::from_le_bytes([buf[2], buf[3]]);
        }
        PortStatus { sts, stc }
    }
}

struct HubInstance {
    in_use: bool,
    state: HubState,
    state_after_empty_read: HubState,
    own_slot: usize,
    ports_num: u8,
    index: u8,
    current_port: i8,
    busy: bool,
    endpoint_in_address: u8,
    endpoint_in_maxpacketsize: u16,
    endpoint_in_toggle: bool,
    configuration_value: u8,
    desc_len: u16,
    buffer: [u8; 8],
    hub_and_port_status: [PortStatus; HUB_MAX_PORTS + 1],
    children: [Option<usize>; HUB_MAX_PORTS + 1],
    timestamp_us: u32,
    /// Snapshot of the `time_us` argument from the most recent `poll` tick,
    /// since `advance` (driven from completion callbacks) has no tick
    /// argument of its own but still needs "now" to arm the debounce timer.
    time_curr_us: u32,
}

impl HubInstance {
    const fn new() -> Self {
        HubInstance {
            in_use: false,
            state: HubState::Inactive,
            state_after_empty_read: HubState::Inactive,
            own_slot: 0,
            ports_num: 0,
            index: 0,
            current_port: CURRENT_PORT_NONE,
            busy: false,
            endpoint_in_address: 0,
            endpoint_in_maxpacketsize: 0,
            endpoint_in_toggle: false,
            configuration_value: 0,
            desc_len: 0,
            buffer: [0; 8],
            hub_and_port_status: [PortStatus { sts: 0, stc: 0 }; HUB_MAX_PORTS + 1],
            children: [None; HUB_MAX_PORTS + 1],
            timestamp_us: 0,
            time_curr_us: 0,
        }
    }

    fn ep0(&self, services: &Services<'_>) -> crate::lld::EndpointMeta {
        let slot = services.slot(self.own_slot);
        crate::lld::EndpointMeta {
            address: slot.address as i8,
            endpoint_address: 0,
            endpoint_type: EndpointType::Control,
            endpoint_size_max: slot.max_packet_size_ep0,
            speed: slot.speed,
            toggle: slot.toggle0,
        }
    }

    fn write_setup(&self, services: &mut Services<'_>, setup: SetupData) {
        services.submit_write(self.own_slot, self.ep0(services), &setup.to_bytes());
    }

    fn read_control(&self, services: &mut Services<'_>, len: u16) {
        services.submit_read(self.own_slot, self.ep0(services), len);
    }

    fn read_ep1(&mut self, services: &mut Services<'_>) {
        let slot = services.slot(self.own_slot);
        let ep = crate::lld::EndpointMeta {
            address: slot.address as i8,
            endpoint_address: self.endpoint_in_address,
            endpoint_type: EndpointType::Interrupt,
            endpoint_size_max: self.endpoint_in_maxpacketsize,
            speed: slot.speed,
            toggle: self.endpoint_in_toggle,
        };
        services.submit_read(self.own_slot, ep, self.endpoint_in_maxpacketsize);
    }

    fn class_setup(recipient_port: bool, request_code: u8, value: u16, index: u16, length: u16) -> SetupData {
        let mut bm = RequestType::TYPE_CLASS.bits();
        if recipient_port {
            bm |= RequestType::RECIPIENT_INTERFACE.bits() | RequestType::RECIPIENT_ENDPOINT.bits();
        }
        SetupData { bm_request_type: bm, b_request: request_code, w_value: value, w_index: index, w_length: length }
    }

    fn advance(&mut self, services: &mut Services<'_>, completion: Completion, data: &[u8]) {
        match self.state {
            HubState::EmptyPacketRead => match completion.status {
                PacketStatus::Ok => {
                    self.read_control(services, 0);
                    self.state = self.state_after_empty_read;
                    self.state_after_empty_read = HubState::Inactive;
                }
                PacketStatus::Efatal | PacketStatus::Eagain | PacketStatus::ErrSiz => {
                    self.state = self.state_after_empty_read;
                    self.advance(services, completion, data);
                }
            },

            HubState::GetHubDescriptorWrite => match completion.status {
                PacketStatus::Ok => {
                    if self.ports_num != 0 {
                        self.index = 0;
                        self.state = HubState::EnablePorts;
                        self.advance(services, completion, data);
                    } else {
                        self.endpoint_in_toggle = false;
                        self.desc_len = services.slot(self.own_slot).max_packet_size_ep0;
                        self.state = HubState::GetHubDescriptorRead;
                        self.write_setup(
                            services,
                            SetupData {
                                bm_request_type: RequestType::DIR_IN.bits(),
                                b_request: request::GET_DESCRIPTOR,
                                w_value: (desc_type::HUB as u16) << 8,
                                w_index: 0,
                                w_length: self.desc_len,
                            },
                        );
                    }
                }
                _ => log::error!("hub: fatal error requesting hub descriptor"),
            },

            HubState::GetHubDescriptorRead => match completion.status {
                PacketStatus::Ok => {
                    self.state = HubState::HubDescriptorFound;
                    self.read_control(services, self.desc_len);
                }
                _ => log::error!("hub: fatal error reading hub descriptor"),
            },

            HubState::HubDescriptorFound => match completion.status {
                PacketStatus::Ok => {
                    if let Ok((head, _)) = HubDescriptorHeadRaw::ref_from_prefix(data) {
                        if head.b_desc_length as u16 > self.desc_len {
                            self.desc_len = head.b_desc_length as u16;
                            self.state = HubState::GetHubDescriptorRead;
                            self.write_setup(
                                services,
                                SetupData {
                                    bm_request_type: RequestType::DIR_IN.bits(),
                                    b_request: request::GET_DESCRIPTOR,
                                    w_value: (desc_type::HUB as u16) << 8,
                                    w_index: 0,
                                    w_length: self.desc_len,
                                },
                            );
                        } else if (head.b_desc_length as u16) == self.desc_len {
                            self.ports_num = (head.b_nbr_ports as usize).min(HUB_MAX_PORTS) as u8;
                            self.index = 0;
                            self.state = HubState::EnablePorts;
                            self.advance(services, Completion { status: PacketStatus::Ok, transferred_length: completion.transferred_length }, data);
                        }
                        // else: shorter than expected — source leaves this unresolved.
                    }
                }
                PacketStatus::ErrSiz => {
                    if data.len() as u16 >= 7 {
                        if let Ok((head, _)) = HubDescriptorHeadRaw::ref_from_prefix(data) {
                            if completion.transferred_length == head.b_desc_length as u16 {
                                self.ports_num = (head.b_nbr_ports as usize).min(HUB_MAX_PORTS) as u8;
                                self.index = 0;
                                self.state = HubState::EnablePorts;
                                self.advance(services, Completion { status: PacketStatus::Ok, transferred_length: completion.transferred_length }, data);
                            }
                        }
                    }
                }
                _ => log::error!("hub: fatal error parsing hub descriptor"),
            },

            HubState::EnablePorts => match completion.status {
                PacketStatus::Ok => {
                    if self.index < self.ports_num {
                        self.index += 1;
                        self.state_after_empty_read = HubState::EnablePorts;
                        self.state = HubState::EmptyPacketRead;
                        self.write_setup(
                            services,
                            Self::class_setup(true, request::SET_FEATURE, hub_feature::PORT_POWER, self.index as u16, 0),
                        );
                    } else {
                        self.state = HubState::HubStatusWrite;
                        self.advance(services, completion, data);
                    }
                }
                _ => log::error!("hub: fatal error powering ports"),
            },

            HubState::HubStatusWrite => match completion.status {
                PacketStatus::Ok => {
                    self.state = HubState::HubStatusRead;
                    self.write_setup(services, Self::class_setup(false, request::GET_STATUS, 0, 0, 4));
                }
                _ => log::error!("hub: fatal error reading hub status"),
            },

            HubState::HubStatusRead => match completion.status {
                PacketStatus::Ok => {
                    self.index = 0;
                    self.state = HubState::PortStatusWrite;
                    self.read_control(services, 4);
                }
                _ => log::error!("hub: fatal error reading hub status"),
            },

            HubState::PortStatusWrite => match completion.status {
                PacketStatus::Ok => {
                    self.index += 1;
                    self.state = HubState::PortStatusRead;
                    self.write_setup(services, Self::class_setup(true, request::GET_STATUS, 0, self.index as u16, 4));
                }
                _ => log::error!("hub: fatal error reading port status"),
            },

            HubState::PortStatusRead => match completion.status {
                PacketStatus::Ok => {
                    self.state = HubState::PortStatusLoop;
                    self.read_control(services, 4);
                }
                _ => log::error!("hub: fatal error reading port status"),
            },

            HubState::PortStatusLoop => match completion.status {
                PacketStatus::Ok => {
                    if self.index < self.ports_num {
                        self.state = HubState::PortStatusWrite;
                        self.advance(services, completion, data);
                    } else {
                        self.busy = false;
                        self.state = HubState::Idle;
                    }
                }
                _ => log::error!("hub: fatal error reading port status"),
            },

            HubState::ReadStatusChangeComplete => match completion.status {
                PacketStatus::Ok => {
                    let mut psc: u32 = 0;
                    for (i, byte) in data.iter().enumerate().take(4) {
                        psc |= (*byte as u32) << (i * 8);
                    }
                    if psc == 0 {
                        self.state = HubState::Idle;
                        return;
                    }
                    let mut port = 0i8;
                    for i in 0..=self.ports_num {
                        if psc & (1 << i) != 0 {
                            port = i as i8;
                            break;
                        }
                    }
                    if self.current_port >= 1 && self.current_port != port {
                        self.state = HubState::Idle;
                        return;
                    }
                    self.current_port = port;
                    self.state = HubState::PortStatusReadIssued;
                    self.write_setup(services, Self::class_setup(port != 0, request::GET_STATUS, 0, port as u16, 4));
                }
                PacketStatus::Eagain => self.state = HubState::Idle,
                PacketStatus::Efatal | PacketStatus::ErrSiz => {
                    log::error!("hub: status-change read failed, hub halted");
                    self.state = HubState::Halted;
                }
            },

            HubState::PortStatusReadIssued => match completion.status {
                PacketStatus::Ok => {
                    self.state = HubState::PortStatusComplete;
                    services.submit_read(self.own_slot, self.ep0(services), 4);
                }
                _ => {
                    log::error!("hub: port status read failed");
                    self.state = HubState::Idle;
                }
            },

            HubState::PortStatusComplete => match completion.status {
                PacketStatus::Ok => {
                    let port = self.current_port as usize;
                    self.hub_and_port_status[port] = PortStatus::from_bytes(data);
                    let stc = self.hub_and_port_status[port].stc;
                    if port != 0 {
                        if stc & (1 << hub_feature::PORT_CONNECTION) != 0 {
                            if self.children[port].is_none() && (!services.enum_available() || self.busy) {
                                log::debug!("hub: cannot enumerate now, enum busy or hub busy");
                                self.state = HubState::Idle;
                                return;
                            }
                            self.state_after_empty_read = HubState::ConnectionChange;
                            self.state = HubState::EmptyPacketRead;
                            self.write_setup(
                                services,
                                Self::class_setup(true, request::CLEAR_FEATURE, hub_feature::C_PORT_CONNECTION, port as u16, 0),
                            );
                        } else if stc & (1 << (hub_feature::C_PORT_RESET - 16)) != 0 {
                            self.state_after_empty_read = HubState::ResetComplete;
                            self.state = HubState::EmptyPacketRead;
                            self.write_setup(
                                services,
                                Self::class_setup(true, request::CLEAR_FEATURE, hub_feature::C_PORT_RESET, port as u16, 0),
                            );
                        } else {
                            log::trace!("hub: unhandled status-change bits {stc:#x}");
                        }
                    } else {
                        self.state = HubState::Idle;
                    }
                }
                _ => {
                    log::error!("hub: port status read failed");
                    self.state = HubState::Idle;
                }
            },

            HubState::ConnectionChange => match completion.status {
                PacketStatus::Ok => {
                    let port = self.current_port as usize;
                    let stc = self.hub_and_port_status[port].stc;
                    if self.children[port].is_none() {
                        if stc & (1 << hub_feature::PORT_CONNECTION) != 0 {
                            self.state_after_empty_read = HubState::PortStatusLoop;
                            self.state = HubState::EmptyPacketRead;
                            self.busy = true;
                            self.write_setup(
                                services,
                                Self::class_setup(true, request::SET_FEATURE, hub_feature::PORT_RESET, port as u16, 0),
                            );
                        }
                    } else if let Some(child) = self.children[port] {
                        services.request_removal(child);
                        self.children[port] = None;
                        self.current_port = CURRENT_PORT_NONE;
                        self.state = HubState::Idle;
                        self.busy = false;
                    }
                }
                _ => {
                    log::error!("hub: clear C_PORT_CONNECTION failed");
                    self.state = HubState::Idle;
                }
            },

            HubState::ResetComplete => match completion.status {
                PacketStatus::Ok => {
                    let port = self.current_port as usize;
                    let sts = self.hub_and_port_status[port].sts;
                    if sts & (1 << hub_feature::PORT_ENABLE) == 0 {
                        log::warn!("hub: device disabled after reset, giving up on port {port}");
                        self.state = HubState::Idle;
                        return;
                    }
                    let lowspeed = sts & (1 << hub_feature::PORT_LOWSPEED) != 0;
                    let highspeed = sts & (1 << hub_feature::PORT_HIGHSPEED) != 0;
                    if lowspeed && !highspeed {
                        log::info!("hub: rejecting low-speed device on port {port}");
                        self.current_port = CURRENT_PORT_NONE;
                        self.state_after_empty_read = HubState::PortStatusLoop;
                        self.state = HubState::EmptyPacketRead;
                        self.write_setup(
                            services,
                            Self::class_setup(true, request::CLEAR_FEATURE, hub_feature::PORT_ENABLE, port as u16, 0),
                        );
                    } else if !lowspeed && !highspeed {
                        match services.allocate_child_slot() {
                            None => {
                                log::error!("hub: device table full, cannot enumerate port {port}");
                            }
                            Some(child_slot) => {
                                self.children[port] = Some(child_slot);
                                self.timestamp_us = self.time_curr_us;
                                self.state = HubState::Debounce;
                            }
                        }
                    } else {
                        log::trace!("hub: unhandled port speed combination on port {port}");
                    }
                }
                _ => {
                    log::error!("hub: fatal error reading port status after reset");
                    self.state = HubState::Idle;
                }
            },

            HubState::Idle
            | HubState::Inactive
            | HubState::AwaitingSetConfiguration
            | HubState::Debounce
            | HubState::Halted => {
                log::warn!("hub: unexpected completion in state {:?}", self.state);
            }
        }
    }

    fn poll(&mut self, services: &mut Services<'_>, time_us: u32) {
        self.time_curr_us = time_us;
        match self.state {
            HubState::Idle => {
                if services.enum_available() {
                    self.state = HubState::ReadStatusChangeComplete;
                    self.read_ep1(services);
                } else {
                    log::trace!("hub: enumeration busy elsewhere, deferring status poll");
                }
            }
            HubState::AwaitingSetConfiguration => {
                self.state_after_empty_read = HubState::GetHubDescriptorWrite;
                self.state = HubState::EmptyPacketRead;
                self.write_setup(
                    services,
                    SetupData {
                        bm_request_type: 0,
                        b_request: request::SET_CONFIGURATION,
                        w_value: self.configuration_value as u16,
                        w_index: 0,
                        w_length: 0,
                    },
                );
            }
            HubState::Debounce => {
                if time_us.wrapping_sub(self.timestamp_us) > HUB_DEBOUNCE_US {
                    let port = self.current_port as usize;
                    if let Some(child_slot) = self.children[port] {
                        services.start_enumeration(child_slot, Speed::Full);
                    }
                    self.current_port = CURRENT_PORT_NONE;
                    self.busy = false;
                    self.state = HubState::Idle;
                }
            }
            _ => {}
        }
    }
}

/// The hub class driver: owns a fixed pool of [`HubInstance`]s, one per
/// attached hub, up to `MAX_HUBS`.
pub struct HubDriver {
    instances: [HubInstance; MAX_HUBS],
}

impl HubDriver {
    pub const fn new() -> Self {
        HubDriver { instances: [const { HubInstance::new() }; MAX_HUBS] }
    }
}

impl Default for HubDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassDriver for HubDriver {
    fn info(&self) -> DriverInfo {
        DriverInfo {
            device_class: 0x09,
            device_sub_class: -1,
            device_protocol: -1,
            id_vendor: -1,
            id_product: -1,
            iface_class: 0x09,
            iface_sub_class: -1,
            iface_protocol: -1,
        }
    }

    fn init(&mut self, slot: SlotHandle) -> Option<DriverHandle> {
        let (idx, inst) = self.instances.iter_mut().enumerate().find(|(_, i)| !i.in_use)?;
        *inst = HubInstance::new();
        inst.in_use = true;
        inst.own_slot = slot.slot_index;
        Some(idx)
    }

    fn analyze_descriptor(&mut self, handle: DriverHandle, record: &DescriptorRecord<'_>) -> bool {
        let hub = &mut self.instances[handle];
        match record.descriptor_type {
            t if t == desc_type::CONFIGURATION => {
                if let Ok((cfg, _)) =
                    crate::descriptor::ConfigurationDescriptorRaw::ref_from_prefix(record.bytes)
                {
                    hub.configuration_value = cfg.b_configuration_value;
                }
            }
            t if t == desc_type::ENDPOINT => {
                if let Ok((ep, _)) = EndpointDescriptorRaw::ref_from_prefix(record.bytes) {
                    if ep.bm_attributes & 0x03 == ENDPOINT_ATTR_INTERRUPT && ep.b_endpoint_address & 0x80 != 0 {
                        hub.endpoint_in_address = ep.b_endpoint_address & 0x7f;
                        hub.endpoint_in_maxpacketsize = ep.w_max_packet_size;
                    }
                }
            }
            t if t == desc_type::HUB => {
                if let Ok((head, _)) = HubDescriptorHeadRaw::ref_from_prefix(record.bytes) {
                    hub.ports_num = (head.b_nbr_ports as usize).min(HUB_MAX_PORTS) as u8;
                }
            }
            _ => {}
        }
        if hub.endpoint_in_address != 0 {
            hub.state = HubState::AwaitingSetConfiguration;
            return true;
        }
        false
    }

    fn poll(&mut self, handle: DriverHandle, services: &mut Services<'_>, time_us: u32) {
        self.instances[handle].poll(services, time_us);
    }

    fn on_completion(&mut self, handle: DriverHandle, services: &mut Services<'_>, completion: Completion, data: &[u8]) {
        self.instances[handle].advance(services, completion, data);
    }

    fn remove(&mut self, handle: DriverHandle, services: &mut Services<'_>) {
        let hub = &mut self.instances[handle];
        for port in 1..=HUB_MAX_PORTS {
            if let Some(child) = hub.children[port] {
                services.request_removal(child);
            }
        }
        *hub = HubInstance::new();
    }
}
