//! Packet and transport types exchanged between the core and an [`crate::lld::Lld`].

use bitflags::bitflags;

/// USB link speed of a device or root port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Low,
    Full,
    High,
}

/// Direction of a data stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// Endpoint transfer type. Isochronous is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointType {
    Control,
    Interrupt,
    Bulk,
}

/// Which stage of a control transfer a [`Packet`] represents. Irrelevant for
/// non-control endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStage {
    Setup,
    Data,
}

/// Outcome of a completed packet, delivered to the issuing driver's callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketStatus {
    /// Transfer completed with the requested length.
    Ok,
    /// Transient failure; retry the transfer from its SETUP stage.
    Eagain,
    /// The peer returned fewer bytes than requested. `transferred_length` in
    /// the completion may still be usable.
    ErrSiz,
    /// Unrecoverable failure for this transfer.
    Efatal,
}

/// Result delivered to a packet's completion callback.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub status: PacketStatus,
    pub transferred_length: u16,
}

/// A single USB transaction. Built on the caller's stack and handed to
/// [`crate::lld::Lld::read`]/[`crate::lld::Lld::write`]; the LLD borrows it only
/// for the duration of the call and invokes the stored callback later from its
/// own `poll`.
pub struct Packet<'a> {
    pub address: i8,
    pub endpoint_address: u8,
    pub endpoint_type: EndpointType,
    pub endpoint_size_max: u16,
    pub speed: Speed,
    pub direction: Direction,
    pub control_stage: Option<ControlStage>,
    pub data: &'a mut [u8],
    /// DATA0/DATA1 toggle for this endpoint. The LLD updates it in place.
    pub toggle: &'a mut bool,
}

/// The 8-byte USB SETUP packet, little-endian on the wire.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct SetupData {
    pub bm_request_type: u8,
    pub b_request: u8,
    pub w_value: u16,
    pub w_index: u16,
    pub w_length: u16,
}

impl SetupData {
    pub fn to_bytes(self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0] = self.bm_request_type;
        buf[1] = self.b_request;
        buf[2..4].copy_from_slice(&self.w_value.to_le_bytes());
        buf[4..6].copy_from_slice(&self.w_index.to_le_bytes());
        buf[6..8].copy_from_slice(&self.w_length.to_le_bytes());
        buf
    }
}

bitflags! {
    /// `bmRequestType` bit groups (USB 2.0 Table 9-2).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RequestType: u8 {
        const DIR_IN = 1 << 7;
        const TYPE_CLASS = 1 << 5;
        const RECIPIENT_INTERFACE = 0x01;
        const RECIPIENT_ENDPOINT = 0x02;
    }
}

/// Standard request codes used during enumeration and hub management.
pub mod request {
    pub const GET_STATUS: u8 = 0;
    pub const CLEAR_FEATURE: u8 = 1;
    pub const SET_FEATURE: u8 = 3;
    pub const SET_ADDRESS: u8 = 5;
    pub const GET_DESCRIPTOR: u8 = 6;
    pub const SET_CONFIGURATION: u8 = 9;
}

/// Standard descriptor type codes.
pub mod desc_type {
    pub const DEVICE: u8 = 1;
    pub const CONFIGURATION: u8 = 2;
    pub const INTERFACE: u8 = 4;
    pub const ENDPOINT: u8 = 5;
    pub const HUB: u8 = 0x29;
}

/// Hub class feature selectors (USB 2.0 Table 11-17).
pub mod hub_feature {
    pub const PORT_CONNECTION: u16 = 0;
    pub const PORT_RESET: u16 = 4;
    pub const PORT_POWER: u16 = 8;
    pub const PORT_LOWSPEED: u16 = 9;
    pub const PORT_HIGHSPEED: u16 = 10;
    pub const PORT_ENABLE: u16 = 1;
    pub const C_PORT_CONNECTION: u16 = 16;
    pub const C_PORT_RESET: u16 = 20;
}

pub const DEVICE_DESCRIPTOR_SIZE: usize = 18;
pub const CONFIGURATION_DESCRIPTOR_SIZE: usize = 9;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_data_encodes_little_endian() {
        let setup = SetupData {
            bm_request_type: RequestType::DIR_IN.bits(),
            b_request: request::GET_DESCRIPTOR,
            w_value: (desc_type::DEVICE as u16) << 8,
            w_index: 0x0102,
            w_length: 18,
        };
        let bytes = setup.to_bytes();
        assert_eq!(bytes[0], RequestType::DIR_IN.bits());
        assert_eq!(bytes[1], request::GET_DESCRIPTOR);
        assert_eq!(bytes[2..4], [0x00, 0x01]);
        assert_eq!(bytes[4..6], [0x02, 0x01]);
        assert_eq!(bytes[6..8], [18, 0]);
    }

    #[test]
    fn get_descriptor_w_value_packs_type_and_index() {
        let w_value = (desc_type::HUB as u16) << 8;
        assert_eq!(w_value, 0x2900);
    }
}
