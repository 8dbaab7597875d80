//! Byte-layout builders for the descriptor types the core and class drivers
//! parse, used by the integration tests to script a device's responses
//! without depending on `usbh_core`'s private `#[repr(C, packed)]` structs.

/// `DEVICE_DESCRIPTOR_SIZE` (18) bytes, little-endian, matching
/// `usbh_core::descriptor::DeviceDescriptorRaw`'s field layout.
#[allow(clippy::too_many_arguments)]
pub fn device_descriptor(
    device_class: u8,
    device_sub_class: u8,
    device_protocol: u8,
    max_packet_size0: u8,
    id_vendor: u16,
    id_product: u16,
) -> [u8; 18] {
    let mut buf = [0u8; 18];
    buf[0] = 18;
    buf[1] = 1; // DEVICE
    buf[2..4].copy_from_slice(&0x0200u16.to_le_bytes()); // bcdUSB 2.00
    buf[4] = device_class;
    buf[5] = device_sub_class;
    buf[6] = device_protocol;
    buf[7] = max_packet_size0;
    buf[8..10].copy_from_slice(&id_vendor.to_le_bytes());
    buf[10..12].copy_from_slice(&id_product.to_le_bytes());
    buf[12..14].copy_from_slice(&0x0100u16.to_le_bytes()); // bcdDevice
    buf[14] = 0; // iManufacturer
    buf[15] = 0; // iProduct
    buf[16] = 0; // iSerialNumber
    buf[17] = 1; // bNumConfigurations
    buf
}

/// 9-byte CONFIGURATION descriptor header.
pub fn configuration_header(w_total_length: u16, num_interfaces: u8, configuration_value: u8) -> [u8; 9] {
    let mut buf = [0u8; 9];
    buf[0] = 9;
    buf[1] = 2; // CONFIGURATION
    buf[2..4].copy_from_slice(&w_total_length.to_le_bytes());
    buf[4] = num_interfaces;
    buf[5] = configuration_value;
    buf[6] = 0; // iConfiguration
    buf[7] = 0x80; // bmAttributes: bus powered
    buf[8] = 50; // bMaxPower
    buf
}

/// 9-byte INTERFACE descriptor.
pub fn interface_descriptor(iface_class: u8, iface_sub_class: u8, iface_protocol: u8, num_endpoints: u8) -> [u8; 9] {
    let mut buf = [0u8; 9];
    buf[0] = 9;
    buf[1] = 4; // INTERFACE
    buf[2] = 0; // bInterfaceNumber
    buf[3] = 0; // bAlternateSetting
    buf[4] = num_endpoints;
    buf[5] = iface_class;
    buf[6] = iface_sub_class;
    buf[7] = iface_protocol;
    buf[8] = 0; // iInterface
    buf
}

/// 7-byte ENDPOINT descriptor. `address` already carries the direction bit
/// (e.g. `0x81` for IN endpoint 1).
pub fn endpoint_descriptor(address: u8, attributes: u8, max_packet_size: u16, interval: u8) -> [u8; 7] {
    let mut buf = [0u8; 7];
    buf[0] = 7;
    buf[1] = 5; // ENDPOINT
    buf[2] = address;
    buf[3] = attributes;
    buf[4..6].copy_from_slice(&max_packet_size.to_le_bytes());
    buf[6] = interval;
    buf
}

/// 7-byte HUB class descriptor head (the fixed portion this stack parses;
/// the real descriptor also carries a variable-length port power/removable
/// bitmap tail that this driver never reads).
pub fn hub_descriptor(num_ports: u8) -> [u8; 7] {
    let mut buf = [0u8; 7];
    buf[0] = 7;
    buf[1] = 0x29; // HUB
    buf[2] = num_ports;
    buf[3..5].copy_from_slice(&0u16.to_le_bytes()); // wHubCharacteristics
    buf[5] = 50; // bPwrOn2PwrGood
    buf[6] = 0; // bHubContrCurrent
    buf
}

/// Concatenates a CONFIGURATION header, one INTERFACE, and one INTERRUPT IN
/// ENDPOINT into a single buffer with `wTotalLength` filled in automatically
/// — the common shape for a single-interface HID/gamepad device.
pub fn simple_configuration(
    configuration_value: u8,
    iface_class: u8,
    iface_sub_class: u8,
    iface_protocol: u8,
    ep_address: u8,
    ep_max_packet_size: u16,
) -> Vec<u8> {
    let total = 9 + 9 + 7;
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&configuration_header(total as u16, 1, configuration_value));
    buf.extend_from_slice(&interface_descriptor(iface_class, iface_sub_class, iface_protocol, 1));
    buf.extend_from_slice(&endpoint_descriptor(ep_address, 0x03, ep_max_packet_size, 10));
    buf
}

/// A hub's CONFIGURATION descriptor: header + one INTERFACE (class 0x09) +
/// one INTERRUPT IN endpoint + the class-specific HUB descriptor.
pub fn hub_configuration(configuration_value: u8, ep_address: u8, ep_max_packet_size: u16, num_ports: u8) -> Vec<u8> {
    let total = 9 + 9 + 7 + 7;
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&configuration_header(total as u16, 1, configuration_value));
    buf.extend_from_slice(&interface_descriptor(0x09, 0, 0, 1));
    buf.extend_from_slice(&endpoint_descriptor(ep_address, 0x03, ep_max_packet_size, 12));
    buf.extend_from_slice(&hub_descriptor(num_ports));
    buf
}

/// A 4-byte GET_STATUS response: status bits then change bits, both
/// little-endian, as read by `hub::PortStatus::from_bytes`.
pub fn port_status_bytes(status_bits: u16, change_bits: u16) -> [u8; 4] {
    let mut buf = [0u8; 4];
    buf[0..2].copy_from_slice(&status_bits.to_le_bytes());
    buf[2..4].copy_from_slice(&change_bits.to_le_bytes());
    buf
}
