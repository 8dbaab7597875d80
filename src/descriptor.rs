//! Little-endian descriptor layouts and the linear descriptor iterator used
//! while binding a freshly enumerated device to a class driver.

use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::device::SlotHandle;
use crate::error::UsbError;
use crate::packet::desc_type;
use crate::registry::{DriverHandle, DriverInfo, DriverRegistry};
use crate::services::Services;

#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct DeviceDescriptorRaw {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub bcd_usb: u16,
    pub b_device_class: u8,
    pub b_device_sub_class: u8,
    pub b_device_protocol: u8,
    pub b_max_packet_size0: u8,
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    pub i_manufacturer: u8,
    pub i_product: u8,
    pub i_serial_number: u8,
    pub b_num_configurations: u8,
}

#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct ConfigurationDescriptorRaw {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub w_total_length: u16,
    pub b_num_interfaces: u8,
    pub b_configuration_value: u8,
    pub i_configuration: u8,
    pub bm_attributes: u8,
    pub b_max_power: u8,
}

#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct InterfaceDescriptorRaw {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_interface_number: u8,
    pub b_alternate_setting: u8,
    pub b_num_endpoints: u8,
    pub b_interface_class: u8,
    pub b_interface_sub_class: u8,
    pub b_interface_protocol: u8,
    pub i_interface: u8,
}

#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct EndpointDescriptorRaw {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_endpoint_address: u8,
    pub bm_attributes: u8,
    pub w_max_packet_size: u16,
    pub b_interval: u8,
}

#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct HubDescriptorHeadRaw {
    pub b_desc_length: u8,
    pub b_descriptor_type: u8,
    pub b_nbr_ports: u8,
    pub w_hub_characteristics: u16,
    pub b_pwr_on2_pwr_good: u8,
    pub b_hub_contr_current: u8,
}

pub const ENDPOINT_ATTR_INTERRUPT: u8 = 0x03;

/// A record visited while iterating a descriptor buffer: its type byte and
/// the raw bytes starting at that record's offset (`b_length` bytes, clamped
/// to the buffer).
pub struct DescriptorRecord<'a> {
    pub offset: usize,
    pub descriptor_type: u8,
    pub bytes: &'a [u8],
}

/// Linear scan over a concatenated descriptor buffer by `b_length`. Used both
/// for the single pass that locates `INTERFACE` records (enumeration/hub) and
/// for the replay pass that feeds every record to a newly bound driver.
pub struct DescriptorIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> DescriptorIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        DescriptorIter { buf, pos: 0 }
    }
}

impl<'a> Iterator for DescriptorIter<'a> {
    type Item = Result<DescriptorRecord<'a>, UsbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let b_length = self.buf[self.pos] as usize;
        if b_length == 0 {
            self.pos = self.buf.len();
            return Some(Err(UsbError::MalformedDescriptor));
        }
        if self.pos + 1 >= self.buf.len() {
            self.pos = self.buf.len();
            return Some(Err(UsbError::MalformedDescriptor));
        }
        let offset = self.pos;
        let end = (self.pos + b_length).min(self.buf.len());
        let record = DescriptorRecord {
            offset,
            descriptor_type: self.buf[self.pos + 1],
            bytes: &self.buf[self.pos..end],
        };
        self.pos += b_length;
        Some(Ok(record))
    }
}

/// Parses the leading `DEVICE` descriptor's match fields (class/subclass/
/// protocol/VID/PID). The buffer must start with a well-formed DEVICE record.
pub fn device_match_fields(buf: &[u8]) -> Result<(i32, i32, i32, i32, i32), UsbError> {
    if buf.len() < 2 || buf[1] != desc_type::DEVICE {
        return Err(UsbError::MalformedDescriptor);
    }
    let size = crate::packet::DEVICE_DESCRIPTOR_SIZE.min(buf.len());
    let dd = DeviceDescriptorRaw::ref_from_bytes(&buf[..size]).map_err(|_| UsbError::MalformedDescriptor)?;
    Ok((
        dd.b_device_class as i32,
        dd.b_device_sub_class as i32,
        dd.b_device_protocol as i32,
        dd.id_vendor as i32,
        dd.id_product as i32,
    ))
}

/// Parses an `INTERFACE` descriptor's match fields (class/subclass/protocol).
pub fn interface_match_fields(record: &DescriptorRecord<'_>) -> Result<(i32, i32, i32), UsbError> {
    let iface = InterfaceDescriptorRaw::ref_from_bytes(record.bytes).map_err(|_| UsbError::MalformedDescriptor)?;
    Ok((
        iface.b_interface_class as i32,
        iface.b_interface_sub_class as i32,
        iface.b_interface_protocol as i32,
    ))
}

/// The §4.4 descriptor walker: `buf` holds the DEVICE descriptor immediately
/// followed by the full CONFIGURATION descriptor (configuration + interfaces
/// + endpoints + any class-specific records). Extracts device-level match
/// fields from the leading DEVICE record, then walks records by `bLength`
/// looking for an `INTERFACE` record. On the first one, builds a probe and
/// asks `registry` to find a driver for it; if one binds, replays every
/// record from offset 0 (device, configuration, interfaces, endpoints, ...)
/// to the bound driver's `analyze_descriptor`, stopping as soon as it
/// reports done.
///
/// If a bound driver never reports done (or the replay hits a malformed
/// `bLength == 0` record first), the driver's claim is released via
/// `remove` and the device is left unbound — freeing its own instance slot
/// rather than leaving it permanently addressed with no working driver,
/// since §8's invariant requires every addressed, driver-less slot to be
/// mid-enumeration, not stuck.
pub fn bind_driver(
    buf: &[u8],
    slot: SlotHandle,
    services: &mut Services<'_>,
    registry: &mut DriverRegistry<'_>,
) -> Option<(usize, DriverHandle)> {
    let (device_class, device_sub_class, device_protocol, id_vendor, id_product) = device_match_fields(buf).ok()?;

    for record in DescriptorIter::new(buf) {
        let record = record.ok()?;
        if record.descriptor_type != desc_type::INTERFACE {
            continue;
        }
        let Ok((iface_class, iface_sub_class, iface_protocol)) = interface_match_fields(&record) else {
            continue;
        };
        let probe = DriverInfo {
            device_class,
            device_sub_class,
            device_protocol,
            id_vendor,
            id_product,
            iface_class,
            iface_sub_class,
            iface_protocol,
        };
        let Some((registry_index, handle)) = registry.find_driver(slot, &probe) else {
            log::debug!("usbh: no compatible driver for interface class {iface_class:#x}");
            continue;
        };

        let Some(driver) = registry.driver_mut(registry_index) else {
            return None;
        };
        for replay in DescriptorIter::new(buf) {
            let Ok(replay) = replay else {
                break;
            };
            if driver.analyze_descriptor(handle, &replay) {
                return Some((registry_index, handle));
            }
        }
        log::debug!("usbh: driver at registry index {registry_index} never completed descriptor analysis");
        driver.remove(handle, services);
        return None;
    }
    None
}
