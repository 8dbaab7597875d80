//! §8 scenario: an XBOX 360-style gamepad connects, binds the XBOX class
//! driver, and a 20-byte interrupt-IN report decodes to the documented
//! buttons/axis values.

mod common;

use std::sync::Mutex;

use common::descriptors;
use usbh_core::config::MAX_LLDS;
use usbh_core::drivers::xbox::{XboxConfig, XboxDriver, XboxPacket};
use usbh_core::lld::Lld;
use usbh_core::packet::{PacketStatus, Speed};
use usbh_core::registry::DriverRegistry;
use usbh_core::UsbHost;

static LAST_PACKET: Mutex<Option<XboxPacket>> = Mutex::new(None);
static CONNECTED: Mutex<bool> = Mutex::new(false);

fn record_update(device_id: u8, packet: XboxPacket) {
    assert_eq!(device_id, 0);
    *LAST_PACKET.lock().unwrap() = Some(packet);
}

fn record_connected(device_id: u8) {
    assert_eq!(device_id, 0);
    *CONNECTED.lock().unwrap() = true;
}

#[test]
fn xbox_pad_enumerates_and_decodes_report() {
    *LAST_PACKET.lock().unwrap() = None;
    *CONNECTED.lock().unwrap() = false;

    let mut xbox = XboxDriver::new(XboxConfig {
        update: Some(record_update),
        notify_connected: Some(record_connected),
        notify_disconnected: None,
    });
    let mut registry = DriverRegistry::new();
    assert!(registry.register(&mut xbox));

    let (mut mock_lld, handle) = common::MockLld::new(Speed::Full);
    let mut llds: heapless::Vec<&mut dyn Lld, MAX_LLDS> = heapless::Vec::new();
    llds.push(&mut mock_lld).ok().unwrap();

    let mut host = UsbHost::init(llds, registry).unwrap();

    let device_desc = descriptors::device_descriptor(0xff, 0xff, 0xff, 32, 0x045e, 0x028e);
    let config_desc = descriptors::simple_configuration(1, 0xff, 93, 1, 0x81, 32);

    common::drive_enumeration(&handle, &mut host, 0, &device_desc, &config_desc);

    // SET_CONFIGURATION SETUP, its zero-length status read.
    common::step(&handle, &mut host, 0, PacketStatus::Ok, 0, &[]);
    common::step(&handle, &mut host, 0, PacketStatus::Ok, 0, &[]);
    assert!(*CONNECTED.lock().unwrap());

    // First interrupt-IN report: button A, left stick pushed fully right.
    let report = [0x00u8, 0x14, 0x00, 0x10, 0x00, 0x00, 0xff, 0x7f, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0, 0, 0, 0, 0, 0];
    common::step(&handle, &mut host, 0, PacketStatus::Ok, report.len() as u16, &report);

    let packet = LAST_PACKET.lock().unwrap().expect("update callback fired");
    assert_eq!(packet.axis_left_x, 0x7fff);
    assert_eq!(packet.buttons, usbh_core::drivers::xbox::XboxButtons::BUTTON_A);
}
