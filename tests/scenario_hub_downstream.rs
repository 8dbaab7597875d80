//! §8 scenarios: a hub powers its ports, detects a new connection, resets
//! it, and either hands a full-speed device off to the enumeration core
//! after the debounce window, or rejects a low-speed device outright.

mod common;

use common::descriptors;
use common::PendingTransfer;
use usbh_core::config::MAX_LLDS;
use usbh_core::hub::HubDriver;
use usbh_core::lld::Lld;
use usbh_core::packet::{EndpointType, PacketStatus, Speed};
use usbh_core::registry::DriverRegistry;
use usbh_core::UsbHost;

const C_PORT_CONNECTION: u16 = 1 << 0;
const PORT_ENABLE: u16 = 1 << 1;
const PORT_LOWSPEED: u16 = 1 << 9;
const C_PORT_RESET: u16 = 1 << 4;

/// Builds and binds a 4-port hub, drives it through SET_CONFIGURATION, the
/// class-specific HUB descriptor fetch, per-port power-up, and the hub/port
/// status bookkeeping pass, then delivers a status-change report for port 1
/// and resets it. Leaves the caller with a pending 4-byte GET_STATUS(port 1)
/// read to answer with the post-reset port status.
fn hub_bound_and_awaiting_post_reset_status(handle: &common::MockHandle, host: &mut UsbHost<'_>) -> PendingTransfer {
    let device_desc = descriptors::device_descriptor(0x09, 0, 0, 7, 0x0424, 0x2514);
    let config_desc = descriptors::simple_configuration(1, 0x09, 0, 0, 0x81, 8);

    common::drive_enumeration(handle, host, 0, &device_desc, &config_desc);

    // SET_CONFIGURATION SETUP, its zero-length status read.
    common::step(handle, host, 0, PacketStatus::Ok, 0, &[]);
    common::step(handle, host, 0, PacketStatus::Ok, 0, &[]);

    // GET_DESCRIPTOR(HUB, 7) SETUP, then its 7-byte response (4 ports).
    common::step(handle, host, 0, PacketStatus::Ok, 0, &[]);
    common::step(handle, host, 0, PacketStatus::Ok, 7, &descriptors::hub_descriptor(4));

    // Port power-up (4 ports) and the hub/port status bookkeeping pass run
    // entirely on scripted Ok responses whose content is never inspected;
    // pump through all of it until the hub issues its first status-change
    // interrupt-IN read.
    let pending = common::pump_control_until(handle, host, 0, |p| p.ep.endpoint_type == EndpointType::Interrupt);

    // Status-change report: port 1 has a pending change (connection).
    handle.complete(pending.tag, PacketStatus::Ok, 4, &[0x02, 0, 0, 0]);
    host.poll(0);

    // GET_STATUS(port 1) SETUP, then its response: a fresh connection.
    common::step(handle, host, 0, PacketStatus::Ok, 0, &[]);
    common::step(handle, host, 0, PacketStatus::Ok, 4, &descriptors::port_status_bytes(0, C_PORT_CONNECTION));

    // CLEAR_FEATURE(C_PORT_CONNECTION) SETUP, its zero-length status read.
    common::step(handle, host, 0, PacketStatus::Ok, 0, &[]);
    common::step(handle, host, 0, PacketStatus::Ok, 0, &[]);

    // SET_FEATURE(PORT_RESET) SETUP, its zero-length status read.
    common::step(handle, host, 0, PacketStatus::Ok, 0, &[]);
    common::step(handle, host, 0, PacketStatus::Ok, 0, &[]);

    // The hub is back at Idle and immediately re-polls the status-change
    // endpoint; this second report still carries port 1's pending change,
    // now for C_PORT_RESET.
    let pending = handle.take_pending().expect("second status-change read pending");
    assert_eq!(pending.ep.endpoint_type, EndpointType::Interrupt);
    handle.complete(pending.tag, PacketStatus::Ok, 4, &[0x02, 0, 0, 0]);
    host.poll(0);

    // GET_STATUS(port 1) SETUP for the post-reset status.
    common::step(handle, host, 0, PacketStatus::Ok, 0, &[]);
    handle.take_pending().expect("post-reset GET_STATUS(port 1) data stage pending")
}

#[test]
fn fullspeed_device_is_handed_off_to_enumeration_after_debounce() {
    let mut hub = HubDriver::new();
    let mut registry = DriverRegistry::new();
    assert!(registry.register(&mut hub));

    let (mut mock_lld, handle) = common::MockLld::new(Speed::Full);
    let mut llds: heapless::Vec<&mut dyn Lld, MAX_LLDS> = heapless::Vec::new();
    llds.push(&mut mock_lld).ok().unwrap();

    let mut host = UsbHost::init(llds, registry).unwrap();

    let pending = hub_bound_and_awaiting_post_reset_status(&handle, &mut host);

    // Enabled, full speed (neither LOWSPEED nor HIGHSPEED set).
    handle.complete(pending.tag, PacketStatus::Ok, 4, &descriptors::port_status_bytes(PORT_ENABLE, C_PORT_RESET));
    host.poll(0);

    // CLEAR_FEATURE(C_PORT_RESET) SETUP, its zero-length status read.
    common::step(&handle, &mut host, 0, PacketStatus::Ok, 0, &[]);
    common::step(&handle, &mut host, 0, PacketStatus::Ok, 0, &[]);

    // Still inside the debounce window: nothing new happens yet.
    host.poll(10_000);
    assert!(handle.take_pending().is_none());

    // Past the debounce window: the child slot begins enumeration at full
    // speed, exactly the canonical SET_ADDRESS opener.
    host.poll(600_000);
    let handoff = handle.take_pending().expect("child enumeration must begin after debounce");
    assert_eq!(handoff.tag.slot_index, 1, "hub's own slot is 0, the child must land in a different slot");
    assert_eq!(handoff.ep.speed, Speed::Full);
    let setup = handoff.write_data.expect("SET_ADDRESS is a SETUP stage");
    assert_eq!(setup[1], usbh_core::packet::request::SET_ADDRESS);
}

#[test]
fn lowspeed_device_is_rejected_after_reset() {
    let mut hub = HubDriver::new();
    let mut registry = DriverRegistry::new();
    assert!(registry.register(&mut hub));

    let (mut mock_lld, handle) = common::MockLld::new(Speed::Full);
    let mut llds: heapless::Vec<&mut dyn Lld, MAX_LLDS> = heapless::Vec::new();
    llds.push(&mut mock_lld).ok().unwrap();

    let mut host = UsbHost::init(llds, registry).unwrap();

    let pending = hub_bound_and_awaiting_post_reset_status(&handle, &mut host);

    // Enabled, but LOW speed.
    handle.complete(
        pending.tag,
        PacketStatus::Ok,
        4,
        &descriptors::port_status_bytes(PORT_ENABLE | PORT_LOWSPEED, C_PORT_RESET),
    );
    host.poll(0);

    // CLEAR_FEATURE(C_PORT_RESET) SETUP, its zero-length status read — same
    // as the full-speed path so far, since it runs before `sts` is consulted.
    common::step(&handle, &mut host, 0, PacketStatus::Ok, 0, &[]);
    common::step(&handle, &mut host, 0, PacketStatus::Ok, 0, &[]);

    // Only now does the reset-complete handler look at `sts` and see LOW
    // speed: CLEAR_FEATURE(PORT_ENABLE) SETUP, the rejection path, rather
    // than a child slot being allocated.
    let reject = handle.take_pending().expect("low-speed device must be disabled, not handed off");
    let setup = reject.write_data.expect("CLEAR_FEATURE is a SETUP stage");
    assert_eq!(setup[1], usbh_core::packet::request::CLEAR_FEATURE);
    handle.complete(reject.tag, PacketStatus::Ok, 0, &[]);
    host.poll(0);
    common::step(&handle, &mut host, 0, PacketStatus::Ok, 0, &[]);

    // No child enumeration ever begins: the hub just goes back to polling
    // for the next status change.
    let next = handle.take_pending().expect("hub resumes status-change polling");
    assert_eq!(next.ep.endpoint_type, EndpointType::Interrupt);
}
