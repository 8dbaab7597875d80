//! A hand-scripted [`Lld`] for exercising [`usbh_core::UsbHost`] without real
//! hardware, in the same spirit as `aero-usb`'s own integration-test harness:
//! one file per behavior, plain `#[test]` functions, and a small amount of
//! shared test plumbing rather than a generic fuzz-style framework.
//!
//! Each submitted transfer is recorded rather than answered immediately (a
//! real LLD never completes a transfer reentrantly from inside
//! `submit_write`/`submit_read`); the test drives the protocol by pulling the
//! next pending transfer with [`MockLld::take_pending`] and completing it
//! with [`MockLld::complete`], then calling [`usbh_core::UsbHost::poll`]
//! again to let the completion be drained and routed.

#![allow(dead_code)]

pub mod descriptors;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use usbh_core::device::SlotHandle;
use usbh_core::lld::{CompletionData, EndpointMeta, Lld, PollEvent};
use usbh_core::packet::{Completion, PacketStatus, Speed};
use usbh_core::UsbHost;

/// One transfer the stack submitted to the mock controller, still awaiting a
/// scripted response.
pub struct PendingTransfer {
    pub tag: SlotHandle,
    pub ep: EndpointMeta,
    /// `Some(bytes)` for a `submit_write` (SETUP or OUT data), `None` for a
    /// `submit_read` (the requested length is in `read_len`).
    pub write_data: Option<Vec<u8>>,
    pub read_len: Option<u16>,
}

struct MockState {
    speed: Speed,
    events: VecDeque<PollEvent>,
    pending: VecDeque<PendingTransfer>,
    completions: VecDeque<(SlotHandle, Completion, bool, CompletionData)>,
}

/// Shared handle onto a [`MockLld`]'s state. Clone it before handing the
/// `MockLld` itself to [`usbh_core::UsbHost::init`] so the test can keep
/// driving it afterwards.
#[derive(Clone)]
pub struct MockHandle(Rc<RefCell<MockState>>);

impl MockHandle {
    /// Queues a `PollEvent` to be returned on the LLD's next `poll` call.
    pub fn queue_event(&self, event: PollEvent) {
        self.0.borrow_mut().events.push_back(event);
    }

    /// Pops the oldest transfer the stack submitted but hasn't been answered
    /// yet. `None` if the stack has issued no new transfer since the last
    /// call.
    pub fn take_pending(&self) -> Option<PendingTransfer> {
        self.0.borrow_mut().pending.pop_front()
    }

    /// Queues a completion for `tag`, picked up by the stack's next
    /// `take_completion` drain (i.e. on the following `UsbHost::poll` call).
    pub fn complete(&self, tag: SlotHandle, status: PacketStatus, transferred_length: u16, data: &[u8]) {
        let mut buf = CompletionData::new();
        let _ = buf.extend_from_slice(data);
        self.0.borrow_mut().completions.push_back((tag, Completion { status, transferred_length }, false, buf));
    }

    pub fn pending_count(&self) -> usize {
        self.0.borrow().pending.len()
    }
}

/// The [`Lld`] implementation itself; thin delegation to the shared
/// [`MockState`] so a [`MockHandle`] clone can keep driving it after
/// ownership of the `MockLld` moves into a [`usbh_core::UsbHost`].
pub struct MockLld(Rc<RefCell<MockState>>);

impl MockLld {
    pub fn new(speed: Speed) -> (Self, MockHandle) {
        let state = Rc::new(RefCell::new(MockState {
            speed,
            events: VecDeque::new(),
            pending: VecDeque::new(),
            completions: VecDeque::new(),
        }));
        (MockLld(state.clone()), MockHandle(state))
    }
}

impl Lld for MockLld {
    fn init(&mut self) {}

    fn poll(&mut self, _time_us: u32) -> PollEvent {
        self.0.borrow_mut().events.pop_front().unwrap_or(PollEvent::None)
    }

    fn submit_write(&mut self, tag: SlotHandle, ep: EndpointMeta, data: &[u8]) {
        self.0.borrow_mut().pending.push_back(PendingTransfer {
            tag,
            ep,
            write_data: Some(data.to_vec()),
            read_len: None,
        });
    }

    fn submit_read(&mut self, tag: SlotHandle, ep: EndpointMeta, len: u16) {
        self.0.borrow_mut().pending.push_back(PendingTransfer { tag, ep, write_data: None, read_len: Some(len) });
    }

    fn take_completion(&mut self) -> Option<(SlotHandle, Completion, bool, CompletionData)> {
        self.0.borrow_mut().completions.pop_front()
    }

    fn root_speed(&self) -> Speed {
        self.0.borrow().speed
    }
}

/// Standard USB SETUP byte layout, used by tests to assert on what the stack
/// actually requested without depending on `usbh_core`'s private setup-data
/// type.
pub fn setup_bytes(bm_request_type: u8, b_request: u8, w_value: u16, w_index: u16, w_length: u16) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf[0] = bm_request_type;
    buf[1] = b_request;
    buf[2..4].copy_from_slice(&w_value.to_le_bytes());
    buf[4..6].copy_from_slice(&w_index.to_le_bytes());
    buf[6..8].copy_from_slice(&w_length.to_le_bytes());
    buf
}

/// Pops the next transfer the stack submitted, completes it with the given
/// response, then polls `host` once so the completion is drained and routed.
/// Panics if the stack hasn't submitted anything since the last call — a
/// test writer's assertion that the protocol advanced the way it expected.
pub fn step(handle: &MockHandle, host: &mut UsbHost<'_>, time_us: u32, status: PacketStatus, transferred_length: u16, data: &[u8]) {
    let pending = handle.take_pending().expect("expected a pending transfer, stack issued none");
    handle.complete(pending.tag, status, transferred_length, data);
    host.poll(time_us);
}

/// Drives a root device all the way from `DeviceConnected` through
/// `FIND_DRIVER` (§4.5's eight enumeration states), scripting every SETUP/DATA
/// stage with `device_desc`/`config_desc` as the device's canned responses.
/// Leaves the caller at the tick immediately after the slot either bound to a
/// driver or was freed for lack of one.
pub fn drive_enumeration(handle: &MockHandle, host: &mut UsbHost<'_>, time_us: u32, device_desc: &[u8; 18], config_desc: &[u8]) {
    handle.queue_event(PollEvent::DeviceConnected);
    host.poll(time_us);

    // SET_ADDRESS SETUP, then its zero-length IN status stage.
    step(handle, host, time_us, PacketStatus::Ok, 0, &[]);
    step(handle, host, time_us, PacketStatus::Ok, 0, &[]);

    // GET_DESCRIPTOR(DEVICE, 18): SETUP then the 18-byte DATA stage.
    step(handle, host, time_us, PacketStatus::Ok, 0, &[]);
    step(handle, host, time_us, PacketStatus::Ok, 18, device_desc);

    let max_packet_size_ep0 = device_desc[7] as usize;

    // GET_DESCRIPTOR(CONFIGURATION, max_packet_size_ep0): header phase.
    step(handle, host, time_us, PacketStatus::Ok, 0, &[]);
    let header_len = max_packet_size_ep0.min(config_desc.len());
    step(handle, host, time_us, PacketStatus::Ok, header_len as u16, &config_desc[..header_len]);

    // GET_DESCRIPTOR(CONFIGURATION, wTotalLength): full phase.
    step(handle, host, time_us, PacketStatus::Ok, 0, &[]);
    step(handle, host, time_us, PacketStatus::Ok, config_desc.len() as u16, config_desc);
}

/// Completes every pending control transfer with `PacketStatus::Ok` and
/// zero-filled data (the hub's port-power and status bookkeeping round trips
/// never inspect the data they read back) until one matching `stop` is
/// found, which is returned uncompleted for the caller to answer itself.
pub fn pump_control_until(
    handle: &MockHandle,
    host: &mut UsbHost<'_>,
    time_us: u32,
    stop: impl Fn(&PendingTransfer) -> bool,
) -> PendingTransfer {
    loop {
        let pending = handle.take_pending().expect("pump ran out of pending transfers before the stop condition");
        if stop(&pending) {
            return pending;
        }
        let len = pending.read_len.unwrap_or(0) as usize;
        let data = vec![0u8; len];
        handle.complete(pending.tag, PacketStatus::Ok, len as u16, &data);
        host.poll(time_us);
    }
}
