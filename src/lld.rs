//! The low-level driver contract. An `Lld` is the abstract transport beneath
//! the core: host-controller register bring-up, MCU clocks/GPIO/timers, and
//! the real DMA engine are external collaborators this trait only describes
//! the shape of.
//!
//! Completions are delivered asynchronously: `submit_write`/`submit_read`
//! only enqueue a request tagged by the issuing device's [`SlotHandle`]; the
//! core later drains `take_completion` after each `poll` tick. This replaces
//! the original's function-pointer-plus-`void*` callback with an owned,
//! value-typed completion queue, which is what makes the whole stack
//! expressible without raw pointers or heap allocation (see DESIGN.md).

use heapless::Vec;

use crate::config::ENUM_SCRATCH_BUFFER;
use crate::device::SlotHandle;
use crate::packet::{Completion, EndpointType, Speed};

/// Result of advancing an LLD by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    None,
    DeviceConnected,
    DeviceDisconnected,
}

/// Endpoint addressing for a queued transfer. Carries everything the LLD
/// needs besides the data itself.
#[derive(Debug, Clone, Copy)]
pub struct EndpointMeta {
    pub address: i8,
    pub endpoint_address: u8,
    pub endpoint_type: EndpointType,
    pub endpoint_size_max: u16,
    pub speed: Speed,
    pub toggle: bool,
}

/// Bytes delivered by a completed IN transfer.
pub type CompletionData = Vec<u8, ENUM_SCRATCH_BUFFER>;

/// A host controller driver.
pub trait Lld {
    fn init(&mut self);

    /// Advances the controller by `time_us` (a monotonic, possibly-wrapping
    /// microsecond counter) and reports a root-port connect/disconnect edge,
    /// if any.
    fn poll(&mut self, time_us: u32) -> PollEvent;

    /// Enqueues an OUT transfer. `data` is copied by the LLD before this call
    /// returns; the caller's buffer need not outlive the call.
    fn submit_write(&mut self, tag: SlotHandle, ep: EndpointMeta, data: &[u8]);

    /// Enqueues an IN transfer of up to `len` bytes.
    fn submit_read(&mut self, tag: SlotHandle, ep: EndpointMeta, len: u16);

    /// Drains one completed transfer, if any are ready. The returned toggle
    /// is the endpoint's DATA0/DATA1 bit after this transfer, for the caller
    /// to store back.
    fn take_completion(&mut self) -> Option<(SlotHandle, Completion, bool, CompletionData)>;

    /// Speed negotiated on the root port. Only meaningful after a
    /// `DeviceConnected` event.
    fn root_speed(&self) -> Speed;
}
