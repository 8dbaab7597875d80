//! Error types for operations that can fail synchronously at the API boundary.
//!
//! Packet-level failures (EAGAIN/ERRSIZ/EFATAL) are not represented here; they
//! fold into state machine transitions instead, see [`crate::packet::PacketStatus`].

/// Synchronous failure of a core API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbError {
    /// No free slot in the device table (`MAX_DEVICES` exhausted).
    NoFreeSlots,
    /// No free slot in a per-class driver instance pool.
    DriverTableFull,
    /// A descriptor record had `bLength == 0` or ran past the buffer.
    MalformedDescriptor,
    /// A scratch or report buffer was too small for the transfer.
    BufferTooSmall,
    /// Operation attempted on a slot that has no bound driver.
    NotBound,
    /// `init` was called with an empty LLD list.
    NoLowLevelDrivers,
}

impl core::fmt::Display for UsbError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            UsbError::NoFreeSlots => "no free device slots",
            UsbError::DriverTableFull => "driver instance pool exhausted",
            UsbError::MalformedDescriptor => "malformed descriptor (zero bLength)",
            UsbError::BufferTooSmall => "buffer too small for transfer",
            UsbError::NotBound => "device slot has no bound driver",
            UsbError::NoLowLevelDrivers => "no low-level drivers registered",
        };
        f.write_str(msg)
    }
}
