//! Compile-time sizing constants. No runtime configuration exists: everything
//! here is a `const` chosen at build time, matching the rest of the no-alloc
//! design.

/// Device slots per LLD's device table. Slot 0 is reserved for the device
/// directly attached to the root port.
pub const MAX_DEVICES: usize = 8;

/// Hub driver instance pool size (how many hubs may be attached at once).
pub const MAX_HUBS: usize = 2;

/// Downstream ports tracked per hub.
pub const HUB_MAX_PORTS: usize = 4;

/// HID driver instance pool size.
pub const MAX_HID_DEVICES: usize = 4;

/// XBOX gamepad driver instance pool size.
pub const MAX_XBOX_DEVICES: usize = 2;

/// USB-MIDI driver instance pool size.
pub const MAX_MIDI_DEVICES: usize = 2;

/// Scratch size for a HID report.
pub const HID_REPORT_BUFFER: usize = 16;

/// Scratch size for an XBOX gamepad report. The wire report is 20 bytes.
pub const XBOX_REPORT_BUFFER: usize = 32;

/// Scratch size for a USB-MIDI bulk/interrupt read (multiple 4-byte events).
pub const MIDI_REPORT_BUFFER: usize = 64;

/// Per-LLD scratch buffer for the device + configuration descriptor pair
/// captured during enumeration.
pub const ENUM_SCRATCH_BUFFER: usize = 256;

/// Post PORT_RESET debounce before handing a downstream device to enumeration.
pub const HUB_DEBOUNCE_US: u32 = 500_000;

/// Number of low-level drivers (host controllers) this stack instance can manage.
pub const MAX_LLDS: usize = 2;

/// Number of class drivers that can be registered with [`crate::registry::DriverRegistry`].
pub const MAX_CLASS_DRIVERS: usize = 8;
