//! # Pad Sample Module
//!
//! Data records exchanged with the host controller subsystem.
//!
//! ## Records
//!
//! - [`RawSample`]: what a basic "read current pad state" call returns. The
//!   host owns it; this crate only copies values out of it.
//! - [`EmulatedSample`]: what an installed input source writes into the
//!   host-supplied buffer on every polling-loop iteration.
//!
//! ## Axis Values
//!
//! | Field | Range | Rest |
//! |-------|-------|------|
//! | `lx` / `ly` | 0-255 | 128 |
//! | `rx` / `ry` | 0-255 | 128 |
//!
//! Y grows downwards: 0 is full up, 255 is full down.
//!
//! ## Ports
//!
//! Port 0 is the built-in pad. Ports 1 and 2 are external ports that can be
//! served from an emulation slot; passthrough for port `p` is selected by
//! bit `1 << (p - 1)` of a [`PortMask`].

use bitflags::bitflags;

/// Analog axis rest value.
pub const ANALOG_CENTER: u8 = 128;

/// Sentinel written to both reserved bytes of an emulated sample.
pub const RESERVED_SENTINEL: i8 = -128;

/// Number of external (emulatable) ports.
pub const EXTERNAL_PORT_COUNT: u8 = 2;

bitflags! {
    /// Host button mask.
    ///
    /// Bits not named here are retained as-is, so an arbitrary seed word
    /// survives a round trip through [`Buttons::from_bits_retain`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Buttons: u32 {
        const SELECT    = 0x0000_0001;
        const START     = 0x0000_0008;
        const UP        = 0x0000_0010;
        const RIGHT     = 0x0000_0020;
        const DOWN      = 0x0000_0040;
        const LEFT      = 0x0000_0080;
        const LTRIGGER  = 0x0000_0100;
        const RTRIGGER  = 0x0000_0200;
        const TRIANGLE  = 0x0000_1000;
        const CIRCLE    = 0x0000_2000;
        const CROSS     = 0x0000_4000;
        const SQUARE    = 0x0000_8000;
        const HOME      = 0x0001_0000;
        const HOLD      = 0x0002_0000;
        const WLAN_UP   = 0x0004_0000;
        const REMOTE    = 0x0008_0000;
        const VOLUP     = 0x0010_0000;
        const VOLDOWN   = 0x0020_0000;
        const SCREEN    = 0x0040_0000;
        const NOTE      = 0x0080_0000;
        const DISC      = 0x0100_0000;
        const MS        = 0x0200_0000;

        /// All four directional bits.
        const DPAD = Self::UP.bits() | Self::RIGHT.bits() | Self::DOWN.bits() | Self::LEFT.bits();

        const _ = !0;
    }
}

/// Controller sampling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplingMode {
    /// Buttons only, sticks report the rest value.
    #[default]
    Digital,
    /// Buttons and analog stick.
    DigitalAnalog,
}

/// A controller port index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Port(pub u8);

impl Port {
    /// The built-in pad. It can never be redirected to an emulation slot.
    pub const PRIMARY: Port = Port(0);

    /// First external port (the DS3 port on hardware that has one).
    pub const EXTERNAL_1: Port = Port(1);

    /// Second external port.
    pub const EXTERNAL_2: Port = Port(2);

    /// Returns `true` if this port can be backed by an emulation slot.
    #[must_use]
    pub fn is_external(self) -> bool {
        (1..=EXTERNAL_PORT_COUNT).contains(&self.0)
    }

    /// Zero-based emulation slot index, if this is an external port.
    #[must_use]
    pub fn slot_index(self) -> Option<usize> {
        self.is_external().then(|| usize::from(self.0 - 1))
    }
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "port {}", self.0)
    }
}

/// Bitmask of external ports whose basic reads come from their emulation slot.
///
/// # Examples
///
/// ```
/// use pad_emulator::controller::sample::{Port, PortMask};
///
/// assert_eq!(PortMask::from_port(Port::EXTERNAL_1), Some(PortMask(0x01)));
/// assert_eq!(PortMask::from_port(Port::EXTERNAL_2), Some(PortMask(0x02)));
/// assert_eq!(PortMask::from_port(Port::PRIMARY), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PortMask(pub u32);

impl PortMask {
    /// Passthrough disabled for every port.
    pub const NONE: PortMask = PortMask(0);

    /// Converts a single external port index to its mask bit.
    #[must_use]
    pub fn from_port(port: Port) -> Option<Self> {
        port.slot_index().map(|slot| PortMask(1 << slot))
    }

    /// Returns `true` if the mask selects `port`.
    #[must_use]
    pub fn contains(self, port: Port) -> bool {
        match Self::from_port(port) {
            Some(bit) => self.0 & bit.0 != 0,
            None => false,
        }
    }
}

/// Physical pad state as returned by a basic read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    /// Host timestamp of the sample, in microseconds.
    pub timestamp: u32,
    /// Pressed buttons.
    pub buttons: Buttons,
    /// Analog stick X. 0 = full left, 255 = full right.
    pub lx: u8,
    /// Analog stick Y. 0 = full up, 255 = full down.
    pub ly: u8,
    /// Reserved bytes, passed through untouched.
    pub reserved: [u8; 6],
}

impl Default for RawSample {
    fn default() -> Self {
        Self {
            timestamp: 0,
            buttons: Buttons::empty(),
            lx: ANALOG_CENTER,
            ly: ANALOG_CENTER,
            reserved: [0; 6],
        }
    }
}

impl RawSample {
    /// Creates a sample with the stick at `(lx, ly)` and no buttons held.
    ///
    /// # Examples
    ///
    /// ```
    /// use pad_emulator::controller::sample::{Buttons, RawSample};
    ///
    /// let sample = RawSample::with_stick(250, 128);
    /// assert_eq!(sample.lx, 250);
    /// assert_eq!(sample.buttons, Buttons::empty());
    /// ```
    #[must_use]
    pub fn with_stick(lx: u8, ly: u8) -> Self {
        Self {
            lx,
            ly,
            ..Self::default()
        }
    }
}

/// Extended sample written by an input source into an emulation slot.
///
/// Every field other than `timestamp` is owned by the writer; the host stamps
/// `timestamp` before handing the buffer over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmulatedSample {
    /// Host timestamp, in microseconds.
    pub timestamp: u32,
    /// Pressed buttons.
    pub buttons: Buttons,

    // Primary stick (0-255, 128 = center)
    /// Primary stick X.
    pub lx: u8,
    /// Primary stick Y.
    pub ly: u8,

    // Secondary stick (0-255, 128 = center)
    /// Secondary stick X.
    pub rx: u8,
    /// Secondary stick Y.
    pub ry: u8,

    // Pressure sense
    /// D-pad pressure sense, first half.
    pub dpad_sense_a: u8,
    /// D-pad pressure sense, second half.
    pub dpad_sense_b: u8,
    /// Face button pressure sense, first half.
    pub gpad_sense_a: u8,
    /// Face button pressure sense, second half.
    pub gpad_sense_b: u8,
    /// Axis sense, first half.
    pub axis_sense_a: u8,
    /// Axis sense, second half.
    pub axis_sense_b: u8,

    // Motion
    /// Tilt, first axis.
    pub tilt_a: u8,
    /// Tilt, second axis.
    pub tilt_b: u8,

    /// Reserved, set to [`RESERVED_SENTINEL`].
    pub reserved: [i8; 2],
}

impl Default for EmulatedSample {
    /// A sample in the neutral state: no buttons, sticks centered, sense and
    /// tilt zeroed, reserved bytes at the sentinel.
    fn default() -> Self {
        Self {
            timestamp: 0,
            buttons: Buttons::empty(),
            lx: ANALOG_CENTER,
            ly: ANALOG_CENTER,
            rx: ANALOG_CENTER,
            ry: ANALOG_CENTER,
            dpad_sense_a: 0,
            dpad_sense_b: 0,
            gpad_sense_a: 0,
            gpad_sense_b: 0,
            axis_sense_a: 0,
            axis_sense_b: 0,
            tilt_a: 0,
            tilt_b: 0,
            reserved: [RESERVED_SENTINEL; 2],
        }
    }
}

impl EmulatedSample {
    /// Resets every writer-owned field to its neutral value, keeping the
    /// host timestamp.
    pub fn reset_neutral(&mut self) {
        *self = Self {
            timestamp: self.timestamp,
            ..Self::default()
        };
    }

    /// Returns `true` if the primary stick is away from its rest value.
    #[must_use]
    pub fn primary_stick_active(&self) -> bool {
        self.lx != ANALOG_CENTER || self.ly != ANALOG_CENTER
    }
}
