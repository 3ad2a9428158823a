//! Data model shared by every wjmotion layer.

use std::fmt;

use bitflags::bitflags;

use crate::error::{Error, Result};

/// Axis counts the board may report at connect time.
pub const SUPPORTED_AXIS_COUNTS: [u8; 2] = [4, 8];

/// Default number of digital I/O lines.
pub const DEFAULT_IO_LINES: u8 = 8;

/// Identifies the port a board is attached to.
///
/// The vendor API takes a single integer: `0` means the USB virtual serial
/// port, any positive value selects a physical serial port index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortId {
    /// The board's USB virtual COM port.
    Usb,
    /// A physical serial port (`COMn` on Windows).
    Serial(u32),
}

impl PortId {
    /// Convert the vendor's `num_scom` integer.
    pub fn from_vendor(num_scom: i32) -> Result<Self> {
        match num_scom {
            0 => Ok(PortId::Usb),
            n if n > 0 => Ok(PortId::Serial(n as u32)),
            n => Err(Error::Validation(format!("invalid port number {n}"))),
        }
    }

    /// The vendor integer for this port.
    pub fn vendor_number(&self) -> i32 {
        match self {
            PortId::Usb => 0,
            PortId::Serial(n) => *n as i32,
        }
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortId::Usb => write!(f, "USB"),
            PortId::Serial(n) => write!(f, "COM{n}"),
        }
    }
}

/// Lifecycle state of a board connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Never opened, or closed by the caller.
    Closed,
    /// Open and accepting commands.
    Open,
    /// The transport failed; the connection must be reopened.
    Faulted,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Closed => "closed",
            LinkState::Open => "open",
            LinkState::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// A per-axis quantity mirrored by the axis registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisField {
    Acceleration,
    Deceleration,
    Velocity,
    Subdivision,
    Pulses,
    Status,
    /// Deceleration used by slow stop.
    SlowStopDeceleration,
    /// Acceleration used by velocity-mode moves.
    VelocityAcceleration,
    /// Pulse value the axis is homed to.
    HomePulses,
}

impl AxisField {
    /// All fields, in wire-opcode order.
    pub const ALL: [AxisField; 9] = [
        AxisField::Acceleration,
        AxisField::Deceleration,
        AxisField::Velocity,
        AxisField::Subdivision,
        AxisField::Pulses,
        AxisField::Status,
        AxisField::SlowStopDeceleration,
        AxisField::VelocityAcceleration,
        AxisField::HomePulses,
    ];

    /// Whether the board answers a query for this field.
    pub fn is_queryable(&self) -> bool {
        matches!(
            self,
            AxisField::Acceleration
                | AxisField::Deceleration
                | AxisField::Velocity
                | AxisField::Subdivision
                | AxisField::Pulses
                | AxisField::Status
        )
    }

    /// Whether the board accepts a set command for this field.
    ///
    /// Pulses are reset through the dedicated zero command, and status is
    /// read-only.
    pub fn is_settable(&self) -> bool {
        !matches!(self, AxisField::Pulses | AxisField::Status)
    }
}

impl fmt::Display for AxisField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AxisField::Acceleration => "acceleration",
            AxisField::Deceleration => "deceleration",
            AxisField::Velocity => "velocity",
            AxisField::Subdivision => "subdivision",
            AxisField::Pulses => "pulses",
            AxisField::Status => "status",
            AxisField::SlowStopDeceleration => "slow-stop deceleration",
            AxisField::VelocityAcceleration => "velocity acceleration",
            AxisField::HomePulses => "home pulses",
        };
        f.write_str(s)
    }
}

bitflags! {
    /// Axis status bitfield as reported by the board.
    ///
    /// An axis with no bits set is idle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AxisStatus: u32 {
        /// A move is in progress.
        const MOVING = 0x01;
        /// The driver reported a fault (stall, overcurrent, limit).
        const FAULT = 0x02;
        /// The axis sits on its home reference.
        const HOME = 0x04;
    }
}

impl AxisStatus {
    /// Build from the raw integer value on the wire, keeping unknown bits.
    pub fn from_raw(raw: i32) -> Self {
        AxisStatus::from_bits_retain(raw as u32)
    }

    /// The raw integer value, as the vendor API reports it.
    pub fn raw(&self) -> i32 {
        self.bits() as i32
    }

    pub fn is_moving(&self) -> bool {
        self.contains(AxisStatus::MOVING)
    }

    pub fn is_idle(&self) -> bool {
        !self.is_moving()
    }

    pub fn is_faulted(&self) -> bool {
        self.contains(AxisStatus::FAULT)
    }

    pub fn is_home(&self) -> bool {
        self.contains(AxisStatus::HOME)
    }
}

impl fmt::Display for AxisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let motion = if self.is_moving() { "moving" } else { "idle" };
        write!(f, "{motion}")?;
        if self.is_faulted() {
            write!(f, ", fault")?;
        }
        if self.is_home() {
            write!(f, ", home")?;
        }
        Ok(())
    }
}

/// Static facts about a connected board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardInfo {
    /// Number of axes reported by the board (4 or 8).
    pub axis_count: u8,
    /// Number of addressable digital I/O lines.
    pub io_lines: u8,
    /// Port the board is attached to.
    pub port: PortId,
}
