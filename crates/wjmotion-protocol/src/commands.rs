//! Command builders and response parsers.
//!
//! One builder per board operation. Builders are pure: they produce an
//! immutable [`Command`] that the dispatcher encodes and sends. Parsers take
//! the decoded reply [`Frame`] and extract the typed result.
//!
//! Range checks against the connected board (axis count, I/O line count)
//! happen in the driver before a builder is called. Builders only check
//! what the wire format itself limits.

use wjmotion_core::{AxisField, Error, Result};

use crate::frame::{BROADCAST, Frame, MAX_PAYLOAD, STATUS_OK, encode_frame};

/// Command opcodes.
///
/// Grouped by family in the high nibble: `0x1_` queries, `0x2_` motion,
/// `0x3_` settings, `0x4_` digital I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    GetAcc = 0x11,
    GetDec = 0x12,
    GetVel = 0x13,
    GetSubdivision = 0x14,
    GetStatus = 0x15,
    GetPulses = 0x16,
    GetAxesNum = 0x17,

    MovePulses = 0x21,
    MoveVel = 0x22,
    EmergencyStop = 0x23,
    SlowStop = 0x24,
    Home = 0x25,

    SetAcc = 0x31,
    SetDec = 0x32,
    SetVel = 0x33,
    SetSubdivision = 0x34,
    SetSlowStop = 0x35,
    LedTwinkle = 0x36,
    PulsesZero = 0x37,
    RestoreDefaults = 0x38,
    SetVelAcc = 0x39,
    SetHomePulses = 0x3A,

    IoOutput = 0x41,
    IoInput = 0x42,
}

impl Opcode {
    /// Look up an opcode byte. Returns `None` for bytes the board protocol
    /// does not define.
    pub fn from_u8(b: u8) -> Option<Self> {
        let op = match b {
            0x11 => Opcode::GetAcc,
            0x12 => Opcode::GetDec,
            0x13 => Opcode::GetVel,
            0x14 => Opcode::GetSubdivision,
            0x15 => Opcode::GetStatus,
            0x16 => Opcode::GetPulses,
            0x17 => Opcode::GetAxesNum,
            0x21 => Opcode::MovePulses,
            0x22 => Opcode::MoveVel,
            0x23 => Opcode::EmergencyStop,
            0x24 => Opcode::SlowStop,
            0x25 => Opcode::Home,
            0x31 => Opcode::SetAcc,
            0x32 => Opcode::SetDec,
            0x33 => Opcode::SetVel,
            0x34 => Opcode::SetSubdivision,
            0x35 => Opcode::SetSlowStop,
            0x36 => Opcode::LedTwinkle,
            0x37 => Opcode::PulsesZero,
            0x38 => Opcode::RestoreDefaults,
            0x39 => Opcode::SetVelAcc,
            0x3A => Opcode::SetHomePulses,
            0x41 => Opcode::IoOutput,
            0x42 => Opcode::IoInput,
            _ => return None,
        };
        Some(op)
    }

    /// Commands that jump ahead of the normal queue.
    pub fn is_priority(&self) -> bool {
        matches!(self, Opcode::EmergencyStop)
    }

    /// Whether the dispatcher should wait for a reply.
    ///
    /// Emergency stop is fire-and-forget: the board may acknowledge it
    /// late or not at all while it brakes.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Opcode::EmergencyStop)
    }

    /// Query opcode for a per-axis field, if the board answers queries for it.
    pub fn query_for(field: AxisField) -> Option<Self> {
        match field {
            AxisField::Acceleration => Some(Opcode::GetAcc),
            AxisField::Deceleration => Some(Opcode::GetDec),
            AxisField::Velocity => Some(Opcode::GetVel),
            AxisField::Subdivision => Some(Opcode::GetSubdivision),
            AxisField::Status => Some(Opcode::GetStatus),
            AxisField::Pulses => Some(Opcode::GetPulses),
            AxisField::SlowStopDeceleration
            | AxisField::VelocityAcceleration
            | AxisField::HomePulses => None,
        }
    }

    /// Set opcode for a per-axis field, if the field is writable.
    pub fn set_for(field: AxisField) -> Option<Self> {
        match field {
            AxisField::Acceleration => Some(Opcode::SetAcc),
            AxisField::Deceleration => Some(Opcode::SetDec),
            AxisField::Velocity => Some(Opcode::SetVel),
            AxisField::Subdivision => Some(Opcode::SetSubdivision),
            AxisField::SlowStopDeceleration => Some(Opcode::SetSlowStop),
            AxisField::VelocityAcceleration => Some(Opcode::SetVelAcc),
            AxisField::HomePulses => Some(Opcode::SetHomePulses),
            AxisField::Pulses | AxisField::Status => None,
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}(0x{:02X})", self, *self as u8)
    }
}

/// Who a command is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A single axis, 1-based.
    Axis(u8),
    /// The board as a whole, or every axis at once.
    Broadcast,
}

impl Target {
    /// The target byte on the wire.
    pub fn to_byte(self) -> u8 {
        match self {
            Target::Axis(n) => n,
            Target::Broadcast => BROADCAST,
        }
    }
}

/// One command ready for the dispatcher. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    opcode: Opcode,
    target: Target,
    values: Vec<i32>,
}

impl Command {
    fn new(opcode: Opcode, target: Target, values: Vec<i32>) -> Self {
        Command {
            opcode,
            target,
            values,
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(
            self.opcode as u8,
            self.target.to_byte(),
            STATUS_OK,
            &self.values,
        )
    }

    /// The command as a [`Frame`], as the board would decode it.
    pub fn to_frame(&self) -> Frame {
        Frame {
            opcode: self.opcode as u8,
            target: self.target.to_byte(),
            status: STATUS_OK,
            values: self.values.clone(),
        }
    }
}

fn check_batch(values: &[i32]) -> Result<()> {
    if values.is_empty() || values.len() * 4 > MAX_PAYLOAD {
        return Err(Error::Validation(format!(
            "batch of {} values does not fit a frame",
            values.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------
// Queries
// ---------------------------------------------------------------

/// Query one per-axis field. Fails for set-only fields.
pub fn cmd_get_param(axis: u8, field: AxisField) -> Result<Command> {
    let opcode = Opcode::query_for(field)
        .ok_or_else(|| Error::Validation(format!("{field} cannot be queried")))?;
    Ok(Command::new(opcode, Target::Axis(axis), Vec::new()))
}

/// Query the number of axes on the board.
pub fn cmd_get_axes_num() -> Command {
    Command::new(Opcode::GetAxesNum, Target::Broadcast, Vec::new())
}

/// Query the status bitfield of every axis.
pub fn cmd_get_axes_status() -> Command {
    Command::new(Opcode::GetStatus, Target::Broadcast, Vec::new())
}

/// Query the pulse counter of every axis.
pub fn cmd_get_axes_pulses() -> Command {
    Command::new(Opcode::GetPulses, Target::Broadcast, Vec::new())
}

// ---------------------------------------------------------------
// Motion
// ---------------------------------------------------------------

/// Move one axis by a relative number of pulses.
pub fn cmd_move_pulses(axis: u8, pulses: i32) -> Command {
    Command::new(Opcode::MovePulses, Target::Axis(axis), vec![pulses])
}

/// Move every axis by its own relative pulse count, axis 1 first.
pub fn cmd_move_axes_pulses(pulses: &[i32]) -> Result<Command> {
    check_batch(pulses)?;
    Ok(Command::new(
        Opcode::MovePulses,
        Target::Broadcast,
        pulses.to_vec(),
    ))
}

/// Run one axis continuously at a signed velocity.
pub fn cmd_move_vel(axis: u8, velocity: i32) -> Command {
    Command::new(Opcode::MoveVel, Target::Axis(axis), vec![velocity])
}

/// Run every axis at its own velocity, axis 1 first.
pub fn cmd_move_axes_vel(velocities: &[i32]) -> Result<Command> {
    check_batch(velocities)?;
    Ok(Command::new(
        Opcode::MoveVel,
        Target::Broadcast,
        velocities.to_vec(),
    ))
}

pub fn cmd_emergency_stop(axis: u8) -> Command {
    Command::new(Opcode::EmergencyStop, Target::Axis(axis), Vec::new())
}

pub fn cmd_slow_stop(axis: u8) -> Command {
    Command::new(Opcode::SlowStop, Target::Axis(axis), Vec::new())
}

/// Drive an axis to its home reference; `value` is the homing velocity.
pub fn cmd_home(axis: u8, value: i32) -> Command {
    Command::new(Opcode::Home, Target::Axis(axis), vec![value])
}

// ---------------------------------------------------------------
// Settings
// ---------------------------------------------------------------

/// Write one per-axis parameter. Fails for read-only fields.
pub fn cmd_set_param(axis: u8, field: AxisField, value: i32) -> Result<Command> {
    let opcode = Opcode::set_for(field)
        .ok_or_else(|| Error::Validation(format!("{field} cannot be set")))?;
    Ok(Command::new(opcode, Target::Axis(axis), vec![value]))
}

/// Reset an axis pulse counter to zero.
pub fn cmd_zero_pulses(axis: u8) -> Command {
    Command::new(Opcode::PulsesZero, Target::Axis(axis), Vec::new())
}

/// Blink the board's indicator LED.
pub fn cmd_led_twinkle() -> Command {
    Command::new(Opcode::LedTwinkle, Target::Broadcast, Vec::new())
}

/// Restore every parameter to its factory default.
pub fn cmd_restore_defaults() -> Command {
    Command::new(Opcode::RestoreDefaults, Target::Broadcast, Vec::new())
}

// ---------------------------------------------------------------
// Digital I/O
// ---------------------------------------------------------------

/// Drive output line `line` (1-based) high or low.
///
/// The line number travels in the target byte.
pub fn cmd_io_output(line: u8, high: bool) -> Command {
    Command::new(Opcode::IoOutput, Target::Axis(line), vec![high as i32])
}

/// Read input line `line` (1-based).
pub fn cmd_io_input(line: u8) -> Command {
    Command::new(Opcode::IoInput, Target::Axis(line), Vec::new())
}

// ---------------------------------------------------------------
// Response parsers
// ---------------------------------------------------------------

/// Check that a reply carries an OK status.
pub fn check_ack(frame: &Frame) -> Result<()> {
    if frame.is_ok() {
        Ok(())
    } else {
        Err(Error::Protocol(format!(
            "board returned status 0x{:02X} for opcode 0x{:02X}",
            frame.status, frame.opcode
        )))
    }
}

/// Parse a scalar reply (one per-axis parameter, status, or pulse count).
pub fn parse_value(frame: &Frame) -> Result<i32> {
    check_ack(frame)?;
    frame.single_value()
}

/// Parse a batch reply carrying one value per axis.
pub fn parse_axes_values(frame: &Frame, axis_count: u8) -> Result<Vec<i32>> {
    check_ack(frame)?;
    if frame.values.len() != axis_count as usize {
        return Err(Error::Protocol(format!(
            "expected {} axis values, got {}",
            axis_count,
            frame.values.len()
        )));
    }
    Ok(frame.values.clone())
}

/// Parse the axis-count reply. Only 4- and 8-axis boards exist.
pub fn parse_axes_num(frame: &Frame) -> Result<u8> {
    let n = parse_value(frame)?;
    match u8::try_from(n) {
        Ok(count) if wjmotion_core::SUPPORTED_AXIS_COUNTS.contains(&count) => Ok(count),
        _ => Err(Error::Protocol(format!("unsupported axis count {n}"))),
    }
}

/// Parse a digital input level. Any non-zero value is high.
pub fn parse_io_level(frame: &Frame) -> Result<bool> {
    Ok(parse_value(frame)? != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{DecodeResult, STATUS_REJECTED, decode_frame};

    fn reply(opcode: Opcode, target: u8, values: Vec<i32>) -> Frame {
        Frame {
            opcode: opcode as u8,
            target,
            status: STATUS_OK,
            values,
        }
    }

    // ---------------------------------------------------------------
    // Opcode table
    // ---------------------------------------------------------------

    #[test]
    fn opcode_from_u8_covers_every_variant() {
        for b in 0u8..=0xFF {
            if let Some(op) = Opcode::from_u8(b) {
                assert_eq!(op as u8, b);
            }
        }
        assert_eq!(Opcode::from_u8(0x3A), Some(Opcode::SetHomePulses));
        assert_eq!(Opcode::from_u8(0x00), None);
        assert_eq!(Opcode::from_u8(0x43), None);
    }

    #[test]
    fn only_emergency_stop_is_priority_and_silent() {
        assert!(Opcode::EmergencyStop.is_priority());
        assert!(!Opcode::EmergencyStop.expects_reply());
        assert!(!Opcode::SlowStop.is_priority());
        assert!(Opcode::SlowStop.expects_reply());
    }

    #[test]
    fn field_opcode_maps_agree_with_capabilities() {
        for field in AxisField::ALL {
            assert_eq!(Opcode::query_for(field).is_some(), field.is_queryable());
            assert_eq!(Opcode::set_for(field).is_some(), field.is_settable());
        }
    }

    // ---------------------------------------------------------------
    // Builders
    // ---------------------------------------------------------------

    #[test]
    fn get_param_targets_axis() {
        let cmd = cmd_get_param(2, AxisField::Velocity).unwrap();
        assert_eq!(cmd.opcode(), Opcode::GetVel);
        assert_eq!(cmd.target(), Target::Axis(2));
        assert!(cmd.values().is_empty());
        assert_eq!(cmd.encode(), vec![0xAA, 0x13, 0x02, 0x00, 0x00, 0x15, 0x55]);
    }

    #[test]
    fn get_param_rejects_set_only_field() {
        assert!(matches!(
            cmd_get_param(1, AxisField::HomePulses),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn set_param_rejects_read_only_field() {
        assert!(matches!(
            cmd_set_param(1, AxisField::Status, 0),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            cmd_set_param(1, AxisField::Pulses, 0),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn set_vel_payload() {
        let cmd = cmd_set_param(1, AxisField::Velocity, 500).unwrap();
        assert_eq!(cmd.opcode(), Opcode::SetVel);
        assert_eq!(cmd.values(), &[500]);
    }

    #[test]
    fn broadcast_queries() {
        assert_eq!(cmd_get_axes_num().target(), Target::Broadcast);
        assert_eq!(cmd_get_axes_status().opcode(), Opcode::GetStatus);
        assert_eq!(cmd_get_axes_pulses().target().to_byte(), BROADCAST);
    }

    #[test]
    fn move_axes_batch() {
        let cmd = cmd_move_axes_pulses(&[1, 2, 3, 4]).unwrap();
        assert_eq!(cmd.target(), Target::Broadcast);
        assert_eq!(cmd.values(), &[1, 2, 3, 4]);
        assert_eq!(cmd.encode().len(), 5 + 16 + 2);
    }

    #[test]
    fn move_axes_batch_limits() {
        assert!(cmd_move_axes_vel(&[]).is_err());
        assert!(cmd_move_axes_vel(&[0; 9]).is_err());
        assert!(cmd_move_axes_vel(&[0; 8]).is_ok());
    }

    #[test]
    fn io_output_level() {
        let cmd = cmd_io_output(3, true);
        assert_eq!(cmd.opcode(), Opcode::IoOutput);
        assert_eq!(cmd.target(), Target::Axis(3));
        assert_eq!(cmd.values(), &[1]);
        assert_eq!(cmd_io_output(3, false).values(), &[0]);
    }

    #[test]
    fn every_builder_round_trips_through_codec() {
        let commands = vec![
            cmd_get_axes_num(),
            cmd_move_pulses(1, -1000),
            cmd_move_vel(4, 250),
            cmd_emergency_stop(1),
            cmd_slow_stop(1),
            cmd_home(2, 100),
            cmd_zero_pulses(3),
            cmd_led_twinkle(),
            cmd_restore_defaults(),
            cmd_io_input(8),
            cmd_move_axes_vel(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap(),
        ];
        for cmd in commands {
            let bytes = cmd.encode();
            match decode_frame(&bytes) {
                DecodeResult::Frame(frame, consumed) => {
                    assert_eq!(frame, cmd.to_frame());
                    assert_eq!(consumed, bytes.len());
                }
                other => panic!("{:?} did not decode: {other:?}", cmd.opcode()),
            }
        }
    }

    // ---------------------------------------------------------------
    // Parsers
    // ---------------------------------------------------------------

    #[test]
    fn parse_scalar() {
        let frame = reply(Opcode::GetVel, 1, vec![500]);
        assert_eq!(parse_value(&frame).unwrap(), 500);
    }

    #[test]
    fn parse_rejected_status_is_protocol_error() {
        let mut frame = reply(Opcode::SetVel, 1, vec![]);
        frame.status = STATUS_REJECTED;
        assert!(matches!(check_ack(&frame), Err(Error::Protocol(_))));
        assert!(matches!(parse_value(&frame), Err(Error::Protocol(_))));
    }

    #[test]
    fn parse_axes_values_checks_count() {
        let frame = reply(Opcode::GetPulses, BROADCAST, vec![1, 2, 3, 4]);
        assert_eq!(parse_axes_values(&frame, 4).unwrap(), vec![1, 2, 3, 4]);
        assert!(matches!(
            parse_axes_values(&frame, 8),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn parse_axes_num_accepts_four_and_eight() {
        assert_eq!(
            parse_axes_num(&reply(Opcode::GetAxesNum, 0, vec![4])).unwrap(),
            4
        );
        assert_eq!(
            parse_axes_num(&reply(Opcode::GetAxesNum, 0, vec![8])).unwrap(),
            8
        );
        assert!(parse_axes_num(&reply(Opcode::GetAxesNum, 0, vec![6])).is_err());
        assert!(parse_axes_num(&reply(Opcode::GetAxesNum, 0, vec![-4])).is_err());
    }

    #[test]
    fn parse_io_level_nonzero_is_high() {
        assert!(parse_io_level(&reply(Opcode::IoInput, 1, vec![1])).unwrap());
        assert!(parse_io_level(&reply(Opcode::IoInput, 1, vec![0xFF])).unwrap());
        assert!(!parse_io_level(&reply(Opcode::IoInput, 1, vec![0])).unwrap());
    }
}
