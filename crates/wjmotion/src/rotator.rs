//! Angle-level control of a rotation stage driven by one board axis.
//!
//! The stage shipped with the board ("funky rotator") takes 50 004 pulses
//! per full revolution. [`Rotator`] converts between degrees and pulses and
//! moves to absolute angles by issuing the relative pulse move the board
//! understands.

use std::time::Duration;

use wjmotion_board::Board;
use wjmotion_core::{Error, Result};

/// Pulses per 360 degrees on the stock rotation stage.
pub const DEFAULT_PULSES_PER_REVOLUTION: i32 = 50_004;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Position and motion state of the stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatorStatus {
    pub degrees: f64,
    pub moving: bool,
}

/// A rotation stage on one axis of an open [`Board`].
#[derive(Debug)]
pub struct Rotator<'a> {
    board: &'a Board,
    axis: u8,
    pulses_per_revolution: i32,
    poll_interval: Duration,
}

impl<'a> Rotator<'a> {
    pub fn new(board: &'a Board, axis: u8) -> Result<Self> {
        if axis == 0 || axis > board.axis_count() {
            return Err(Error::Validation(format!(
                "axis {axis} out of range 1..={}",
                board.axis_count()
            )));
        }
        Ok(Rotator {
            board,
            axis,
            pulses_per_revolution: DEFAULT_PULSES_PER_REVOLUTION,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn pulses_per_revolution(mut self, pulses: i32) -> Result<Self> {
        if pulses <= 0 {
            return Err(Error::Validation(format!(
                "pulses per revolution must be positive, got {pulses}"
            )));
        }
        self.pulses_per_revolution = pulses;
        Ok(self)
    }

    /// How often [`wait_until_idle`](Self::wait_until_idle) polls status.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn axis(&self) -> u8 {
        self.axis
    }

    pub fn degrees_to_pulses(&self, degrees: f64) -> i32 {
        (degrees * self.pulses_per_revolution as f64 / 360.0).round() as i32
    }

    pub fn pulses_to_degrees(&self, pulses: i32) -> f64 {
        pulses as f64 * 360.0 / self.pulses_per_revolution as f64
    }

    /// Current angle, from the board's pulse counter.
    pub async fn read_angle(&self) -> Result<f64> {
        let pulses = self.board.get_axis_pulses(self.axis).await?;
        Ok(self.pulses_to_degrees(pulses))
    }

    pub async fn read_status(&self) -> Result<RotatorStatus> {
        let degrees = self.read_angle().await?;
        let status = self.board.get_axis_status(self.axis).await?;
        Ok(RotatorStatus {
            degrees,
            moving: status.is_moving(),
        })
    }

    /// Start a move to an absolute angle in `0..=360` and return without
    /// waiting for it to finish.
    pub async fn move_to_angle(&self, degrees: f64) -> Result<()> {
        if !(0.0..=360.0).contains(&degrees) {
            return Err(Error::Validation(format!(
                "angle {degrees} outside 0..=360 degrees"
            )));
        }
        let current = self.board.get_axis_pulses(self.axis).await?;
        let target = self.degrees_to_pulses(degrees);
        let delta = target.checked_sub(current).ok_or_else(|| {
            Error::Validation(format!(
                "move from pulse {current} to {target} exceeds the 32-bit pulse range"
            ))
        })?;
        tracing::debug!(axis = self.axis, degrees, delta, "rotator move");
        if delta != 0 {
            self.board.move_axis_pulses(self.axis, delta).await?;
        }
        Ok(())
    }

    /// Move to an absolute angle and wait until the axis stops.
    pub async fn go_to_angle(&self, degrees: f64) -> Result<RotatorStatus> {
        self.move_to_angle(degrees).await?;
        self.wait_until_idle().await
    }

    /// Poll until the axis reports it is no longer moving.
    pub async fn wait_until_idle(&self) -> Result<RotatorStatus> {
        loop {
            let status = self.read_status().await?;
            if !status.moving {
                return Ok(status);
            }
            tracing::trace!(axis = self.axis, degrees = status.degrees, "rotator moving");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn read_speed(&self) -> Result<i32> {
        self.board.get_axis_vel(self.axis).await
    }

    pub async fn set_speed(&self, velocity: i32) -> Result<()> {
        self.board.set_axis_vel(self.axis, velocity).await
    }

    pub async fn read_acceleration(&self) -> Result<i32> {
        self.board.get_axis_acc(self.axis).await
    }
}
