//! The driver facade: one open connection to one board.
//!
//! A [`Board`] owns the dispatcher (and through it the transport) and the
//! axis registry. Every operation checks the connection, then validates
//! its axis or I/O index against the registry, and only then touches the
//! transport. All methods take `&self`; share a `Board` behind an `Arc` to
//! issue commands from several tasks at once.

use tokio::sync::broadcast;
use wjmotion_core::{
    AxisField, AxisStatus, BoardInfo, Error, LinkState, MotionEvent, PortId, Result, Transport,
};
use wjmotion_protocol::commands::{
    self, cmd_emergency_stop, cmd_get_axes_num, cmd_home, cmd_io_input, cmd_io_output,
    cmd_led_twinkle, cmd_move_axes_pulses, cmd_move_axes_vel, cmd_move_pulses, cmd_move_vel,
    cmd_restore_defaults, cmd_slow_stop,
};
use wjmotion_protocol::Command;

use crate::io::{Dispatcher, DispatcherConfig};
use crate::registry::{AxisRegistry, CachedValue};

/// An open connection to a motion board.
pub struct Board {
    info: BoardInfo,
    dispatcher: Dispatcher,
    registry: AxisRegistry,
    event_tx: broadcast::Sender<MotionEvent>,
}

impl Board {
    /// Take over an open transport and identify the board.
    ///
    /// Queries the axis count; a board that does not answer, or reports an
    /// axis count other than 4 or 8, is released again and the error
    /// returned.
    pub(crate) async fn connect(
        transport: Box<dyn Transport>,
        port: PortId,
        io_lines: u8,
        config: DispatcherConfig,
        event_capacity: usize,
    ) -> Result<Self> {
        let (event_tx, _) = broadcast::channel(event_capacity);
        let dispatcher = Dispatcher::spawn(transport, config, event_tx.clone());

        let axis_count = match dispatcher.request(cmd_get_axes_num()).await {
            Ok(frame) => commands::parse_axes_num(&frame),
            Err(e) => Err(e),
        };
        let axis_count = match axis_count {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(%port, error = %e, "board did not identify itself");
                let _ = dispatcher.shutdown().await;
                return Err(e);
            }
        };

        tracing::info!(%port, axis_count, io_lines, "board connected");
        let _ = event_tx.send(MotionEvent::Connected { axis_count });

        Ok(Board {
            info: BoardInfo {
                axis_count,
                io_lines,
                port,
            },
            registry: AxisRegistry::new(axis_count, io_lines, event_tx.clone()),
            dispatcher,
            event_tx,
        })
    }

    // ---------------------------------------------------------------
    // Connection
    // ---------------------------------------------------------------

    pub fn info(&self) -> &BoardInfo {
        &self.info
    }

    pub fn axis_count(&self) -> u8 {
        self.info.axis_count
    }

    pub fn state(&self) -> LinkState {
        self.dispatcher.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Open
    }

    /// Subscribe to board events.
    pub fn subscribe(&self) -> broadcast::Receiver<MotionEvent> {
        self.event_tx.subscribe()
    }

    /// Close the connection.
    ///
    /// Waits for the in-flight command, fails everything still queued with
    /// [`Error::NotConnected`], and releases the transport. Closing a
    /// connection that is already closed or faulted returns
    /// [`Error::NotConnected`].
    pub async fn close(&self) -> Result<()> {
        self.ensure_connected()?;
        self.dispatcher.shutdown().await?;
        tracing::info!(port = %self.info.port, "board connection closed");
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn check_axis(&self, axis: u8) -> Result<()> {
        self.ensure_connected()?;
        self.registry.validate_axis(axis)
    }

    fn check_io_line(&self, line: u8) -> Result<()> {
        self.ensure_connected()?;
        self.registry.validate_io_line(line)
    }

    fn check_batch(&self, len: usize) -> Result<()> {
        self.ensure_connected()?;
        self.registry.validate_batch(len)
    }

    /// Send a command and require an OK acknowledgement.
    async fn execute(&self, command: Command) -> Result<()> {
        let frame = self.dispatcher.request(command).await?;
        commands::check_ack(&frame)
    }

    // ---------------------------------------------------------------
    // Per-axis parameters
    // ---------------------------------------------------------------

    /// Query a field from the board (and cache it).
    pub async fn get_param(&self, axis: u8, field: AxisField) -> Result<i32> {
        self.check_axis(axis)?;
        self.registry.refresh(&self.dispatcher, axis, field).await
    }

    /// Write a field to the board (and cache it once acknowledged).
    pub async fn set_param(&self, axis: u8, field: AxisField, value: i32) -> Result<()> {
        self.check_axis(axis)?;
        self.registry.set(&self.dispatcher, axis, field, value).await
    }

    /// Last confirmed value of a field, without I/O.
    pub fn cached(&self, axis: u8, field: AxisField) -> Option<CachedValue> {
        self.registry.entry(axis, field)
    }

    pub async fn get_axis_acc(&self, axis: u8) -> Result<i32> {
        self.get_param(axis, AxisField::Acceleration).await
    }

    pub async fn get_axis_dec(&self, axis: u8) -> Result<i32> {
        self.get_param(axis, AxisField::Deceleration).await
    }

    pub async fn get_axis_vel(&self, axis: u8) -> Result<i32> {
        self.get_param(axis, AxisField::Velocity).await
    }

    pub async fn get_axis_subdivision(&self, axis: u8) -> Result<i32> {
        self.get_param(axis, AxisField::Subdivision).await
    }

    pub async fn get_axis_status(&self, axis: u8) -> Result<AxisStatus> {
        self.get_param(axis, AxisField::Status)
            .await
            .map(AxisStatus::from_raw)
    }

    pub async fn get_axis_pulses(&self, axis: u8) -> Result<i32> {
        self.get_param(axis, AxisField::Pulses).await
    }

    pub async fn set_axis_acc(&self, axis: u8, value: i32) -> Result<()> {
        self.set_param(axis, AxisField::Acceleration, value).await
    }

    pub async fn set_axis_dec(&self, axis: u8, value: i32) -> Result<()> {
        self.set_param(axis, AxisField::Deceleration, value).await
    }

    pub async fn set_axis_vel(&self, axis: u8, value: i32) -> Result<()> {
        self.set_param(axis, AxisField::Velocity, value).await
    }

    pub async fn set_axis_subdivision(&self, axis: u8, value: i32) -> Result<()> {
        self.set_param(axis, AxisField::Subdivision, value).await
    }

    /// Deceleration used by [`slow_stop`](Self::slow_stop).
    pub async fn set_axis_slow_stop(&self, axis: u8, value: i32) -> Result<()> {
        self.set_param(axis, AxisField::SlowStopDeceleration, value)
            .await
    }

    /// Acceleration used by velocity-mode moves.
    pub async fn set_move_axis_vel_acc(&self, axis: u8, value: i32) -> Result<()> {
        self.set_param(axis, AxisField::VelocityAcceleration, value)
            .await
    }

    /// Pulse value an axis takes when homed.
    pub async fn set_axis_home_pulses(&self, axis: u8, value: i32) -> Result<()> {
        self.set_param(axis, AxisField::HomePulses, value).await
    }

    /// Reset an axis pulse counter to zero.
    pub async fn set_axis_pulses_zero(&self, axis: u8) -> Result<()> {
        self.check_axis(axis)?;
        self.registry.zero(&self.dispatcher, axis).await
    }

    // ---------------------------------------------------------------
    // All axes
    // ---------------------------------------------------------------

    /// Ask the board how many axes it has.
    pub async fn get_axes_num(&self) -> Result<u8> {
        self.ensure_connected()?;
        let frame = self.dispatcher.request(cmd_get_axes_num()).await?;
        let n = commands::parse_axes_num(&frame)?;
        if n != self.info.axis_count {
            tracing::warn!(
                reported = n,
                at_connect = self.info.axis_count,
                "board changed its axis count"
            );
        }
        Ok(n)
    }

    /// Status of every axis, axis 1 first.
    pub async fn get_axes_status(&self) -> Result<Vec<AxisStatus>> {
        self.ensure_connected()?;
        self.registry.refresh_all_status(&self.dispatcher).await
    }

    /// Pulse counter of every axis, axis 1 first.
    pub async fn get_axes_pulses(&self) -> Result<Vec<i32>> {
        self.ensure_connected()?;
        self.registry.refresh_all_pulses(&self.dispatcher).await
    }

    // ---------------------------------------------------------------
    // Motion
    // ---------------------------------------------------------------

    /// Move an axis by a relative number of pulses.
    pub async fn move_axis_pulses(&self, axis: u8, pulses: i32) -> Result<()> {
        self.check_axis(axis)?;
        self.execute(cmd_move_pulses(axis, pulses)).await
    }

    /// Run an axis continuously at a signed velocity.
    pub async fn move_axis_vel(&self, axis: u8, velocity: i32) -> Result<()> {
        self.check_axis(axis)?;
        self.execute(cmd_move_vel(axis, velocity)).await
    }

    /// Move every axis by its own pulse count. `pulses` must hold exactly
    /// one entry per axis.
    pub async fn move_axes_pulses(&self, pulses: &[i32]) -> Result<()> {
        self.check_batch(pulses.len())?;
        self.execute(cmd_move_axes_pulses(pulses)?).await
    }

    /// Run every axis at its own velocity. `velocities` must hold exactly
    /// one entry per axis.
    pub async fn move_axes_vel(&self, velocities: &[i32]) -> Result<()> {
        self.check_batch(velocities.len())?;
        self.execute(cmd_move_axes_vel(velocities)?).await
    }

    /// Stop an axis immediately.
    ///
    /// Jumps the queue and does not wait for an acknowledgement; returns
    /// once the command is on the wire.
    pub async fn emergency_stop(&self, axis: u8) -> Result<()> {
        self.check_axis(axis)?;
        tracing::warn!(axis, "emergency stop");
        self.dispatcher
            .send_no_reply(cmd_emergency_stop(axis))
            .await
    }

    /// Decelerate an axis to a stop.
    pub async fn slow_stop(&self, axis: u8) -> Result<()> {
        self.check_axis(axis)?;
        self.execute(cmd_slow_stop(axis)).await
    }

    /// Drive an axis to its home reference at `velocity`.
    pub async fn home(&self, axis: u8, velocity: i32) -> Result<()> {
        self.check_axis(axis)?;
        self.execute(cmd_home(axis, velocity)).await
    }

    // ---------------------------------------------------------------
    // Board-wide
    // ---------------------------------------------------------------

    /// Blink the indicator LED.
    pub async fn led_twinkle(&self) -> Result<()> {
        self.ensure_connected()?;
        self.execute(cmd_led_twinkle()).await
    }

    /// Restore factory defaults. Drops every cached value.
    pub async fn restore_defaults(&self) -> Result<()> {
        self.ensure_connected()?;
        self.execute(cmd_restore_defaults()).await?;
        self.registry.clear();
        Ok(())
    }

    // ---------------------------------------------------------------
    // Digital I/O
    // ---------------------------------------------------------------

    /// Drive output line `line` high or low.
    pub async fn io_output(&self, line: u8, high: bool) -> Result<()> {
        self.check_io_line(line)?;
        self.execute(cmd_io_output(line, high)).await
    }

    /// Read input line `line`.
    pub async fn io_input(&self, line: u8) -> Result<bool> {
        self.check_io_line(line)?;
        let frame = self.dispatcher.request(cmd_io_input(line)).await?;
        commands::parse_io_level(&frame)
    }
}

impl std::fmt::Debug for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Board")
            .field("info", &self.info)
            .field("state", &self.state())
            .finish()
    }
}
