//! Simulated motion board.
//!
//! [`SimBoard`] is a [`Transport`] that decodes the command frames written
//! to it and answers the way the board does, from an in-memory model of the
//! axes and I/O lines. Moves complete instantly except velocity-mode runs,
//! which keep the axis `MOVING` until it is stopped.
//!
//! Board state lives behind a cloneable [`SimHandle`], so tests can inspect
//! it, preload inputs, and inject faults while the dispatcher owns the
//! transport. A [`SimConnector`] reuses one handle across reconnects, like a
//! physical board that keeps its state while the host port is closed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use wjmotion_core::{AxisStatus, Connector, Error, PortId, Result, Transport};
use wjmotion_protocol::commands::Opcode;
use wjmotion_protocol::frame::{
    self, BROADCAST, Decoded, Frame, FrameDecoder, STATUS_OK, STATUS_REJECTED,
};

/// Model of one simulated axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisState {
    pub acceleration: i32,
    pub deceleration: i32,
    pub velocity: i32,
    pub subdivision: i32,
    pub pulses: i32,
    pub status: AxisStatus,
    pub slow_stop_deceleration: i32,
    pub velocity_acceleration: i32,
    pub home_pulses: i32,
}

impl Default for AxisState {
    fn default() -> Self {
        AxisState {
            acceleration: 1000,
            deceleration: 1000,
            velocity: 2000,
            subdivision: 16,
            pulses: 0,
            status: AxisStatus::empty(),
            slow_stop_deceleration: 500,
            velocity_acceleration: 1000,
            home_pulses: 0,
        }
    }
}

impl AxisState {
    /// Reset parameters to factory values, keeping position and status.
    fn restore_defaults(&mut self) {
        *self = AxisState {
            pulses: self.pulses,
            status: self.status,
            ..AxisState::default()
        };
    }
}

#[derive(Debug)]
struct SimState {
    axes: Vec<AxisState>,
    outputs: Vec<bool>,
    inputs: Vec<bool>,
    led_twinkles: u32,
    received: Vec<u8>,
    opened_ports: Vec<PortId>,
    reply_delay: Duration,
    drop_replies: u32,
    corrupt_replies: u32,
    reject_commands: u32,
    fail_next_send: bool,
    refuse_connect: bool,
}

/// Shared handle to a simulated board's state.
#[derive(Debug, Clone)]
pub struct SimHandle(Arc<Mutex<SimState>>);

impl SimHandle {
    /// A board with `axis_count` axes and `io_lines` input and output lines.
    pub fn new(axis_count: u8, io_lines: u8) -> Self {
        SimHandle(Arc::new(Mutex::new(SimState {
            axes: vec![AxisState::default(); axis_count as usize],
            outputs: vec![false; io_lines as usize],
            inputs: vec![false; io_lines as usize],
            led_twinkles: 0,
            received: Vec::new(),
            opened_ports: Vec::new(),
            reply_delay: Duration::ZERO,
            drop_replies: 0,
            corrupt_replies: 0,
            reject_commands: 0,
            fail_next_send: false,
            refuse_connect: false,
        })))
    }

    pub fn axis_count(&self) -> u8 {
        self.0.lock().axes.len() as u8
    }

    /// Snapshot of axis `axis` (1-based).
    ///
    /// # Panics
    ///
    /// Panics if the axis does not exist.
    pub fn axis(&self, axis: u8) -> AxisState {
        self.0.lock().axes[axis as usize - 1].clone()
    }

    /// Mutate axis `axis` (1-based) directly.
    pub fn update_axis(&self, axis: u8, f: impl FnOnce(&mut AxisState)) {
        f(&mut self.0.lock().axes[axis as usize - 1]);
    }

    pub fn set_input(&self, line: u8, high: bool) {
        self.0.lock().inputs[line as usize - 1] = high;
    }

    pub fn output(&self, line: u8) -> bool {
        self.0.lock().outputs[line as usize - 1]
    }

    pub fn led_twinkles(&self) -> u32 {
        self.0.lock().led_twinkles
    }

    /// Opcode of every well-formed frame the board received, in order.
    pub fn received_opcodes(&self) -> Vec<u8> {
        self.0.lock().received.clone()
    }

    pub fn opened_ports(&self) -> Vec<PortId> {
        self.0.lock().opened_ports.clone()
    }

    /// Delay every reply by `delay`.
    pub fn set_reply_delay(&self, delay: Duration) {
        self.0.lock().reply_delay = delay;
    }

    /// Execute the next `n` commands but send no reply.
    pub fn drop_next_replies(&self, n: u32) {
        self.0.lock().drop_replies = n;
    }

    /// Flip the checksum of the next `n` replies.
    pub fn corrupt_next_replies(&self, n: u32) {
        self.0.lock().corrupt_replies = n;
    }

    /// Refuse the next `n` commands with a rejected status.
    pub fn reject_next(&self, n: u32) {
        self.0.lock().reject_commands = n;
    }

    /// Fail the next write as if the cable was pulled.
    pub fn fail_next_send(&self) {
        self.0.lock().fail_next_send = true;
    }

    /// Make [`SimConnector::connect`] fail.
    pub fn refuse_connect(&self, refuse: bool) {
        self.0.lock().refuse_connect = refuse;
    }

    pub fn connector(&self) -> SimConnector {
        SimConnector::new(self.clone())
    }
}

impl SimState {
    fn axis_mut(&mut self, target: u8) -> Option<&mut AxisState> {
        if target == BROADCAST {
            return None;
        }
        self.axes.get_mut(target as usize - 1)
    }

    fn line_index(&self, target: u8) -> Option<usize> {
        let idx = (target as usize).checked_sub(1)?;
        (idx < self.outputs.len()).then_some(idx)
    }

    /// Execute one command. `None` means reject it.
    fn execute(&mut self, op: Opcode, target: u8, values: &[i32]) -> Option<Vec<i32>> {
        let count = self.axes.len();
        match (op, values) {
            (Opcode::GetAxesNum, []) => Some(vec![count as i32]),

            (Opcode::GetStatus, []) if target == BROADCAST => {
                Some(self.axes.iter().map(|a| a.status.raw()).collect())
            }
            (Opcode::GetPulses, []) if target == BROADCAST => {
                Some(self.axes.iter().map(|a| a.pulses).collect())
            }
            (Opcode::GetAcc, []) => self.axis_mut(target).map(|a| vec![a.acceleration]),
            (Opcode::GetDec, []) => self.axis_mut(target).map(|a| vec![a.deceleration]),
            (Opcode::GetVel, []) => self.axis_mut(target).map(|a| vec![a.velocity]),
            (Opcode::GetSubdivision, []) => self.axis_mut(target).map(|a| vec![a.subdivision]),
            (Opcode::GetStatus, []) => self.axis_mut(target).map(|a| vec![a.status.raw()]),
            (Opcode::GetPulses, []) => self.axis_mut(target).map(|a| vec![a.pulses]),

            (Opcode::MovePulses, deltas) if target == BROADCAST && deltas.len() == count => {
                for (axis, d) in self.axes.iter_mut().zip(deltas) {
                    axis.pulses = axis.pulses.wrapping_add(*d);
                    axis.status.remove(AxisStatus::HOME);
                }
                Some(Vec::new())
            }
            (Opcode::MoveVel, vels) if target == BROADCAST && vels.len() == count => {
                for (axis, v) in self.axes.iter_mut().zip(vels) {
                    axis.status.set(AxisStatus::MOVING, *v != 0);
                }
                Some(Vec::new())
            }
            (Opcode::MovePulses, [d]) => self.axis_mut(target).map(|a| {
                a.pulses = a.pulses.wrapping_add(*d);
                a.status.remove(AxisStatus::HOME);
                Vec::new()
            }),
            (Opcode::MoveVel, [v]) => self.axis_mut(target).map(|a| {
                a.status.set(AxisStatus::MOVING, *v != 0);
                Vec::new()
            }),
            (Opcode::EmergencyStop | Opcode::SlowStop, []) => self.axis_mut(target).map(|a| {
                a.status.remove(AxisStatus::MOVING);
                Vec::new()
            }),
            (Opcode::Home, [_velocity]) => self.axis_mut(target).map(|a| {
                a.pulses = a.home_pulses;
                a.status.remove(AxisStatus::MOVING);
                a.status.insert(AxisStatus::HOME);
                Vec::new()
            }),

            (Opcode::SetAcc, [v]) => self.set(target, *v, |a| &mut a.acceleration),
            (Opcode::SetDec, [v]) => self.set(target, *v, |a| &mut a.deceleration),
            (Opcode::SetVel, [v]) => self.set(target, *v, |a| &mut a.velocity),
            (Opcode::SetSubdivision, [v]) => self.set(target, *v, |a| &mut a.subdivision),
            (Opcode::SetSlowStop, [v]) => self.set(target, *v, |a| &mut a.slow_stop_deceleration),
            (Opcode::SetVelAcc, [v]) => self.set(target, *v, |a| &mut a.velocity_acceleration),
            (Opcode::SetHomePulses, [v]) => self.set(target, *v, |a| &mut a.home_pulses),
            (Opcode::PulsesZero, []) => self.set(target, 0, |a| &mut a.pulses),
            (Opcode::LedTwinkle, []) => {
                self.led_twinkles += 1;
                Some(Vec::new())
            }
            (Opcode::RestoreDefaults, []) => {
                self.axes.iter_mut().for_each(AxisState::restore_defaults);
                Some(Vec::new())
            }

            (Opcode::IoOutput, [level]) => {
                let idx = self.line_index(target)?;
                self.outputs[idx] = *level != 0;
                Some(Vec::new())
            }
            (Opcode::IoInput, []) => {
                let idx = self.line_index(target)?;
                Some(vec![self.inputs[idx] as i32])
            }

            _ => None,
        }
    }

    fn set(
        &mut self,
        target: u8,
        value: i32,
        field: impl FnOnce(&mut AxisState) -> &mut i32,
    ) -> Option<Vec<i32>> {
        let axis = self.axis_mut(target)?;
        *field(axis) = value;
        Some(Vec::new())
    }

    fn handle(&mut self, command: Frame) -> Frame {
        self.received.push(command.opcode);

        let values = if self.reject_commands > 0 {
            self.reject_commands -= 1;
            None
        } else {
            Opcode::from_u8(command.opcode)
                .and_then(|op| self.execute(op, command.target, &command.values))
        };

        match values {
            Some(values) => Frame {
                opcode: command.opcode,
                target: command.target,
                status: STATUS_OK,
                values,
            },
            None => {
                tracing::debug!(opcode = command.opcode, "simulated board rejects command");
                Frame {
                    opcode: command.opcode,
                    target: command.target,
                    status: STATUS_REJECTED,
                    values: Vec::new(),
                }
            }
        }
    }
}

/// A [`Transport`] backed by the simulated board.
#[derive(Debug)]
pub struct SimBoard {
    state: SimHandle,
    decoder: FrameDecoder,
    outbox: VecDeque<(Instant, Vec<u8>)>,
    ready: VecDeque<u8>,
    closed: bool,
}

impl SimBoard {
    pub fn new(state: SimHandle) -> Self {
        SimBoard {
            state,
            decoder: FrameDecoder::new(),
            outbox: VecDeque::new(),
            ready: VecDeque::new(),
            closed: false,
        }
    }

    pub fn handle(&self) -> SimHandle {
        self.state.clone()
    }
}

#[async_trait]
impl Transport for SimBoard {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        let mut state = self.state.0.lock();
        if std::mem::take(&mut state.fail_next_send) {
            return Err(Error::ConnectionLost);
        }

        self.decoder.push(data);
        while let Some(item) = self.decoder.decode_next() {
            let command = match item {
                Decoded::Frame(f) => f,
                Decoded::Malformed(reason) => {
                    tracing::debug!(%reason, "simulated board ignores corrupt frame");
                    continue;
                }
            };
            let reply = state.handle(command);
            if state.drop_replies > 0 {
                state.drop_replies -= 1;
                continue;
            }
            let mut bytes = frame::encode(&reply);
            if state.corrupt_replies > 0 {
                state.corrupt_replies -= 1;
                let idx = bytes.len() - 2;
                bytes[idx] ^= 0xFF;
            }
            self.outbox
                .push_back((Instant::now() + state.reply_delay, bytes));
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        let deadline = Instant::now() + timeout;
        loop {
            if !self.ready.is_empty() {
                let n = self.ready.len().min(buf.len());
                for (slot, byte) in buf.iter_mut().zip(self.ready.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            match self.outbox.front() {
                Some((at, _)) if *at <= Instant::now() => {
                    if let Some((_, bytes)) = self.outbox.pop_front() {
                        self.ready.extend(bytes);
                    }
                }
                Some((at, _)) if *at <= deadline => tokio::time::sleep_until(*at).await,
                _ => {
                    tokio::time::sleep_until(deadline).await;
                    return Err(Error::Timeout);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.outbox.clear();
        self.ready.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed
    }
}

/// Opens [`SimBoard`] transports that share one board state.
#[derive(Debug, Clone)]
pub struct SimConnector {
    state: SimHandle,
}

impl SimConnector {
    pub fn new(state: SimHandle) -> Self {
        SimConnector { state }
    }

    pub fn handle(&self) -> SimHandle {
        self.state.clone()
    }
}

#[async_trait]
impl Connector for SimConnector {
    async fn connect(&self, port: PortId) -> Result<Box<dyn Transport>> {
        {
            let mut state = self.state.0.lock();
            if state.refuse_connect {
                return Err(Error::Transport(format!("cannot open {port}")));
            }
            state.opened_ports.push(port);
        }
        tracing::debug!(%port, "simulated board connected");
        Ok(Box::new(SimBoard::new(self.state.clone())))
    }
}
