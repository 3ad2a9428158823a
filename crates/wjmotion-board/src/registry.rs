//! Axis registry: the driver's mirror of per-axis board state.
//!
//! The cache only ever holds values the board confirmed: a query reply, or
//! the value of a set command the board acknowledged. Failed or pending
//! exchanges never touch it.
//!
//! Every entry carries a [`Stamp`]. Sequence numbers are taken when a
//! command is queued, under the same lock that queues it, so they follow
//! the dispatcher's FIFO order. An entry is only replaced by a
//! confirmation with a higher sequence number, which keeps a slow caller
//! from overwriting a newer value with an older reply.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use wjmotion_core::{AxisField, AxisStatus, Error, MotionEvent, Result};
use wjmotion_protocol::commands::{
    self, cmd_get_axes_pulses, cmd_get_axes_status, cmd_get_param, cmd_set_param,
    cmd_zero_pulses,
};
use wjmotion_protocol::{Command, Frame};

use crate::io::{Dispatcher, PendingReply};

/// When a cached value was confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stamp {
    /// Queue position of the confirming command. Strictly increasing.
    pub seq: u64,
    pub at: Instant,
}

/// A confirmed value and its stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedValue {
    pub value: i32,
    pub stamp: Stamp,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<(u8, AxisField), CachedValue>,
    /// Last sequence number handed out.
    issued: u64,
}

/// Per-axis cache plus the range checks every operation runs first.
#[derive(Debug)]
pub struct AxisRegistry {
    axis_count: u8,
    io_lines: u8,
    inner: Mutex<Inner>,
    event_tx: broadcast::Sender<MotionEvent>,
}

impl AxisRegistry {
    pub fn new(axis_count: u8, io_lines: u8, event_tx: broadcast::Sender<MotionEvent>) -> Self {
        AxisRegistry {
            axis_count,
            io_lines,
            inner: Mutex::new(Inner::default()),
            event_tx,
        }
    }

    pub fn axis_count(&self) -> u8 {
        self.axis_count
    }

    pub fn io_lines(&self) -> u8 {
        self.io_lines
    }

    // ---------------------------------------------------------------
    // Validation
    // ---------------------------------------------------------------

    /// Check that `axis` is within `1..=axis_count`.
    pub fn validate_axis(&self, axis: u8) -> Result<()> {
        if axis == 0 || axis > self.axis_count {
            return Err(Error::Validation(format!(
                "axis {axis} out of range 1..={}",
                self.axis_count
            )));
        }
        Ok(())
    }

    /// Check that `line` is within `1..=io_lines`.
    pub fn validate_io_line(&self, line: u8) -> Result<()> {
        if line == 0 || line > self.io_lines {
            return Err(Error::Validation(format!(
                "I/O line {line} out of range 1..={}",
                self.io_lines
            )));
        }
        Ok(())
    }

    /// Check that an all-axes sequence has exactly one entry per axis.
    pub fn validate_batch(&self, len: usize) -> Result<()> {
        if len != self.axis_count as usize {
            return Err(Error::Validation(format!(
                "expected {} axis values, got {len}",
                self.axis_count
            )));
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Cache access
    // ---------------------------------------------------------------

    /// Last confirmed value, without I/O.
    pub fn get(&self, axis: u8, field: AxisField) -> Option<i32> {
        self.entry(axis, field).map(|c| c.value)
    }

    /// Last confirmed value with its stamp.
    pub fn entry(&self, axis: u8, field: AxisField) -> Option<CachedValue> {
        self.inner.lock().entries.get(&(axis, field)).copied()
    }

    /// Forget every cached value.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Queue `command` and take the next sequence number in one step.
    fn submit(&self, dispatcher: &Dispatcher, command: Command) -> Result<(u64, PendingReply)> {
        let mut inner = self.inner.lock();
        let pending = dispatcher.submit(command, dispatcher.config().command_timeout)?;
        inner.issued += 1;
        Ok((inner.issued, pending))
    }

    /// Store a confirmed value unless a newer confirmation is already cached.
    fn record(&self, axis: u8, field: AxisField, value: i32, seq: u64) {
        let previous = {
            let mut inner = self.inner.lock();
            let slot = inner.entries.get(&(axis, field)).copied();
            if slot.is_some_and(|c| c.stamp.seq > seq) {
                tracing::debug!(axis, %field, seq, "discarding stale confirmation");
                return;
            }
            let stamp = Stamp {
                seq,
                at: Instant::now(),
            };
            inner
                .entries
                .insert((axis, field), CachedValue { value, stamp });
            slot.map(|c| c.value)
        };

        if previous != Some(value) {
            let event = match field {
                AxisField::Pulses => MotionEvent::PositionChanged {
                    axis,
                    pulses: value,
                },
                AxisField::Status => MotionEvent::StatusChanged {
                    axis,
                    status: AxisStatus::from_raw(value),
                },
                _ => MotionEvent::ParameterChanged { axis, field, value },
            };
            let _ = self.event_tx.send(event);
        }
    }

    async fn exchange(&self, dispatcher: &Dispatcher, command: Command) -> Result<(u64, Frame)> {
        let (seq, pending) = self.submit(dispatcher, command)?;
        Ok((seq, pending.wait().await?))
    }

    // ---------------------------------------------------------------
    // Board round trips
    // ---------------------------------------------------------------

    /// Query one field from the board and cache the reply.
    pub async fn refresh(
        &self,
        dispatcher: &Dispatcher,
        axis: u8,
        field: AxisField,
    ) -> Result<i32> {
        self.validate_axis(axis)?;
        let command = cmd_get_param(axis, field)?;
        let (seq, frame) = self.exchange(dispatcher, command).await?;
        let value = commands::parse_value(&frame)?;
        self.record(axis, field, value, seq);
        Ok(value)
    }

    /// Write one field and cache it once the board acknowledges.
    pub async fn set(
        &self,
        dispatcher: &Dispatcher,
        axis: u8,
        field: AxisField,
        value: i32,
    ) -> Result<()> {
        self.validate_axis(axis)?;
        let command = cmd_set_param(axis, field, value)?;
        let (seq, frame) = self.exchange(dispatcher, command).await?;
        commands::check_ack(&frame)?;
        self.record(axis, field, value, seq);
        Ok(())
    }

    /// Reset an axis pulse counter; caches pulses = 0.
    pub async fn zero(&self, dispatcher: &Dispatcher, axis: u8) -> Result<()> {
        self.validate_axis(axis)?;
        let (seq, frame) = self.exchange(dispatcher, cmd_zero_pulses(axis)).await?;
        commands::check_ack(&frame)?;
        self.record(axis, AxisField::Pulses, 0, seq);
        Ok(())
    }

    /// Query the status of every axis.
    pub async fn refresh_all_status(&self, dispatcher: &Dispatcher) -> Result<Vec<AxisStatus>> {
        let values = self
            .refresh_all(dispatcher, cmd_get_axes_status(), AxisField::Status)
            .await?;
        Ok(values.into_iter().map(AxisStatus::from_raw).collect())
    }

    /// Query the pulse counter of every axis.
    pub async fn refresh_all_pulses(&self, dispatcher: &Dispatcher) -> Result<Vec<i32>> {
        self.refresh_all(dispatcher, cmd_get_axes_pulses(), AxisField::Pulses)
            .await
    }

    async fn refresh_all(
        &self,
        dispatcher: &Dispatcher,
        command: Command,
        field: AxisField,
    ) -> Result<Vec<i32>> {
        let (seq, frame) = self.exchange(dispatcher, command).await?;
        let values = commands::parse_axes_values(&frame, self.axis_count)?;
        for (axis, value) in (1..=self.axis_count).zip(&values) {
            self.record(axis, field, *value, seq);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::DispatcherConfig;
    use std::time::Duration;
    use wjmotion_test_harness::{MockTransport, SimBoard, SimHandle};

    fn setup(handle: &SimHandle) -> (Dispatcher, AxisRegistry, broadcast::Receiver<MotionEvent>) {
        let (event_tx, event_rx) = broadcast::channel(64);
        let config = DispatcherConfig {
            command_timeout: Duration::from_millis(30),
            max_retries: 0,
        };
        let dispatcher = Dispatcher::spawn(
            Box::new(SimBoard::new(handle.clone())),
            config,
            event_tx.clone(),
        );
        let registry = AxisRegistry::new(handle.axis_count(), 8, event_tx);
        (dispatcher, registry, event_rx)
    }

    #[test]
    fn validation_ranges() {
        let (tx, _) = broadcast::channel(1);
        let reg = AxisRegistry::new(4, 8, tx);
        assert!(reg.validate_axis(1).is_ok());
        assert!(reg.validate_axis(4).is_ok());
        assert!(matches!(reg.validate_axis(0), Err(Error::Validation(_))));
        assert!(matches!(reg.validate_axis(5), Err(Error::Validation(_))));
        assert!(reg.validate_io_line(8).is_ok());
        assert!(reg.validate_io_line(9).is_err());
        assert!(reg.validate_batch(4).is_ok());
        assert!(reg.validate_batch(3).is_err());
        assert!(reg.validate_batch(8).is_err());
    }

    #[test]
    fn empty_cache() {
        let (tx, _) = broadcast::channel(1);
        let reg = AxisRegistry::new(4, 8, tx);
        assert_eq!(reg.get(1, AxisField::Velocity), None);
    }

    #[test]
    fn stale_confirmation_does_not_overwrite_newer() {
        let (tx, _) = broadcast::channel(8);
        let reg = AxisRegistry::new(4, 8, tx);
        reg.record(1, AxisField::Velocity, 200, 5);
        reg.record(1, AxisField::Velocity, 100, 4);
        assert_eq!(reg.get(1, AxisField::Velocity), Some(200));
        reg.record(1, AxisField::Velocity, 300, 6);
        let entry = reg.entry(1, AxisField::Velocity).unwrap();
        assert_eq!(entry.value, 300);
        assert_eq!(entry.stamp.seq, 6);
    }

    #[tokio::test]
    async fn refresh_caches_reply() {
        let handle = SimHandle::new(4, 8);
        handle.update_axis(2, |a| a.acceleration = 1234);
        let (io, reg, mut events) = setup(&handle);

        assert_eq!(reg.refresh(&io, 2, AxisField::Acceleration).await.unwrap(), 1234);
        assert_eq!(reg.get(2, AxisField::Acceleration), Some(1234));
        assert_eq!(
            events.recv().await.unwrap(),
            MotionEvent::ParameterChanged {
                axis: 2,
                field: AxisField::Acceleration,
                value: 1234
            }
        );
    }

    #[tokio::test]
    async fn stamps_increase_with_each_confirmation() {
        let handle = SimHandle::new(4, 8);
        let (io, reg, _events) = setup(&handle);
        reg.refresh(&io, 1, AxisField::Velocity).await.unwrap();
        let first = reg.entry(1, AxisField::Velocity).unwrap().stamp;
        reg.set(&io, 1, AxisField::Velocity, 700).await.unwrap();
        let second = reg.entry(1, AxisField::Velocity).unwrap().stamp;
        assert!(second > first);
    }

    #[tokio::test]
    async fn set_updates_cache_after_ack() {
        let handle = SimHandle::new(4, 8);
        let (io, reg, _events) = setup(&handle);
        reg.set(&io, 1, AxisField::Velocity, 500).await.unwrap();
        assert_eq!(reg.get(1, AxisField::Velocity), Some(500));
        assert_eq!(handle.axis(1).velocity, 500);
    }

    #[tokio::test]
    async fn failed_set_leaves_cache_unchanged() {
        let handle = SimHandle::new(4, 8);
        let (io, reg, _events) = setup(&handle);
        reg.set(&io, 1, AxisField::Velocity, 500).await.unwrap();

        handle.reject_next(1);
        let result = reg.set(&io, 1, AxisField::Velocity, 900).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(reg.get(1, AxisField::Velocity), Some(500));

        handle.drop_next_replies(1);
        let result = reg.set(&io, 1, AxisField::Velocity, 901).await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(reg.get(1, AxisField::Velocity), Some(500));
    }

    #[tokio::test]
    async fn failed_query_leaves_cache_unchanged() {
        let handle = SimHandle::new(4, 8);
        let (io, reg, _events) = setup(&handle);
        reg.refresh(&io, 3, AxisField::Subdivision).await.unwrap();
        handle.update_axis(3, |a| a.subdivision = 32);
        handle.drop_next_replies(1);
        assert!(reg.refresh(&io, 3, AxisField::Subdivision).await.is_err());
        assert_eq!(reg.get(3, AxisField::Subdivision), Some(16));
    }

    #[tokio::test]
    async fn zero_caches_zero_pulses() {
        let handle = SimHandle::new(4, 8);
        handle.update_axis(1, |a| a.pulses = 4200);
        let (io, reg, _events) = setup(&handle);
        reg.refresh(&io, 1, AxisField::Pulses).await.unwrap();
        reg.zero(&io, 1).await.unwrap();
        assert_eq!(reg.get(1, AxisField::Pulses), Some(0));
        assert_eq!(reg.refresh(&io, 1, AxisField::Pulses).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn batch_refresh_fills_every_axis() {
        let handle = SimHandle::new(8, 8);
        for axis in 1..=8 {
            handle.update_axis(axis, |a| a.pulses = axis as i32 * 10);
        }
        let (io, reg, _events) = setup(&handle);
        let pulses = reg.refresh_all_pulses(&io).await.unwrap();
        assert_eq!(pulses, vec![10, 20, 30, 40, 50, 60, 70, 80]);
        assert_eq!(reg.get(8, AxisField::Pulses), Some(80));

        handle.update_axis(2, |a| a.status = AxisStatus::MOVING);
        let status = reg.refresh_all_status(&io).await.unwrap();
        assert!(status[1].is_moving());
        assert!(status[0].is_idle());
    }

    #[tokio::test]
    async fn out_of_range_axis_never_reaches_transport() {
        let mock = MockTransport::silent();
        let log = mock.sent_log();
        let (event_tx, _) = broadcast::channel(4);
        let io = Dispatcher::spawn(Box::new(mock), DispatcherConfig::default(), event_tx.clone());
        let reg = AxisRegistry::new(4, 8, event_tx);

        assert!(matches!(
            reg.refresh(&io, 5, AxisField::Velocity).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            reg.set(&io, 0, AxisField::Velocity, 1).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(reg.zero(&io, 9).await, Err(Error::Validation(_))));
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn set_only_field_cannot_be_refreshed() {
        let handle = SimHandle::new(4, 8);
        let (io, reg, _events) = setup(&handle);
        assert!(matches!(
            reg.refresh(&io, 1, AxisField::HomePulses).await,
            Err(Error::Validation(_))
        ));
        reg.set(&io, 1, AxisField::HomePulses, 77).await.unwrap();
        assert_eq!(reg.get(1, AxisField::HomePulses), Some(77));
    }
}
