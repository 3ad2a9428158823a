//! Asynchronous board event types.
//!
//! Events are emitted through a `tokio::sync::broadcast` channel whenever
//! the driver confirms a change in board state. Applications subscribe to
//! these to update displays without polling the cache.

use crate::types::{AxisField, AxisStatus};

/// An event emitted by the driver when confirmed board state changes.
///
/// Delivery is best-effort through a bounded broadcast channel; slow
/// consumers may miss events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MotionEvent {
    /// The connection opened and the board reported its axis count.
    Connected {
        /// Axes reported by the board.
        axis_count: u8,
    },

    /// The connection was closed or faulted.
    Disconnected,

    /// An axis parameter was confirmed by the board (query reply or
    /// acknowledged set).
    ParameterChanged {
        axis: u8,
        field: AxisField,
        value: i32,
    },

    /// An axis pulse counter was confirmed.
    PositionChanged { axis: u8, pulses: i32 },

    /// An axis status bitfield was confirmed.
    StatusChanged { axis: u8, status: AxisStatus },
}
