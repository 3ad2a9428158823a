//! # wjmotion -- driver for the WJ multi-axis motion board
//!
//! `wjmotion` talks to the WJ 4/8-axis stepper/servo controller over its
//! USB virtual COM port or an RS-232 link, replacing the vendor's
//! Windows-only `WJ_API.dll`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use wjmotion::{BoardBuilder, PortId};
//!
//! #[tokio::main]
//! async fn main() -> wjmotion::Result<()> {
//!     let board = BoardBuilder::new().port(PortId::Usb).build().await?;
//!     println!("{} axes", board.axis_count());
//!
//!     board.set_axis_vel(1, 500).await?;
//!     board.move_axis_pulses(1, 1000).await?;
//!     println!("axis 1 at {}", board.get_axis_pulses(1).await?);
//!
//!     board.close().await
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                   | Purpose                                          |
//! |-------------------------|--------------------------------------------------|
//! | `wjmotion-core`         | Transport traits, axis model, events, errors     |
//! | `wjmotion-protocol`     | Frame codec and command builders/parsers         |
//! | `wjmotion-transport`    | Serial transport and port resolution             |
//! | `wjmotion-board`        | Dispatcher, axis registry, [`Board`] facade      |
//! | **`wjmotion`**          | This crate -- re-exports, [`api::WjApi`], [`rotator`] |
//!
//! Two surfaces sit on top of the same connection:
//!
//! - [`Board`] -- typed async methods returning [`Result`].
//! - [`api::WjApi`] -- the vendor's `WJ_*` entry points, returning integer
//!   [`status`] codes, for code ported from the DLL.

pub mod api;
pub mod rotator;

pub use wjmotion_board::{
    AxisRegistry, Board, BoardBuilder, CachedValue, DEFAULT_COMMAND_TIMEOUT, DEFAULT_MAX_RETRIES,
    Dispatcher, DispatcherConfig, PendingReply, Stamp,
};
pub use wjmotion_core::{
    AxisField, AxisStatus, BoardInfo, Connector, DEFAULT_IO_LINES, Error, LinkState, MotionEvent,
    PortId, Result, SUPPORTED_AXIS_COUNTS, Transport, status,
};

/// Wire protocol: frame codec and command builders.
pub mod protocol {
    pub use wjmotion_protocol::*;
}

/// Serial transport.
pub mod transport {
    pub use wjmotion_transport::*;
}
