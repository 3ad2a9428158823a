//! wjmotion-board: the driver core for the WJ multi-axis motion board.
//!
//! - [`io`] -- the command dispatcher. One background task owns the
//!   transport and runs one request/reply exchange at a time, with an
//!   emergency-stop lane that jumps the queue, per-attempt timeouts,
//!   bounded retries, and cancellation of queued commands.
//! - [`registry`] -- per-axis parameter cache stamped with a monotonic
//!   sequence number, plus axis and I/O index validation.
//! - [`board`] -- the [`Board`] facade composing the two.
//! - [`builder`] -- [`BoardBuilder`] for opening a board over a serial
//!   port, a custom [`Connector`](wjmotion_core::Connector), or an
//!   already-open transport.
//!
//! # Example
//!
//! ```no_run
//! use wjmotion_board::BoardBuilder;
//!
//! # async fn example() -> wjmotion_core::Result<()> {
//! let board = BoardBuilder::new().build().await?;
//! board.set_axis_vel(1, 1500).await?;
//! board.move_axis_pulses(1, 50_004).await?;
//! while board.get_axis_status(1).await?.is_moving() {
//!     tokio::time::sleep(std::time::Duration::from_millis(50)).await;
//! }
//! board.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod board;
pub mod builder;
pub mod io;
pub mod registry;

pub use board::Board;
pub use builder::BoardBuilder;
pub use io::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_MAX_RETRIES, Dispatcher, DispatcherConfig, PendingReply};
pub use registry::{AxisRegistry, CachedValue, Stamp};
