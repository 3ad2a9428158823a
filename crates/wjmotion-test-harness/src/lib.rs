//! wjmotion-test-harness: mock transports and a simulated board.
//!
//! - [`MockTransport`] replays scripted request/reply byte pairs and logs
//!   every write, for checking exact wire traffic.
//! - [`LoopbackTransport`] echoes every frame back, for codec round trips.
//! - [`SimBoard`] decodes commands and answers like a real board, keeping
//!   per-axis state and I/O lines; [`SimConnector`] hands out `SimBoard`
//!   transports that share one [`SimHandle`] across open/close cycles.

pub mod loopback;
pub mod mock_serial;
pub mod sim;

pub use loopback::LoopbackTransport;
pub use mock_serial::{MockTransport, SentLog};
pub use sim::{AxisState, SimBoard, SimConnector, SimHandle};
