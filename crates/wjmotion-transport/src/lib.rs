//! Transport implementations for wjmotion.
//!
//! The WJ board is reachable two ways, both of which look like a serial
//! port to the host:
//!
//! - the board's own USB virtual COM port (vendor port number `0`)
//! - a physical RS-232 port (vendor port number `n` for `COMn`)
//!
//! [`SerialTransport`] implements [`Transport`](wjmotion_core::Transport)
//! over either one, and [`SerialConnector`] resolves a
//! [`PortId`](wjmotion_core::PortId) to a device path and opens it.
//!
//! # Example
//!
//! ```no_run
//! use wjmotion_core::{Connector, PortId};
//! use wjmotion_transport::SerialConnector;
//!
//! # async fn example() -> wjmotion_core::Result<()> {
//! let connector = SerialConnector::new(115_200);
//! let transport = connector.connect(PortId::Usb).await?;
//! assert!(transport.is_connected());
//! # Ok(())
//! # }
//! ```

pub mod connector;
pub mod serial;

pub use connector::{SerialConnector, serial_device_path};
pub use serial::{DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits};
