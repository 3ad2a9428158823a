//! BoardBuilder -- fluent builder for opening a [`Board`].
//!
//! Separates configuration from construction so that callers can pick the
//! port, serial parameters, timeouts, and retry policy before the
//! connection is opened.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use wjmotion_board::BoardBuilder;
//! use wjmotion_core::PortId;
//!
//! # async fn example() -> wjmotion_core::Result<()> {
//! let board = BoardBuilder::new()
//!     .port(PortId::Serial(3))
//!     .baud_rate(115_200)
//!     .command_timeout(Duration::from_millis(300))
//!     .build()
//!     .await?;
//! println!("{} axes", board.axis_count());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use wjmotion_core::{Connector, DEFAULT_IO_LINES, Error, PortId, Result, Transport};
use wjmotion_transport::{SerialConfig, SerialConnector};

use crate::board::Board;
use crate::io::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_MAX_RETRIES, DispatcherConfig};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Fluent builder for [`Board`].
#[derive(Debug, Clone)]
pub struct BoardBuilder {
    port: PortId,
    serial: SerialConfig,
    usb_path: Option<String>,
    command_timeout: Duration,
    max_retries: u32,
    io_lines: u8,
    event_capacity: usize,
}

impl Default for BoardBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardBuilder {
    /// A builder for the board's USB port at the default baud rate.
    pub fn new() -> Self {
        BoardBuilder {
            port: PortId::Usb,
            serial: SerialConfig::default(),
            usb_path: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            io_lines: DEFAULT_IO_LINES,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn port(mut self, port: PortId) -> Self {
        self.port = port;
        self
    }

    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.serial.baud_rate = baud;
        self
    }

    /// Replace every serial line setting at once.
    pub fn serial_config(mut self, config: SerialConfig) -> Self {
        self.serial = config;
        self
    }

    /// Device path to open for [`PortId::Usb`] instead of probing for the
    /// first USB serial adapter.
    pub fn usb_path(mut self, path: &str) -> Self {
        self.usb_path = Some(path.to_string());
        self
    }

    /// How long to wait for each reply before retrying (default: 200ms).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Retries after a timeout (default: 2).
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Number of digital I/O lines on the board (default: 8).
    pub fn io_lines(mut self, n: u8) -> Self {
        self.io_lines = n;
        self
    }

    /// Capacity of the event broadcast channel (default: 256).
    pub fn event_capacity(mut self, n: usize) -> Self {
        self.event_capacity = n;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.io_lines == 0 {
            return Err(Error::Validation("io_lines must be at least 1".into()));
        }
        if self.command_timeout.is_zero() {
            return Err(Error::Validation("command timeout must be non-zero".into()));
        }
        if self.event_capacity == 0 {
            return Err(Error::Validation("event capacity must be non-zero".into()));
        }
        Ok(())
    }

    /// Open the configured serial port and identify the board.
    pub async fn build(self) -> Result<Board> {
        let mut connector = SerialConnector::with_config(self.serial.clone());
        if let Some(path) = &self.usb_path {
            connector = connector.usb_path(path.clone());
        }
        self.build_with_connector(&connector).await
    }

    /// Open the configured port through `connector`.
    ///
    /// Pass a `SimConnector` from `wjmotion-test-harness` to run against a
    /// simulated board.
    pub async fn build_with_connector(self, connector: &dyn Connector) -> Result<Board> {
        self.validate()?;
        tracing::debug!(port = %self.port, "opening board port");
        let transport = connector.connect(self.port).await?;
        self.build_with_transport(transport).await
    }

    /// Take over an already-open transport.
    ///
    /// This is the entry point for testing with a `MockTransport` and for
    /// callers that manage the link themselves.
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<Board> {
        self.validate()?;
        let config = DispatcherConfig {
            command_timeout: self.command_timeout,
            max_retries: self.max_retries,
        };
        Board::connect(
            transport,
            self.port,
            self.io_lines,
            config,
            self.event_capacity,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wjmotion_protocol::commands::cmd_get_axes_num;
    use wjmotion_protocol::frame::{STATUS_OK, encode_frame};
    use wjmotion_protocol::Opcode;
    use wjmotion_test_harness::{MockTransport, SimHandle};

    #[test]
    fn defaults() {
        let b = BoardBuilder::new();
        assert_eq!(b.port, PortId::Usb);
        assert_eq!(b.serial.baud_rate, 115_200);
        assert_eq!(b.command_timeout, DEFAULT_COMMAND_TIMEOUT);
        assert_eq!(b.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(b.io_lines, DEFAULT_IO_LINES);
    }

    #[test]
    fn setters_chain() {
        let b = BoardBuilder::new()
            .port(PortId::Serial(4))
            .baud_rate(9600)
            .command_timeout(Duration::from_millis(50))
            .max_retries(0)
            .io_lines(4)
            .usb_path("/dev/ttyUSB1");
        assert_eq!(b.port, PortId::Serial(4));
        assert_eq!(b.serial.baud_rate, 9600);
        assert_eq!(b.max_retries, 0);
        assert_eq!(b.io_lines, 4);
        assert_eq!(b.usb_path.as_deref(), Some("/dev/ttyUSB1"));
    }

    #[tokio::test]
    async fn zero_io_lines_rejected() {
        let result = BoardBuilder::new()
            .io_lines(0)
            .build_with_transport(Box::new(MockTransport::silent()))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn build_with_mock_transport() {
        let mut mock = MockTransport::new();
        let log = mock.sent_log();
        mock.expect(
            &cmd_get_axes_num().encode(),
            &encode_frame(Opcode::GetAxesNum as u8, 0, STATUS_OK, &[8]),
        );
        let board = BoardBuilder::new()
            .port(PortId::Serial(2))
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();
        assert_eq!(board.axis_count(), 8);
        assert_eq!(board.info().port, PortId::Serial(2));
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn unsupported_axis_count_is_protocol_error() {
        let mut mock = MockTransport::new();
        mock.expect(
            &cmd_get_axes_num().encode(),
            &encode_frame(Opcode::GetAxesNum as u8, 0, STATUS_OK, &[6]),
        );
        let result = BoardBuilder::new()
            .build_with_transport(Box::new(mock))
            .await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn connector_receives_configured_port() {
        let handle = SimHandle::new(4, 8);
        let board = BoardBuilder::new()
            .port(PortId::Serial(7))
            .build_with_connector(&handle.connector())
            .await
            .unwrap();
        assert_eq!(handle.opened_ports(), vec![PortId::Serial(7)]);
        assert_eq!(board.axis_count(), 4);
    }

    #[tokio::test]
    async fn refused_connection_propagates() {
        let handle = SimHandle::new(4, 8);
        handle.refuse_connect(true);
        let result = BoardBuilder::new()
            .build_with_connector(&handle.connector())
            .await;
        assert!(result.unwrap_err().is_fatal());
    }
}
