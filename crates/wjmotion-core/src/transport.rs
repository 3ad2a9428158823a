//! Transport and connector traits for board communication.
//!
//! The [`Transport`] trait abstracts over the physical link to the motion
//! board: a USB virtual COM port, an RS-232 port, or a mock/simulated
//! transport for testing. The frame codec and command dispatcher operate on
//! a `Transport` rather than directly on a serial port, enabling both real
//! hardware control and deterministic unit testing.
//!
//! A [`Connector`] turns a [`PortId`] (the vendor's `num_scom` argument)
//! into an open transport.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::types::PortId;

/// Asynchronous byte-level transport to the board.
///
/// Implementations handle buffering and error recovery at the physical
/// layer only. Framing, checksums, and request/response matching belong to
/// the protocol engine that consumes this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the board.
    ///
    /// Implementations should not return until all bytes have been handed
    /// to the underlying channel.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the board into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Waits up to `timeout` for
    /// data to arrive; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if nothing arrives within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}

/// Opens a [`Transport`] for a port identifier.
///
/// The serial implementation lives in `wjmotion-transport`; the test
/// harness provides connectors backed by simulated boards.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open the port identified by `port`.
    async fn connect(&self, port: PortId) -> Result<Box<dyn Transport>>;
}
