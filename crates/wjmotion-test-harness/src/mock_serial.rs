//! Scripted mock transport.
//!
//! [`MockTransport`] implements [`Transport`] with pre-loaded
//! request/reply pairs. The dispatcher takes ownership of its transport, so
//! the write log lives behind a shared [`SentLog`] handle that tests keep.
//!
//! # Example
//!
//! ```
//! use wjmotion_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! let log = mock.sent_log();
//! // Axis count query, board answers 4.
//! mock.expect(
//!     &[0xAA, 0x17, 0x00, 0x00, 0x00, 0x17, 0x55],
//!     &[0xAA, 0x17, 0x00, 0x00, 0x04, 0x04, 0x00, 0x00, 0x00, 0x1F, 0x55],
//! );
//! assert!(log.is_empty());
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use wjmotion_core::{Error, Result, Transport};

/// What the mock does when the matching request arrives.
#[derive(Debug, Clone)]
enum Reply {
    Bytes(Vec<u8>),
    Silence,
    TransportError,
}

#[derive(Debug, Clone)]
struct Expectation {
    request: Vec<u8>,
    reply: Reply,
}

/// Shared record of every write made through a mock transport.
#[derive(Debug, Clone, Default)]
pub struct SentLog(Arc<Mutex<Vec<Vec<u8>>>>);

impl SentLog {
    pub(crate) fn push(&self, data: &[u8]) {
        self.0.lock().push(data.to_vec());
    }

    /// Snapshot of all writes, oldest first.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.0.lock().clone()
    }

    /// Number of writes so far.
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Opcode byte of each write, for order checks.
    pub fn opcodes(&self) -> Vec<u8> {
        self.0
            .lock()
            .iter()
            .filter_map(|w| w.get(1).copied())
            .collect()
    }
}

/// A mock [`Transport`] for testing without hardware.
///
/// Expectations are consumed in order. Each `send()` is logged and checked
/// against the next expectation; its reply is then served by `receive()`.
/// In silent mode every write is accepted and nothing is ever answered.
/// `receive()` with nothing pending waits out its timeout, like a real port.
#[derive(Debug, Default)]
pub struct MockTransport {
    expectations: VecDeque<Expectation>,
    pending: VecDeque<u8>,
    closed: bool,
    silent: bool,
    log: SentLog,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that accepts every write and never answers.
    pub fn silent() -> Self {
        MockTransport {
            silent: true,
            ..Self::default()
        }
    }

    /// When `request` is written, serve `reply` to the following reads.
    pub fn expect(&mut self, request: &[u8], reply: &[u8]) {
        self.push(request, Reply::Bytes(reply.to_vec()));
    }

    /// Accept `request` without answering it.
    pub fn expect_no_reply(&mut self, request: &[u8]) {
        self.push(request, Reply::Silence);
    }

    /// Fail the write of `request` as if the USB device vanished.
    pub fn expect_transport_error(&mut self, request: &[u8]) {
        self.push(request, Reply::TransportError);
    }

    fn push(&mut self, request: &[u8], reply: Reply) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            reply,
        });
    }

    /// Handle to the write log that stays valid after the transport is moved.
    pub fn sent_log(&self) -> SentLog {
        self.log.clone()
    }

    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        self.log.push(data);

        if self.silent {
            return Ok(());
        }

        let expectation = self
            .expectations
            .pop_front()
            .ok_or_else(|| Error::Transport(format!("unexpected write {data:02X?}")))?;
        if data != expectation.request.as_slice() {
            return Err(Error::Transport(format!(
                "unexpected write: expected {:02X?}, got {:02X?}",
                expectation.request, data
            )));
        }
        match expectation.reply {
            Reply::Bytes(bytes) => {
                self.pending.extend(bytes);
                Ok(())
            }
            Reply::Silence => Ok(()),
            Reply::TransportError => Err(Error::ConnectionLost),
        }
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        if self.pending.is_empty() {
            tokio::time::sleep(timeout).await;
            return Err(Error::Timeout);
        }
        let n = self.pending.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.pending.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed
    }
}
