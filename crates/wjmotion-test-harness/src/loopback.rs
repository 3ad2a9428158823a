//! Loopback transport: every write comes straight back as a read.
//!
//! A command frame echoed back decodes as a reply with the same opcode,
//! target, OK status, and payload, which is enough to exercise the codec
//! and the dispatcher's reply matching end to end.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use wjmotion_core::{Error, Result, Transport};

use crate::mock_serial::SentLog;

#[derive(Debug, Default)]
pub struct LoopbackTransport {
    buffer: VecDeque<u8>,
    closed: bool,
    log: SentLog,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_log(&self) -> SentLog {
        self.log.clone()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        self.log.push(data);
        self.buffer.extend(data.iter().copied());
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        if self.buffer.is_empty() {
            tokio::time::sleep(timeout).await;
            return Err(Error::Timeout);
        }
        let n = self.buffer.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.buffer.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.buffer.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed
    }
}
