//! Wire frame encoder/decoder.
//!
//! Commands and replies share one frame layout. This module handles the
//! byte-level encoding and decoding only; it knows nothing about which
//! opcodes exist or what their payloads mean.
//!
//! # Frame format
//!
//! ```text
//! 0xAA <opcode> <target> <status> <len> [<payload>...] <checksum> 0x55
//! ```
//!
//! - Start marker: `0xAA`
//! - `opcode`: command byte, echoed by the board in its reply
//! - `target`: axis number (1-based) or `0x00` for board-wide commands
//! - `status`: `0x00` in commands; the board's result code in replies
//! - `len`: payload length in bytes, a multiple of 4, at most 32
//! - `payload`: little-endian `i32` values (one per axis for batch commands)
//! - `checksum`: wrapping 8-bit sum of opcode, target, status, len, payload
//! - End marker: `0x55`

use bytes::{Buf, BufMut, BytesMut};
use wjmotion_core::{Error, Result};

/// Frame start marker.
pub const START: u8 = 0xAA;

/// Frame end marker.
pub const END: u8 = 0x55;

/// Target byte addressing the whole board rather than one axis.
pub const BROADCAST: u8 = 0x00;

/// Bytes before the payload: start, opcode, target, status, len.
pub const HEADER_LEN: usize = 5;

/// Bytes after the payload: checksum, end.
pub const TRAILER_LEN: usize = 2;

/// Largest payload the board sends: one `i32` for each of eight axes.
pub const MAX_PAYLOAD: usize = 32;

/// Reply status: command executed.
pub const STATUS_OK: u8 = 0x00;

/// Reply status: command understood but refused (bad parameter, axis
/// disabled).
pub const STATUS_REJECTED: u8 = 0x01;

/// Reply status: the board is busy and did not execute the command.
pub const STATUS_BUSY: u8 = 0x02;

/// Reply status: the board received a frame that failed its checksum.
pub const STATUS_FRAME_ERROR: u8 = 0x03;

/// Maximum decode buffer size before reset to prevent unbounded growth.
const MAX_BUFFER: usize = 4096;

/// A decoded frame.
///
/// The opcode is kept raw so that frames with opcodes this driver does not
/// know can still be decoded, logged, and skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Opcode byte.
    pub opcode: u8,
    /// Axis number or [`BROADCAST`].
    pub target: u8,
    /// Status byte (always [`STATUS_OK`] in commands).
    pub status: u8,
    /// Payload values.
    pub values: Vec<i32>,
}

impl Frame {
    /// Returns `true` if the board executed the command.
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Returns `true` if the board reports it received a corrupt frame.
    pub fn is_frame_error(&self) -> bool {
        self.status == STATUS_FRAME_ERROR
    }

    /// Returns `true` if the board refused the command.
    pub fn is_rejected(&self) -> bool {
        self.status == STATUS_REJECTED || self.status == STATUS_BUSY
    }

    /// The single payload value of a scalar reply.
    pub fn single_value(&self) -> Result<i32> {
        match self.values.as_slice() {
            [v] => Ok(*v),
            other => Err(Error::Protocol(format!(
                "expected 1 value in reply to opcode 0x{:02X}, got {}",
                self.opcode,
                other.len()
            ))),
        }
    }
}

/// Compute the frame checksum over `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Encode a frame into raw bytes ready for transmission.
///
/// Produces the full wire format including markers and checksum.
///
/// # Example
///
/// ```
/// use wjmotion_protocol::frame::encode_frame;
///
/// // Query axis count: opcode 0x17, broadcast, no payload.
/// let bytes = encode_frame(0x17, 0x00, 0x00, &[]);
/// assert_eq!(bytes, vec![0xAA, 0x17, 0x00, 0x00, 0x00, 0x17, 0x55]);
/// ```
pub fn encode_frame(opcode: u8, target: u8, status: u8, values: &[i32]) -> Vec<u8> {
    let payload_len = values.len() * 4;
    debug_assert!(payload_len <= MAX_PAYLOAD);
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload_len + TRAILER_LEN);
    buf.put_u8(START);
    buf.put_u8(opcode);
    buf.put_u8(target);
    buf.put_u8(status);
    buf.put_u8(payload_len as u8);
    for v in values {
        buf.put_i32_le(*v);
    }
    let sum = checksum(&buf[1..]);
    buf.put_u8(sum);
    buf.put_u8(END);
    buf.to_vec()
}

/// Encode a [`Frame`] struct into raw bytes.
pub fn encode(frame: &Frame) -> Vec<u8> {
    encode_frame(frame.opcode, frame.target, frame.status, &frame.values)
}

/// Why a candidate frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    /// Declared payload length is not a multiple of 4 or exceeds the maximum.
    BadLength(u8),
    /// The byte where the end marker belongs holds something else.
    BadEndMarker(u8),
    /// The checksum byte does not match the frame contents.
    BadChecksum { expected: u8, actual: u8 },
}

impl std::fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedReason::BadLength(len) => write!(f, "invalid payload length {len}"),
            MalformedReason::BadEndMarker(b) => write!(f, "bad end marker 0x{b:02X}"),
            MalformedReason::BadChecksum { expected, actual } => write!(
                f,
                "checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}"
            ),
        }
    }
}

/// Result of attempting to decode a frame from a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// A complete frame was decoded. The `usize` is the number of bytes
    /// consumed from the input buffer, including any noise before the
    /// start marker.
    Frame(Frame, usize),

    /// The buffer does not yet contain a complete frame.
    Incomplete,

    /// The candidate frame at the first start marker is corrupt. Discard
    /// `consumed` bytes (everything up to and including that start marker)
    /// and decode again to resynchronize on the next start marker.
    Malformed {
        consumed: usize,
        reason: MalformedReason,
    },
}

/// Attempt to decode one frame from a byte buffer.
///
/// Bytes before the first start marker are skipped. A corrupt frame only
/// consumes its own start marker, so a valid frame that follows it in the
/// buffer is still found by the next call.
///
/// # Example
///
/// ```
/// use wjmotion_protocol::frame::{decode_frame, encode_frame, DecodeResult};
///
/// let buf = encode_frame(0x13, 0x01, 0x00, &[500]);
/// match decode_frame(&buf) {
///     DecodeResult::Frame(frame, consumed) => {
///         assert_eq!(frame.values, vec![500]);
///         assert_eq!(consumed, buf.len());
///     }
///     _ => panic!("expected a frame"),
/// }
/// ```
pub fn decode_frame(buf: &[u8]) -> DecodeResult {
    let start = match buf.iter().position(|&b| b == START) {
        Some(pos) => pos,
        None => return DecodeResult::Incomplete,
    };
    let candidate = &buf[start..];
    if candidate.len() < HEADER_LEN {
        return DecodeResult::Incomplete;
    }

    let len = candidate[4];
    let payload_len = len as usize;
    if payload_len > MAX_PAYLOAD || payload_len % 4 != 0 {
        return DecodeResult::Malformed {
            consumed: start + 1,
            reason: MalformedReason::BadLength(len),
        };
    }

    let total = HEADER_LEN + payload_len + TRAILER_LEN;
    if candidate.len() < total {
        return DecodeResult::Incomplete;
    }

    let end = candidate[total - 1];
    if end != END {
        return DecodeResult::Malformed {
            consumed: start + 1,
            reason: MalformedReason::BadEndMarker(end),
        };
    }

    let expected = checksum(&candidate[1..HEADER_LEN + payload_len]);
    let actual = candidate[HEADER_LEN + payload_len];
    if expected != actual {
        return DecodeResult::Malformed {
            consumed: start + 1,
            reason: MalformedReason::BadChecksum { expected, actual },
        };
    }

    let mut payload = &candidate[HEADER_LEN..HEADER_LEN + payload_len];
    let mut values = Vec::with_capacity(payload_len / 4);
    while payload.has_remaining() {
        values.push(payload.get_i32_le());
    }

    let frame = Frame {
        opcode: candidate[1],
        target: candidate[2],
        status: candidate[3],
        values,
    };
    DecodeResult::Frame(frame, start + total)
}

/// One item produced by [`FrameDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A valid frame.
    Frame(Frame),
    /// A corrupt frame was dropped; decoding continues at the next start marker.
    Malformed(MalformedReason),
}

/// Accumulating decoder for a byte stream that may deliver partial frames.
///
/// Push bytes as they arrive with [`push`](Self::push), then drain complete
/// items with [`decode_next`](Self::decode_next) until it returns `None`.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        if self.buf.len() > MAX_BUFFER {
            tracing::warn!(len = self.buf.len(), "decode buffer overflow, resetting");
            self.buf.clear();
        }
    }

    /// Decode the next item, or `None` if more bytes are needed.
    pub fn decode_next(&mut self) -> Option<Decoded> {
        match decode_frame(&self.buf) {
            DecodeResult::Frame(frame, consumed) => {
                self.buf.advance(consumed);
                Some(Decoded::Frame(frame))
            }
            DecodeResult::Malformed { consumed, reason } => {
                tracing::debug!(%reason, "dropping malformed frame");
                self.buf.advance(consumed);
                Some(Decoded::Malformed(reason))
            }
            DecodeResult::Incomplete => {
                // Noise with no start marker can never become a frame.
                if !self.buf.contains(&START) && !self.buf.is_empty() {
                    tracing::trace!(len = self.buf.len(), "discarding line noise");
                    self.buf.clear();
                }
                None
            }
        }
    }

    /// Number of bytes waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
