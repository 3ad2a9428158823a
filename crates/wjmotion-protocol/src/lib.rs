//! WJ motion board wire protocol.
//!
//! This crate implements the binary protocol spoken by the WJ multi-axis
//! motion board over its USB virtual COM port or RS-232 link. It provides:
//!
//! - **Frame codec** ([`frame`]) -- encode and decode wire frames, with
//!   checksum verification, partial-frame accumulation, and
//!   resynchronization on the next start marker after a corrupt frame.
//! - **Command builders** ([`commands`]) -- construct the command for each
//!   board operation (queries, moves, settings, digital I/O) and parse the
//!   corresponding replies.
//!
//! Everything here is pure: no I/O, no state beyond the decode buffer.
//!
//! # Example
//!
//! ```
//! use wjmotion_protocol::commands::{cmd_get_axes_num, Opcode};
//! use wjmotion_protocol::frame::{decode_frame, DecodeResult};
//!
//! let bytes = cmd_get_axes_num().encode();
//! if let DecodeResult::Frame(frame, consumed) = decode_frame(&bytes) {
//!     assert_eq!(frame.opcode, Opcode::GetAxesNum as u8);
//!     assert_eq!(consumed, bytes.len());
//! }
//! ```

pub mod commands;
pub mod frame;

pub use commands::{Command, Opcode, Target};
pub use frame::{DecodeResult, Decoded, Frame, FrameDecoder, MalformedReason};
