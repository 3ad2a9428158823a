//! wjmotion-core: Core traits, types, and error definitions for wjmotion.
//!
//! This crate defines the pieces shared by every layer of the WJ motion
//! board driver: the byte-level [`Transport`] and [`Connector`] traits, the
//! axis data model, the [`MotionEvent`] notifications, and the [`Error`]
//! taxonomy together with its vendor status-code mapping.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel to the board
//! - [`Connector`] -- opens a [`Transport`] for a [`PortId`]
//! - [`AxisField`], [`AxisStatus`], [`LinkState`] -- the axis/connection model
//! - [`MotionEvent`] -- asynchronous state change notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod status;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use events::MotionEvent;
pub use status::status_code;
pub use transport::{Connector, Transport};
pub use types::*;
