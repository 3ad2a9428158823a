//! Integer status codes of the vendor API.
//!
//! Every `WJ_*` entry point returns `0` on success and a negative code on
//! failure. [`Error::status_code`](crate::Error::status_code) produces
//! these from an error.

use crate::error::Result;

/// The operation succeeded.
pub const OK: i32 = 0;
/// Axis, I/O line, or sequence length out of range.
pub const VALIDATION: i32 = -1;
/// No response after all retries.
pub const TIMEOUT: i32 = -2;
/// Frame decode failure or board rejection.
pub const PROTOCOL: i32 = -3;
/// No open connection.
pub const NOT_CONNECTED: i32 = -4;
/// Underlying channel failure.
pub const TRANSPORT: i32 = -5;
/// Queued command cancelled.
pub const CANCELLED: i32 = -6;

/// Collapse a [`Result`] into its vendor status code.
pub fn status_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => OK,
        Err(e) => e.status_code(),
    }
}

/// Human-readable name of a status code, for logs and CLI output.
pub fn describe(code: i32) -> &'static str {
    match code {
        OK => "ok",
        VALIDATION => "validation error",
        TIMEOUT => "timeout",
        PROTOCOL => "protocol error",
        NOT_CONNECTED => "not connected",
        TRANSPORT => "transport error",
        CANCELLED => "cancelled",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn ok_maps_to_zero() {
        let r: Result<u8> = Ok(3);
        assert_eq!(status_code(&r), OK);
    }

    #[test]
    fn err_maps_to_variant_code() {
        let r: Result<()> = Err(Error::NotConnected);
        assert_eq!(status_code(&r), NOT_CONNECTED);
        let r: Result<()> = Err(Error::Timeout);
        assert_eq!(status_code(&r), TIMEOUT);
    }

    #[test]
    fn describe_known_and_unknown() {
        assert_eq!(describe(VALIDATION), "validation error");
        assert_eq!(describe(-99), "unknown");
    }
}
