//! Optional TOML settings file.
//!
//! Every key mirrors a `BoardBuilder` setting. Keys left out fall back to
//! the command line, then to the driver defaults.
//!
//! ```toml
//! port = 3
//! baud_rate = 115200
//! command_timeout_ms = 300
//! max_retries = 2
//! io_lines = 8
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Vendor port number: 0 for USB, n for COMn.
    pub port: Option<i32>,
    pub usb_path: Option<String>,
    pub baud_rate: Option<u32>,
    pub command_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub io_lines: Option<u8>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full() {
        let cfg = FileConfig::parse(
            r#"
port = 3
usb_path = "/dev/ttyUSB0"
baud_rate = 9600
command_timeout_ms = 300
max_retries = 4
io_lines = 16
"#,
        )
        .unwrap();
        assert_eq!(cfg.port, Some(3));
        assert_eq!(cfg.usb_path.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cfg.baud_rate, Some(9600));
        assert_eq!(cfg.command_timeout_ms, Some(300));
        assert_eq!(cfg.max_retries, Some(4));
        assert_eq!(cfg.io_lines, Some(16));
    }

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(FileConfig::parse("").unwrap(), FileConfig::default());
    }

    #[test]
    fn unknown_key_rejected() {
        assert!(FileConfig::parse("baud = 9600").is_err());
    }

    #[test]
    fn missing_file_names_path() {
        let err = FileConfig::load(Path::new("/nonexistent/wj.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/wj.toml"));
    }
}
