//! Port resolution for the vendor port number.
//!
//! The vendor API selects a port with one integer: `0` for the board's USB
//! virtual COM port, `n` for physical port `COMn`. [`SerialConnector`] maps
//! that onto an OS device path and opens it.

use async_trait::async_trait;
use tokio_serial::SerialPortType;
use wjmotion_core::{Connector, Error, PortId, Result, Transport};

use crate::serial::{SerialConfig, SerialTransport};

/// Device path for physical serial port `n` (1-based, as in `COMn`).
///
/// On Unix `COM1` corresponds to `/dev/ttyS0`.
pub fn serial_device_path(n: u32) -> Result<String> {
    if n == 0 {
        return Err(Error::Validation("serial port index starts at 1".into()));
    }
    if cfg!(windows) {
        Ok(format!("COM{n}"))
    } else {
        Ok(format!("/dev/ttyS{}", n - 1))
    }
}

/// Find the first USB serial device.
fn first_usb_port() -> Result<String> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| Error::Transport(format!("failed to enumerate serial ports: {e}")))?;
    ports
        .into_iter()
        .find(|p| matches!(p.port_type, SerialPortType::UsbPort(_)))
        .map(|p| p.port_name)
        .ok_or_else(|| Error::Transport("no USB serial device found".into()))
}

/// Opens [`SerialTransport`]s for vendor port numbers.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    config: SerialConfig,
    usb_path: Option<String>,
}

impl SerialConnector {
    pub fn new(baud_rate: u32) -> Self {
        Self::with_config(SerialConfig::with_baud_rate(baud_rate))
    }

    pub fn with_config(config: SerialConfig) -> Self {
        Self {
            config,
            usb_path: None,
        }
    }

    /// Use a fixed device path for [`PortId::Usb`] instead of picking the
    /// first USB serial device.
    pub fn usb_path(mut self, path: impl Into<String>) -> Self {
        self.usb_path = Some(path.into());
        self
    }

    /// The device path `port` resolves to.
    pub fn resolve(&self, port: PortId) -> Result<String> {
        match port {
            PortId::Usb => match &self.usb_path {
                Some(path) => Ok(path.clone()),
                None => first_usb_port(),
            },
            PortId::Serial(n) => serial_device_path(n),
        }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self, port: PortId) -> Result<Box<dyn Transport>> {
        let path = self.resolve(port)?;
        tracing::debug!(%port, path = %path, "resolved board port");
        let transport = SerialTransport::open_with_config(&path, self.config.clone()).await?;
        Ok(Box::new(transport))
    }
}
