//! Serial transport backed by the `serialport` crate.

use crate::LineSettings;
use crate::traits::{SerialTransport, TransportOpener, is_disconnect};
use pulselink_core::{Error, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use std::fmt;
use std::io::{self, Read};
use tracing::{debug, warn};

/// Opens real serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortOpener;

impl SerialPortOpener {
    pub fn new() -> Self {
        Self
    }
}

impl TransportOpener for SerialPortOpener {
    fn open(&self, port: &str, settings: &LineSettings) -> Result<Box<dyn SerialTransport>> {
        let mut handle = serialport::new(port, settings.baud_rate)
            .data_bits(to_data_bits(settings.data_bits))
            .stop_bits(to_stop_bits(settings.stop_bits))
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .timeout(settings.timeout)
            .open()
            .map_err(|e| Error::open(port, e.to_string()))?;

        if settings.assert_control_lines {
            handle
                .write_data_terminal_ready(true)
                .map_err(|e| Error::open(port, format!("failed to assert DTR: {e}")))?;
            handle
                .write_request_to_send(true)
                .map_err(|e| Error::open(port, format!("failed to assert RTS: {e}")))?;
        }

        debug!(
            port,
            baud_rate = settings.baud_rate,
            timeout_ms = settings.timeout.as_millis() as u64,
            "Serial port opened"
        );

        Ok(Box::new(SerialPortTransport {
            name: port.to_string(),
            handle,
            open: true,
        }))
    }
}

/// An open `serialport` handle.
///
/// The handle is marked closed after the first read error that indicates
/// the device went away.
pub struct SerialPortTransport {
    name: String,
    handle: Box<dyn SerialPort>,
    open: bool,
}

impl SerialTransport for SerialPortTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.handle.read(buf);
        if let Err(ref e) = result
            && is_disconnect(e)
        {
            warn!(port = %self.name, error = %e, "Serial device disconnected");
            self.open = false;
        }
        result
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SerialPortTransport {
    fn drop(&mut self) {
        debug!(port = %self.name, "Serial port closed");
    }
}

fn to_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

fn to_stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

/// Kind of bus a serial port sits on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortKind {
    Usb { vid: u16, pid: u16 },
    Bluetooth,
    Pci,
    Unknown,
}

/// A serial port reported by the operating system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub kind: PortKind,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        match &self.kind {
            PortKind::Usb { vid, pid } => write!(f, " (USB {vid:04X}:{pid:04X})")?,
            PortKind::Bluetooth => write!(f, " (Bluetooth)")?,
            PortKind::Pci => write!(f, " (PCI)")?,
            PortKind::Unknown => {}
        }
        if let Some(product) = &self.product {
            write!(f, " {product}")?;
        }
        Ok(())
    }
}

/// List the serial ports available on this machine.
///
/// # Errors
///
/// Returns [`Error::Io`] when the ports cannot be enumerated.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(io::Error::from)?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let (kind, manufacturer, product, serial_number) = match p.port_type {
                SerialPortType::UsbPort(info) => (
                    PortKind::Usb {
                        vid: info.vid,
                        pid: info.pid,
                    },
                    info.manufacturer,
                    info.product,
                    info.serial_number,
                ),
                SerialPortType::BluetoothPort => (PortKind::Bluetooth, None, None, None),
                SerialPortType::PciPort => (PortKind::Pci, None, None, None),
                SerialPortType::Unknown => (PortKind::Unknown, None, None, None),
            };
            PortInfo {
                name: p.port_name,
                kind,
                manufacturer,
                product,
                serial_number,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_data_bits() {
        assert!(matches!(to_data_bits(5), DataBits::Five));
        assert!(matches!(to_data_bits(7), DataBits::Seven));
        assert!(matches!(to_data_bits(8), DataBits::Eight));
        assert!(matches!(to_data_bits(9), DataBits::Eight));
    }

    #[test]
    fn test_to_stop_bits() {
        assert!(matches!(to_stop_bits(1), StopBits::One));
        assert!(matches!(to_stop_bits(2), StopBits::Two));
        assert!(matches!(to_stop_bits(0), StopBits::One));
    }

    #[test]
    fn test_open_missing_port_fails() {
        let result = SerialPortOpener::new().open(
            "/dev/pulselink-does-not-exist",
            &LineSettings::pulse_device(),
        );

        match result {
            Err(Error::Open { port, .. }) => assert_eq!(port, "/dev/pulselink-does-not-exist"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("opening a missing port succeeded"),
        }
    }

    #[test]
    fn test_port_info_display() {
        let info = PortInfo {
            name: "/dev/ttyUSB0".to_string(),
            kind: PortKind::Usb {
                vid: 0x1A86,
                pid: 0x7523,
            },
            manufacturer: None,
            product: Some("USB Serial".to_string()),
            serial_number: None,
        };
        assert_eq!(info.to_string(), "/dev/ttyUSB0 (USB 1A86:7523) USB Serial");

        let plain = PortInfo {
            name: "COM1".to_string(),
            kind: PortKind::Unknown,
            manufacturer: None,
            product: None,
            serial_number: None,
        };
        assert_eq!(plain.to_string(), "COM1");
    }
}
