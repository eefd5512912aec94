//! Serial port discovery for attached meters.
//!
//! LRM meters show up behind common USB-to-UART bridges. Port detection
//! classifies the bridge chip from the USB VID so the CLI can pick a
//! plausible port without the user spelling out a device path.

use crate::error::{Error, Result};
use log::{debug, info, trace};

/// USB-to-UART bridge families seen on meter cables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbBridge {
    /// CH340/CH341 converter.
    Ch340,
    /// Silicon Labs CP210x converter.
    Cp210x,
    /// FTDI FT232 family converter.
    Ftdi,
    /// Prolific PL2303 converter.
    Prolific,
    /// Unknown device.
    Unknown,
}

impl UsbBridge {
    /// Classify a bridge chip from the USB vendor ID.
    #[must_use]
    pub fn from_vid_pid(vid: u16, _pid: u16) -> Self {
        match vid {
            // CH340/CH341 family
            0x1A86 => Self::Ch340,
            // Silicon Labs CP210x family
            0x10C4 => Self::Cp210x,
            // FTDI family
            0x0403 => Self::Ftdi,
            // Prolific family
            0x067B => Self::Prolific,
            _ => Self::Unknown,
        }
    }

    /// Get a human-readable name for the bridge chip.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known bridge chip.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Detected serial port information.
#[derive(Debug, Clone)]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// USB bridge type if detected.
    pub bridge: UsbBridge,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Check if this port is plausibly a meter cable.
    pub fn is_likely_meter(&self) -> bool {
        self.bridge.is_known()
    }
}

/// Detect all available serial ports with USB device information.
pub fn detect_ports() -> Vec<DetectedPort> {
    let mut result = Vec::new();

    match serialport::available_ports() {
        Ok(ports) => {
            for port_info in ports {
                let mut detected = DetectedPort {
                    name: port_info.port_name.clone(),
                    bridge: UsbBridge::Unknown,
                    vid: None,
                    pid: None,
                    manufacturer: None,
                    product: None,
                    serial: None,
                };

                if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                    detected.vid = Some(usb_info.vid);
                    detected.pid = Some(usb_info.pid);
                    detected.manufacturer = usb_info.manufacturer;
                    detected.product = usb_info.product;
                    detected.serial = usb_info.serial_number;
                    detected.bridge = UsbBridge::from_vid_pid(usb_info.vid, usb_info.pid);

                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X}, Bridge: {:?})",
                        port_info.port_name, usb_info.vid, usb_info.pid, detected.bridge
                    );
                }

                result.push(detected);
            }
        },
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
        },
    }

    result
}

/// Auto-detect a single meter port.
///
/// Returns the first port behind a known USB-UART bridge, falling back
/// to the first available port of any kind.
pub fn auto_detect_port() -> Result<DetectedPort> {
    let ports = detect_ports();

    if let Some(port) = ports.iter().find(|p| p.bridge.is_known()) {
        info!(
            "Auto-detected {} USB-UART bridge: {}",
            port.bridge.name(),
            port.name
        );
        return Ok(port.clone());
    }

    if let Some(port) = ports.into_iter().next() {
        info!("Using first available port: {}", port.name);
        return Ok(port);
    }

    Err(Error::DeviceNotFound)
}
