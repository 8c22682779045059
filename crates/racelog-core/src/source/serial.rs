//! Serial port discovery and setup for the telemetry link

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::BTreeMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;
use tracing::{debug, warn};

use super::SourceError;
use crate::config::SerialConfig;

/// An available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g. "/dev/ttyUSB0" or "COM3")
    pub name: String,
    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,
    /// USB product ID (if USB device)
    pub pid: Option<u16>,
    /// Product string reported by the device
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Ordering key: ttyACM* first (Arduino-class boards), then ttyUSB*, then
/// everything else by name. Numeric suffixes sort numerically.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0, "ttyACM"), (1, "ttyUSB")] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (2, 0, basename.to_string())
}

/// List serial ports a telemetry board could be attached to
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: BTreeMap<String, PortInfo> = BTreeMap::new();
    match serialport::available_ports() {
        Ok(found) => {
            for info in found {
                let port = PortInfo::from(info);
                ports.entry(port.name.clone()).or_insert(port);
            }
        }
        Err(e) => warn!("serial port enumeration failed: {e}"),
    }

    // USB CDC devices are not always reported by the enumeration API on Linux
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            let Some(fname) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                let full = format!("/dev/{fname}");
                ports
                    .entry(full.clone())
                    .or_insert_with(|| PortInfo::bare(full));
            }
        }
    }

    let mut ports: Vec<PortInfo> = ports.into_values().collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}

/// Open and configure the serial port named in `config`.
///
/// The port's own timeout is `poll_interval`, not the configured read
/// timeout, so a reader can notice a shutdown request between polls.
pub fn open_port(
    config: &SerialConfig,
    poll_interval: Duration,
) -> Result<Box<dyn SerialPort>, SourceError> {
    let open_error = |reason: String| SourceError::Open {
        target: config.port_name.clone(),
        reason,
    };

    if config.port_name.is_empty() {
        return Err(open_error("no serial port configured".into()));
    }

    let mut port = serialport::new(&config.port_name, config.baud_rate)
        .timeout(poll_interval)
        .open()
        .map_err(|e| open_error(e.to_string()))?;

    configure_port(port.as_mut()).map_err(|e| open_error(e.to_string()))?;

    debug!(port = %config.port_name, baud = config.baud_rate, "serial port opened");
    Ok(port)
}

/// Configure 8N1 without flow control.
///
/// DTR and RTS are asserted so Arduino-class boards are not reset by the
/// line toggling on open; failure to set them is logged, not fatal.
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), serialport::Error> {
    port.set_data_bits(serialport::DataBits::Eight)?;
    port.set_parity(serialport::Parity::None)?;
    port.set_stop_bits(serialport::StopBits::One)?;
    port.set_flow_control(serialport::FlowControl::None)?;

    if let Err(e) = port.write_data_terminal_ready(true) {
        warn!("failed to assert DTR: {e}");
    }
    if let Err(e) = port.write_request_to_send(true) {
        warn!("failed to assert RTS: {e}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_sorting() {
        let mut ports: Vec<PortInfo> = [
            "/dev/ttyUSB1",
            "/dev/ttyACM1",
            "/dev/ttyUSB0",
            "/dev/ttyACM0",
            "/dev/someport",
            "/dev/ttyACM10",
        ]
        .into_iter()
        .map(|n| PortInfo::bare(n.to_string()))
        .collect();

        ports.sort_by_key(|p| port_sort_key(&p.name));
        let ordered: Vec<String> = ports.into_iter().map(|p| p.name).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/ttyACM10",
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/someport",
            ]
        );
    }

    #[test]
    fn test_open_without_port_name_fails_fast() {
        let config = SerialConfig::default();
        match open_port(&config, Duration::from_millis(100)) {
            Err(SourceError::Open { reason, .. }) => assert!(reason.contains("no serial port")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("opened a port without a name"),
        }
    }

    #[test]
    fn test_open_missing_port_fails() {
        let config = SerialConfig {
            port_name: "/dev/racelog-no-such-port".into(),
            ..SerialConfig::default()
        };
        assert!(matches!(
            open_port(&config, Duration::from_millis(100)),
            Err(SourceError::Open { .. })
        ));
    }
}
