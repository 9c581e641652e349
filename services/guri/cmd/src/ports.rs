//! `--list`: enumerate serial ports.

use anyhow::{Context, Result};
use serialport::{SerialPortInfo, SerialPortType};

/// One line per port: path, USB flag and, for USB ports, VID, PID and
/// serial number
pub fn describe(port: &SerialPortInfo) -> String {
    match &port.port_type {
        SerialPortType::UsbPort(usb) => format!(
            "{}\tusb=true\tvid={:04x}\tpid={:04x}\tserial={}",
            port.port_name,
            usb.vid,
            usb.pid,
            usb.serial_number.as_deref().unwrap_or("-")
        ),
        _ => format!("{}\tusb=false", port.port_name),
    }
}

/// Print every serial port the system reports
pub fn print_ports() -> Result<()> {
    let ports = serialport::available_ports().context("listing serial ports")?;
    if ports.is_empty() {
        component_info!("ports", "No serial ports found");
    }
    for port in &ports {
        println!("{}", describe(port));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_non_usb_port() {
        let port = SerialPortInfo {
            port_name: "/dev/ttyS0".to_string(),
            port_type: SerialPortType::PciPort,
        };
        assert_eq!(describe(&port), "/dev/ttyS0\tusb=false");
    }
}
