use std::fmt;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::et5406a::{Command, LoadSession};
use super::{Connector, DeviceError, Result};

/// Substring of the `*IDN?` reply that marks a supported load.
pub const MODEL_SIGNATURE: &str = "ET5406A+";

/// Read timeout while probing ports.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// A load found during discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub port: String,
    pub name: String,
    pub serial_number: String,
}

impl PartialEq for DeviceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port
    }
}

impl Eq for DeviceIdentity {}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port = self.port.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(&self.port);
        write!(f, "{} {} {}", port, self.name, self.serial_number)
    }
}

/// Builds an identity from an `*IDN?` reply such as `ET5406A+,SN12345,V1.2`.
pub fn parse_identity(port: &str, idn: &str) -> Option<DeviceIdentity> {
    let mut fields = idn.trim().split(',').map(str::trim);
    let name = fields.next().filter(|name| !name.is_empty())?;
    let serial_number = fields.next().unwrap_or_default();

    Some(DeviceIdentity {
        port: port.to_string(),
        name: name.to_string(),
        serial_number: serial_number.to_string(),
    })
}

/// Lists serial ports that may have a load attached.
pub fn list_candidate_ports() -> Result<Vec<String>> {
    if cfg!(target_os = "linux") {
        let entries = std::fs::read_dir("/dev").map_err(|e| DeviceError::connection("/dev", e))?;
        let mut ports: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| is_tty_candidate(name))
            .map(|name| format!("/dev/{}", name))
            .collect();
        ports.sort();
        Ok(ports)
    } else if cfg!(any(target_os = "windows", target_os = "macos")) {
        let ports = serialport::available_ports()
            .map_err(|e| DeviceError::connection("serial port enumeration", e.into()))?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    } else {
        Err(DeviceError::UnsupportedPlatform(std::env::consts::OS.to_string()))
    }
}

/// Matches `tty` followed by a letter, e.g. `ttyUSB0` or `ttyS1` but not `tty0`.
fn is_tty_candidate(name: &str) -> bool {
    name.strip_prefix("tty")
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_alphabetic())
}

/// Picks the device to drive: the only one found, or the one with the remembered serial.
pub fn select_device(
    devices: &[DeviceIdentity],
    remembered_serial: Option<&str>,
) -> Option<DeviceIdentity> {
    if let [only] = devices {
        return Some(only.clone());
    }
    let serial = remembered_serial?;
    devices.iter().find(|d| d.serial_number == serial).cloned()
}

pub struct Discovery<C> {
    connector: C,
    timeout: Duration,
}

impl<C: Connector> Discovery<C> {
    pub fn new(connector: C) -> Self {
        Self::with_timeout(connector, PROBE_TIMEOUT)
    }

    pub fn with_timeout(connector: C, timeout: Duration) -> Self {
        Self { connector, timeout }
    }

    /// Probes `port` and returns its identity if a supported load answers.
    ///
    /// Failures are logged and reported as `None`; scanning many ports makes
    /// them routine.
    pub fn identify(&self, port: &str) -> Option<DeviceIdentity> {
        let mut session = match LoadSession::open(&self.connector, port, self.timeout) {
            Ok(session) => session,
            Err(e) => {
                warn!("Error opening serial port {}: {}", port, e);
                return None;
            }
        };

        let identity = Self::probe(&mut session);
        session.close();

        match identity {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Error probing {}: {}", port, e);
                None
            }
        }
    }

    fn probe(session: &mut LoadSession<C::Io>) -> Result<Option<DeviceIdentity>> {
        let idn = session.identify()?;
        if !idn.contains(MODEL_SIGNATURE) {
            info!("{}: DC load type not supported ({:?})", session.port(), idn);
            return Ok(None);
        }

        let idn = session.identify()?;
        // hand the front panel back; the answer does not matter here
        let _ = session.send_command(&Command::Local);

        let identity = parse_identity(session.port(), &idn);
        if let Some(identity) = &identity {
            info!("Found {}", identity);
        }
        Ok(identity)
    }

    /// Probes every candidate port, keeping the supported loads.
    pub fn discover_all(&self) -> Result<Vec<DeviceIdentity>> {
        let ports = list_candidate_ports()?;
        Ok(self.discover_ports(&ports))
    }

    /// Probes `ports` in order and keeps the ones where a supported load answered.
    pub fn discover_ports<S: AsRef<str>>(&self, ports: &[S]) -> Vec<DeviceIdentity> {
        info!("Probing {} candidate ports", ports.len());
        ports
            .iter()
            .filter_map(|port| self.identify(port.as_ref()))
            .collect()
    }
}
