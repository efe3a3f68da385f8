use std::fmt;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{info, warn};

use super::numeric::scan_numbers;
use super::transport::{LineTransport, RESPONSE_TERMINATOR};
use super::{Connector, DiscardInput, Result};
use crate::experiment::data::Mode;

/// Reply the load sends after accepting a set command.
pub const ACKNOWLEDGEMENT: &[u8] = b"Rexecu success\r\n";

/// Commands understood by the ET54 series electronic loads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Identify,
    Local,
    Beep,
    SetMode(Mode),
    SetCurrent(f64),
    SetVoltage(f64),
    Output(bool),
    MeasureAll,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Identify => write!(f, "*IDN?"),
            Command::Local => write!(f, "SYST:LOCA"),
            Command::Beep => write!(f, "SYST:BEEP"),
            Command::SetMode(mode) => write!(f, "CH:MODE {}", mode),
            Command::SetCurrent(amps) => write!(f, "CURR:CC {:.3}", amps),
            Command::SetVoltage(volts) => write!(f, "VOLT:CV {:.3}", volts),
            Command::Output(true) => write!(f, "CH:SW ON"),
            Command::Output(false) => write!(f, "CH:SW OFF"),
            Command::MeasureAll => write!(f, "MEAS:ALL?"),
        }
    }
}

/// One reading of the load input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub current: f64,
    pub voltage: f64,
}

/// An open session with one electronic load.
pub struct LoadSession<T> {
    transport: LineTransport<T>,
}

impl<T: Read + Write + DiscardInput> LoadSession<T> {
    pub fn open<C>(connector: &C, port: &str, timeout: Duration) -> Result<Self>
    where
        C: Connector<Io = T>,
    {
        let transport = LineTransport::open(connector, port, timeout)?;
        info!("Session opened on {}", port);
        Ok(Self { transport })
    }

    pub fn with(transport: LineTransport<T>) -> Self {
        Self { transport }
    }

    pub fn port(&self) -> &str {
        self.transport.port()
    }

    /// Writes `cmd` on a clean input buffer and reads the single line it answers with.
    fn exchange(&mut self, cmd: &Command) -> Result<Vec<u8>> {
        self.transport.discard_input()?;
        self.transport.write_line(&cmd.to_string())?;
        self.transport.read_line()
    }

    /// Sends a set command and reports whether the load acknowledged it.
    pub fn send_command(&mut self, cmd: &Command) -> Result<bool> {
        let response = self.exchange(cmd)?;
        Ok(response == ACKNOWLEDGEMENT)
    }

    /// Sends a set command, logging instead of failing when it is not acknowledged.
    pub fn send_logged(&mut self, cmd: &Command) -> Result<bool> {
        let acked = self.send_command(cmd)?;
        if !acked {
            warn!("[{}] Command not acknowledged: {}", self.port(), cmd);
        }
        Ok(acked)
    }

    /// Sends a query and returns every number in the reply.
    pub fn query_values(&mut self, cmd: &Command) -> Result<Vec<f64>> {
        let response = self.exchange(cmd)?;
        Ok(scan_numbers(&String::from_utf8_lossy(&response)))
    }

    /// Sends a query and returns the reply without its terminator.
    pub fn query_string(&mut self, cmd: &Command) -> Result<String> {
        let response = self.exchange(cmd)?;
        let body = response
            .strip_suffix(RESPONSE_TERMINATOR)
            .unwrap_or(&response[..]);
        Ok(String::from_utf8_lossy(body).into_owned())
    }

    pub fn identify(&mut self) -> Result<String> {
        self.query_string(&Command::Identify)
    }

    /// Reads current and voltage, or `None` when the reply holds fewer than two numbers.
    pub fn measure(&mut self) -> Result<Option<Reading>> {
        let values = self.query_values(&Command::MeasureAll)?;
        match values.as_slice() {
            [current, voltage, ..] => Ok(Some(Reading {
                current: *current,
                voltage: *voltage,
            })),
            _ => {
                warn!("[{}] Unusable measurement reply: {:?}", self.port(), values);
                Ok(None)
            }
        }
    }

    pub fn close(self) {
        self.transport.close();
    }
}
