//! Simulated ET5406A+ load and virtual clock shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use battery_discharge::devices::{Connector, DeviceError, DiscardInput};
use battery_discharge::experiment::clock::Clock;
use battery_discharge::StopToken;

pub const ACK: &str = "Rexecu success\r\n";

/// `MEAS:ALL?` reply: current, voltage, power.
pub fn reading(current: f64, voltage: f64) -> String {
    format!("{:.4},{:.4},{:.4}\r\n", current, voltage, current * voltage)
}

pub struct LoadState {
    pub idn: Option<String>,
    pub readings: VecDeque<String>,
    pub fallback: String,
    pub ack: bool,
    pub commands: Vec<String>,
    pub measurements: usize,
    pub stop_after: Option<(usize, StopToken)>,
    pub sever_after: Option<usize>,
    pub latency: Option<(VirtualClock, f64)>,
    pub opened: usize,
    pub closed: usize,
}

impl LoadState {
    pub fn new() -> Self {
        Self {
            idn: Some("ET5406A+,SN12345,V1.00".to_string()),
            readings: VecDeque::new(),
            fallback: "garbage\r\n".to_string(),
            ack: true,
            commands: Vec::new(),
            measurements: 0,
            stop_after: None,
            sever_after: None,
            latency: None,
            opened: 0,
            closed: 0,
        }
    }

    pub fn with_readings<I: IntoIterator<Item = String>>(mut self, readings: I) -> Self {
        self.readings = readings.into_iter().collect();
        self
    }

    fn severed(&self) -> bool {
        self.sever_after.is_some_and(|n| self.measurements >= n)
    }

    fn reply(&mut self, command: &str) -> Option<String> {
        self.commands.push(command.to_string());
        match command {
            "*IDN?" => self.idn.as_ref().map(|idn| format!("{}\r\n", idn)),
            "MEAS:ALL?" => {
                self.measurements += 1;
                if let Some((clock, latency)) = &self.latency {
                    clock.advance(*latency);
                }
                if let Some((n, token)) = &self.stop_after {
                    if self.measurements == *n {
                        token.request_stop();
                    }
                }
                Some(self.readings.pop_front().unwrap_or_else(|| self.fallback.clone()))
            }
            _ if self.ack => Some(ACK.to_string()),
            _ => None,
        }
    }
}

pub type SharedLoad = Arc<Mutex<LoadState>>;

pub fn shared(state: LoadState) -> SharedLoad {
    Arc::new(Mutex::new(state))
}

/// Serves simulated loads by port name.
#[derive(Clone, Default)]
pub struct SimConnector {
    loads: HashMap<String, SharedLoad>,
}

impl SimConnector {
    pub fn single(port: &str, load: &SharedLoad) -> Self {
        Self::default().with_load(port, load)
    }

    pub fn with_load(mut self, port: &str, load: &SharedLoad) -> Self {
        self.loads.insert(port.to_string(), load.clone());
        self
    }
}

impl Connector for SimConnector {
    type Io = SimIo;

    fn open(&self, port: &str, _timeout: Duration) -> Result<SimIo, DeviceError> {
        let load = self.loads.get(port).ok_or_else(|| {
            DeviceError::connection(port, io::Error::new(ErrorKind::NotFound, "no such port"))
        })?;
        load.lock().unwrap().opened += 1;
        Ok(SimIo {
            load: load.clone(),
            line: Vec::new(),
            pending: VecDeque::new(),
        })
    }
}

pub struct SimIo {
    load: SharedLoad,
    line: Vec<u8>,
    pending: VecDeque<u8>,
}

impl Read for SimIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        // an empty read is what an idle port looks like after its timeout
        Ok(n)
    }
}

impl Write for SimIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut load = self.load.lock().unwrap();
        if load.severed() {
            return Err(io::Error::from(ErrorKind::BrokenPipe));
        }
        for &byte in buf {
            if byte == b'\n' {
                let command = String::from_utf8_lossy(&self.line).into_owned();
                self.line.clear();
                if let Some(reply) = load.reply(&command) {
                    self.pending.extend(reply.bytes());
                }
            } else {
                self.line.push(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DiscardInput for SimIo {
    fn discard_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        Ok(())
    }
}

impl Drop for SimIo {
    fn drop(&mut self) {
        if let Ok(mut load) = self.load.lock() {
            load.closed += 1;
        }
    }
}

/// Clock that only moves when slept on (or advanced by the simulated load).
#[derive(Clone)]
pub struct VirtualClock {
    now: Arc<Mutex<f64>>,
    pace: Duration,
}

impl VirtualClock {
    pub fn starting_at(now: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
            pace: Duration::ZERO,
        }
    }

    /// Also really sleeps `pace` on every sleep call, to keep background runs slow.
    pub fn paced(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    pub fn advance(&self, seconds: f64) {
        let mut now = self.now.lock().unwrap();
        // snap to microseconds so repeated float steps stay on whole seconds
        *now = ((*now + seconds) * 1e6).round() / 1e6;
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration.as_secs_f64());
        if !self.pace.is_zero() {
            std::thread::sleep(self.pace);
        }
    }
}

pub fn commands(load: &SharedLoad) -> Vec<String> {
    load.lock().unwrap().commands.clone()
}
