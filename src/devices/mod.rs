pub mod discovery;
pub mod et5406a;
pub mod numeric;
pub mod transport;

pub use discovery::{DeviceIdentity, Discovery, list_candidate_ports, select_device};
pub use et5406a::{Command, LoadSession};
pub use transport::LineTransport;

use std::io::{self, Read, Write};
use std::time::Duration;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits};
use thiserror::Error;
use tracing::info;

/// Baud rate of the ET54 series serial interface.
pub const BAUD_RATE: u32 = 115_200;

/// Read timeout used for a discharge session.
pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Connection error on {port}: {source}")]
    Connection {
        port: String,
        #[source]
        source: io::Error,
    },

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),
}

impl DeviceError {
    pub fn connection(port: &str, source: io::Error) -> Self {
        DeviceError::Connection {
            port: port.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;

/// Opens the byte stream behind a session.
///
/// The serial implementation is the only one used in production; tests plug
/// in a simulated instrument here.
pub trait Connector {
    type Io: Read + Write + DiscardInput + Send;

    fn open(&self, port: &str, timeout: Duration) -> Result<Self::Io>;
}

/// Streams that can drop whatever was received but not yet read.
pub trait DiscardInput {
    fn discard_input(&mut self) -> io::Result<()>;
}

impl DiscardInput for Box<dyn serialport::SerialPort> {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Opens real serial ports: 8 data bits, no parity, one stop bit, no flow control.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    type Io = Box<dyn serialport::SerialPort>;

    fn open(&self, port: &str, timeout: Duration) -> Result<Self::Io> {
        info!("Opening serial port {} at {} baud", port, BAUD_RATE);
        serialport::new(port, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| DeviceError::connection(port, e.into()))
    }
}
