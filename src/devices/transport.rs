//! Line framed transport over a byte stream.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{Connector, DeviceError, DiscardInput, Result};

/// Every response from the load ends with CR LF.
pub const RESPONSE_TERMINATOR: &[u8] = b"\r\n";

/// Commands are terminated with a bare LF.
pub const COMMAND_TERMINATOR: &str = "\n";

pub struct LineTransport<T> {
    port: String,
    io: T,
    timeout: Duration,
    read_buf: Vec<u8>,
}

impl<T: Read + Write + DiscardInput> LineTransport<T> {
    /// Opens `port` through `connector` with the given read timeout.
    pub fn open<C>(connector: &C, port: &str, timeout: Duration) -> Result<Self>
    where
        C: Connector<Io = T>,
    {
        let io = connector.open(port, timeout)?;
        Ok(Self::with(port, io, timeout))
    }

    /// Wraps an already open stream.
    pub fn with(port: &str, io: T, timeout: Duration) -> Self {
        Self {
            port: port.to_string(),
            io,
            timeout,
            read_buf: Vec::with_capacity(128),
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Drops buffered and pending input so a reply that arrived after its
    /// timeout is not taken for the answer to the next command.
    pub fn discard_input(&mut self) -> Result<()> {
        if !self.read_buf.is_empty() {
            debug!(
                "[{}] Dropping stale input: {:?}",
                self.port,
                String::from_utf8_lossy(&self.read_buf)
            );
            self.read_buf.clear();
        }
        self.io
            .discard_input()
            .map_err(|e| DeviceError::connection(&self.port, e))
    }

    /// Writes `text` followed by the command terminator in a single write.
    pub fn write_line(&mut self, text: &str) -> Result<()> {
        let line = format!("{}{}", text, COMMAND_TERMINATOR);
        debug!("[{}] >> {}", self.port, text);
        self.io
            .write_all(line.as_bytes())
            .and_then(|_| self.io.flush())
            .map_err(|e| DeviceError::connection(&self.port, e))
    }

    /// Reads one line including its CR LF terminator.
    ///
    /// Returns an empty buffer if no complete line arrived within the read
    /// timeout. Any partial line received before the timeout is discarded.
    pub fn read_line(&mut self) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;

        loop {
            if let Some(end) = self.find_line_ending() {
                let line: Vec<u8> = self.read_buf.drain(..end).collect();
                debug!("[{}] << {}", self.port, String::from_utf8_lossy(&line).trim_end());
                return Ok(line);
            }

            if Instant::now() >= deadline {
                break;
            }

            let mut chunk = [0u8; 64];
            match self.io.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
                Err(e) => return Err(DeviceError::connection(&self.port, e)),
            }
        }

        if !self.read_buf.is_empty() {
            debug!(
                "[{}] Discarding partial response: {:?}",
                self.port,
                String::from_utf8_lossy(&self.read_buf)
            );
            self.read_buf.clear();
        }
        debug!("[{}] Read timed out", self.port);
        Ok(Vec::new())
    }

    /// Index one past the end of the first CR LF in the read buffer, if any.
    fn find_line_ending(&self) -> Option<usize> {
        self.read_buf
            .windows(RESPONSE_TERMINATOR.len())
            .position(|w| w == RESPONSE_TERMINATOR)
            .map(|index| index + RESPONSE_TERMINATOR.len())
    }

    /// Gives back the underlying stream without closing it.
    pub fn into_inner(self) -> T {
        self.io
    }

    pub fn close(self) {
        info!("Closing {}", self.port);
    }
}
