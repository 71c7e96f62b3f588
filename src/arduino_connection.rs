/// Connection to the table's Arduino
///
/// The firmware only ever reads: we write one ASCII line per command and never
/// wait for a reply. `SerialTransport` owns the real port, `RecordingTransport`
/// stands in for it on dry runs and in tests.

use std::io::{ErrorKind, Write};
use std::time::Duration;

use log::{debug, error, info};
use serialport;

use crate::config_loader::SerialSettings;
use crate::error::{MotionError, MotionResult};
use crate::wire::WireCommand;

/// Something the controller can write device lines to.
pub trait Transport {
    fn is_connected(&self) -> bool;
    fn write_command(&mut self, cmd: &WireCommand) -> MotionResult<()>;
}

/// Serial link to the table controller
pub struct SerialTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
    port_path: String,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port_path", &self.port_path)
            .field("connected", &self.port.is_some())
            .finish()
    }
}

impl SerialTransport {
    /// Open the port and wait out the board reset that opening triggers.
    pub fn connect(settings: &SerialSettings) -> MotionResult<Self> {
        let port_path = settings
            .port
            .clone()
            .ok_or(MotionError::TransportUnavailable)?;
        let port = serialport::new(port_path.as_str(), settings.baud_rate)
            .timeout(Duration::from_millis(settings.timeout_ms))
            .open()
            .map_err(|e| {
                error!(target: "arduino_connection", "Failed to connect on {}: {}", port_path, e);
                MotionError::TransportUnavailable
            })?;
        if settings.reset_delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(settings.reset_delay_ms)); // Arduino reset delay
        }
        info!(target: "arduino_connection", "Connected to table controller on {} at {} baud", port_path, settings.baud_rate);
        Ok(Self { port: Some(port), port_path })
    }

    pub fn port_path(&self) -> &str {
        &self.port_path
    }

    pub fn close(&mut self) {
        if self.port.take().is_some() {
            info!(target: "arduino_connection", "Serial connection on {} closed", self.port_path);
        }
    }
}

impl Transport for SerialTransport {
    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn write_command(&mut self, cmd: &WireCommand) -> MotionResult<()> {
        let port = self.port.as_mut().ok_or(MotionError::TransportUnavailable)?;
        let line = cmd.to_string();
        info!(target: "arduino_connection", "Sending: {}", line.trim_end());
        port.write_all(line.as_bytes())
            .and_then(|_| port.flush())
            .map_err(|e| match e.kind() {
                ErrorKind::TimedOut => MotionError::TransportWriteFailure(format!(
                    "timeout while writing to {}",
                    self.port_path
                )),
                _ => MotionError::TransportWriteFailure(e.to_string()),
            })
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Keeps every line instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    lines: Vec<WireCommand>,
    connected: bool,
    fail_writes: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self { lines: Vec::new(), connected: true, fail_writes: false }
    }

    pub fn disconnected() -> Self {
        Self { connected: false, ..Self::new() }
    }

    /// Accept the connection but fail every write, like a pulled cable.
    pub fn failing() -> Self {
        Self { fail_writes: true, ..Self::new() }
    }

    pub fn lines(&self) -> &[WireCommand] {
        &self.lines
    }

    pub fn text(&self) -> String {
        self.lines.iter().map(|l| l.to_string()).collect()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl Transport for RecordingTransport {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn write_command(&mut self, cmd: &WireCommand) -> MotionResult<()> {
        if !self.connected {
            return Err(MotionError::TransportUnavailable);
        }
        if self.fail_writes {
            return Err(MotionError::TransportWriteFailure("simulated write failure".into()));
        }
        debug!(target: "arduino_connection", "Recorded: {}", cmd.to_string().trim_end());
        self.lines.push(*cmd);
        Ok(())
    }
}

/// Either link, picked at startup.
#[derive(Debug)]
pub enum AnyTransport {
    Serial(SerialTransport),
    Recording(RecordingTransport),
}

impl Transport for AnyTransport {
    fn is_connected(&self) -> bool {
        match self {
            AnyTransport::Serial(t) => t.is_connected(),
            AnyTransport::Recording(t) => t.is_connected(),
        }
    }

    fn write_command(&mut self, cmd: &WireCommand) -> MotionResult<()> {
        match self {
            AnyTransport::Serial(t) => t.write_command(cmd),
            AnyTransport::Recording(t) => t.write_command(cmd),
        }
    }
}
