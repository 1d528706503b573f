use crate::instrument_link::{InstrumentLink, LinkError, LinkSettings};
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

/// Per-byte poll interval of the underlying port. The overall response
/// deadline comes from [`LinkSettings::timeout`].
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// [`InstrumentLink`] over a serial port.
///
/// The port is closed when the link is dropped, including on early returns
/// after a fatal error.
pub struct SerialLink {
    serial: Box<dyn SerialPort>,
    port: String,
    settings: LinkSettings,
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("port", &self.port)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SerialLink {
    /// Open `port` with the given transport settings and clear stale buffers.
    pub fn open(port: &str, settings: LinkSettings) -> Result<Self, LinkError> {
        log::debug!("Opening serial link on {} at {} baud", port, settings.baud_rate);
        let serial = serialport::new(port, settings.baud_rate)
            .timeout(POLL_INTERVAL)
            .parity(settings.parity.into())
            .stop_bits(settings.stop_bits.into())
            .open()?;

        let mut link = Self {
            serial,
            port: port.to_string(),
            settings,
        };
        link.flush()?;
        Ok(link)
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Flush the serial buffers
    fn flush(&mut self) -> Result<(), LinkError> {
        self.serial.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }

    /// Read one byte. `Ok(None)` means nothing arrived within one poll interval.
    fn read_byte(&mut self) -> Result<Option<u8>, LinkError> {
        let mut byte = [0u8; 1];
        match self.serial.read_exact(&mut byte) {
            Ok(()) => Ok(Some(byte[0])),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) if e.kind() == ErrorKind::BrokenPipe || e.kind() == ErrorKind::NotConnected => {
                Err(LinkError::ConnectionLost(format!("{}: {}", self.port, e)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl InstrumentLink for SerialLink {
    fn write(&mut self, command: &str) -> Result<(), LinkError> {
        log::debug!("[{}] >> {}", self.port, command);
        let terminated = format!("{}{}", command, self.settings.write_termination);
        self.serial.write_all(terminated.as_bytes())?;
        Ok(())
    }

    fn read(&mut self) -> Result<String, LinkError> {
        let terminator = self.settings.read_termination.as_bytes().to_vec();
        let timeout = self.settings.timeout();
        let mut response = Vec::new();
        let start = Instant::now();

        loop {
            match self.read_byte()? {
                Some(byte) => {
                    response.push(byte);
                    if !terminator.is_empty() && response.ends_with(&terminator) {
                        break;
                    }
                }
                // without a terminator, silence after data ends the response
                None if terminator.is_empty() && !response.is_empty() => break,
                None => {
                    if start.elapsed() >= timeout {
                        return Err(LinkError::Timeout { waited: timeout });
                    }
                }
            }
        }

        response.truncate(response.len() - terminator.len());
        let text = String::from_utf8(response)?;
        log::debug!("[{}] << {}", self.port, text.trim());
        Ok(text.trim().to_string())
    }

    /// A binary block ends when the port falls silent for one poll interval.
    fn read_raw(&mut self) -> Result<Vec<u8>, LinkError> {
        let timeout = self.settings.timeout();
        let mut response = Vec::new();
        let start = Instant::now();

        loop {
            match self.read_byte()? {
                Some(byte) => response.push(byte),
                None if !response.is_empty() => break,
                None => {
                    if start.elapsed() >= timeout {
                        return Err(LinkError::Timeout { waited: timeout });
                    }
                }
            }
        }

        log::debug!("[{}] << {} raw bytes", self.port, response.len());
        Ok(response)
    }

    fn clear_input(&mut self) -> Result<(), LinkError> {
        log::debug!("[{}] clearing input buffer", self.port);
        self.serial.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }
}
