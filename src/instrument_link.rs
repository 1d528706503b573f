use serde::Deserialize;
use std::time::Duration;

/// Message-level access to one instrument.
///
/// Implementations own the transport (serial port, USB handle, ...). The
/// measurement code only ever talks to instruments through this trait, so the
/// same drivers run against real hardware and against [`crate::MockLink`].
pub trait InstrumentLink {
    /// Send one command. The write terminator is appended by the link.
    fn write(&mut self, command: &str) -> Result<(), LinkError>;

    /// Block until one terminated text response arrives or the timeout expires.
    fn read(&mut self) -> Result<String, LinkError>;

    /// Block until one raw response arrives. No text decoding is attempted.
    fn read_raw(&mut self) -> Result<Vec<u8>, LinkError>;

    /// Drop anything received but not read yet, such as a reply that arrived
    /// after its read timed out.
    fn clear_input(&mut self) -> Result<(), LinkError>;

    fn query(&mut self, command: &str) -> Result<String, LinkError> {
        self.write(command)?;
        self.read()
    }

    /// Like [`InstrumentLink::query`], but for payloads that are not valid text.
    fn query_binary(&mut self, command: &str) -> Result<Vec<u8>, LinkError> {
        self.write(command)?;
        self.read_raw()
    }
}

impl<L: InstrumentLink + ?Sized> InstrumentLink for &mut L {
    fn write(&mut self, command: &str) -> Result<(), LinkError> {
        (**self).write(command)
    }

    fn read(&mut self) -> Result<String, LinkError> {
        (**self).read()
    }

    fn read_raw(&mut self) -> Result<Vec<u8>, LinkError> {
        (**self).read_raw()
    }

    fn clear_input(&mut self) -> Result<(), LinkError> {
        (**self).clear_input()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout error: no complete response within {waited:?}")]
    Timeout { waited: Duration },

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

impl LinkError {
    /// Whether the failure may clear up on a second attempt.
    ///
    /// Timeouts and garbled text are transient. Anything else means the
    /// transport itself is gone.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Utf8(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            Self::SerialPort(_) | Self::ConnectionLost(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkParity {
    None,
    Odd,
    Even,
}

impl From<LinkParity> for serialport::Parity {
    fn from(parity: LinkParity) -> Self {
        match parity {
            LinkParity::None => Self::None,
            LinkParity::Odd => Self::Odd,
            LinkParity::Even => Self::Even,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStopBits {
    One,
    Two,
}

impl From<LinkStopBits> for serialport::StopBits {
    fn from(stop_bits: LinkStopBits) -> Self {
        match stop_bits {
            LinkStopBits::One => Self::One,
            LinkStopBits::Two => Self::Two,
        }
    }
}

/// Transport parameters for one link.
///
/// A timeout shorter than the instrument's conversion time truncates
/// readings, so these are part of measurement correctness even though the
/// transport owns them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub baud_rate: u32,
    pub timeout_ms: u64,
    pub read_termination: String,
    pub write_termination: String,
    pub parity: LinkParity,
    pub stop_bits: LinkStopBits,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            timeout_ms: 2000,
            read_termination: "\n".to_string(),
            write_termination: "\n".to_string(),
            parity: LinkParity::None,
            stop_bits: LinkStopBits::One,
        }
    }
}

impl LinkSettings {
    /// Serial settings of the bench multimeter: 5 s timeout, two stop bits.
    pub fn multimeter() -> Self {
        Self {
            timeout_ms: 5000,
            stop_bits: LinkStopBits::Two,
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LinkError::Timeout {
            waited: Duration::from_millis(5)
        }
        .is_retryable());
        assert!(LinkError::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)).is_retryable());
        assert!(!LinkError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe)).is_retryable());
        assert!(!LinkError::ConnectionLost("unplugged".to_string()).is_retryable());
    }

    #[test]
    fn test_multimeter_preset() {
        let settings = LinkSettings::multimeter();
        assert_eq!(settings.timeout(), Duration::from_secs(5));
        assert_eq!(settings.stop_bits, LinkStopBits::Two);
        assert_eq!(settings.parity, LinkParity::None);
        assert_eq!(settings.read_termination, "\n");
    }
}
