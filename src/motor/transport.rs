// Byte transport for the half-duplex driver bus
//
// The driver UART is a single wire: every byte we send also arrives on our
// own receive path. The transport only moves bytes; echo handling lives in
// the driver.

use serialport::{self, ClearBuffer, SerialPort};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::trace;

use crate::config::MAX_DRAIN_BYTES;

/// Error types for the byte transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

/// Half-duplex, timeout-bounded byte transport
pub trait Transport {
    /// Send all of `bytes` in order; `timeout` bounds each byte.
    fn transmit(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), TransportError>;

    /// Fill `buf` completely or fail with `TransportError::Timeout`.
    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError>;

    /// Throw away whatever is sitting in the receive path. Returns the number
    /// of bytes dropped.
    fn discard_input(&mut self, timeout: Duration) -> Result<usize, TransportError> {
        let mut byte = [0u8; 1];
        let mut dropped = 0;
        while dropped < MAX_DRAIN_BYTES {
            match self.receive(&mut byte, timeout) {
                Ok(()) => dropped += 1,
                Err(TransportError::Timeout { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(dropped)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn transmit(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), TransportError> {
        (**self).transmit(bytes, timeout)
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError> {
        (**self).receive(buf, timeout)
    }

    fn discard_input(&mut self, timeout: Duration) -> Result<usize, TransportError> {
        (**self).discard_input(timeout)
    }
}

/// Transport over a host serial port (USB-UART adapter wired to PDN_UART)
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open a serial port at the given baudrate
    pub fn open(port_name: &str, baudrate: u32) -> Result<Self, TransportError> {
        let port = serialport::new(port_name, baudrate)
            .timeout(crate::config::TRANSMIT_BYTE_TIMEOUT)
            .open()?;

        Ok(Self { port })
    }

    fn map_timeout(e: io::Error, timeout: Duration) -> TransportError {
        if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock {
            TransportError::Timeout { timeout }
        } else {
            TransportError::Io(e)
        }
    }
}

impl Transport for SerialTransport {
    fn transmit(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), TransportError> {
        self.port.set_timeout(timeout)?;
        for byte in bytes {
            self.port
                .write_all(std::slice::from_ref(byte))
                .map_err(|e| Self::map_timeout(e, timeout))?;
        }
        self.port.flush().map_err(|e| Self::map_timeout(e, timeout))?;
        trace!("Transmitted {:02X?}", bytes);
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError> {
        self.port.set_timeout(timeout)?;
        self.port
            .read_exact(buf)
            .map_err(|e| Self::map_timeout(e, timeout))?;
        trace!("Received {:02X?}", buf);
        Ok(())
    }

    /// Flush the OS input buffer, which may hold far more than `MAX_DRAIN_BYTES`
    /// of write echoes.
    fn discard_input(&mut self, _timeout: Duration) -> Result<usize, TransportError> {
        let pending = self.port.bytes_to_read()?;
        self.port.clear(ClearBuffer::Input)?;
        Ok(pending as usize)
    }
}

/// Digital output wired to the driver's enable input
pub trait EnablePin {
    fn set_level(&mut self, high: bool) -> io::Result<()>;
}

/// Placeholder for drivers without a wired enable pin
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPin;

impl EnablePin for NoPin {
    fn set_level(&mut self, _high: bool) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Loopback {
        rx: VecDeque<u8>,
        reads: usize,
    }

    impl Transport for Loopback {
        fn transmit(&mut self, bytes: &[u8], _timeout: Duration) -> Result<(), TransportError> {
            self.rx.extend(bytes);
            Ok(())
        }

        fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError> {
            self.reads += 1;
            if self.rx.len() < buf.len() {
                return Err(TransportError::Timeout { timeout });
            }
            for b in buf.iter_mut() {
                *b = self.rx.pop_front().unwrap();
            }
            Ok(())
        }
    }

    #[test]
    fn test_discard_input_drains_stale_bytes() {
        let mut bus = Loopback {
            rx: VecDeque::new(),
            reads: 0,
        };
        bus.transmit(&[1, 2, 3], Duration::ZERO).unwrap();
        assert_eq!(bus.discard_input(Duration::ZERO).unwrap(), 3);
        assert!(bus.rx.is_empty());
    }

    #[test]
    fn test_discard_input_is_bounded() {
        let mut bus = Loopback {
            rx: (0..=255u8).cycle().take(MAX_DRAIN_BYTES * 2).collect(),
            reads: 0,
        };
        assert_eq!(bus.discard_input(Duration::ZERO).unwrap(), MAX_DRAIN_BYTES);
        assert_eq!(bus.reads, MAX_DRAIN_BYTES);
        assert_eq!(bus.rx.len(), MAX_DRAIN_BYTES);
    }

    fn echo_through<T: Transport>(mut transport: T) -> u8 {
        transport.transmit(&[0xAA], Duration::ZERO).unwrap();
        let mut buf = [0u8; 1];
        transport.receive(&mut buf, Duration::ZERO).unwrap();
        buf[0]
    }

    #[test]
    fn test_mut_ref_forwards() {
        let mut bus = Loopback {
            rx: VecDeque::new(),
            reads: 0,
        };
        assert_eq!(echo_through(&mut bus), 0xAA);
        assert_eq!(bus.reads, 1);
    }
}
