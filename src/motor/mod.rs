// TMC2209 stepper driver over single-wire UART
//
// Provides:
// - Datagram framing and CRC-8
// - Half-duplex byte transport (serial port, enable pin)
// - Register layouts and value mappings
// - High-level driver API with a write-through register cache

pub mod datagram;
mod driver;
pub mod mapping;
pub mod registers;
pub mod status;
pub mod transport;

#[cfg(test)]
mod sim;

pub use datagram::DatagramError;
pub use driver::{Result, Tmc2209, TmcError};
pub use registers::{CurrentIncrement, MeasurementCount, SerialAddress, StandstillMode};
pub use status::{GlobalStatus, Settings, Status};
pub use transport::{EnablePin, NoPin, SerialTransport, Transport, TransportError};
