// Serial line settings and bus timeouts
use std::time::Duration;

// Default UART baudrate for the stepper drivers
pub const DEFAULT_BAUDRATE: u32 = 115_200;

// Serial port shared by every driver on the bus
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

// Upper bound on sending a single byte
pub const TRANSMIT_BYTE_TIMEOUT: Duration = Duration::from_millis(100);

// Max delay before our own request shows up on the receive line
pub const ECHO_TIMEOUT: Duration = Duration::from_micros(4_000);

// Max delay between the end of a read request and the full reply
pub const REPLY_TIMEOUT: Duration = Duration::from_micros(10_000);

// Per-byte wait while flushing stale bytes before a read
pub const ECHO_DRAIN_TIMEOUT: Duration = Duration::ZERO;

// Stop draining after this many bytes (a chattering line must not hang us)
pub const MAX_DRAIN_BYTES: usize = 64;

/// Timing and line settings handed to a driver at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    pub baudrate: u32,
    pub transmit_byte_timeout: Duration,
    pub echo_timeout: Duration,
    pub reply_timeout: Duration,
    pub drain_timeout: Duration,
    /// Single-wire buses hear their own requests; consume that echo before the reply.
    pub expect_echo: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            baudrate: DEFAULT_BAUDRATE,
            transmit_byte_timeout: TRANSMIT_BYTE_TIMEOUT,
            echo_timeout: ECHO_TIMEOUT,
            reply_timeout: REPLY_TIMEOUT,
            drain_timeout: ECHO_DRAIN_TIMEOUT,
            expect_echo: true,
        }
    }
}
