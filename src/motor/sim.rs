// Simulated TMC2209 on a single-wire bus, for unit tests
//
// Every transmitted byte is echoed back onto the receive path, exactly like
// the real wire, unless `echo` is cleared. Read requests addressed to this device are answered with a
// sealed reply frame queued right behind the echo.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use super::datagram::{self, READ_REQUEST_SIZE, WRITE_READ_REPLY_SIZE};
use super::registers::{VERSION, address};
use super::transport::{Transport, TransportError};

pub struct SimDevice {
    pub address: u8,
    pub registers: HashMap<u8, u32>,
    /// Answer read requests at all
    pub responsive: bool,
    /// Flip a bit in every reply's CRC
    pub corrupt_replies: bool,
    /// Fail every transmit with a timeout
    pub fail_transmit: bool,
    /// Fail only writes to this register
    pub fail_register: Option<u8>,
    /// Loop transmitted bytes back, as a single-wire adapter does
    pub echo: bool,
    /// Every transmit call, in order
    pub sent: Vec<Vec<u8>>,
    rx: VecDeque<u8>,
}

impl SimDevice {
    pub fn new(address: u8) -> Self {
        let mut registers = HashMap::new();
        registers.insert(address::IOIN, u32::from(VERSION) << 24);
        Self {
            address,
            registers,
            responsive: true,
            corrupt_replies: false,
            fail_transmit: false,
            fail_register: None,
            echo: true,
            sent: Vec::new(),
            rx: VecDeque::new(),
        }
    }

    /// Decoded write requests, in order
    pub fn writes(&self) -> Vec<(u8, u32)> {
        self.sent
            .iter()
            .filter(|frame| frame.len() == WRITE_READ_REPLY_SIZE)
            .filter_map(|frame| {
                let frame: [u8; WRITE_READ_REPLY_SIZE] = frame.as_slice().try_into().ok()?;
                datagram::decode(&frame).ok()
            })
            .filter(|d| d.write)
            .map(|d| (d.register, d.data))
            .collect()
    }

    pub fn writes_to(&self, register: u8) -> usize {
        self.writes().iter().filter(|(r, _)| *r == register).count()
    }

    pub fn last_write(&self, register: u8) -> Option<u32> {
        self.writes()
            .iter()
            .rev()
            .find(|(r, _)| *r == register)
            .map(|&(_, data)| data)
    }

    pub fn reads(&self) -> usize {
        self.sent
            .iter()
            .filter(|frame| frame.len() == READ_REQUEST_SIZE)
            .count()
    }

    /// Bytes waiting on the receive path
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Put garbage on the line, as a previous transaction might have left
    pub fn inject_noise(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    fn handle_write(&mut self, frame: &[u8; WRITE_READ_REPLY_SIZE]) {
        let Ok(d) = datagram::decode(frame) else {
            return;
        };
        if d.address != self.address || !d.write {
            return;
        }
        let entry = self.registers.entry(d.register).or_insert(0);
        if d.register == address::GSTAT {
            // write 1 to clear
            *entry &= !d.data;
        } else {
            *entry = d.data;
        }
        let ifcnt = self.registers.entry(address::IFCNT).or_insert(0);
        *ifcnt = (*ifcnt + 1) & 0xFF;
    }

    fn handle_read(&mut self, frame: &[u8; READ_REQUEST_SIZE]) {
        let Ok(request) = datagram::decode_read_request(frame) else {
            return;
        };
        if request.address != self.address || !self.responsive {
            return;
        }
        let data = self.registers.get(&request.register).copied().unwrap_or(0);
        let mut reply = datagram::encode_reply(request.register, data);
        if self.corrupt_replies {
            reply[WRITE_READ_REPLY_SIZE - 1] ^= 0x01;
        }
        self.rx.extend(reply);
    }
}

impl Transport for SimDevice {
    fn transmit(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), TransportError> {
        let failing_write = self.fail_register.is_some_and(|register| {
            bytes.len() == WRITE_READ_REPLY_SIZE && bytes[2] == register | 0x80
        });
        if self.fail_transmit || failing_write {
            return Err(TransportError::Timeout { timeout });
        }
        self.sent.push(bytes.to_vec());
        if self.echo {
            self.rx.extend(bytes);
        }

        if let Ok(frame) = <[u8; WRITE_READ_REPLY_SIZE]>::try_from(bytes) {
            self.handle_write(&frame);
        } else if let Ok(frame) = <[u8; READ_REQUEST_SIZE]>::try_from(bytes) {
            self.handle_read(&frame);
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError> {
        let wanted = buf.len();
        if self.rx.len() < wanted {
            return Err(TransportError::Timeout { timeout });
        }
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..wanted)) {
            *slot = byte;
        }
        Ok(())
    }

    // Like clearing a port's input buffer: unbounded
    fn discard_input(&mut self, _timeout: Duration) -> Result<usize, TransportError> {
        let dropped = self.rx.len();
        self.rx.clear();
        Ok(dropped)
    }
}
