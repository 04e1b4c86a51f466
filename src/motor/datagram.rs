// TMC2209 single-wire UART datagrams
//
// Write / read reply (8 bytes):
//   [sync|reserved, address, register|rw<<7, data (4 bytes, MSB first), crc]
// Read request (4 bytes):
//   [sync|reserved, address, register, crc]
//
// The payload field holds the byte-reversed logical value, so the most
// significant byte of the register goes out first.

/// Sync nibble in the low half of the first byte; the reserved nibble stays 0.
pub const SYNC: u8 = 0b0101;

/// Address the driver puts in the address field of its replies
pub const REPLY_ADDRESS: u8 = 0xFF;

pub const READ_REQUEST_SIZE: usize = 4;
pub const WRITE_READ_REPLY_SIZE: usize = 8;

/// Payload width in bytes
pub const DATA_SIZE: usize = 4;

const RW_WRITE: u8 = 0x80;
const REGISTER_MASK: u8 = 0x7F;
const CRC_POLYNOMIAL: u8 = 0x07;

/// Error decoding a received datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DatagramError {
    #[error("Checksum mismatch: computed 0x{expected:02X}, received 0x{received:02X}")]
    ChecksumMismatch { expected: u8, received: u8 },
}

/// A decoded 8-byte datagram (write request or read reply)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datagram {
    pub address: u8,
    pub register: u8,
    pub write: bool,
    pub data: u32,
}

/// A decoded 4-byte read request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub address: u8,
    pub register: u8,
}

/// CRC-8 (polynomial 0x07) over `bytes`, each byte consumed LSB first
pub fn crc8(bytes: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in bytes {
        let mut current = byte;
        for _ in 0..8 {
            if ((crc >> 7) ^ (current & 0x01)) != 0 {
                crc = (crc << 1) ^ CRC_POLYNOMIAL;
            } else {
                crc <<= 1;
            }
            current >>= 1;
        }
    }
    crc
}

/// Swap the byte order of a 32-bit payload
pub fn reverse_data(data: u32) -> u32 {
    let mut reversed = 0u32;
    for i in 0..DATA_SIZE {
        let right_shift = (DATA_SIZE - i - 1) * 8;
        let left_shift = i * 8;
        reversed |= ((data >> right_shift) & 0xFF) << left_shift;
    }
    reversed
}

/// Write the CRC of everything before the last byte into the last byte
fn seal<const N: usize>(frame: &mut [u8; N]) {
    frame[N - 1] = crc8(&frame[..N - 1]);
}

/// Recompute the CRC of a received frame and compare with its last byte
pub fn verify<const N: usize>(frame: &[u8; N]) -> Result<(), DatagramError> {
    let expected = crc8(&frame[..N - 1]);
    let received = frame[N - 1];
    if expected != received {
        return Err(DatagramError::ChecksumMismatch { expected, received });
    }
    Ok(())
}

fn build<const N: usize>(address: u8, register_byte: u8, data: Option<u32>) -> [u8; N] {
    let mut frame = [0u8; N];
    frame[0] = SYNC;
    frame[1] = address;
    frame[2] = register_byte;
    if let Some(data) = data {
        frame[3..3 + DATA_SIZE].copy_from_slice(&reverse_data(data).to_le_bytes());
    }
    seal(&mut frame);
    frame
}

/// Build a write request datagram
pub fn encode_write(address: u8, register: u8, data: u32) -> [u8; WRITE_READ_REPLY_SIZE] {
    build(address, (register & REGISTER_MASK) | RW_WRITE, Some(data))
}

/// Build a read request datagram
pub fn encode_read_request(address: u8, register: u8) -> [u8; READ_REQUEST_SIZE] {
    build(address, register & REGISTER_MASK, None)
}

/// Build a read reply datagram, as the driver would send it
pub fn encode_reply(register: u8, data: u32) -> [u8; WRITE_READ_REPLY_SIZE] {
    build(REPLY_ADDRESS, register & REGISTER_MASK, Some(data))
}

/// Decode an 8-byte datagram (read reply or write request)
pub fn decode(frame: &[u8; WRITE_READ_REPLY_SIZE]) -> Result<Datagram, DatagramError> {
    verify(frame)?;
    let mut payload = [0u8; DATA_SIZE];
    payload.copy_from_slice(&frame[3..3 + DATA_SIZE]);
    Ok(Datagram {
        address: frame[1],
        register: frame[2] & REGISTER_MASK,
        write: frame[2] & RW_WRITE != 0,
        data: reverse_data(u32::from_le_bytes(payload)),
    })
}

/// Decode a 4-byte read request
pub fn decode_read_request(frame: &[u8; READ_REQUEST_SIZE]) -> Result<ReadRequest, DatagramError> {
    verify(frame)?;
    Ok(ReadRequest {
        address: frame[1],
        register: frame[2] & REGISTER_MASK,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_crc_known_frames() {
        // Read GCONF from address 0
        assert_eq!(crc8(&[0x05, 0x00, 0x00]), 0x48);
        // Read IOIN from address 0
        assert_eq!(crc8(&[0x05, 0x00, 0x06]), 0x6F);
    }

    #[test]
    fn test_encode_read_request() {
        let frame = encode_read_request(0, 0x00);
        assert_eq!(frame, [0x05, 0x00, 0x00, 0x48]);

        // Register address is 7 bits; a stray rw bit must not leak into a read
        let frame = encode_read_request(0, 0x86);
        assert_eq!(frame, [0x05, 0x00, 0x06, 0x6F]);
    }

    #[test]
    fn test_encode_write_byte_order() {
        let frame = encode_write(0, 0x00, 0x0000_01C0);
        assert_eq!(frame, [0x05, 0x00, 0x80, 0x00, 0x00, 0x01, 0xC0, 0xF6]);

        let frame = encode_write(0, 0x6C, 0x1000_0053);
        assert_eq!(&frame[..7], &[0x05, 0x00, 0xEC, 0x10, 0x00, 0x00, 0x53]);
        assert_eq!(frame[7], 0x9C);
    }

    #[test]
    fn test_decode_reply() {
        let frame = [0x05, 0xFF, 0x06, 0x21, 0x00, 0x00, 0x40, 0x4F];
        let reply = decode(&frame).unwrap();
        assert_eq!(reply.address, REPLY_ADDRESS);
        assert_eq!(reply.register, 0x06);
        assert!(!reply.write);
        assert_eq!(reply.data, 0x2100_0040);
    }

    #[test]
    fn test_decode_bad_crc() {
        let mut frame = encode_reply(0x6F, 0xDEAD_BEEF);
        frame[7] ^= 0xFF;
        assert!(matches!(
            decode(&frame),
            Err(DatagramError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_reverse_data() {
        assert_eq!(reverse_data(0x1234_5678), 0x7856_3412);
        assert_eq!(reverse_data(0x0000_00FF), 0xFF00_0000);
        assert_eq!(reverse_data(0), 0);
    }

    #[quickcheck]
    fn reverse_data_is_an_involution(data: u32) -> bool {
        reverse_data(reverse_data(data)) == data
    }

    #[quickcheck]
    fn write_roundtrip(address: u8, register: u8, data: u32) -> bool {
        let register = register & REGISTER_MASK;
        decode(&encode_write(address, register, data))
            == Ok(Datagram {
                address,
                register,
                write: true,
                data,
            })
    }

    #[quickcheck]
    fn read_request_roundtrip(address: u8, register: u8) -> bool {
        let register = register & REGISTER_MASK;
        decode_read_request(&encode_read_request(address, register))
            == Ok(ReadRequest { address, register })
    }

    #[quickcheck]
    fn single_bit_flip_in_reply_is_detected(register: u8, data: u32, bit: u8) -> TestResult {
        let mut frame = encode_reply(register, data);
        let bit = usize::from(bit) % (WRITE_READ_REPLY_SIZE * 8);
        frame[bit / 8] ^= 1 << (bit % 8);
        match decode(&frame) {
            Err(DatagramError::ChecksumMismatch { .. }) => TestResult::passed(),
            Ok(datagram) => TestResult::error(format!(
                "Flipped bit {bit} went undetected: {frame:02X?} -> {datagram:02X?}"
            )),
        }
    }

    #[quickcheck]
    fn single_bit_flip_in_request_is_detected(address: u8, register: u8, bit: u8) -> bool {
        let mut frame = encode_read_request(address, register);
        let bit = usize::from(bit) % (READ_REQUEST_SIZE * 8);
        frame[bit / 8] ^= 1 << (bit % 8);
        decode_read_request(&frame).is_err()
    }
}
