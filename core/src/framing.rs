use crate::crc::{crc_xmodem, crc_xmodem_update};
use crate::error::{Result, TxError};

// Wire constants shared with UKHASnet receivers. Changing any of these breaks
// compatibility with deployed gateways.

/// Alternating 1010 pattern for receiver clock recovery
pub const PREAMBLE_SYMBOL: u8 = 0xAA;

/// Number of preamble bytes
pub const PREAMBLE_LEN: usize = 3;

/// Sync word, sent big-endian after the preamble
pub const SYNC_WORD: u16 = 0x2DAA;

/// Seed for the packet CRC accumulator
pub const CRC_INIT: u16 = 0x1D0F;

/// Largest payload the single length byte can describe
pub const MAX_LENGTH: usize = 0xFF;

/// preamble (3) + sync (2) + length (1) + crc (2)
pub const PACKET_OVERHEAD: usize = PREAMBLE_LEN + 2 + 1 + 2;

/// Largest packet the framer can emit
pub const MAX_PACKET: usize = PACKET_OVERHEAD + MAX_LENGTH;

/// Offset of the length byte within a frame
const LENGTH_OFFSET: usize = PREAMBLE_LEN + 2;

/// A framed packet ready for modulation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    bytes: Vec<u8>,
}

impl Packet {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of bits on air
    pub fn bit_len(&self) -> usize {
        self.bytes.len() * 8
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[LENGTH_OFFSET + 1..self.bytes.len() - 2]
    }

    /// Transmitted (complemented) CRC
    pub fn crc(&self) -> u16 {
        let n = self.bytes.len();
        u16::from_be_bytes([self.bytes[n - 2], self.bytes[n - 1]])
    }

    /// Bits in transmission order, most significant bit of each byte first
    pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
        self.bytes
            .iter()
            .flat_map(|&byte| (0..8).rev().map(move |b| (byte >> b) & 1 == 1))
    }

    /// One-line hex dump, e.g. `0xAA 0xAA 0xAA 0x2D ...`
    pub fn to_hex(&self) -> String {
        self.bytes
            .iter()
            .map(|b| format!("0x{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Build a UKHASnet packet around `payload`
///
/// Layout: `AA AA AA | 2D AA | len | payload... | crc_hi crc_lo`
///
/// The CRC covers the length byte and payload only, seeded with
/// [`CRC_INIT`] and complemented before transmission.
pub fn frame(payload: &[u8]) -> Result<Packet> {
    if payload.len() > MAX_LENGTH {
        return Err(TxError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_LENGTH,
        });
    }

    let mut bytes = Vec::with_capacity(PACKET_OVERHEAD + payload.len());
    bytes.extend_from_slice(&[PREAMBLE_SYMBOL; PREAMBLE_LEN]);
    bytes.extend_from_slice(&SYNC_WORD.to_be_bytes());

    let length = payload.len() as u8;
    let mut crc = crc_xmodem_update(CRC_INIT, length);
    bytes.push(length);

    for &byte in payload {
        crc = crc_xmodem_update(crc, byte);
        bytes.push(byte);
    }

    crc ^= 0xFFFF;
    bytes.extend_from_slice(&crc.to_be_bytes());

    let packet = Packet { bytes };
    log::debug!("framed packet ({} bytes): {}", packet.len(), packet.to_hex());
    Ok(packet)
}

/// Check a framed byte sequence and return its payload
///
/// Re-runs the CRC over length and payload and compares it with the trailing
/// two bytes. Used to self-check emitted frames.
pub fn verify(data: &[u8]) -> Result<&[u8]> {
    if data.len() < PACKET_OVERHEAD {
        return Err(TxError::FrameTooShort(data.len()));
    }

    if data[..PREAMBLE_LEN].iter().any(|&b| b != PREAMBLE_SYMBOL) {
        return Err(TxError::InvalidPreamble);
    }

    let sync = u16::from_be_bytes([data[PREAMBLE_LEN], data[PREAMBLE_LEN + 1]]);
    if sync != SYNC_WORD {
        return Err(TxError::InvalidSyncWord(sync));
    }

    let declared = data[LENGTH_OFFSET] as usize;
    let actual = data.len() - PACKET_OVERHEAD;
    if declared != actual {
        return Err(TxError::LengthMismatch { declared, actual });
    }

    let crc_end = data.len() - 2;
    let expected = crc_xmodem(CRC_INIT, &data[LENGTH_OFFSET..crc_end]) ^ 0xFFFF;
    let received = u16::from_be_bytes([data[crc_end], data[crc_end + 1]]);
    if expected != received {
        return Err(TxError::CrcMismatch {
            expected,
            actual: received,
        });
    }

    Ok(&data[LENGTH_OFFSET + 1..crc_end])
}
