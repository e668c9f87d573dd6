/// Polynomial for CRC-16/XMODEM (x^16 + x^12 + x^5 + 1)
pub const CRC_POLYNOMIAL: u16 = 0x1021;

/// Fold one byte into a CRC-16/XMODEM accumulator (avr-libc `_crc_xmodem_update`)
pub fn crc_xmodem_update(crc: u16, data: u8) -> u16 {
    let mut crc = crc ^ ((data as u16) << 8);
    for _ in 0..8 {
        if crc & 0x8000 != 0 {
            crc = (crc << 1) ^ CRC_POLYNOMIAL;
        } else {
            crc <<= 1;
        }
    }
    crc
}

/// Fold a whole slice through [`crc_xmodem_update`] starting from `seed`
pub fn crc_xmodem(seed: u16, data: &[u8]) -> u16 {
    data.iter().fold(seed, |crc, &byte| crc_xmodem_update(crc, byte))
}
