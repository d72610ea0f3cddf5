//! CRC-16-CCITT frame check
//!
//! Polynomial 0x1021, initial value 0xFFFF, bit-serial MSB first, no
//! reflection and no final xor (the "CCITT-FALSE" variant).

/// Generator polynomial
pub const CRC16_POLY: u16 = 0x1021;

/// Initial register value
pub const CRC16_INIT: u16 = 0xFFFF;

/// CRC-16-CCITT over `data`
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    crc16_ccitt_update(CRC16_INIT, data)
}

/// Continue a running CRC with more bytes
pub fn crc16_ccitt_update(mut crc: u16, data: &[u8]) -> u16 {
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_crc16_empty_is_init() {
        assert_eq!(crc16_ccitt(&[]), CRC16_INIT);
    }

    #[test]
    fn test_crc16_incremental() {
        let whole = crc16_ccitt(b"123456789");
        let partial = crc16_ccitt_update(crc16_ccitt(b"1234"), b"56789");
        assert_eq!(whole, partial);
    }
}
