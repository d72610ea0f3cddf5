//! Little-endian packed bitfields
//!
//! Probe firmware packs most status fields LSB-first: bit 0 is the least
//! significant bit of byte 0, bit 8 the least significant bit of byte 1,
//! and a field may straddle byte boundaries.
//!
//! ```text
//!  byte 0            byte 1
//! ┌─┬─┬─┬─┬─┬─┬─┬─┐ ┌─┬─┬─┬─┬─┬─┬─┬─┐
//! │7│6│5│4│3│2│1│0│ │F│E│D│C│B│A│9│8│   bit numbers
//! └─┴─┴─┴─┴─┴─┴─┴─┘ └─┴─┴─┴─┴─┴─┴─┴─┘
//! field(4, 6) = bits 4..=9
//! ```

/// Reads unsigned fields out of a packed byte slice
#[derive(Debug, Clone, Copy)]
pub struct BitReader<'a> {
    data: &'a [u8],
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Number of bits available
    pub fn bit_len(&self) -> usize {
        self.data.len() * 8
    }

    /// Read `width` bits (at most 32) starting at bit `offset`
    ///
    /// Returns `None` if the field runs past the end of the buffer.
    pub fn field(&self, offset: usize, width: usize) -> Option<u32> {
        if width > 32 || offset + width > self.bit_len() {
            return None;
        }
        let mut value = 0u32;
        for i in 0..width {
            let bit = offset + i;
            if (self.data[bit / 8] >> (bit % 8)) & 1 == 1 {
                value |= 1 << i;
            }
        }
        Some(value)
    }
}

/// Builds a packed byte buffer field by field
#[derive(Debug, Clone)]
pub struct BitWriter {
    data: Vec<u8>,
}

impl BitWriter {
    /// Create a zeroed writer of `len` bytes
    pub fn new(len: usize) -> Self {
        Self { data: vec![0; len] }
    }

    /// Write the low `width` bits of `value` at bit `offset`
    ///
    /// Bits past the end of the buffer are silently dropped; callers size
    /// the buffer from the fixed layout they are encoding.
    pub fn put(&mut self, offset: usize, width: usize, value: u32) -> &mut Self {
        for i in 0..width.min(32) {
            let bit = offset + i;
            let Some(byte) = self.data.get_mut(bit / 8) else {
                break;
            };
            let mask = 1u8 << (bit % 8);
            if (value >> i) & 1 == 1 {
                *byte |= mask;
            } else {
                *byte &= !mask;
            }
        }
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_within_byte() {
        let data = [0b1011_0100];
        let reader = BitReader::new(&data);
        assert_eq!(reader.field(2, 3), Some(0b101));
        assert_eq!(reader.field(0, 8), Some(0xB4));
    }

    #[test]
    fn test_field_across_bytes() {
        // bits 4..=11 span the high nibble of byte 0 and low nibble of byte 1
        let data = [0xA0, 0x0B];
        let reader = BitReader::new(&data);
        assert_eq!(reader.field(4, 8), Some(0xBA));
    }

    #[test]
    fn test_field_out_of_range() {
        let data = [0xFF, 0xFF];
        let reader = BitReader::new(&data);
        assert_eq!(reader.field(10, 7), None);
        assert_eq!(reader.field(0, 33), None);
    }

    #[test]
    fn test_writer_matches_reader() {
        let mut writer = BitWriter::new(7);
        writer.put(0, 4, 3).put(28, 17, 90_000).put(45, 11, 0x7FF);
        let bytes = writer.into_bytes();

        let reader = BitReader::new(&bytes);
        assert_eq!(reader.field(0, 4), Some(3));
        assert_eq!(reader.field(28, 17), Some(90_000));
        assert_eq!(reader.field(45, 11), Some(0x7FF));
    }

    #[test]
    fn test_writer_truncates_value_to_width() {
        let mut writer = BitWriter::new(1);
        writer.put(0, 3, 0xFF);
        assert_eq!(writer.into_bytes(), vec![0b0000_0111]);
    }
}
