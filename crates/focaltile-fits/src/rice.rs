//! RICE_1 Tile Decompression
//!
//! The FITS RICE_1 coder models each tile as a stream of pixel-to-pixel
//! differences. The first pixel value is stored verbatim (4 big-endian bytes for
//! `bytePix = 4`), then pixels are grouped into blocks of `blockSize` samples.
//! Each block begins with a 5-bit code `fs + 1`:
//!
//! - `fs = -1`: every difference in the block is zero
//! - `fs = 25`: differences are stored raw, 32 bits each
//! - otherwise: each difference is Golomb-coded as a unary quotient (zero bits
//!   terminated by a one) followed by `fs` literal low bits
//!
//! Differences are zigzag-folded so small magnitudes of either sign stay small:
//! even codes are `d/2`, odd codes are `-(d/2) - 1`.
//!
//! Camera data fixes `blockSize = 32` and `bytePix = 4`; nothing else is
//! accepted. A stream that runs out of bits mid-block is corruption and maps to
//! `Error::Internal`.

use focaltile_core::{Error, Result};

pub const RICE_BLOCK_SIZE: usize = 32;

const FS_BITS: u32 = 5;
const FS_MAX: i32 = 25;
const B_BITS: u32 = 32;

/// MSB-first bit cursor over a tile payload.
struct BitReader<'a> {
    data: &'a [u8],
    /// Absolute bit position.
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Take `n <= 32` bits as an unsigned value.
    fn take(&mut self, n: u32) -> Result<u32> {
        let mut out: u32 = 0;
        for _ in 0..n {
            out = (out << 1) | self.take_bit()?;
        }
        Ok(out)
    }

    fn take_bit(&mut self) -> Result<u32> {
        let byte = self
            .data
            .get(self.pos / 8)
            .ok_or_else(|| Error::Internal("RICE stream exhausted".to_string()))?;
        let bit = (byte >> (7 - self.pos % 8)) & 1;
        self.pos += 1;
        Ok(bit as u32)
    }

    /// Count zero bits up to and including the terminating one bit.
    fn take_unary(&mut self) -> Result<u32> {
        let mut zeros = 0;
        while self.take_bit()? == 0 {
            zeros += 1;
            if zeros > u32::BITS {
                return Err(Error::Internal("RICE unary run too long".to_string()));
            }
        }
        Ok(zeros)
    }
}

/// Decompress one RICE_1 tile into `count` i32 samples.
pub fn rice_decode_i32(input: &[u8], count: usize) -> Result<Vec<i32>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    if input.len() < 4 {
        return Err(Error::Internal(format!(
            "RICE tile too short: {} bytes",
            input.len()
        )));
    }

    let mut last = i32::from_be_bytes([input[0], input[1], input[2], input[3]]);
    let mut bits = BitReader::new(&input[4..]);
    let mut out = Vec::with_capacity(count);

    while out.len() < count {
        let fs = bits.take(FS_BITS)? as i32 - 1;
        let block_end = (out.len() + RICE_BLOCK_SIZE).min(count);

        if fs < 0 {
            // constant run
            out.resize(block_end, last);
        } else if fs >= FS_MAX {
            for _ in out.len()..block_end {
                let diff = bits.take(B_BITS)?;
                last = apply_diff(last, diff);
                out.push(last);
            }
        } else {
            for _ in out.len()..block_end {
                let quotient = bits.take_unary()?;
                let remainder = bits.take(fs as u32)?;
                let diff = (quotient << fs) | remainder;
                last = apply_diff(last, diff);
                out.push(last);
            }
        }
    }

    Ok(out)
}

/// Undo the zigzag fold and accumulate onto the previous sample.
fn apply_diff(last: i32, diff: u32) -> i32 {
    let delta = if diff & 1 == 0 {
        (diff >> 1) as i32
    } else {
        !((diff >> 1) as i32)
    };
    last.wrapping_add(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_tile() {
        // reference value 42, one all-zero block code (fs = -1)
        let input = [0, 0, 0, 42, 0b0000_0000];
        assert_eq!(rice_decode_i32(&input, 4).unwrap(), vec![42, 42, 42, 42]);
    }

    #[test]
    fn test_golomb_coded_diffs() {
        // fs code 1 (fs = 0); diffs 0, +1, -1, 0 zigzag to codes 0, 2, 1, 0,
        // i.e. unary bits 1, 001, 01, 1 → 00001 1 001 01 1 padded = 0x0C 0xB0
        let input = [0, 0, 0, 10, 0x0C, 0xB0];
        assert_eq!(rice_decode_i32(&input, 4).unwrap(), vec![10, 11, 10, 10]);
    }

    #[test]
    fn test_raw_block_escape() {
        // fs code 26 (fs = FS_MAX): one raw 32-bit diff of 10 (zigzag for +5)
        let input = [0, 0, 0, 100, 0xD0, 0x00, 0x00, 0x00, 0x50];
        assert_eq!(rice_decode_i32(&input, 1).unwrap(), vec![105]);
    }

    #[test]
    fn test_negative_reference_value() {
        let input = [0xFF, 0xFF, 0xFF, 0xFE, 0b0000_0000];
        assert_eq!(rice_decode_i32(&input, 2).unwrap(), vec![-2, -2]);
    }

    #[test]
    fn test_decode_is_idempotent() {
        let input = [0, 0, 0, 10, 0x0C, 0xB0];
        let a = rice_decode_i32(&input, 4).unwrap();
        let b = rice_decode_i32(&input, 4).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_truncated_stream_is_internal_error() {
        // promises 40 samples but carries bits for only a few
        let input = [0, 0, 0, 10, 0x0C];
        let err = rice_decode_i32(&input, 40).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_short_tile_rejected() {
        assert!(rice_decode_i32(&[0, 0], 4).is_err());
    }

    #[test]
    fn test_empty_tile() {
        assert_eq!(rice_decode_i32(&[], 0).unwrap(), Vec::<i32>::new());
    }
}
