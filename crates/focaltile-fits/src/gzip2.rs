//! GZIP_2 Tile Decompression
//!
//! GZIP_2 is ordinary gzip over byte-shuffled samples: the tile's bytes are
//! regrouped by significance plane, all most-significant bytes first, before
//! compression. Shuffling puts the slowly-varying high bytes next to each other,
//! which deflate compresses far better than interleaved samples.
//!
//! Decoding therefore inflates the payload, checks the size, and gathers each
//! sample's four bytes back out of the planes:
//!
//! ```text
//! inflated:  [msb0 msb1 … msbN | b1_0 … b1_N | b2_0 … b2_N | lsb0 … lsbN]
//! sample i = (msb_i, b1_i, b2_i, lsb_i)  as big-endian
//! ```

use std::io::Read;

use flate2::read::GzDecoder;
use focaltile_core::{Error, Result};

/// Inflate one GZIP_2 tile into `count` i32 samples.
pub fn gzip2_decode_i32(input: &[u8], count: usize) -> Result<Vec<i32>> {
    let planes = inflate(input, count)?;
    Ok(unshuffle(&planes, count, i32::from_be_bytes))
}

/// Inflate one GZIP_2 tile into `count` f32 samples.
pub fn gzip2_decode_f32(input: &[u8], count: usize) -> Result<Vec<f32>> {
    let planes = inflate(input, count)?;
    Ok(unshuffle(&planes, count, f32::from_be_bytes))
}

fn inflate(input: &[u8], count: usize) -> Result<Vec<u8>> {
    let expected = count * 4;
    let mut decoder = GzDecoder::new(input);
    let mut inflated = Vec::with_capacity(expected);
    decoder
        .read_to_end(&mut inflated)
        .map_err(|e| Error::Internal(format!("GZIP_2 inflation failed: {e}")))?;
    if inflated.len() != expected {
        return Err(Error::Internal(format!(
            "GZIP_2 tile inflated to {} bytes, expected {expected}",
            inflated.len()
        )));
    }
    Ok(inflated)
}

fn unshuffle<T>(planes: &[u8], count: usize, assemble: fn([u8; 4]) -> T) -> Vec<T> {
    (0..count)
        .map(|i| {
            assemble([
                planes[i],
                planes[i + count],
                planes[i + 2 * count],
                planes[i + 3 * count],
            ])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use std::io::Write;

    /// Shuffle samples into significance planes and gzip them, the way the
    /// camera writer stores tiles.
    fn shuffle_and_gzip(values: &[i32]) -> Vec<u8> {
        let n = values.len();
        let mut planes = vec![0u8; n * 4];
        for (i, v) in values.iter().enumerate() {
            let be = v.to_be_bytes();
            for plane in 0..4 {
                planes[i + plane * n] = be[plane];
            }
        }
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&planes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_round_trip_int_tile() {
        let values = vec![24_001, 24_003, 23_998, -7, 0, 262_143];
        let tile = shuffle_and_gzip(&values);
        assert_eq!(gzip2_decode_i32(&tile, values.len()).unwrap(), values);
    }

    #[test]
    fn test_float_tile() {
        let floats = [1.5f32, -0.25, 1000.0];
        let as_bits: Vec<i32> = floats.iter().map(|f| f.to_bits() as i32).collect();
        let tile = shuffle_and_gzip(&as_bits);
        assert_eq!(gzip2_decode_f32(&tile, 3).unwrap(), floats);
    }

    #[test]
    fn test_decode_is_idempotent() {
        let tile = shuffle_and_gzip(&[5, 6, 7, 8]);
        assert_eq!(
            gzip2_decode_i32(&tile, 4).unwrap(),
            gzip2_decode_i32(&tile, 4).unwrap()
        );
    }

    #[test]
    fn test_wrong_length_is_internal_error() {
        let tile = shuffle_and_gzip(&[1, 2, 3]);
        assert!(matches!(
            gzip2_decode_i32(&tile, 4),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_garbage_is_internal_error() {
        assert!(matches!(
            gzip2_decode_i32(&[0xde, 0xad, 0xbe, 0xef], 1),
            Err(Error::Internal(_))
        ));
    }
}
