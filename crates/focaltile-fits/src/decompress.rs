//! Raw-Data Decoding
//!
//! Turns the fetched data block of a segment into host-native pixels.
//!
//! Uncompressed blocks are plain big-endian samples. Compressed blocks are a
//! FITS binary table in which every image row is one independently compressed
//! tile. The fetched range starts with the table heap directory: `cAxis1·cAxis2`
//! bytes holding `(length, offset)` big-endian i32 pairs, one pair per row.
//! Payloads are stored in directory order immediately after, so only the lengths
//! are consulted; the cursor just walks forward:
//!
//! ```text
//! cursor = cAxis1·cAxis2
//! row i: decompress data[cursor .. cursor + length_i] → pixels[i·nAxis1 ..]
//!        cursor += length_i
//! ```
//!
//! Rows could be decompressed in parallel, but many HDUs are already in flight
//! per render, so each HDU stays sequential.

use focaltile_core::{BitPix, Compression, Error, PixelBuffer, Result, Segment};

use crate::gzip2::{gzip2_decode_f32, gzip2_decode_i32};
use crate::rice::rice_decode_i32;

/// Decode a segment's fetched data block into a pixel buffer.
pub fn decode_raw(segment: &Segment, data: &[u8]) -> Result<PixelBuffer> {
    if data.len() < segment.data_len {
        return Err(Error::Io(format!(
            "short read for {}: got {} of {} bytes",
            segment.file,
            data.len(),
            segment.data_len
        )));
    }
    match segment.compression {
        None => decode_uncompressed(segment, data),
        Some(kind) => decode_tiles(segment, data, kind),
    }
}

fn decode_uncompressed(segment: &Segment, data: &[u8]) -> Result<PixelBuffer> {
    let count = segment.n_axis1 as usize * segment.n_axis2 as usize;
    Ok(match segment.bitpix {
        BitPix::Int32 => PixelBuffer::Int32(
            data[..count * 4]
                .chunks_exact(4)
                .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        ),
        BitPix::Float32 => PixelBuffer::Float32(
            data[..count * 4]
                .chunks_exact(4)
                .map(|b| f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        ),
    })
}

fn decode_tiles(segment: &Segment, data: &[u8], kind: Compression) -> Result<PixelBuffer> {
    let row_len = segment.n_axis1 as usize;
    let rows = segment.c_axis2 as usize;
    let directory_len = segment.c_axis1 as usize * segment.c_axis2 as usize;
    if data.len() < directory_len {
        return Err(Error::Internal(format!(
            "tile directory truncated: {} of {directory_len} bytes",
            data.len()
        )));
    }

    let lengths = tile_lengths(&data[..directory_len], rows)?;

    let mut cursor = directory_len;
    match (kind, segment.bitpix) {
        (Compression::Rice1, BitPix::Int32) => {
            let mut pixels = Vec::with_capacity(row_len * rows);
            for length in lengths {
                let tile = tile_slice(data, cursor, length)?;
                pixels.extend(rice_decode_i32(tile, row_len)?);
                cursor += length;
            }
            Ok(PixelBuffer::Int32(pixels))
        }
        (Compression::Gzip2, BitPix::Int32) => {
            let mut pixels = Vec::with_capacity(row_len * rows);
            for length in lengths {
                let tile = tile_slice(data, cursor, length)?;
                pixels.extend(gzip2_decode_i32(tile, row_len)?);
                cursor += length;
            }
            Ok(PixelBuffer::Int32(pixels))
        }
        (Compression::Gzip2, BitPix::Float32) => {
            let mut pixels = Vec::with_capacity(row_len * rows);
            for length in lengths {
                let tile = tile_slice(data, cursor, length)?;
                pixels.extend(gzip2_decode_f32(tile, row_len)?);
                cursor += length;
            }
            Ok(PixelBuffer::Float32(pixels))
        }
        (Compression::Rice1, BitPix::Float32) => Err(Error::Unsupported(
            "RICE_1 float segments".to_string(),
        )),
    }
}

/// Read the per-row payload lengths out of the `(length, offset)` directory.
fn tile_lengths(directory: &[u8], rows: usize) -> Result<Vec<usize>> {
    if directory.len() < rows * 8 {
        return Err(Error::Internal(format!(
            "tile directory holds {} bytes for {rows} rows",
            directory.len()
        )));
    }
    (0..rows)
        .map(|i| {
            let at = i * 8;
            let length =
                i32::from_be_bytes([directory[at], directory[at + 1], directory[at + 2], directory[at + 3]]);
            if length < 0 {
                return Err(Error::Internal(format!("negative tile length {length}")));
            }
            Ok(length as usize)
        })
        .collect()
}

fn tile_slice(data: &[u8], cursor: usize, length: usize) -> Result<&[u8]> {
    data.get(cursor..cursor + length)
        .ok_or_else(|| Error::Internal("tile payload overruns data block".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use focaltile_core::{Rect, SegmentInit};

    fn segment(
        n1: i32,
        n2: i32,
        bitpix: BitPix,
        compression: Option<Compression>,
        c1: i32,
        c2: i32,
        data_len: usize,
    ) -> Segment {
        Segment::new(SegmentInit {
            file: "test.fits".to_string(),
            hdu_index: 1,
            file_len: 0,
            data_offset: 2880,
            data_len,
            bitpix,
            n_axis1: n1,
            n_axis2: n2,
            compression,
            c_axis1: c1,
            c_axis2: c2,
            datasec: Rect::new(0, 0, n1, n2),
            raft_bay: None,
            ccd_slot: "S00".to_string(),
            segment_name: None,
            wcs_letter: 'E',
            pc1_1: 1.0,
            pc1_2: 0.0,
            pc2_1: 0.0,
            pc2_2: 1.0,
            crval1: 0.0,
            crval2: 0.0,
        })
        .unwrap()
    }

    fn directory_entry(length: usize, offset: usize) -> [u8; 8] {
        let mut entry = [0u8; 8];
        entry[..4].copy_from_slice(&(length as i32).to_be_bytes());
        entry[4..].copy_from_slice(&(offset as i32).to_be_bytes());
        entry
    }

    #[test]
    fn test_uncompressed_int_round_trip() {
        let values: Vec<i32> = (0..12).map(|v| v * 3 - 5).collect();
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        let seg = segment(4, 3, BitPix::Int32, None, 0, 0, bytes.len());

        let buf = decode_raw(&seg, &bytes).unwrap();
        assert_eq!(buf.as_int().unwrap(), &values[..]);
    }

    #[test]
    fn test_uncompressed_float_round_trip() {
        let values = [0.5f32, -1.5, 3.25, 0.0];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        let seg = segment(2, 2, BitPix::Float32, None, 0, 0, bytes.len());

        let buf = decode_raw(&seg, &bytes).unwrap();
        assert_eq!(buf.as_float().unwrap(), &values[..]);
    }

    #[test]
    fn test_short_read_is_io_error() {
        let seg = segment(4, 3, BitPix::Int32, None, 0, 0, 48);
        assert!(matches!(decode_raw(&seg, &[0u8; 20]), Err(Error::Io(_))));
    }

    #[test]
    fn test_rice_tiled_rows() {
        // two rows of four pixels, each a constant-run RICE tile
        let row_a = [0, 0, 0, 7, 0b0000_0000];
        let row_b = [0, 0, 0, 9, 0b0000_0000];

        let mut data = Vec::new();
        data.extend_from_slice(&directory_entry(row_a.len(), 0));
        data.extend_from_slice(&directory_entry(row_b.len(), row_a.len()));
        data.extend_from_slice(&row_a);
        data.extend_from_slice(&row_b);

        let seg = segment(
            4,
            2,
            BitPix::Int32,
            Some(Compression::Rice1),
            8,
            2,
            data.len(),
        );
        let buf = decode_raw(&seg, &data).unwrap();
        assert_eq!(buf.as_int().unwrap(), &[7, 7, 7, 7, 9, 9, 9, 9]);
    }

    #[test]
    fn test_rice_float_unsupported() {
        let seg = segment(4, 1, BitPix::Float32, Some(Compression::Rice1), 8, 1, 16);
        let data = vec![0u8; 16];
        assert!(matches!(
            decode_raw(&seg, &data),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_overrunning_tile_is_internal() {
        let mut data = Vec::new();
        data.extend_from_slice(&directory_entry(1000, 0));
        data.extend_from_slice(&[0u8; 8]);
        let seg = segment(
            4,
            1,
            BitPix::Int32,
            Some(Compression::Rice1),
            8,
            1,
            data.len(),
        );
        assert!(matches!(decode_raw(&seg, &data), Err(Error::Internal(_))));
    }
}
