//! Segment Metadata
//!
//! A `Segment` describes one amplifier of one CCD: where its pixel block lives
//! inside a FITS file, how the pixels are laid out and compressed, which
//! sub-rectangle carries science pixels (DATASEC), and the affine transform that
//! places those pixels on the virtual focal plane.
//!
//! ## Identity
//! Segments are immutable once constructed and are used as cache keys throughout
//! the fabric. Equality and hashing deliberately cover only
//! `(file, hdu_index, wcs_letter)`: two decodes of the same HDU under the same
//! WCS selection are the same segment, no matter when the headers were read.
//!
//! ## Freshness
//! `file_len` is the length of the source observed at decode time. The raw-data
//! loader compares it against the source's current length and refuses to read
//! through a stale offset, so a file swapped under an open cache entry produces a
//! deterministic I/O failure instead of garbage pixels.

use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};
use crate::geom::{Affine, Rect, RectF};

/// Pixel sample format of a segment's data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitPix {
    /// 32-bit signed integers (`BITPIX = 32`).
    Int32,
    /// IEEE 754 single-precision floats (`BITPIX = -32`).
    Float32,
}

impl BitPix {
    pub fn from_value(value: i64) -> Result<BitPix> {
        match value {
            32 => Ok(BitPix::Int32),
            -32 => Ok(BitPix::Float32),
            other => Err(Error::Unsupported(format!("BITPIX {other}"))),
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        4
    }
}

/// FITS tile-compression algorithm of a compressed image extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    Rice1,
    Gzip2,
}

impl Compression {
    /// Map a `ZCMPTYPE` value. Anything else is a hard failure so the segment is
    /// rejected at decode time, before any data bytes are fetched.
    pub fn from_zcmptype(name: &str) -> Result<Compression> {
        match name {
            "RICE_1" => Ok(Compression::Rice1),
            "GZIP_2" => Ok(Compression::Gzip2),
            other => Err(Error::UnsupportedCompression(other.to_string())),
        }
    }
}

/// Everything the decoder extracted for one amplifier HDU.
///
/// Field meanings follow the FITS headers they came from; `data_offset` and
/// `data_len` locate the data block for ranged reads, and for compressed
/// extensions `c_axis1 × c_axis2` is the size in bytes of the tile directory.
#[derive(Debug, Clone)]
pub struct Segment {
    pub file: String,
    pub hdu_index: u32,
    pub file_len: u64,
    pub data_offset: u64,
    pub data_len: usize,
    pub bitpix: BitPix,
    pub n_axis1: i32,
    pub n_axis2: i32,
    pub compression: Option<Compression>,
    pub c_axis1: i32,
    pub c_axis2: i32,
    pub datasec: Rect,
    pub raft_bay: Option<String>,
    pub ccd_slot: String,
    pub segment_name: Option<String>,
    pub wcs_letter: char,
    wcs_translation: Affine,
    wcs: RectF,
}

/// Constructor input for [`Segment::new`]; the WCS transform and bounds are
/// derived, everything else is stored as-is.
#[derive(Debug, Clone)]
pub struct SegmentInit {
    pub file: String,
    pub hdu_index: u32,
    pub file_len: u64,
    pub data_offset: u64,
    pub data_len: usize,
    pub bitpix: BitPix,
    pub n_axis1: i32,
    pub n_axis2: i32,
    pub compression: Option<Compression>,
    pub c_axis1: i32,
    pub c_axis2: i32,
    pub datasec: Rect,
    pub raft_bay: Option<String>,
    pub ccd_slot: String,
    pub segment_name: Option<String>,
    pub wcs_letter: char,
    /// PC-matrix elements and reference values, already resolved for the
    /// effective WCS letter (including any raft-grid shift).
    pub pc1_1: f64,
    pub pc1_2: f64,
    pub pc2_1: f64,
    pub pc2_2: f64,
    pub crval1: f64,
    pub crval2: f64,
}

impl Segment {
    pub fn new(init: SegmentInit) -> Result<Segment> {
        let full = Rect::new(0, 0, init.n_axis1, init.n_axis2);
        if !init.datasec.within(&full) || init.datasec.width <= 0 || init.datasec.height <= 0 {
            return Err(Error::MalformedDatasec(format!(
                "{:?} outside image {}x{}",
                init.datasec, init.n_axis1, init.n_axis2
            )));
        }

        let wcs_translation = Affine::new(
            init.pc1_1, init.pc2_1, init.pc1_2, init.pc2_2, init.crval1, init.crval2,
        )
        .translate(init.datasec.x as f64 + 0.5, init.datasec.y as f64 + 0.5);
        let wcs = wcs_translation.bounds_of(init.datasec.width as f64, init.datasec.height as f64);

        Ok(Segment {
            file: init.file,
            hdu_index: init.hdu_index,
            file_len: init.file_len,
            data_offset: init.data_offset,
            data_len: init.data_len,
            bitpix: init.bitpix,
            n_axis1: init.n_axis1,
            n_axis2: init.n_axis2,
            compression: init.compression,
            c_axis1: init.c_axis1,
            c_axis2: init.c_axis2,
            datasec: init.datasec,
            raft_bay: init.raft_bay,
            ccd_slot: init.ccd_slot,
            segment_name: init.segment_name,
            wcs_letter: init.wcs_letter,
            wcs_translation,
            wcs,
        })
    }

    pub fn is_compressed(&self) -> bool {
        self.compression.is_some()
    }

    /// Size in bytes of the decoded image.
    pub fn image_size(&self) -> usize {
        self.n_axis1 as usize * self.n_axis2 as usize * 4
    }

    /// Size in bytes of the on-disk data block (compressed table or raw pixels).
    pub fn data_size(&self) -> usize {
        self.data_len
    }

    /// Focal-plane bounding rectangle of the science pixels.
    pub fn wcs(&self) -> &RectF {
        &self.wcs
    }

    /// The segment-local to focal-plane transform. The overscan flag selects
    /// the origin convention; both variants currently share one transform,
    /// which is exact for the camera's focal-plane layout.
    pub fn wcs_translation(&self, _include_overscan: bool) -> &Affine {
        &self.wcs_translation
    }

    pub fn intersects(&self, source_region: &RectF) -> bool {
        self.wcs.intersects(source_region)
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.hdu_index == other.hdu_index
            && self.wcs_letter == other.wcs_letter
            && self.file == other.file
    }
}

impl Eq for Segment {}

impl Hash for Segment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.file.hash(state);
        self.hdu_index.hash(state);
        self.wcs_letter.hash(state);
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Segment{{file={}, name={}, raftBay={}, ccdSlot={}}}",
            self.file,
            self.segment_name.as_deref().unwrap_or("-"),
            self.raft_bay.as_deref().unwrap_or("-"),
            self.ccd_slot,
        )
    }
}

/// Parse a FITS `DATASEC` value of the form `[x1:x2,y1:y2]` (1-based inclusive)
/// into a zero-based half-open rectangle.
pub fn parse_datasec(value: &str) -> Result<Rect> {
    let malformed = || Error::MalformedDatasec(value.to_string());

    let inner = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .ok_or_else(malformed)?;
    let (xs, ys) = inner.split_once(',').ok_or_else(malformed)?;
    let (x1, x2) = parse_span(xs).ok_or_else(malformed)?;
    let (y1, y2) = parse_span(ys).ok_or_else(malformed)?;
    if x1 < 1 || y1 < 1 || x2 < x1 || y2 < y1 {
        return Err(malformed());
    }
    Ok(Rect::new(x1 - 1, y1 - 1, x2 - x1 + 1, y2 - y1 + 1))
}

fn parse_span(s: &str) -> Option<(i32, i32)> {
    let (a, b) = s.split_once(':')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}
