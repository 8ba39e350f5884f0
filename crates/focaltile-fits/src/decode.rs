//! Segment Metadata Decoding
//!
//! Walks the HDUs of one descriptor's FITS file and produces a `Segment` per
//! amplifier extension. Only headers are read here; pixel data is fetched later
//! through the raw-data cache.
//!
//! ## File shapes
//!
//! The primary header decides how many amplifier HDUs follow:
//!
//! - `EXPID != 0`: a DM-produced single-CCD file with one image HDU. The WCS is
//!   synthesized (letter `D`, identity rotation, CCD position from the CCDSLOT
//!   digits with 150/200-pixel gutters, DATASEC covering the whole image).
//! - `CCDSLOT` starting with `SW`: a wavefront half-CCD with 8 amplifiers.
//! - otherwise: a full science CCD with 16 amplifiers.
//! - a primary header carrying `N_STAMPS` is a guider file; those are skipped
//!   with an empty segment list.
//!
//! ## WCS resolution
//!
//! PC-matrix and CRVAL keywords are suffixed with the requested letter. The raft
//! (`Q`) coordinates of corner rafts are known-bad in camera headers, so `Q`
//! reads the focal-plane (`E`) keywords instead and shifts by the raft-grid
//! pitch of 12700 pixels per step, reconstructed from the RAFTBAY digits.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use focaltile_core::{
    parse_datasec, BitPix, Compression, Error, Rect, Result, Segment, SegmentDescriptor,
    SegmentInit,
};
use focaltile_store::ByteReader;

use crate::header::{FitsHeader, HduWalker};

/// Raft-grid pitch in focal-plane pixels per raft step.
const RAFT_GRID_STEP: f64 = 12700.0;

/// Replacement WCS values for one segment, keyed externally by
/// `"{raft}/{ccd}/{segment-pair}"`.
#[derive(Debug, Clone, PartialEq)]
pub struct WcsOverrideEntry {
    pub datasec: String,
    pub pc1_1: f64,
    pub pc1_2: f64,
    pub pc2_1: f64,
    pub pc2_2: f64,
    pub crval1: f64,
    pub crval2: f64,
}

impl Eq for WcsOverrideEntry {}

impl Hash for WcsOverrideEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.datasec.hash(state);
        for v in [
            self.pc1_1,
            self.pc1_2,
            self.pc2_1,
            self.pc2_2,
            self.crval1,
            self.crval2,
        ] {
            v.to_bits().hash(state);
        }
    }
}

/// A per-segment WCS override table, hashable so it can sit inside a segment
/// cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct WcsOverride {
    entries: BTreeMap<String, WcsOverrideEntry>,
}

impl WcsOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: WcsOverrideEntry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn get(&self, key: &str) -> Option<&WcsOverrideEntry> {
        self.entries.get(key)
    }
}

/// Decode every amplifier segment of one descriptor.
///
/// In tolerant mode a failure while building a later HDU returns the segments
/// decoded so far; the default discards the whole list.
pub async fn decode_segments(
    reader: &ByteReader,
    descriptor: &SegmentDescriptor,
    wcs_letter: char,
    wcs_override: Option<&WcsOverride>,
    tolerant: bool,
) -> Result<Vec<Segment>> {
    let url = match descriptor {
        SegmentDescriptor::Daq { .. } => {
            // A REB readout would be needed to slice amplifiers out of live DAQ
            // data; recognized but not implemented.
            return Err(Error::Unsupported(format!("DAQ descriptor {descriptor:?}")));
        }
        SegmentDescriptor::Fits(url) => url.as_str(),
    };

    let file_len = reader.len(url).await?;
    let mut walker = HduWalker::new(reader, url);

    let primary = walker
        .read_header()
        .await?
        .ok_or_else(|| Error::Io(format!("{url} is empty")))?;

    // CCDSLOT presence is a hard precondition, checked even for guider files.
    let identity = CcdIdentity::from_primary(&primary, url)?;

    if primary.contains("N_STAMPS") {
        tracing::info!(url, "skipping guider file");
        return Ok(Vec::new());
    }

    walker.skip_data(primary.data_block_len());

    let mut segments = Vec::with_capacity(identity.hdu_count as usize);
    for hdu_index in 1..=identity.hdu_count {
        match decode_one_hdu(
            &mut walker,
            url,
            file_len,
            hdu_index,
            &identity,
            wcs_letter,
            wcs_override,
        )
        .await
        {
            Ok(segment) => segments.push(segment),
            Err(e) if tolerant && hdu_index > 1 => {
                tracing::warn!(url, hdu_index, error = %e, "keeping partial segment list");
                return Ok(segments);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(segments)
}

/// CCD identity read from the primary header.
struct CcdIdentity {
    raft_bay: Option<String>,
    ccd_slot: String,
    is_dm_file: bool,
    hdu_count: u32,
}

impl CcdIdentity {
    fn from_primary(primary: &FitsHeader, url: &str) -> Result<CcdIdentity> {
        let raft_bay = primary.get_str("RAFTBAY").map(str::to_string);
        let ccd_slot = primary
            .get_str("CCDSLOT")
            .or_else(|| primary.get_str("SENSNAME"))
            .map(str::to_string)
            .ok_or_else(|| Error::MissingHeader(format!("CCDSLOT while reading {url}")))?;

        // A nonzero exposure id is the tell of a DM-produced single-image file.
        let exp_id = primary.get_i64_or_zero("EXPID");
        let is_dm_file = exp_id != 0;
        let hdu_count = if is_dm_file {
            1
        } else if ccd_slot.starts_with("SW") {
            8
        } else {
            16
        };

        Ok(CcdIdentity {
            raft_bay,
            ccd_slot,
            is_dm_file,
            hdu_count,
        })
    }
}

async fn decode_one_hdu(
    walker: &mut HduWalker<'_>,
    url: &str,
    file_len: u64,
    hdu_index: u32,
    identity: &CcdIdentity,
    wcs_letter: char,
    wcs_override: Option<&WcsOverride>,
) -> Result<Segment> {
    let header = walker
        .read_header()
        .await?
        .ok_or_else(|| Error::Io(format!("{url} truncated at HDU {hdu_index}")))?;

    let layout = PixelLayout::from_header(&header)?;
    let data_offset = walker.position();
    walker.skip_data(layout.data_len as u64);

    let segment_name = header.get_str("EXTNAME").map(str::to_string);

    let wcs = if identity.is_dm_file {
        WcsSelection::synthesize_dm(&identity.ccd_slot, &layout, url)?
    } else {
        let entry = override_entry(identity, segment_name.as_deref(), wcs_override);
        match entry {
            Some(entry) => WcsSelection::from_override(entry, wcs_letter)?,
            None => WcsSelection::from_header(&header, wcs_letter, identity, url)?,
        }
    };

    Segment::new(SegmentInit {
        file: url.to_string(),
        hdu_index,
        file_len,
        data_offset,
        data_len: layout.data_len,
        bitpix: layout.bitpix,
        n_axis1: layout.n_axis1,
        n_axis2: layout.n_axis2,
        compression: layout.compression,
        c_axis1: layout.c_axis1,
        c_axis2: layout.c_axis2,
        datasec: wcs.datasec,
        raft_bay: identity.raft_bay.clone(),
        ccd_slot: identity.ccd_slot.clone(),
        segment_name,
        wcs_letter: wcs.letter,
        pc1_1: wcs.pc1_1,
        pc1_2: wcs.pc1_2,
        pc2_1: wcs.pc2_1,
        pc2_2: wcs.pc2_2,
        crval1: wcs.crval1,
        crval2: wcs.crval2,
    })
}

/// Override-table key for one amplifier: `"{raft}/{ccd}/{segment-pair}"`, where
/// the pair is the two digits of an `EXTNAME` like `Segment12`.
fn override_entry<'a>(
    identity: &CcdIdentity,
    segment_name: Option<&str>,
    wcs_override: Option<&'a WcsOverride>,
) -> Option<&'a WcsOverrideEntry> {
    let overrides = wcs_override?;
    let name = segment_name?;
    if name.len() < 9 {
        return None;
    }
    let key = format!(
        "{}/{}/{}",
        identity.raft_bay.as_deref().unwrap_or(""),
        identity.ccd_slot,
        &name[7..9]
    );
    overrides.get(&key)
}

/// Pixel geometry and data-block shape of one amplifier HDU.
struct PixelLayout {
    bitpix: BitPix,
    n_axis1: i32,
    n_axis2: i32,
    compression: Option<Compression>,
    c_axis1: i32,
    c_axis2: i32,
    data_len: usize,
}

impl PixelLayout {
    fn from_header(header: &FitsHeader) -> Result<PixelLayout> {
        if header.get_bool("ZIMAGE") {
            let bitpix = BitPix::from_value(header.require_i64("ZBITPIX")?)?;
            let compression = Compression::from_zcmptype(header.require_str("ZCMPTYPE")?)?;
            let n_axis1 = header.require_i64("ZNAXIS1")? as i32;
            let n_axis2 = header.require_i64("ZNAXIS2")? as i32;
            // the binary table that carries the tiles
            let c_axis1 = header.require_i64("NAXIS1")? as i32;
            let c_axis2 = header.require_i64("NAXIS2")? as i32;
            let data_len =
                (c_axis1 as i64 * c_axis2 as i64 + header.get_i64_or_zero("PCOUNT")) as usize;
            Ok(PixelLayout {
                bitpix,
                n_axis1,
                n_axis2,
                compression: Some(compression),
                c_axis1,
                c_axis2,
                data_len,
            })
        } else {
            let bitpix = BitPix::from_value(header.require_i64("BITPIX")?)?;
            let n_axis1 = header.require_i64("NAXIS1")? as i32;
            let n_axis2 = header.require_i64("NAXIS2")? as i32;
            Ok(PixelLayout {
                bitpix,
                n_axis1,
                n_axis2,
                compression: None,
                c_axis1: 0,
                c_axis2: 0,
                data_len: n_axis1 as usize * n_axis2 as usize * 4,
            })
        }
    }
}

/// Resolved DATASEC and WCS numbers for one segment.
struct WcsSelection {
    letter: char,
    datasec: Rect,
    pc1_1: f64,
    pc1_2: f64,
    pc2_1: f64,
    pc2_2: f64,
    crval1: f64,
    crval2: f64,
}

impl WcsSelection {
    fn from_header(
        header: &FitsHeader,
        wcs_letter: char,
        identity: &CcdIdentity,
        url: &str,
    ) -> Result<WcsSelection> {
        let datasec_value = header
            .get_str("DATASEC")
            .ok_or_else(|| Error::MissingHeader(format!("DATASEC for file {url}")))?;
        let datasec = parse_datasec(datasec_value)?;

        // Corner-raft Q coordinates are wrong in the headers; use the E frame
        // shifted back by the raft position instead.
        let shift_for_raft = wcs_letter == 'Q' && identity.raft_bay.is_some();
        let local_letter = if shift_for_raft { 'E' } else { wcs_letter };

        let mut crval1 = header.get_f64_or_zero(&format!("CRVAL1{local_letter}"));
        let mut crval2 = header.get_f64_or_zero(&format!("CRVAL2{local_letter}"));
        if shift_for_raft {
            let (raft_x, raft_y) = raft_position(identity.raft_bay.as_deref().unwrap())?;
            crval1 -= raft_y as f64 * RAFT_GRID_STEP;
            crval2 -= raft_x as f64 * RAFT_GRID_STEP;
        }

        Ok(WcsSelection {
            letter: wcs_letter,
            datasec,
            pc1_1: header.get_f64_or_zero(&format!("PC1_1{local_letter}")),
            pc1_2: header.get_f64_or_zero(&format!("PC1_2{local_letter}")),
            pc2_1: header.get_f64_or_zero(&format!("PC2_1{local_letter}")),
            pc2_2: header.get_f64_or_zero(&format!("PC2_2{local_letter}")),
            crval1,
            crval2,
        })
    }

    fn from_override(entry: &WcsOverrideEntry, wcs_letter: char) -> Result<WcsSelection> {
        Ok(WcsSelection {
            letter: wcs_letter,
            datasec: parse_datasec(&entry.datasec)?,
            pc1_1: entry.pc1_1,
            pc1_2: entry.pc1_2,
            pc2_1: entry.pc2_1,
            pc2_2: entry.pc2_2,
            crval1: entry.crval1,
            crval2: entry.crval2,
        })
    }

    /// Single-CCD DM files carry no usable camera WCS; place the CCD on a grid
    /// from its slot digits with fixed inter-CCD gutters.
    fn synthesize_dm(ccd_slot: &str, layout: &PixelLayout, url: &str) -> Result<WcsSelection> {
        let (ccd_x, ccd_y) = slot_digits(ccd_slot).ok_or_else(|| {
            Error::MissingHeader(format!("numeric CCDSLOT for DM file {url}, got {ccd_slot}"))
        })?;
        let datasec = Rect::new(0, 0, layout.n_axis1, layout.n_axis2);
        Ok(WcsSelection {
            letter: 'D',
            datasec,
            pc1_1: 1.0,
            pc1_2: 0.0,
            pc2_1: 0.0,
            pc2_2: 1.0,
            crval1: (100 + ccd_y * (layout.n_axis1 + 150)) as f64,
            crval2: (100 + ccd_x * (layout.n_axis2 + 200)) as f64,
        })
    }
}

/// Raft-grid position from the two digits of a RAFTBAY name such as `R22`.
fn raft_position(raft_bay: &str) -> Result<(i32, i32)> {
    let digits: Vec<i32> = raft_bay
        .chars()
        .skip(1)
        .take(2)
        .map(|c| c.to_digit(10).map(|d| d as i32))
        .collect::<Option<_>>()
        .ok_or_else(|| Error::Internal(format!("unparseable RAFTBAY {raft_bay}")))?;
    if digits.len() != 2 {
        return Err(Error::Internal(format!("unparseable RAFTBAY {raft_bay}")));
    }
    Ok((digits[0], digits[1]))
}

fn slot_digits(ccd_slot: &str) -> Option<(i32, i32)> {
    let mut chars = ccd_slot.chars().skip(1);
    let x = chars.next()?.to_digit(10)? as i32;
    let y = chars.next()?.to_digit(10)? as i32;
    Some((x, y))
}
