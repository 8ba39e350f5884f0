//! Synthetic camera exposures for integration tests.
//!
//! Builds structurally faithful FITS files: a primary header carrying the CCD
//! identity, followed by amplifier image HDUs, either as plain big-endian
//! pixels or as GZIP_2 tile-compressed binary tables.

use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use focaltile_fits::testing::{be_pixels, card, FitsFileBuilder};

/// Geometry of one synthetic amplifier.
pub struct AmpSpec {
    pub n_axis1: i32,
    pub n_axis2: i32,
    pub ds_x: i32,
    pub ds_y: i32,
    pub ds_w: i32,
    pub ds_h: i32,
    pub crval1: f64,
    pub crval2: f64,
}

impl AmpSpec {
    /// 8-wide, 6-tall amplifier with a 6x5 datasec at (1, 0): serial overscan
    /// is columns 0 and 7, parallel overscan is row 5.
    pub fn small(crval1: f64, crval2: f64) -> AmpSpec {
        AmpSpec {
            n_axis1: 8,
            n_axis2: 6,
            ds_x: 1,
            ds_y: 0,
            ds_w: 6,
            ds_h: 5,
            crval1,
            crval2,
        }
    }

    /// 32x24 amplifier whose uncompressed data block spans multiple FITS
    /// blocks, so its tile-compressed form has a genuinely different length.
    pub fn large(crval1: f64, crval2: f64) -> AmpSpec {
        AmpSpec {
            n_axis1: 32,
            n_axis2: 24,
            ds_x: 1,
            ds_y: 0,
            ds_w: 30,
            ds_h: 20,
            crval1,
            crval2,
        }
    }

    /// `[x1:x2,y1:y2]`, 1-based inclusive.
    pub fn datasec_string(&self) -> String {
        format!(
            "[{}:{},{}:{}]",
            self.ds_x + 1,
            self.ds_x + self.ds_w,
            self.ds_y + 1,
            self.ds_y + self.ds_h
        )
    }
}

/// Pixel content of one amplifier: a gentle ramp inside the datasec plus a
/// fixed overscan level everywhere outside it.
pub fn amp_pixels(spec: &AmpSpec, science: i32, overscan: i32) -> Vec<i32> {
    let mut data = vec![overscan; (spec.n_axis1 * spec.n_axis2) as usize];
    for y in spec.ds_y..spec.ds_y + spec.ds_h {
        for x in spec.ds_x..spec.ds_x + spec.ds_w {
            data[(x + y * spec.n_axis1) as usize] = science + x + y;
        }
    }
    data
}

fn primary_cards(raft: &str, slot: &str) -> Vec<String> {
    vec![
        card("SIMPLE", "T", ""),
        card("BITPIX", "8", ""),
        card("NAXIS", "0", ""),
        card("RAFTBAY", &format!("'{raft}'"), ""),
        card("CCDSLOT", &format!("'{slot}'"), ""),
        card("EXPID", "0", ""),
    ]
}

fn amp_image_cards(index: u32, spec: &AmpSpec, letter: char) -> Vec<String> {
    vec![
        card("XTENSION", "'IMAGE   '", ""),
        card("BITPIX", "32", ""),
        card("NAXIS", "2", ""),
        card("NAXIS1", &spec.n_axis1.to_string(), ""),
        card("NAXIS2", &spec.n_axis2.to_string(), ""),
        card("EXTNAME", &format!("'Segment{index:02}'"), ""),
        card("DATASEC", &format!("'{}'", spec.datasec_string()), ""),
        card(&format!("PC1_1{letter}"), "1.0", ""),
        card(&format!("PC1_2{letter}"), "0.0", ""),
        card(&format!("PC2_1{letter}"), "0.0", ""),
        card(&format!("PC2_2{letter}"), "1.0", ""),
        card(&format!("CRVAL1{letter}"), &spec.crval1.to_string(), ""),
        card(&format!("CRVAL2{letter}"), &spec.crval2.to_string(), ""),
    ]
}

fn amp_compressed_cards(
    index: u32,
    spec: &AmpSpec,
    letter: char,
    c_axis1: i32,
    pcount: usize,
) -> Vec<String> {
    vec![
        card("XTENSION", "'BINTABLE'", ""),
        card("BITPIX", "8", ""),
        card("NAXIS", "2", ""),
        card("NAXIS1", &c_axis1.to_string(), ""),
        card("NAXIS2", &spec.n_axis2.to_string(), ""),
        card("PCOUNT", &pcount.to_string(), ""),
        card("GCOUNT", "1", ""),
        card("ZIMAGE", "T", ""),
        card("ZBITPIX", "32", ""),
        card("ZCMPTYPE", "'GZIP_2  '", ""),
        card("ZNAXIS1", &spec.n_axis1.to_string(), ""),
        card("ZNAXIS2", &spec.n_axis2.to_string(), ""),
        card("EXTNAME", &format!("'Segment{index:02}'"), ""),
        card("DATASEC", &format!("'{}'", spec.datasec_string()), ""),
        card(&format!("PC1_1{letter}"), "1.0", ""),
        card(&format!("PC1_2{letter}"), "0.0", ""),
        card(&format!("PC2_1{letter}"), "0.0", ""),
        card(&format!("PC2_2{letter}"), "1.0", ""),
        card(&format!("CRVAL1{letter}"), &spec.crval1.to_string(), ""),
        card(&format!("CRVAL2{letter}"), &spec.crval2.to_string(), ""),
    ]
}

/// One GZIP_2 tile: byte-shuffle a row, then gzip it.
fn gzip2_tile(row: &[i32]) -> Vec<u8> {
    let n = row.len();
    let mut planes = vec![0u8; n * 4];
    for (i, v) in row.iter().enumerate() {
        let be = v.to_be_bytes();
        for plane in 0..4 {
            planes[i + plane * n] = be[plane];
        }
    }
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&planes).unwrap();
    encoder.finish().unwrap()
}

/// Tile-compressed data block: `(length, offset)` directory then payloads.
fn gzip2_data_block(spec: &AmpSpec, pixels: &[i32]) -> (i32, Vec<u8>) {
    let c_axis1 = 8; // one (length, offset) pair per row
    let mut directory = Vec::new();
    let mut payload = Vec::new();
    for row in pixels.chunks(spec.n_axis1 as usize) {
        let tile = gzip2_tile(row);
        directory.extend_from_slice(&(tile.len() as i32).to_be_bytes());
        directory.extend_from_slice(&(payload.len() as i32).to_be_bytes());
        payload.extend_from_slice(&tile);
    }
    directory.extend_from_slice(&payload);
    (c_axis1, directory)
}

/// Write one CCD file with `amps` amplifiers (16 keeps the decoder on the
/// science-CCD path; use an `SW*` slot for 8).
pub fn write_ccd_file(
    path: &Path,
    raft: &str,
    slot: &str,
    letter: char,
    amps: &[(AmpSpec, Vec<i32>)],
    compressed: bool,
) {
    let mut builder = FitsFileBuilder::new();
    builder.push_hdu(&primary_cards(raft, slot), &[]);
    for (index, (spec, pixels)) in amps.iter().enumerate() {
        if compressed {
            let (c_axis1, block) = gzip2_data_block(spec, pixels);
            let pcount = block.len() - (c_axis1 * spec.n_axis2) as usize;
            builder.push_hdu(
                &amp_compressed_cards(index as u32, spec, letter, c_axis1, pcount),
                &block,
            );
        } else {
            builder.push_hdu(
                &amp_image_cards(index as u32, spec, letter),
                &be_pixels(pixels),
            );
        }
    }
    std::fs::write(path, builder.finish()).unwrap();
}

/// Sixteen identical amplifiers tiled 8 across, 2 down on the focal plane.
pub fn sixteen_amps(science: i32, overscan: i32) -> Vec<(AmpSpec, Vec<i32>)> {
    (0..16)
        .map(|i| {
            let spec = AmpSpec::small((i % 8) as f64 * 10.0, (i / 8) as f64 * 10.0);
            let pixels = amp_pixels(&spec, science, overscan);
            (spec, pixels)
        })
        .collect()
}

/// Write a DM-style single-HDU file (`EXPID != 0`); the decoder synthesizes
/// its WCS from the slot digits.
pub fn write_dm_file(path: &Path, slot: &str, n_axis1: i32, n_axis2: i32, pixels: &[i32]) {
    let mut builder = FitsFileBuilder::new();
    builder.push_hdu(
        &vec![
            card("SIMPLE", "T", ""),
            card("BITPIX", "8", ""),
            card("NAXIS", "0", ""),
            card("RAFTBAY", "'R22'", ""),
            card("CCDSLOT", &format!("'{slot}'"), ""),
            card("EXPID", "3021121600001", ""),
        ],
        &[],
    );
    builder.push_hdu(
        &vec![
            card("XTENSION", "'IMAGE   '", ""),
            card("BITPIX", "32", ""),
            card("NAXIS", "2", ""),
            card("NAXIS1", &n_axis1.to_string(), ""),
            card("NAXIS2", &n_axis2.to_string(), ""),
        ],
        &be_pixels(pixels),
    );
    std::fs::write(path, builder.finish()).unwrap();
}

/// Write an index file listing the given descriptor lines.
pub fn write_index(path: &Path, lines: &[&str]) {
    let mut text = String::from("# synthetic exposure\n");
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    std::fs::write(path, text).unwrap();
}
