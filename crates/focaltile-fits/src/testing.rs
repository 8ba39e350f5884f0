//! In-memory FITS builders for tests.
//!
//! Camera exposures are awkward to ship as fixtures (hundreds of megabytes), so
//! tests synthesize small but structurally faithful files instead: real 2880-byte
//! header blocks, real card formatting, real data alignment. Nothing here is part
//! of the rendering surface.

use crate::header::{BLOCK_SIZE, CARD_SIZE};

/// Format one 80-character header card.
pub fn card(keyword: &str, value: &str, comment: &str) -> String {
    let mut text = if value.is_empty() {
        format!("{keyword:<8}")
    } else if comment.is_empty() {
        format!("{keyword:<8}= {value:>20}")
    } else {
        format!("{keyword:<8}= {value:>20} / {comment}")
    };
    text.truncate(CARD_SIZE);
    format!("{text:<width$}", width = CARD_SIZE)
}

/// Assemble cards plus an `END` card into padded 2880-byte header blocks.
pub fn header_block(cards: &[String]) -> Vec<u8> {
    let mut text = String::new();
    for c in cards {
        text.push_str(c);
    }
    text.push_str(&card("END", "", ""));
    let blocks = text.len().div_ceil(BLOCK_SIZE);
    let mut bytes = text.into_bytes();
    bytes.resize(blocks * BLOCK_SIZE, b' ');
    bytes
}

/// Incremental builder for a whole FITS file.
#[derive(Default)]
pub struct FitsFileBuilder {
    bytes: Vec<u8>,
}

impl FitsFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one HDU: header blocks, then the data block padded to alignment.
    pub fn push_hdu(&mut self, cards: &[String], data: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(&header_block(cards));
        self.bytes.extend_from_slice(data);
        let pad = (BLOCK_SIZE - data.len() % BLOCK_SIZE) % BLOCK_SIZE;
        self.bytes.extend(std::iter::repeat(0u8).take(pad));
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }
}

/// Big-endian encoding of an i32 pixel row, as stored in uncompressed HDUs.
pub fn be_pixels(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

/// Big-endian encoding of f32 pixels.
pub fn be_float_pixels(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}
