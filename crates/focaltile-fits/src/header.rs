//! FITS Header Parsing
//!
//! A FITS header is a sequence of 2880-byte blocks, each holding 36 cards of 80
//! ASCII characters. A card is `KEYWORD = value / comment`; the header ends at an
//! `END` card and the data block (if any) starts at the next 2880-byte boundary.
//!
//! `FitsHeader` holds the parsed cards of one HDU with typed accessors.
//! `HduWalker` steps through the HDUs of one source using ranged reads, so the
//! same walker works for local files and object-store URLs. Only headers are
//! fetched while walking; data blocks are skipped by offset arithmetic and read
//! later, on demand, by the raw-data loader.

use std::collections::HashMap;

use focaltile_core::{Error, Result};
use focaltile_store::ByteReader;

pub const CARD_SIZE: usize = 80;
pub const BLOCK_SIZE: usize = 2880;
const CARDS_PER_BLOCK: usize = BLOCK_SIZE / CARD_SIZE;

/// Parsed cards of one HDU.
#[derive(Debug, Clone, Default)]
pub struct FitsHeader {
    values: HashMap<String, String>,
}

impl FitsHeader {
    /// Parse one 2880-byte header block into `self`.
    ///
    /// Returns `true` when the block contained the `END` card.
    fn parse_block(&mut self, block: &[u8]) -> Result<bool> {
        if block.len() != BLOCK_SIZE {
            return Err(Error::Io(format!(
                "truncated FITS header block: {} bytes",
                block.len()
            )));
        }
        for card in 0..CARDS_PER_BLOCK {
            let raw = &block[card * CARD_SIZE..(card + 1) * CARD_SIZE];
            if !raw.is_ascii() {
                return Err(Error::Io("non-ASCII FITS header card".to_string()));
            }
            let text = std::str::from_utf8(raw)
                .map_err(|_| Error::Io("non-ASCII FITS header card".to_string()))?;
            let keyword = text[..8].trim_end();
            if keyword == "END" {
                return Ok(true);
            }
            if keyword.is_empty() || keyword == "COMMENT" || keyword == "HISTORY" {
                continue;
            }
            if &text[8..10] == "= " {
                self.values
                    .insert(keyword.to_string(), parse_card_value(&text[10..]));
            }
        }
        Ok(false)
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.values.contains_key(keyword)
    }

    /// String value with FITS quoting removed, `None` when absent.
    pub fn get_str(&self, keyword: &str) -> Option<&str> {
        self.values.get(keyword).map(String::as_str)
    }

    pub fn require_str(&self, keyword: &str) -> Result<&str> {
        self.get_str(keyword)
            .ok_or_else(|| Error::MissingHeader(keyword.to_string()))
    }

    pub fn get_i64(&self, keyword: &str) -> Option<i64> {
        self.values.get(keyword)?.parse().ok()
    }

    /// Integer value, defaulting to 0 when the keyword is absent, the lenient
    /// convention FITS header libraries follow.
    pub fn get_i64_or_zero(&self, keyword: &str) -> i64 {
        self.get_i64(keyword).unwrap_or(0)
    }

    pub fn require_i64(&self, keyword: &str) -> Result<i64> {
        self.get_i64(keyword)
            .ok_or_else(|| Error::MissingHeader(keyword.to_string()))
    }

    /// Float value, defaulting to 0.0 when absent.
    pub fn get_f64_or_zero(&self, keyword: &str) -> f64 {
        self.values
            .get(keyword)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0)
    }

    /// FITS logical: `T` is true, anything else false.
    pub fn get_bool(&self, keyword: &str) -> bool {
        self.get_str(keyword) == Some("T")
    }

    /// Byte length of this HDU's data block per the FITS sizing rule:
    /// `|BITPIX|/8 · GCOUNT · (PCOUNT + NAXIS1·…·NAXISn)`, zero when `NAXIS = 0`.
    pub fn data_block_len(&self) -> u64 {
        let naxis = self.get_i64_or_zero("NAXIS");
        if naxis <= 0 {
            return 0;
        }
        let mut elements: u64 = 1;
        for i in 1..=naxis {
            elements *= self.get_i64_or_zero(&format!("NAXIS{i}")).max(0) as u64;
        }
        let bitpix = self.get_i64_or_zero("BITPIX").unsigned_abs() / 8;
        let gcount = self.get_i64_or_zero("GCOUNT").max(1) as u64;
        let pcount = self.get_i64_or_zero("PCOUNT").max(0) as u64;
        bitpix * gcount * (elements + pcount)
    }

    #[cfg(test)]
    pub(crate) fn from_cards(cards: &[(&str, &str)]) -> FitsHeader {
        let mut values = HashMap::new();
        for (k, v) in cards {
            values.insert(k.to_string(), parse_card_value(v));
        }
        FitsHeader { values }
    }
}

/// Strip the comment and FITS string quoting from a card's value field.
fn parse_card_value(field: &str) -> String {
    let field = field.trim();
    if let Some(rest) = field.strip_prefix('\'') {
        // quoted string; '' is an escaped quote
        let mut out = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    out.push('\'');
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        out.trim_end().to_string()
    } else {
        match field.split_once(" /") {
            Some((value, _comment)) => value.trim().to_string(),
            None => field.to_string(),
        }
    }
}

/// FITS 2880-byte alignment padding after a data block of `len` bytes.
pub fn padding(len: u64) -> u64 {
    (BLOCK_SIZE as u64 - len % BLOCK_SIZE as u64) % BLOCK_SIZE as u64
}

/// Sequential HDU cursor over one FITS source.
pub struct HduWalker<'a> {
    reader: &'a ByteReader,
    url: &'a str,
    position: u64,
}

impl<'a> HduWalker<'a> {
    pub fn new(reader: &'a ByteReader, url: &'a str) -> Self {
        Self {
            reader,
            url,
            position: 0,
        }
    }

    /// Byte offset of the next unread block.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the header starting at the current position.
    ///
    /// Returns `None` at a clean end of file (position exactly at the source
    /// length). A header truncated mid-block is an error.
    pub async fn read_header(&mut self) -> Result<Option<FitsHeader>> {
        let mut header = FitsHeader::default();
        let mut first = true;
        loop {
            let block = self
                .reader
                .read(self.url, self.position, BLOCK_SIZE)
                .await?;
            if block.is_empty() && first {
                return Ok(None);
            }
            self.position += BLOCK_SIZE as u64;
            first = false;
            if header.parse_block(&block)? {
                return Ok(Some(header));
            }
        }
    }

    /// Advance past a data block of `len` bytes plus its alignment padding.
    pub fn skip_data(&mut self, len: u64) {
        self.position += len + padding(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{card, header_block};

    #[test]
    fn test_parse_card_values() {
        assert_eq!(parse_card_value("                  32 / bits"), "32");
        assert_eq!(parse_card_value("'RICE_1  '           / comp"), "RICE_1");
        assert_eq!(parse_card_value("'it''s   '"), "it's");
        assert_eq!(parse_card_value("T"), "T");
        assert_eq!(parse_card_value("-2.583E+03 / scale"), "-2.583E+03");
    }

    #[test]
    fn test_parse_block_typed_accessors() {
        let block = header_block(&[
            card("SIMPLE", "T", ""),
            card("BITPIX", "32", ""),
            card("NAXIS", "2", ""),
            card("NAXIS1", "576", ""),
            card("NAXIS2", "2048", ""),
            card("ZCMPTYPE", "'GZIP_2  '", "compression"),
            card("CRVAL1E", "-1.27E+04", ""),
        ]);
        let mut header = FitsHeader::default();
        assert!(header.parse_block(&block).unwrap());

        assert!(header.get_bool("SIMPLE"));
        assert_eq!(header.require_i64("NAXIS1").unwrap(), 576);
        assert_eq!(header.get_str("ZCMPTYPE"), Some("GZIP_2"));
        assert_eq!(header.get_f64_or_zero("CRVAL1E"), -12700.0);
        assert_eq!(header.get_f64_or_zero("CRVAL2E"), 0.0);
        assert!(matches!(
            header.require_str("DATASEC"),
            Err(Error::MissingHeader(k)) if k == "DATASEC"
        ));
    }

    #[test]
    fn test_data_block_len_image_and_table() {
        let image = FitsHeader::from_cards(&[
            ("BITPIX", "32"),
            ("NAXIS", "2"),
            ("NAXIS1", "576"),
            ("NAXIS2", "2048"),
        ]);
        assert_eq!(image.data_block_len(), 576 * 2048 * 4);

        let bintable = FitsHeader::from_cards(&[
            ("BITPIX", "8"),
            ("NAXIS", "2"),
            ("NAXIS1", "8"),
            ("NAXIS2", "2048"),
            ("PCOUNT", "90000"),
        ]);
        assert_eq!(bintable.data_block_len(), 8 * 2048 + 90000);

        let primary = FitsHeader::from_cards(&[("BITPIX", "8"), ("NAXIS", "0")]);
        assert_eq!(primary.data_block_len(), 0);
    }

    #[test]
    fn test_padding() {
        assert_eq!(padding(0), 0);
        assert_eq!(padding(1), 2879);
        assert_eq!(padding(2880), 0);
        assert_eq!(padding(2881), 2879);
    }
}
