//! Segment Descriptor Dialects
//!
//! Each non-comment line of an exposure index names the source of one CCD's worth
//! of amplifier segments. Three dialects exist:
//!
//! - a plain filesystem path to a FITS file
//! - `s3:<endpoint>/<bucket>/<object>` for FITS files in an object store
//! - `DAQ:<partition>:<folder>/<image>:<raft>/<reb>` for live camera readout
//!
//! The DAQ dialect is recognized and validated but deliberately unimplemented:
//! decoding such a descriptor fails with `Error::Unsupported` rather than
//! inventing readout semantics.

use crate::error::{Error, Result};

/// A parsed index line naming the source of one CCD's segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SegmentDescriptor {
    /// A FITS file, either a local path or an `s3:` URL. The raw string is kept
    /// because it is also the byte-reader key.
    Fits(String),
    /// A DAQ readout address. Parsed for validation only.
    Daq {
        partition: String,
        folder: String,
        image: String,
        raft: String,
        reb: String,
    },
}

impl SegmentDescriptor {
    /// Parse one index line.
    ///
    /// `DAQ:camera:raw/MC_C_20210206_000109:R00/RebG` is the DAQ shape; anything
    /// not starting with `DAQ:` is treated as a file or object URL.
    pub fn parse(line: &str) -> Result<SegmentDescriptor> {
        if let Some(rest) = line.strip_prefix("DAQ:") {
            Self::parse_daq(line, rest)
        } else if line.is_empty() {
            Err(Error::MalformedDescriptor(line.to_string()))
        } else {
            Ok(SegmentDescriptor::Fits(line.to_string()))
        }
    }

    fn parse_daq(line: &str, rest: &str) -> Result<SegmentDescriptor> {
        let malformed = || Error::MalformedDescriptor(line.to_string());

        let (partition, rest) = rest.split_once(':').ok_or_else(malformed)?;
        let (folder_image, raft_reb) = rest.split_once(':').ok_or_else(malformed)?;
        let (folder, image) = folder_image.split_once('/').ok_or_else(malformed)?;
        let (raft, reb) = raft_reb.split_once('/').ok_or_else(malformed)?;

        let fields = [partition, folder, image, raft, reb];
        if fields.iter().any(|f| f.is_empty() || !is_word(f)) {
            return Err(malformed());
        }

        Ok(SegmentDescriptor::Daq {
            partition: partition.to_string(),
            folder: folder.to_string(),
            image: image.to_string(),
            raft: raft.to_string(),
            reb: reb.to_string(),
        })
    }

    /// True for descriptors that route through the object store.
    pub fn is_object_url(&self) -> bool {
        matches!(self, SegmentDescriptor::Fits(url) if url.starts_with("s3:"))
    }
}

fn is_word(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split an `s3:<endpoint>/<bucket>/<object>` URL into its three parts.
pub fn split_object_url(url: &str) -> Result<(&str, &str, &str)> {
    let rest = url
        .strip_prefix("s3:")
        .ok_or_else(|| Error::MalformedDescriptor(url.to_string()))?;
    let mut parts = rest.splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(endpoint), Some(bucket), Some(object))
            if !endpoint.is_empty() && !bucket.is_empty() && !object.is_empty() =>
        {
            Ok((endpoint, bucket, object))
        }
        _ => Err(Error::MalformedDescriptor(url.to_string())),
    }
}
