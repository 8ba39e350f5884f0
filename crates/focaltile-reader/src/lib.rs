//! focaltile: on-demand focal-plane mosaic rendering.
//!
//! A focal-plane exposure is hundreds of amplifier segments spread over many
//! FITS files. `CachingReader` turns a rectangular focal-plane region into a
//! composited RGB mosaic, fetching, decompressing, bias-correcting and scaling
//! only the segments the region touches, with every intermediate product held
//! in an asynchronous single-flight cache so interactive panning stays fast.
//!
//! ```ignore
//! use focaltile_reader::{CachingReader, MosaicImage, RenderParams};
//! use focaltile_render::BiasKind;
//! use std::sync::Arc;
//!
//! let reader = CachingReader::new();
//! let surface = Arc::new(MosaicImage::for_region(1024, 1024, &region));
//! let params = RenderParams {
//!     source_region: Some(region),
//!     bias: BiasKind::SimpleOverscanSubtraction,
//!     ..RenderParams::default()
//! };
//! reader.render("/data/exposure.index", &params, surface.clone()).await?;
//! ```

pub mod controller;
pub mod params;
pub mod surface;

pub use controller::CachingReader;
pub use params::{GlobalScale, RenderParams, ScaleMode};
pub use surface::{MosaicImage, RenderSurface};
