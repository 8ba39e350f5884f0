pub mod config;
pub mod descriptor;
pub mod error;
pub mod geom;
pub mod pixels;
pub mod segment;

pub use config::ReaderConfig;
pub use descriptor::SegmentDescriptor;
pub use error::{Error, Result, SharedError, SharedResult};
pub use geom::{Affine, Rect, RectF};
pub use pixels::{PixelBuffer, RawData};
pub use segment::{parse_datasec, BitPix, Compression, Segment, SegmentInit};
