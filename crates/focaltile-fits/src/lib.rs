pub mod decode;
pub mod decompress;
pub mod gzip2;
pub mod header;
pub mod rice;
pub mod testing;

pub use decode::{decode_segments, WcsOverride, WcsOverrideEntry};
pub use decompress::decode_raw;
pub use header::{FitsHeader, HduWalker};
