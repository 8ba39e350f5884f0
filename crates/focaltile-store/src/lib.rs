pub mod reader;
pub mod s3;

pub use reader::ByteReader;
pub use s3::EndpointCredentials;
