//! I/O abstraction layer over object stores and input sources

pub mod local_store;
pub mod object_store;
pub mod s3_store;
pub mod uri;

pub use local_store::LocalObjectStore;
pub use object_store::{ObjectStore, ensure_bucket};
pub use s3_store::S3ObjectStore;
pub use uri::SourceUri;
