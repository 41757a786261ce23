mod memory;
mod s3;
mod store;

pub use memory::InMemoryObjectStore;
pub use s3::S3ObjectStore;
pub use store::BackupVersion;
pub use store::ObjectStore;
pub use store::ObjectStoreError;
