pub mod blob_store;
pub mod kv_store;
#[cfg(any(test, feature = "test-helpers"))]
pub mod memory;
pub mod s3;

pub use blob_store::BlobStore;
pub use kv_store::{KeyValueStore, ListPage, StoreError};
