use crate::adapters::kv_store::StoreError;

pub trait BlobStore {
    fn get_blob(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn put_blob(&self, path: &str, body: &[u8], content_type: &str) -> Result<(), StoreError>;
    /// Deleting a missing blob succeeds.
    fn delete_blob(&self, path: &str) -> Result<(), StoreError>;
}
