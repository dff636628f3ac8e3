//! S3-backed stores. The key-value namespace is a bucket plus key prefix and
//! submission keys map one-to-one onto objects under it. The signature
//! namespace is rooted at its bucket.

use aws_sdk_s3::primitives::ByteStream;

use crate::adapters::blob_store::BlobStore;
use crate::adapters::kv_store::{KeyValueStore, ListPage, StoreError};

const MAX_LIST_PAGE: usize = 1_000;

/// Maps store keys onto object keys under an optional `prefix/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPrefix(String);

impl ObjectPrefix {
    pub fn new(prefix: &str) -> Self {
        Self(prefix.trim_matches('/').to_string())
    }

    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn object_key(&self, key: &str) -> String {
        if self.0.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.0)
        }
    }

    pub fn strip<'a>(&self, object_key: &'a str) -> &'a str {
        if self.0.is_empty() {
            return object_key;
        }
        object_key
            .strip_prefix(self.0.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(object_key)
    }
}

#[derive(Clone)]
pub struct S3Namespace {
    bucket: String,
    prefix: ObjectPrefix,
    client: aws_sdk_s3::Client,
}

impl S3Namespace {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>, prefix: &str) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: ObjectPrefix::new(prefix),
            client,
        }
    }

    /// A namespace whose keys are object keys as-is. Signature paths already
    /// carry their own prefix, and legacy blobs live at the bucket root.
    pub fn bucket_root(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: ObjectPrefix::root(),
            client,
        }
    }

    fn object_key(&self, key: &str) -> String {
        self.prefix.object_key(key)
    }

    fn strip_prefix<'a>(&self, object_key: &'a str) -> &'a str {
        self.prefix.strip(object_key)
    }

    fn read_object(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let bucket = self.bucket.clone();
        let object_key = self.object_key(key);
        let client = self.client.clone();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let output = match client.get_object().bucket(bucket).key(&object_key).send().await
                {
                    Ok(output) => output,
                    Err(error) => {
                        if error
                            .as_service_error()
                            .is_some_and(|service_error| service_error.is_no_such_key())
                        {
                            return Ok(None);
                        }
                        return Err(StoreError::Backend(format!(
                            "failed to read object {object_key} from s3: {error}"
                        )));
                    }
                };
                let bytes = output.body.collect().await.map_err(|error| {
                    StoreError::Backend(format!("failed to stream object {object_key}: {error}"))
                })?;
                Ok(Some(bytes.into_bytes().to_vec()))
            })
        })
    }

    fn write_object(
        &self,
        key: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<(), StoreError> {
        let bucket = self.bucket.clone();
        let object_key = self.object_key(key);
        let body_bytes = body.to_vec();
        let content_type = content_type.to_string();
        let client = self.client.clone();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .put_object()
                    .bucket(bucket)
                    .key(object_key)
                    .content_type(content_type)
                    .body(ByteStream::from(body_bytes))
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|error| {
                        StoreError::Backend(format!("failed to write object to s3: {error}"))
                    })
            })
        })
    }

    fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        let bucket = self.bucket.clone();
        let object_key = self.object_key(key);
        let client = self.client.clone();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .delete_object()
                    .bucket(bucket)
                    .key(object_key)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|error| {
                        StoreError::Backend(format!("failed to delete object from s3: {error}"))
                    })
            })
        })
    }
}

impl KeyValueStore for S3Namespace {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.read_object(key)
    }

    fn put(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        self.write_object(key, body, "application/json")
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.delete_object(key)
    }

    fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, StoreError> {
        let bucket = self.bucket.clone();
        let object_prefix = self.object_key(prefix);
        let continuation = cursor.map(str::to_string);
        let max_keys = i32::try_from(limit.clamp(1, MAX_LIST_PAGE)).unwrap_or(1_000);
        let client = self.client.clone();

        let output = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .list_objects_v2()
                    .bucket(bucket)
                    .prefix(object_prefix)
                    .max_keys(max_keys)
                    .set_continuation_token(continuation)
                    .send()
                    .await
                    .map_err(|error| {
                        StoreError::Backend(format!("failed to list objects in s3: {error}"))
                    })
            })
        })?;

        let keys = output
            .contents()
            .iter()
            .filter_map(|object| object.key())
            .map(|object_key| self.strip_prefix(object_key).to_string())
            .collect();
        let cursor = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage { keys, cursor })
    }
}

impl BlobStore for S3Namespace {
    fn get_blob(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.read_object(path)
    }

    fn put_blob(&self, path: &str, body: &[u8], content_type: &str) -> Result<(), StoreError> {
        self.write_object(path, body, content_type)
    }

    fn delete_blob(&self, path: &str) -> Result<(), StoreError> {
        self.delete_object(path)
    }
}
