/// S3-backed object store
use super::{ObjectStore, ObjectStoreError};
use async_trait::async_trait;
use s3_utils::{S3Client, S3Config, S3Error, S3Operations};

#[derive(Clone)]
pub struct S3ObjectStore {
    ops: S3Operations,
}

impl S3ObjectStore {
    pub fn new(ops: S3Operations) -> Self {
        Self { ops }
    }

    pub async fn connect(config: S3Config) -> Self {
        let client = S3Client::connect(config).await;
        Self::new(client.operations())
    }
}

impl From<S3Error> for ObjectStoreError {
    fn from(err: S3Error) -> Self {
        match err {
            S3Error::Rejected(msg) => ObjectStoreError::Rejected(msg),
            S3Error::Unavailable(msg) => ObjectStoreError::Unavailable(msg),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        self.ops
            .put_object(bucket, path, bytes, content_type)
            .await
            .map_err(ObjectStoreError::from)
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        self.ops.public_url(bucket, path)
    }
}
