/// S3 object operations used by media uploads
use crate::config::S3Config;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum S3Error {
    /// The storage service answered and refused the request
    #[error("S3 rejected request: {0}")]
    Rejected(String),

    /// The request never got a usable answer (network, timeout)
    #[error("S3 unreachable: {0}")]
    Unavailable(String),
}

impl<E, R> From<SdkError<E, R>> for S3Error
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    fn from(err: SdkError<E, R>) -> Self {
        let message = DisplayErrorContext(&err).to_string();
        match err {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
                S3Error::Unavailable(message)
            }
            _ => S3Error::Rejected(message),
        }
    }
}

#[derive(Clone)]
pub struct S3Operations {
    client: Arc<Client>,
    config: S3Config,
}

impl S3Operations {
    pub fn new(client: Arc<Client>, config: S3Config) -> Self {
        Self { client, config }
    }

    /// Upload bytes to `bucket/key`, replacing any existing object
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), S3Error> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .cache_control("max-age=31536000")
            .body(ByteStream::from(body))
            .send()
            .await?;

        tracing::debug!(bucket, key, size, "object stored");
        Ok(())
    }

    /// Public URL for an object (no request is made)
    pub fn public_url(&self, bucket: &str, key: &str) -> String {
        self.config.object_url(bucket, key)
    }
}
