//! S3-compatible storage backend using AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ObjectStore, ObjectStream, StreamingUpload};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::{Bytes, BytesMut};
use cairn_core::config::{credential_pair, non_empty};
use futures::StreamExt;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// Part size for multipart uploads (8 MiB).
///
/// S3 requires every part except the last to be at least 5 MiB. Uploads no
/// larger than one part are sent with a single PutObject.
pub const PART_SIZE: usize = 8 * 1024 * 1024;

const DEFAULT_REGION: &str = "us-east-1";

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for [`S3Backend`].
#[derive(Clone, Default)]
pub struct S3Settings {
    pub bucket: String,
    /// Endpoint URL or bare `host:port` for S3-compatible services.
    pub endpoint: Option<String>,
    pub region: Option<String>,
    /// Key prefix prepended to every object key.
    pub prefix: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Use path-style URLs (`endpoint/bucket/key`). Required for MinIO.
    pub force_path_style: bool,
    /// Use `http://` when the endpoint has no scheme.
    pub disable_ssl: bool,
}

impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("prefix", &self.prefix)
            .field("access_key_id", &self.access_key_id.as_ref().map(|_| "<redacted>"))
            .field("force_path_style", &self.force_path_style)
            .field("disable_ssl", &self.disable_ssl)
            .finish_non_exhaustive()
    }
}

/// Prepend a scheme to bare `host:port` endpoints.
fn normalize_endpoint(endpoint: &str, disable_ssl: bool) -> String {
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        endpoint.to_string()
    } else if disable_ssl {
        format!("http://{endpoint}")
    } else {
        format!("https://{endpoint}")
    }
}

/// Keep the service's error code and message; `SdkError`'s own `Display`
/// only says "service error".
fn map_s3_operation_error<E>(err: SdkError<E>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let message = match (err.code(), err.message()) {
        (Some(code), Some(message)) => format!("{code}: {message}"),
        (Some(code), None) => code.to_string(),
        _ => DisplayErrorContext(&err).to_string(),
    };
    StorageError::S3(message)
}

/// S3-compatible object store using AWS SDK.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    endpoint: Option<String>,
    region: String,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// Explicit credentials must be given as a pair; without them the SDK's
    /// default credential chain is used. Empty strings count as unset.
    pub async fn new(settings: S3Settings) -> StorageResult<Self> {
        let credentials = credential_pair(&settings.access_key_id, &settings.secret_access_key)
            .map_err(StorageError::Config)?;

        let region = non_empty(&settings.region)
            .unwrap_or(DEFAULT_REGION)
            .to_string();
        let endpoint =
            non_empty(&settings.endpoint).map(|e| normalize_endpoint(e, settings.disable_ssl));

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.clone()));
        if let Some((key_id, secret)) = credentials {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                key_id,
                secret,
                None,
                None,
                "cairn-config",
            ));
        }
        if let Some(url) = &endpoint {
            loader = loader.endpoint_url(url);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(settings.force_path_style)
            .build();

        // Strip trailing slashes to avoid double-slash keys like "prefix//key".
        let prefix = non_empty(&settings.prefix)
            .map(|p| p.trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty());

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: settings.bucket,
            prefix,
            endpoint,
            region,
        })
    }

    /// Get the full object key for a key (applies prefix if configured).
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    /// Only `NoSuchKey` is a miss. Other 404s, such as `NoSuchBucket`, are
    /// store faults.
    fn map_get_error(err: SdkError<GetObjectError>, key: &str) -> StorageError {
        if err
            .as_service_error()
            .is_some_and(GetObjectError::is_no_such_key)
        {
            StorageError::NotFound(key.to_string())
        } else {
            map_s3_operation_error(err)
        }
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ObjectStream> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Self::map_get_error(e, key))?;

        let size = output
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .ok_or_else(|| {
                StorageError::S3(format!("S3 returned no content length for {key}"))
            })?;

        let stream = ReaderStream::new(output.body.into_async_read())
            .map(|result| result.map_err(StorageError::Io));

        Ok(ObjectStream {
            size,
            stream: Box::pin(stream),
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        Ok(Box::new(S3Upload {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: self.full_key(key),
            upload_id: None,
            parts: Vec::new(),
            bytes_written: 0,
            buffer: BytesMut::new(),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        let head_bucket = self.client.head_bucket().bucket(&self.bucket).send();

        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, head_bucket)
            .await
            .map_err(|_| {
                StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "S3 health check timed out after 10 seconds",
                ))
            })?
            .map_err(map_s3_operation_error)?;
        Ok(())
    }
}

/// Streaming upload for the S3 backend.
///
/// Holds at most one part in memory. The multipart upload is created only
/// once a full part has accumulated; smaller objects go out as one PutObject
/// on `finish`, which also covers zero-byte objects that multipart cannot
/// represent.
struct S3Upload {
    client: Client,
    bucket: String,
    key: String,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
    bytes_written: u64,
    buffer: BytesMut,
}

impl S3Upload {
    async fn ensure_multipart(&mut self) -> StorageResult<String> {
        if let Some(id) = &self.upload_id {
            return Ok(id.clone());
        }

        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        let id = output
            .upload_id()
            .ok_or_else(|| StorageError::Config("S3 did not return upload_id".to_string()))?
            .to_string();

        tracing::debug!(key = %self.key, upload_id = %id, "Started multipart upload");
        self.upload_id = Some(id.clone());
        Ok(id)
    }

    /// Upload a single part to S3 and track it.
    async fn upload_part(&mut self, data: Bytes) -> StorageResult<()> {
        let upload_id = self.ensure_multipart().await?;
        let part_number = i32::try_from(self.parts.len() + 1)
            .map_err(|_| StorageError::Config("too many multipart parts".to_string()))?;

        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(data.into())
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        self.parts.push(
            CompletedPart::builder()
                .e_tag(output.e_tag().unwrap_or_default())
                .part_number(part_number)
                .build(),
        );
        Ok(())
    }

    /// Send the last part and complete the multipart upload.
    async fn complete(&mut self, upload_id: &str, remaining: Bytes) -> StorageResult<()> {
        if !remaining.is_empty() {
            self.upload_part(remaining).await?;
        }

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(std::mem::take(&mut self.parts)))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        Ok(())
    }

    async fn abort_multipart(&self, upload_id: &str) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        Ok(())
    }
}

#[async_trait]
impl StreamingUpload for S3Upload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.bytes_written += data.len() as u64;
        self.buffer.extend_from_slice(&data);

        while self.buffer.len() >= PART_SIZE {
            let part = self.buffer.split_to(PART_SIZE).freeze();
            self.upload_part(part).await?;
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        let remaining = self.buffer.split().freeze();

        let Some(upload_id) = self.upload_id.clone() else {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .body(remaining.into())
                .send()
                .await
                .map_err(map_s3_operation_error)?;
            return Ok(self.bytes_written);
        };

        if let Err(err) = self.complete(&upload_id, remaining).await {
            // Parts of an unfinished upload stay in the bucket until aborted.
            if let Err(abort_err) = self.abort_multipart(&upload_id).await {
                tracing::warn!(
                    key = %self.key,
                    upload_id = %upload_id,
                    error = %abort_err,
                    "Failed to abort multipart upload"
                );
            }
            return Err(err);
        }

        Ok(self.bytes_written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        match &self.upload_id {
            Some(upload_id) => self.abort_multipart(upload_id).await,
            None => Ok(()),
        }
    }
}
