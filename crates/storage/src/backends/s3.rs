//! S3-compatible vault backend using the AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteRange, ByteStream, ObjectMeta, StreamingUpload, Vault, VaultKind};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use seqvault_core::config::S3VaultConfig;
use tracing::instrument;

/// Part size for multipart uploads (8 MiB). S3 requires all parts except
/// the last to be at least 5 MiB.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// S3-compatible vault.
pub struct S3Vault {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3Vault {
    /// Create a new S3 vault from configuration.
    pub async fn new(config: &S3VaultConfig) -> StorageResult<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "seqvault-config",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint.clone());
        }
        builder = builder.force_path_style(config.force_path_style);

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
        })
    }

    fn object_key(&self, key: &str) -> String {
        join_prefix(self.prefix.as_deref(), key)
    }

    fn range_header(range: &ByteRange) -> Option<String> {
        if range.is_full() {
            return None;
        }
        // HTTP ranges are inclusive on both ends.
        Some(match range.end {
            Some(end) => format!("bytes={}-{}", range.start, end.saturating_sub(1)),
            None => format!("bytes={}-", range.start),
        })
    }
}

#[async_trait]
impl Vault for S3Vault {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(StorageError::S3(e.to_string())),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::S3(e.to_string())
                }
            })?;

        Ok(ObjectMeta {
            size: resp.content_length().unwrap_or(0) as u64,
            last_modified: resp
                .last_modified()
                .and_then(|t| time::OffsetDateTime::from_unix_timestamp(t.secs()).ok()),
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn open_for_read(&self, key: &str, range: ByteRange) -> StorageResult<ByteStream> {
        // An empty range needs no request at all.
        if range.len() == Some(0) {
            return Ok(Box::pin(futures::stream::empty()));
        }

        let mut request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(key));
        if let Some(header) = Self::range_header(&range) {
            request = request.range(header);
        }

        let resp = request.send().await.map_err(|e| {
            if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::S3(e.to_string())
            }
        })?;

        let mut body = resp.body;
        let stream = async_stream::try_stream! {
            loop {
                match body.try_next().await {
                    Ok(Some(chunk)) => yield chunk,
                    Ok(None) => break,
                    Err(e) => Err(StorageError::S3(e.to_string()))?,
                }
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn open_for_write(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        Ok(Box::new(S3Upload {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: self.object_key(key),
            upload_id: None,
            buffer: Vec::with_capacity(PART_SIZE),
            parts: Vec::new(),
            part_number: 0,
            bytes_written: 0,
        }))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    fn kind(&self) -> VaultKind {
        VaultKind::S3
    }
}

/// Streaming upload buffering parts for a multipart upload.
///
/// The multipart upload is started lazily; anything smaller than one part
/// goes through a single `PutObject` on finish.
struct S3Upload {
    client: Client,
    bucket: String,
    key: String,
    upload_id: Option<String>,
    buffer: Vec<u8>,
    parts: Vec<CompletedPart>,
    part_number: i32,
    bytes_written: u64,
}

impl S3Upload {
    async fn ensure_multipart(&mut self) -> StorageResult<String> {
        if let Some(id) = &self.upload_id {
            return Ok(id.clone());
        }
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;
        let id = resp
            .upload_id()
            .ok_or_else(|| StorageError::S3("missing multipart upload id".to_string()))?
            .to_string();
        self.upload_id = Some(id.clone());
        Ok(id)
    }

    async fn flush_part(&mut self) -> StorageResult<()> {
        let upload_id = self.ensure_multipart().await?;
        self.part_number += 1;
        let body = std::mem::replace(&mut self.buffer, Vec::with_capacity(PART_SIZE));

        let resp = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&upload_id)
            .part_number(self.part_number)
            .body(aws_sdk_s3::primitives::ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;

        self.parts.push(
            CompletedPart::builder()
                .part_number(self.part_number)
                .set_e_tag(resp.e_tag().map(str::to_string))
                .build(),
        );
        Ok(())
    }
}

#[async_trait]
impl StreamingUpload for S3Upload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.bytes_written += data.len() as u64;
        self.buffer.extend_from_slice(&data);
        while self.buffer.len() >= PART_SIZE {
            let tail = self.buffer.split_off(PART_SIZE);
            self.flush_part().await?;
            self.buffer = tail;
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        match self.upload_id.clone() {
            None => {
                // Small object: single PutObject.
                let body = std::mem::take(&mut self.buffer);
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&self.key)
                    .body(aws_sdk_s3::primitives::ByteStream::from(body))
                    .send()
                    .await
                    .map_err(|e| StorageError::S3(e.to_string()))?;
            }
            Some(upload_id) => {
                if !self.buffer.is_empty() {
                    self.flush_part().await?;
                }
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(&self.key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(self.parts.clone()))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| StorageError::S3(e.to_string()))?;
            }
        }
        Ok(self.bytes_written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        if let Some(upload_id) = &self.upload_id {
            self.client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(&self.key)
                .upload_id(upload_id)
                .send()
                .await
                .map_err(|e| StorageError::S3(e.to_string()))?;
        }
        Ok(())
    }
}

fn join_prefix(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}/{key}", prefix.trim_end_matches('/')),
        None => key.to_string(),
    }
}
