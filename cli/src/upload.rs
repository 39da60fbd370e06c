use crate::config::UPLOAD_PART_SIZE;
use crate::progress::{ProgressEvent, ProgressSink};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use eyre::{OptionExt, WrapErr};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// A part of a multipart upload accepted by the storage
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedPart {
    pub number: i32,
    pub etag: String,
}

/// Object storage operations needed to upload the code
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> eyre::Result<()>;

    /// Start a multipart upload, returns its id
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> eyre::Result<String>;

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        number: i32,
        body: Bytes,
    ) -> eyre::Result<UploadedPart>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> eyre::Result<()>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> eyre::Result<()>;
}

/// Streams a local file to the storage, in parts when it is large
pub struct Uploader<'a> {
    storage: &'a dyn ObjectStorage,
    part_size: usize,
}

impl<'a> Uploader<'a> {
    pub fn new(storage: &'a dyn ObjectStorage) -> Self {
        Self {
            storage,
            part_size: UPLOAD_PART_SIZE,
        }
    }

    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Upload the file to bucket/key, reporting uploaded bytes
    pub async fn upload(
        &self,
        path: &Path,
        bucket: &str,
        key: &str,
        progress: &dyn ProgressSink,
    ) -> eyre::Result<()> {
        self.upload_file(path, bucket, key, progress)
            .await
            .wrap_err(format!("Failed to upload file to s3 {key} (bucket {bucket})"))
    }

    async fn upload_file(
        &self,
        path: &Path,
        bucket: &str,
        key: &str,
        progress: &dyn ProgressSink,
    ) -> eyre::Result<()> {
        let mut file = File::open(path)
            .await
            .wrap_err(format!("Could not open the file {path:?}"))?;

        let total = file
            .metadata()
            .await
            .wrap_err(format!("Could not read metadata of {path:?}"))?
            .len();

        if total <= self.part_size as u64 {
            let body = read_chunk(&mut file, total as usize)
                .await
                .wrap_err(format!("Could not read the file {path:?}"))?;

            self.storage.put_object(bucket, key, body).await?;
            progress.progress(ProgressEvent::new(total, total));
            return Ok(());
        }

        let upload_id = self.storage.create_multipart_upload(bucket, key).await?;
        log::debug!("Started multipart upload {upload_id} for {key}");

        let result = self
            .upload_parts(&mut file, bucket, key, &upload_id, total, progress)
            .await;

        if result.is_err() {
            // Uploaded parts are billed until the upload is aborted
            if let Err(error) = self
                .storage
                .abort_multipart_upload(bucket, key, &upload_id)
                .await
            {
                log::error!("Failed to abort multipart upload {upload_id}: {error:?}");
            }
        }

        result
    }

    async fn upload_parts(
        &self,
        file: &mut File,
        bucket: &str,
        key: &str,
        upload_id: &str,
        total: u64,
        progress: &dyn ProgressSink,
    ) -> eyre::Result<()> {
        let mut parts = Vec::new();
        let mut uploaded = 0u64;

        loop {
            let body = read_chunk(file, self.part_size)
                .await
                .wrap_err("Could not read the file")?;

            if body.is_empty() {
                break;
            }

            let len = body.len() as u64;
            let number = parts.len() as i32 + 1;

            let part = self
                .storage
                .upload_part(bucket, key, upload_id, number, body)
                .await
                .wrap_err(format!("Failed to upload part {number}"))?;

            parts.push(part);
            uploaded += len;

            // The file may grow while being read, the total never goes below uploaded bytes
            progress.progress(ProgressEvent::new(uploaded, total.max(uploaded)));
        }

        if uploaded != total {
            log::warn!("The file changed during upload: expected {total} bytes, sent {uploaded}");
        }

        self.storage
            .complete_multipart_upload(bucket, key, upload_id, parts)
            .await
    }
}

/// Read up to `size` bytes, less only at the end of the file
async fn read_chunk(file: &mut File, size: usize) -> std::io::Result<Bytes> {
    let mut buffer = Vec::with_capacity(size);
    file.take(size as u64).read_to_end(&mut buffer).await?;
    Ok(Bytes::from(buffer))
}

/// Uploads to AWS S3
pub struct S3Storage {
    client: aws_sdk_s3::Client,
}

impl S3Storage {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(config),
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> eyre::Result<()> {
        let response = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .wrap_err("PutObject request failed")?;

        log::info!("Uploaded {key}, ETag {:?}", response.e_tag());
        Ok(())
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> eyre::Result<String> {
        self.client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .wrap_err("CreateMultipartUpload request failed")?
            .upload_id()
            .map(String::from)
            .ok_or_eyre("No upload id in the response")
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        number: i32,
        body: Bytes,
    ) -> eyre::Result<UploadedPart> {
        let etag = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(number)
            .body(ByteStream::from(body))
            .send()
            .await
            .wrap_err("UploadPart request failed")?
            .e_tag()
            .map(String::from)
            .ok_or_eyre("No ETag in the response")?;

        Ok(UploadedPart { number, etag })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> eyre::Result<()> {
        let parts = parts
            .into_iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.number)
                    .e_tag(part.etag)
                    .build()
            })
            .collect::<Vec<_>>();

        let response = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .wrap_err("CompleteMultipartUpload request failed")?;

        log::info!("Uploaded {key}, ETag {:?}", response.e_tag());
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> eyre::Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .wrap_err("AbortMultipartUpload request failed")?;

        Ok(())
    }
}
