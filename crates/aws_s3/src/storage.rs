//! S3-backed implementation of the [`storage::Storage`] blob adapter.
//!
//! Physical S3 keys are derived from the logical `(bucket, key, version)`
//! triple as `{bucket}/{key}/{version}`, matching the blob-key layout the
//! object lifecycle coordinator assembles (`tenant/bucket/name/version`,
//! with `bucket` here already tenant-scoped by the caller).

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_sdk_s3::{
    operation::head_object::HeadObjectError,
    primitives::ByteStream,
    types::{
        CompletedMultipartUpload,
        CompletedPart,
        Delete,
        ObjectIdentifier,
    },
    Client,
};
use errors::ErrorMetadata;
use futures::StreamExt;
use storage::{
    ByteRange,
    CompletedPartSpec,
    CopyObjectConditions,
    GetObjectConditions,
    GetObjectResult,
    ObjectAttributes,
    PutObjectBody,
    Storage,
    UploadPartResult,
};
use tokio_util::sync::CancellationToken;

use crate::metrics::{
    get_timer,
    upload_part_timer,
    upload_timer,
};

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl std::fmt::Debug for S3Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Storage").field("bucket", &self.bucket).finish()
    }
}

impl S3Storage {
    pub async fn new(bucket: String) -> anyhow::Result<Self> {
        let config = aws_config::load_from_env().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&config).retry_config(RetryConfig::standard()).build();
        Ok(Self { client: Client::from_conf(s3_config), bucket })
    }

    pub fn new_from_client(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    fn physical_key(&self, bucket: &str, key: &str, version: &str) -> String {
        format!("{bucket}/{key}/{version}")
    }
}

fn attributes_from_head(
    etag: Option<String>,
    size: i64,
    mime_type: Option<String>,
    cache_control: Option<String>,
    last_modified: Option<aws_sdk_s3::primitives::DateTime>,
) -> anyhow::Result<ObjectAttributes> {
    let last_modified = last_modified
        .map(|dt| {
            chrono::DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
                .context("S3 returned an unrepresentable last-modified timestamp")
        })
        .transpose()?
        .unwrap_or_else(chrono::Utc::now);
    Ok(ObjectAttributes {
        size: size.max(0) as u64,
        mime_type,
        cache_control,
        etag: etag.unwrap_or_default().trim_matches('"').to_string(),
        last_modified,
    })
}

#[async_trait]
impl Storage for S3Storage {
    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        version: &str,
        body: PutObjectBody,
        mime_type: Option<&str>,
        cache_control: Option<&str>,
    ) -> anyhow::Result<ObjectAttributes> {
        let timer = upload_timer();
        let s3_key = self.physical_key(bucket, key, version);
        let bytes = collect_stream(body.stream, body.content_length).await?;
        let mut put = self.client.put_object().bucket(&self.bucket).key(&s3_key).body(ByteStream::from(bytes));
        if let Some(mime) = mime_type {
            put = put.content_type(mime);
        }
        if let Some(cc) = cache_control {
            put = put.cache_control(cc);
        }
        let output = put.send().await.context("S3 PutObject failed")?;
        timer.finish();
        attributes_from_head(output.e_tag, body.content_length as i64, mime_type.map(String::from), cache_control.map(String::from), None)
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version: &str,
        conditions: GetObjectConditions,
        cancellation: &CancellationToken,
    ) -> anyhow::Result<Option<GetObjectResult>> {
        let timer = get_timer();
        let s3_key = self.physical_key(bucket, key, version);
        let mut get = self.client.get_object().bucket(&self.bucket).key(&s3_key);
        if let Some(range) = conditions.range {
            get = get.range(format!("bytes={}-{}", range.start, range.end));
        }
        if let Some(if_modified_since) = conditions.if_modified_since {
            get = get.if_modified_since(aws_sdk_s3::primitives::DateTime::from_secs(if_modified_since.timestamp()));
        }
        if let Some(if_none_match) = conditions.if_none_match {
            get = get.if_none_match(if_none_match);
        }
        let result = get.send().await;
        let output = match result {
            Ok(output) => output,
            Err(aws_sdk_s3::error::SdkError::ServiceError(e)) if e.raw().status().as_u16() == 304 => {
                timer.finish();
                return Ok(None);
            },
            Err(aws_sdk_s3::error::SdkError::ServiceError(e)) if is_not_found_status(e.raw().status().as_u16()) => {
                timer.finish();
                return Ok(None);
            },
            Err(e) => return Err(e.into()),
        };
        let content_length = output.content_length.context("S3 GetObject response missing content-length")? as u64;
        let attributes = attributes_from_head(
            output.e_tag.clone(),
            output.content_length.unwrap_or_default(),
            output.content_type.clone(),
            output.cache_control.clone(),
            output.last_modified,
        )?;
        let served_range = conditions.range;
        let token = cancellation.clone();
        let stream = output
            .body
            .map(move |chunk| {
                if token.is_cancelled() {
                    return Err(ErrorMetadata::internal_error("read was cancelled").into());
                }
                chunk.map_err(anyhow::Error::from)
            })
            .boxed();
        timer.finish();
        Ok(Some(GetObjectResult { content_length, stream, range: served_range, attributes }))
    }

    async fn head_object(&self, bucket: &str, key: &str, version: &str) -> anyhow::Result<Option<ObjectAttributes>> {
        let s3_key = self.physical_key(bucket, key, version);
        let result = self.client.head_object().bucket(&self.bucket).key(&s3_key).send().await;
        match result {
            Ok(output) => Ok(Some(attributes_from_head(
                output.e_tag,
                output.content_length.unwrap_or_default(),
                output.content_type,
                output.cache_control,
                output.last_modified,
            )?)),
            Err(aws_sdk_s3::error::SdkError::ServiceError(e)) => match e.err() {
                HeadObjectError::NotFound(_) => Ok(None),
                other => Err(other.clone().into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn copy_object(
        &self,
        bucket: &str,
        src_key: &str,
        src_version: &str,
        dst_key: &str,
        dst_version: &str,
        metadata: Option<(Option<String>, Option<String>)>,
        conditions: CopyObjectConditions,
    ) -> anyhow::Result<ObjectAttributes> {
        let src = self.physical_key(bucket, src_key, src_version);
        let dst = self.physical_key(bucket, dst_key, dst_version);
        let mut copy = self.client.copy_object().bucket(&self.bucket).copy_source(format!("{}/{src}", self.bucket)).key(&dst);
        if let Some(if_match) = conditions.if_match {
            copy = copy.copy_source_if_match(if_match);
        }
        if let Some(if_none_match) = conditions.if_none_match {
            copy = copy.copy_source_if_none_match(if_none_match);
        }
        if let Some((mime_type, cache_control)) = metadata.clone() {
            copy = copy.metadata_directive(aws_sdk_s3::types::MetadataDirective::Replace);
            if let Some(mime) = mime_type {
                copy = copy.content_type(mime);
            }
            if let Some(cc) = cache_control {
                copy = copy.cache_control(cc);
            }
        }
        let output = copy.send().await.context("S3 CopyObject failed")?;
        let result = output.copy_object_result.context("S3 CopyObject response missing result")?;
        let (mime_type, cache_control) = metadata.unwrap_or((None, None));
        // CopyObject's response carries no content-length either; callers
        // follow up with `head_object` to learn the copy's real size.
        attributes_from_head(result.e_tag, 0, mime_type, cache_control, result.last_modified)
    }

    async fn delete_object(&self, bucket: &str, key: &str, version: &str) -> anyhow::Result<()> {
        let s3_key = self.physical_key(bucket, key, version);
        self.client.delete_object().bucket(&self.bucket).key(&s3_key).send().await.context("S3 DeleteObject failed")?;
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[(String, String)]) -> anyhow::Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        // S3 DeleteObjects caps a single request at 1000 keys.
        for chunk in keys.chunks(1000) {
            let objects: Vec<ObjectIdentifier> = chunk
                .iter()
                .map(|(key, version)| {
                    ObjectIdentifier::builder().key(self.physical_key(bucket, key, version)).build()
                })
                .collect::<Result<_, _>>()?;
            let delete = Delete::builder().set_objects(Some(objects)).build()?;
            self.client.delete_objects().bucket(&self.bucket).delete(delete).send().await.context("S3 DeleteObjects failed")?;
        }
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        version: &str,
        mime_type: Option<&str>,
    ) -> anyhow::Result<String> {
        let s3_key = self.physical_key(bucket, key, version);
        let mut create = self.client.create_multipart_upload().bucket(&self.bucket).key(&s3_key);
        if let Some(mime) = mime_type {
            create = create.content_type(mime);
        }
        let output = create.send().await.context("S3 CreateMultipartUpload failed")?;
        output.upload_id.context("S3 CreateMultipartUpload response missing upload_id")
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        version: &str,
        upload_id: &str,
        part_number: u32,
        body: PutObjectBody,
        _cancellation: &CancellationToken,
    ) -> anyhow::Result<UploadPartResult> {
        let timer = upload_part_timer();
        let s3_key = self.physical_key(bucket, key, version);
        let bytes = collect_stream(body.stream, body.content_length).await?;
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&s3_key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .context("S3 UploadPart failed")?;
        timer.finish();
        Ok(UploadPartResult { etag: output.e_tag.context("S3 UploadPart response missing etag")?.trim_matches('"').to_string() })
    }

    async fn upload_part_copy(
        &self,
        bucket: &str,
        dst_key: &str,
        dst_version: &str,
        upload_id: &str,
        part_number: u32,
        src_key: &str,
        src_version: &str,
        range: Option<ByteRange>,
    ) -> anyhow::Result<UploadPartResult> {
        let dst = self.physical_key(bucket, dst_key, dst_version);
        let src = self.physical_key(bucket, src_key, src_version);
        let mut copy = self
            .client
            .upload_part_copy()
            .bucket(&self.bucket)
            .key(&dst)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .copy_source(format!("{}/{src}", self.bucket));
        if let Some(range) = range {
            copy = copy.copy_source_range(format!("bytes={}-{}", range.start, range.end));
        }
        let output = copy.send().await.context("S3 UploadPartCopy failed")?;
        let result = output.copy_part_result.context("S3 UploadPartCopy response missing result")?;
        Ok(UploadPartResult { etag: result.e_tag.context("S3 UploadPartCopy response missing etag")?.trim_matches('"').to_string() })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        version: &str,
        parts: &[CompletedPartSpec],
    ) -> anyhow::Result<ObjectAttributes> {
        let s3_key = self.physical_key(bucket, key, version);
        let completed_parts: Vec<CompletedPart> = parts
            .iter()
            .map(|p| CompletedPart::builder().part_number(p.part_number as i32).e_tag(&p.etag).build())
            .collect();
        let multipart_upload = CompletedMultipartUpload::builder().set_parts(Some(completed_parts)).build();
        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&s3_key)
            .upload_id(upload_id)
            .multipart_upload(multipart_upload)
            .send()
            .await
            .context("S3 CompleteMultipartUpload failed")?;
        // CompleteMultipartUpload's response carries no content-length; callers
        // follow up with `head_object` to learn the assembled object's real size.
        attributes_from_head(output.e_tag, 0, None, None, None)
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str, version: &str) -> anyhow::Result<()> {
        let s3_key = self.physical_key(bucket, key, version);
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&s3_key)
            .upload_id(upload_id)
            .send()
            .await
            .context("S3 AbortMultipartUpload failed")?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn is_not_found_status(status: u16) -> bool {
    status == 404 || status == 412
}

async fn collect_stream(mut stream: storage::ByteStream, content_length: u64) -> anyhow::Result<bytes::Bytes> {
    let mut buf = bytes::BytesMut::with_capacity(content_length as usize);
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_key_joins_bucket_key_and_version() {
        let storage = S3Storage { client: aws_sdk_s3::Client::from_conf(aws_sdk_s3::Config::builder().behavior_version_latest().build()), bucket: "phys-bucket".to_string() };
        assert_eq!(storage.physical_key("tenant/mybucket", "a/b.png", "v1"), "tenant/mybucket/a/b.png/v1");
    }
}
