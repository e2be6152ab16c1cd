//! An in-process [`Storage`] double backed by a `Mutex<HashMap>`, for tests
//! that exercise the lifecycle/multipart/TUS-lock coordinators without a
//! live S3-compatible endpoint.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use async_trait::async_trait;
use bytes::{
    Bytes,
    BytesMut,
};
use chrono::Utc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::{
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

#[derive(Clone)]
struct StoredObject {
    bytes: Bytes,
    attributes: ObjectAttributes,
}

#[derive(Default, Debug)]
struct MultipartState {
    mime_type: Option<String>,
    parts: HashMap<u32, Bytes>,
}

#[derive(Default, Debug)]
pub struct InMemoryStorage {
    objects: Mutex<HashMap<(String, String, String), StoredObject>>,
    uploads: Mutex<HashMap<String, MultipartState>>,
}

impl std::fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredObject").field("len", &self.bytes.len()).finish()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test-only introspection: whether any version of `bucket/key` is still present.
    pub fn contains(&self, bucket: &str, key: &str, version: &str) -> bool {
        self.objects.lock().unwrap().contains_key(&(bucket.to_string(), key.to_string(), version.to_string()))
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn buffer(mut body: PutObjectBody) -> anyhow::Result<(Bytes, u64)> {
    let mut buf = BytesMut::with_capacity(body.content_length as usize);
    while let Some(chunk) = body.stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    let bytes = buf.freeze();
    let len = bytes.len() as u64;
    Ok((bytes, len))
}

fn etag_for(bytes: &Bytes) -> String {
    use sha2::{
        Digest,
        Sha256,
    };
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        version: &str,
        body: PutObjectBody,
        mime_type: Option<&str>,
        cache_control: Option<&str>,
    ) -> anyhow::Result<ObjectAttributes> {
        let (bytes, size) = buffer(body).await?;
        let attributes = ObjectAttributes {
            size,
            mime_type: mime_type.map(str::to_string),
            cache_control: cache_control.map(str::to_string),
            etag: etag_for(&bytes),
            last_modified: Utc::now(),
        };
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string(), version.to_string()), StoredObject { bytes, attributes: attributes.clone() });
        Ok(attributes)
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version: &str,
        _conditions: GetObjectConditions,
        _cancellation: &CancellationToken,
    ) -> anyhow::Result<Option<GetObjectResult>> {
        let stored = self.objects.lock().unwrap().get(&(bucket.to_string(), key.to_string(), version.to_string())).cloned();
        let Some(stored) = stored else { return Ok(None) };
        let bytes = stored.bytes;
        let content_length = bytes.len() as u64;
        Ok(Some(GetObjectResult {
            content_length,
            stream: Box::pin(futures::stream::once(async move { Ok(bytes) })),
            range: None,
            attributes: stored.attributes,
        }))
    }

    async fn head_object(&self, bucket: &str, key: &str, version: &str) -> anyhow::Result<Option<ObjectAttributes>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string(), version.to_string()))
            .map(|o| o.attributes.clone()))
    }

    async fn copy_object(
        &self,
        bucket: &str,
        src_key: &str,
        src_version: &str,
        dst_key: &str,
        dst_version: &str,
        metadata: Option<(Option<String>, Option<String>)>,
        _conditions: CopyObjectConditions,
    ) -> anyhow::Result<ObjectAttributes> {
        let mut objects = self.objects.lock().unwrap();
        let source = objects
            .get(&(bucket.to_string(), src_key.to_string(), src_version.to_string()))
            .cloned()
            .ok_or_else(|| anyhow::Error::new(errors::ErrorMetadata::no_such_key(format!("{bucket}/{src_key} does not exist"))))?;
        let mut attributes = source.attributes.clone();
        if let Some((mime_type, cache_control)) = metadata {
            attributes.mime_type = mime_type;
            attributes.cache_control = cache_control;
        }
        attributes.last_modified = Utc::now();
        objects.insert((bucket.to_string(), dst_key.to_string(), dst_version.to_string()), StoredObject {
            bytes: source.bytes,
            attributes: attributes.clone(),
        });
        Ok(attributes)
    }

    async fn delete_object(&self, bucket: &str, key: &str, version: &str) -> anyhow::Result<()> {
        self.objects.lock().unwrap().remove(&(bucket.to_string(), key.to_string(), version.to_string()));
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[(String, String)]) -> anyhow::Result<()> {
        let mut objects = self.objects.lock().unwrap();
        for (key, version) in keys {
            objects.remove(&(bucket.to_string(), key.clone(), version.clone()));
        }
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        version: &str,
        mime_type: Option<&str>,
    ) -> anyhow::Result<String> {
        let upload_id = format!("upload-{version}");
        self.uploads
            .lock()
            .unwrap()
            .insert(upload_id.clone(), MultipartState { mime_type: mime_type.map(str::to_string), parts: HashMap::new() });
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        _version: &str,
        upload_id: &str,
        part_number: u32,
        body: PutObjectBody,
        _cancellation: &CancellationToken,
    ) -> anyhow::Result<UploadPartResult> {
        let (bytes, _) = buffer(body).await?;
        let etag = etag_for(&bytes);
        let mut uploads = self.uploads.lock().unwrap();
        let state = uploads
            .get_mut(upload_id)
            .ok_or_else(|| anyhow::Error::new(errors::ErrorMetadata::no_such_upload(format!("{upload_id} does not exist"))))?;
        state.parts.insert(part_number, bytes);
        Ok(UploadPartResult { etag })
    }

    async fn upload_part_copy(
        &self,
        bucket: &str,
        _dst_key: &str,
        _dst_version: &str,
        upload_id: &str,
        part_number: u32,
        src_key: &str,
        src_version: &str,
        range: Option<ByteRange>,
    ) -> anyhow::Result<UploadPartResult> {
        let source = self
            .objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), src_key.to_string(), src_version.to_string()))
            .cloned()
            .ok_or_else(|| anyhow::Error::new(errors::ErrorMetadata::no_such_key(format!("{bucket}/{src_key} does not exist"))))?;
        let slice = match range {
            Some(r) => source.bytes.slice((r.start as usize)..=(r.end as usize)),
            None => source.bytes,
        };
        let etag = etag_for(&slice);
        let mut uploads = self.uploads.lock().unwrap();
        let state = uploads
            .get_mut(upload_id)
            .ok_or_else(|| anyhow::Error::new(errors::ErrorMetadata::no_such_upload(format!("{upload_id} does not exist"))))?;
        state.parts.insert(part_number, slice);
        Ok(UploadPartResult { etag })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        version: &str,
        parts: &[CompletedPartSpec],
    ) -> anyhow::Result<ObjectAttributes> {
        let state = self
            .uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| anyhow::Error::new(errors::ErrorMetadata::no_such_upload(format!("{upload_id} does not exist"))))?;
        let mut buf = BytesMut::new();
        for part in parts {
            let chunk = state
                .parts
                .get(&part.part_number)
                .ok_or_else(|| anyhow::anyhow!("part {} was never uploaded", part.part_number))?;
            buf.extend_from_slice(chunk);
        }
        let bytes = buf.freeze();
        let attributes = ObjectAttributes {
            size: bytes.len() as u64,
            mime_type: state.mime_type,
            cache_control: None,
            etag: etag_for(&bytes),
            last_modified: Utc::now(),
        };
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string(), version.to_string()), StoredObject { bytes, attributes: attributes.clone() });
        Ok(attributes)
    }

    async fn abort_multipart_upload(&self, _bucket: &str, _key: &str, upload_id: &str, _version: &str) -> anyhow::Result<()> {
        self.uploads.lock().unwrap().remove(upload_id);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_an_uploaded_object() {
        let storage = InMemoryStorage::new();
        let body = PutObjectBody { content_length: 5, stream: Box::pin(futures::stream::once(async { Ok(Bytes::from_static(b"hello")) })) };
        storage.upload_object("tenant/bucket", "a.txt", "v1", body, Some("text/plain"), None).await.unwrap();
        assert!(storage.contains("tenant/bucket", "a.txt", "v1"));
        let result = storage
            .get_object("tenant/bucket", "a.txt", "v1", GetObjectConditions::default(), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.attributes.mime_type.as_deref(), Some("text/plain"));
    }
}
