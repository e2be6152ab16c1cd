use errors::ErrorMetadata;
use runtime::Runtime;
use storage::{
    CompletedPartSpec,
    PutObjectBody,
};
use uuid::Uuid;

use crate::{
    metrics,
    signature,
    Multipart,
};

#[derive(Debug, thiserror::Error)]
#[error("dry-run rollback")]
struct DryRunRollback;

/// Raised internally when a cancellation token fires mid-operation. Not part
/// of the wire taxonomy (§6 lists none for this) - callers observe it only
/// through the `anyhow::Error` chain and logs.
#[derive(Debug, thiserror::Error)]
#[error("operation aborted by client disconnect")]
pub struct AbortedTerminate;

pub struct InitiateRequest {
    pub tenant: String,
    pub bucket: String,
    pub name: String,
    pub mime_type: Option<String>,
    pub owner: Option<String>,
    pub user_metadata: Option<serde_json::Value>,
}

pub struct InitiateResult {
    pub upload_id: String,
    pub version: String,
}

pub struct UploadPartRequest {
    pub upload_id: String,
    pub part_number: u32,
    pub content_length: u64,
    pub body: storage::ByteStream,
    /// Cancelled when the client disconnects mid-upload (§5 suspension
    /// points); checked at each boundary before committing more work.
    pub cancellation: tokio_util::sync::CancellationToken,
}

pub struct UploadPartResult {
    pub etag: String,
}

pub struct CompleteRequest {
    pub upload_id: String,
    /// Parts as the client declared them in the Complete request body. When
    /// absent, the persisted parts are listed and used in ascending order
    /// instead (§4.J Complete).
    pub parts: Option<Vec<CompletedPartSpec>>,
    pub req_id: Option<String>,
}

pub struct AbortRequest {
    pub upload_id: String,
}

impl<RT: Runtime> Multipart<RT> {
    async fn find_bucket(&self, tenant: &str, bucket: &str) -> anyhow::Result<db::Bucket> {
        let tenant = tenant.to_string();
        let bucket_id = bucket.to_string();
        self.db
            .with_transaction(move |tx| {
                Box::pin(async move {
                    db::find_bucket(tx, &tenant, &bucket_id)
                        .await?
                        .ok_or_else(|| anyhow::Error::new(ErrorMetadata::no_such_bucket(format!("bucket '{bucket_id}' does not exist"))))
                })
            })
            .await
    }

    fn check_mime_allowed(&self, bucket: &db::Bucket, mime_type: Option<&str>) -> anyhow::Result<()> {
        let Some(allowed) = &bucket.allowed_mime_types else { return Ok(()) };
        let Some(mime_type) = mime_type else {
            anyhow::bail!(ErrorMetadata::invalid_request("InvalidMimeType", "bucket restricts MIME types but none was provided"));
        };
        if !allowed.iter().any(|m| m.eq_ignore_ascii_case(mime_type)) {
            anyhow::bail!(ErrorMetadata::invalid_request("InvalidMimeType", format!("'{mime_type}' is not an allowed MIME type for this bucket")));
        }
        Ok(())
    }

    /// Mirrors `lifecycle`'s dry-run permission check (§4.H `canUpload`):
    /// simulate the eventual upsert inside a transaction that's always
    /// rolled back, surfacing any constraint failure without committing.
    async fn can_write(&self, tenant: String, bucket: String, name: String) -> anyhow::Result<()> {
        let placeholder = db::NewObject {
            metadata: db::ObjectMetadata { size: 0, mime_type: None, cache_control: None, etag: String::new(), last_modified: chrono::Utc::now() },
            user_metadata: None,
            owner: None,
        };
        let result = self
            .db
            .with_transaction(move |tx| {
                let bucket = bucket.clone();
                let name = name.clone();
                let tenant = tenant.clone();
                let placeholder = placeholder.clone();
                Box::pin(async move {
                    db::upsert_object(tx, &tenant, &bucket, &name, Uuid::nil(), &placeholder).await?;
                    Err::<(), anyhow::Error>(anyhow::Error::new(DryRunRollback))
                })
            })
            .await;
        match result {
            Err(e) if e.downcast_ref::<DryRunRollback>().is_some() => Ok(()),
            Err(e) => Err(e),
            Ok(()) => Ok(()),
        }
    }

    pub async fn initiate(&self, request: InitiateRequest) -> anyhow::Result<InitiateResult> {
        let timer = metrics::initiate_timer();
        if !validate::is_valid_key(&request.name) {
            anyhow::bail!(ErrorMetadata::invalid_key(format!("'{}' is not a valid object key", request.name)));
        }
        let bucket = self.find_bucket(&request.tenant, &request.bucket).await?;
        self.check_mime_allowed(&bucket, request.mime_type.as_deref())?;

        let version = self.runtime.new_uuid_v4();
        let namespace = Multipart::<RT>::blob_namespace(&request.tenant, &request.bucket);
        let upload_id = self.storage.create_multipart_upload(&namespace, &request.name, &version.to_string(), request.mime_type.as_deref()).await?;

        let upload_signature = signature::sign_progress(&self.config.signing_secret, 0);
        let upload_id_owned = upload_id.clone();
        let tenant = request.tenant.clone();
        let bucket_id = request.bucket.clone();
        let name = request.name.clone();
        let owner = request.owner.clone();
        let user_metadata = request.user_metadata.clone();
        self.db
            .with_transaction(move |tx| {
                let upload_id = upload_id_owned.clone();
                let tenant = tenant.clone();
                let bucket_id = bucket_id.clone();
                let name = name.clone();
                let upload_signature = upload_signature.clone();
                let owner = owner.clone();
                let user_metadata = user_metadata.clone();
                Box::pin(async move {
                    db::create_multipart_upload(tx, &upload_id, &tenant, &bucket_id, &name, version, &upload_signature, owner.as_deref(), user_metadata.as_ref()).await
                })
            })
            .await?;

        timer.finish();
        Ok(InitiateResult { upload_id, version: version.to_string() })
    }

    pub async fn upload_part(&self, request: UploadPartRequest) -> anyhow::Result<UploadPartResult> {
        if request.cancellation.is_cancelled() {
            anyhow::bail!(AbortedTerminate);
        }
        let timer = metrics::upload_part_timer();
        let upload_id = request.upload_id.clone();
        let secret = self.config.signing_secret.clone();
        let content_length = request.content_length as i64;
        let global_limit = self.config.global_file_size_limit;

        let row = self
            .db
            .with_transaction(move |tx| {
                let upload_id = upload_id.clone();
                let secret = secret.clone();
                Box::pin(async move {
                    let row = db::find_multipart_upload(tx, &upload_id, db::FindMultipartOptions { for_update: true }).await?;
                    signature::verify_progress(&secret, &row.upload_signature, row.in_progress_size)?;
                    let new_size = row.in_progress_size + content_length;
                    let cap = match db::find_bucket(tx, &row.tenant, &row.bucket).await? {
                        Some(bucket) => match bucket.file_size_limit {
                            Some(limit) if limit >= 0 => (limit as u64).min(global_limit),
                            _ => global_limit,
                        },
                        None => global_limit,
                    };
                    if new_size < 0 || new_size as u64 > cap {
                        anyhow::bail!(ErrorMetadata::entity_too_large(format!("multipart upload {upload_id} would exceed the {cap}-byte object size limit")));
                    }
                    let new_signature = signature::sign_progress(&secret, new_size);
                    db::update_multipart_upload_progress(tx, &upload_id, new_size, &new_signature).await?;
                    Ok(row)
                })
            })
            .await?;

        if request.cancellation.is_cancelled() {
            self.compensate_progress(&row.tenant, &row.bucket, &request.upload_id, content_length).await;
            anyhow::bail!(AbortedTerminate);
        }
        let namespace = Multipart::<RT>::blob_namespace(&row.tenant, &row.bucket);
        let body = PutObjectBody { content_length: request.content_length, stream: Box::pin(byte_limit::ByteLimitStream::new(request.body, self.config.max_part_size)) };
        let upload_result = self
            .storage
            .upload_part(&namespace, &row.key, &row.version.to_string(), &request.upload_id, request.part_number, body, &request.cancellation)
            .await;

        let result = match upload_result {
            Ok(r) => r,
            Err(e) => {
                self.compensate_progress(&row.tenant, &row.bucket, &request.upload_id, content_length).await;
                return Err(e);
            },
        };

        let upload_id = request.upload_id.clone();
        let part_number = request.part_number as i32;
        let etag = result.etag.clone();
        let version = row.version;
        let persisted = self
            .db
            .with_transaction(move |tx| {
                let upload_id = upload_id.clone();
                let etag = etag.clone();
                Box::pin(async move { db::insert_upload_part(tx, &upload_id, part_number, &etag, version).await })
            })
            .await;
        if let Err(e) = persisted {
            self.compensate_progress(&row.tenant, &row.bucket, &request.upload_id, content_length).await;
            return Err(e);
        }

        timer.finish();
        Ok(UploadPartResult { etag: result.etag })
    }

    /// Reverses the `in_progress_size` advance made at the top of
    /// `upload_part` when the blob write or part-row insert that followed it
    /// failed (§4.J UploadPart, "on failure, compensate").
    async fn compensate_progress(&self, tenant: &str, bucket: &str, upload_id: &str, content_length: i64) {
        let upload_id = upload_id.to_string();
        let secret = self.config.signing_secret.clone();
        let result = self
            .db
            .with_transaction(move |tx| {
                let upload_id = upload_id.clone();
                let secret = secret.clone();
                Box::pin(async move {
                    let row = db::find_multipart_upload(tx, &upload_id, db::FindMultipartOptions { for_update: true }).await?;
                    let restored = row.in_progress_size - content_length;
                    let signature = signature::sign_progress(&secret, restored);
                    db::update_multipart_upload_progress(tx, &upload_id, restored, &signature).await
                })
            })
            .await;
        if let Err(e) = result {
            tracing::error!(tenant, bucket, upload_id = %upload_id, error = %e, "failed to compensate multipart upload progress after a failed part");
        }
    }

    pub async fn complete(&self, request: CompleteRequest) -> anyhow::Result<lifecycle::ObjectDescriptor> {
        let timer = metrics::complete_timer();
        let upload_id = request.upload_id.clone();
        let row = self
            .db
            .with_transaction(move |tx| {
                let upload_id = upload_id.clone();
                Box::pin(async move { db::find_multipart_upload(tx, &upload_id, db::FindMultipartOptions::default()).await })
            })
            .await?;

        self.can_write(row.tenant.clone(), row.bucket.clone(), row.key.clone()).await?;

        let parts = match request.parts {
            Some(parts) => parts,
            None => {
                let upload_id = request.upload_id.clone();
                let persisted = self
                    .db
                    .with_transaction(move |tx| {
                        let upload_id = upload_id.clone();
                        Box::pin(async move { db::list_parts(tx, &upload_id).await })
                    })
                    .await?;
                persisted.into_iter().map(|p| CompletedPartSpec { part_number: p.part_number as u32, etag: p.etag }).collect()
            },
        };

        let namespace = Multipart::<RT>::blob_namespace(&row.tenant, &row.bucket);
        let version_str = row.version.to_string();
        self.storage.complete_multipart_upload(&namespace, &row.key, &request.upload_id, &version_str, &parts).await?;
        // CompleteMultipartUpload's response doesn't carry the assembled
        // object's size; head_object learns its real attributes (§4.J Complete).
        let attributes = self
            .storage
            .head_object(&namespace, &row.key, &version_str)
            .await?
            .ok_or_else(|| anyhow::anyhow!("completed multipart object {}/{} vanished before head_object", row.bucket, row.key))?;

        let descriptor = self
            .lifecycle
            .complete_multipart(lifecycle::CompleteMultipartRequest {
                tenant: row.tenant.clone(),
                bucket: row.bucket.clone(),
                name: row.key.clone(),
                version: row.version,
                attributes,
                user_metadata: row.user_metadata.clone(),
                owner: row.owner.clone(),
                req_id: request.req_id,
            })
            .await?;

        let upload_id = request.upload_id.clone();
        self.db
            .with_transaction(move |tx| {
                let upload_id = upload_id.clone();
                Box::pin(async move { db::delete_multipart_upload(tx, &upload_id).await })
            })
            .await?;

        timer.finish();
        Ok(descriptor)
    }

    pub async fn abort(&self, request: AbortRequest) -> anyhow::Result<()> {
        let timer = metrics::abort_timer();
        let upload_id = request.upload_id.clone();
        let row = self
            .db
            .with_transaction(move |tx| {
                let upload_id = upload_id.clone();
                Box::pin(async move { db::find_multipart_upload(tx, &upload_id, db::FindMultipartOptions::default()).await })
            })
            .await?;

        self.can_write(row.tenant.clone(), row.bucket.clone(), row.key.clone()).await?;

        let namespace = Multipart::<RT>::blob_namespace(&row.tenant, &row.bucket);
        self.storage.abort_multipart_upload(&namespace, &row.key, &request.upload_id, &row.version.to_string()).await?;

        let upload_id = request.upload_id.clone();
        self.db
            .with_transaction(move |tx| {
                let upload_id = upload_id.clone();
                Box::pin(async move { db::delete_multipart_upload(tx, &upload_id).await })
            })
            .await?;

        timer.finish();
        Ok(())
    }
}
