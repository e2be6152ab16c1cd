use chrono::Utc;
use errors::ErrorMetadata;
use percent_encoding::{
    utf8_percent_encode,
    AsciiSet,
    NON_ALPHANUMERIC,
};
use runtime::Runtime;
use storage::{
    CopyObjectConditions,
    PutObjectBody,
};
use uuid::Uuid;
use webhook::{
    Event,
    EventPayload,
    WebhookBody,
};

use crate::{
    metrics,
    Lifecycle,
    ObjectDescriptor,
};

/// Mirrors `encodeURIComponent` closely enough for the delete-many batch
/// size accounting in §4.H - every byte outside the unreserved set costs
/// three characters once percent-encoded.
const URI_COMPONENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

#[derive(Debug, thiserror::Error)]
#[error("dry-run rollback")]
struct DryRunRollback;

pub struct UploadRequest {
    pub tenant: String,
    pub bucket: String,
    pub name: String,
    pub content_length: u64,
    pub mime_type: Option<String>,
    pub cache_control: Option<String>,
    pub owner: Option<String>,
    pub user_metadata: Option<serde_json::Value>,
    pub req_id: Option<String>,
    pub body: storage::ByteStream,
    /// Selects the emitted event type: a POST creates, a PUT may overwrite.
    pub is_put: bool,
}

pub struct CopyRequest {
    pub tenant: String,
    pub src_bucket: String,
    pub src_name: String,
    pub src_version: String,
    pub dst_bucket: String,
    pub dst_name: String,
    pub owner: Option<String>,
    pub user_metadata: Option<serde_json::Value>,
    pub req_id: Option<String>,
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
}

pub struct MoveRequest {
    pub tenant: String,
    pub bucket: String,
    pub src_name: String,
    pub src_version: String,
    pub dst_name: String,
    pub req_id: Option<String>,
}

/// The tail end of the S3 multipart state machine's Complete operation
/// (§4.J): the blob bytes already exist under `version`, assembled from
/// the uploaded parts, and this just runs the same upsert/webhook/prior-
/// version-cleanup sequence every other write goes through.
pub struct CompleteMultipartRequest {
    pub tenant: String,
    pub bucket: String,
    pub name: String,
    pub version: Uuid,
    pub attributes: storage::ObjectAttributes,
    pub user_metadata: Option<serde_json::Value>,
    pub owner: Option<String>,
    pub req_id: Option<String>,
}

impl<RT: Runtime> Lifecycle<RT> {
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

    fn max_object_size(&self, bucket: &db::Bucket) -> u64 {
        match bucket.file_size_limit {
            Some(limit) if limit >= 0 => (limit as u64).min(self.config.global_file_size_limit),
            _ => self.config.global_file_size_limit,
        }
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

    /// Simulates the write by performing it inside a transaction that is
    /// always rolled back. Surfaces any constraint/permission failure the
    /// real write would hit, without committing anything.
    async fn can_write(&self, tenant: String, bucket: String, name: String) -> anyhow::Result<()> {
        let placeholder = db::NewObject {
            metadata: db::ObjectMetadata { size: 0, mime_type: None, cache_control: None, etag: String::new(), last_modified: Utc::now() },
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

    async fn dispatch_event(&self, tenant: &str, event_type: &str, descriptor: &ObjectDescriptor, req_id: Option<String>, metadata: Option<serde_json::Value>) {
        let tenant_ref = match self.targets.tenant_ref(tenant).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(tenant, error = %e, "failed to resolve tenant ref for webhook dispatch");
                return;
            },
        };
        let targets = match self.targets.targets_for(tenant).await {
            Ok(targets) => targets,
            Err(e) => {
                tracing::warn!(tenant, error = %e, "failed to resolve webhook targets");
                return;
            },
        };
        if targets.is_empty() {
            return;
        }
        let now = webhook::now_millis();
        let event = Event {
            version: "1".to_string(),
            event_type: event_type.to_string(),
            payload: EventPayload {
                tenant: tenant_ref.clone(),
                bucket_id: descriptor.bucket.clone(),
                name: descriptor.name.clone(),
                version: descriptor.version.clone(),
                metadata,
                req_id,
            },
            apply_time_millis: now,
        };
        let body = WebhookBody::new(event, tenant_ref, now);
        // Best-effort: every target settles independently and failures never
        // propagate (§9 open question 1).
        let _ = self.webhook.dispatch(&targets, &body).await;
    }

    /// Idempotent cleanup of a single orphaned blob version (§4.H orphan
    /// sweep). Safe to run more than once for the same version.
    pub async fn object_admin_delete(&self, tenant: &str, bucket: &str, name: &str, version: &str) {
        let timer = metrics::orphan_sweep_timer();
        let namespace = Self::blob_namespace(tenant, bucket);
        match self.storage.delete_object(&namespace, name, version).await {
            Ok(()) => timer.finish(),
            Err(e) => tracing::warn!(tenant, bucket, name, version, error = %e, "orphan sweep failed to delete blob version"),
        }
    }

    fn schedule_orphan_delete(&self, tenant: String, bucket: String, name: String, version: String) {
        let this = self.clone();
        self.runtime.spawn(
            "object_admin_delete",
            Box::pin(async move {
                this.object_admin_delete(&tenant, &bucket, &name, &version).await;
            }),
        );
    }

    pub async fn upload(&self, request: UploadRequest) -> anyhow::Result<ObjectDescriptor> {
        let timer = metrics::upload_timer();
        if !validate::is_valid_key(&request.name) {
            anyhow::bail!(ErrorMetadata::invalid_key(format!("'{}' is not a valid object key", request.name)));
        }
        let bucket = self.find_bucket(&request.tenant, &request.bucket).await?;
        self.check_mime_allowed(&bucket, request.mime_type.as_deref())?;
        self.can_write(request.tenant.clone(), request.bucket.clone(), request.name.clone()).await?;

        let version = self.runtime.new_uuid_v4();
        let cap = self.max_object_size(&bucket);
        let namespace = Self::blob_namespace(&request.tenant, &request.bucket);
        let body = PutObjectBody {
            content_length: request.content_length,
            stream: Box::pin(byte_limit::ByteLimitStream::new(request.body, cap)),
        };

        let attributes = self
            .storage
            .upload_object(&namespace, &request.name, &version.to_string(), body, request.mime_type.as_deref(), request.cache_control.as_deref())
            .await;
        let attributes = match attributes {
            Ok(attrs) => attrs,
            Err(e) => return Err(e),
        };

        let write_result = self.finish_write(&request.tenant, &request.bucket, &request.name, version, &attributes, request.user_metadata.clone(), request.owner.clone()).await;

        let descriptor = match write_result {
            Ok(d) => d,
            Err(e) => {
                self.schedule_orphan_delete(request.tenant.clone(), request.bucket.clone(), request.name.clone(), version.to_string());
                return Err(e);
            },
        };

        let event_type = if request.is_put { "ObjectCreatedPut" } else { "ObjectCreatedPost" };
        self.dispatch_event(&request.tenant, event_type, &descriptor, request.req_id, None).await;
        timer.finish();
        Ok(descriptor)
    }

    /// The `waitObjectLock` + `FOR UPDATE` + `upsertObject` sequence shared
    /// by upload/copy completion, scheduling the prior version for orphan
    /// cleanup if one existed.
    async fn finish_write(
        &self,
        tenant: &str,
        bucket: &str,
        name: &str,
        version: Uuid,
        attributes: &storage::ObjectAttributes,
        user_metadata: Option<serde_json::Value>,
        owner: Option<String>,
    ) -> anyhow::Result<ObjectDescriptor> {
        let tenant_owned = tenant.to_string();
        let bucket_owned = bucket.to_string();
        let name_owned = name.to_string();
        let new = db::NewObject {
            metadata: db::ObjectMetadata {
                size: attributes.size as i64,
                mime_type: attributes.mime_type.clone(),
                cache_control: attributes.cache_control.clone(),
                etag: attributes.etag.clone(),
                last_modified: attributes.last_modified,
            },
            user_metadata,
            owner,
        };
        let object_lock_timeout = self.config.object_lock_timeout;
        let prior = self
            .db
            .with_transaction(move |tx| {
                let tenant = tenant_owned.clone();
                let bucket = bucket_owned.clone();
                let name = name_owned.clone();
                let new = new.clone();
                let timeout = object_lock_timeout;
                Box::pin(async move {
                    db::Db::wait_object_lock(tx, &bucket, &name, None, timeout).await?;
                    db::find_object(tx, &tenant, &bucket, &name, db::ObjectColumns::VERSION, db::FindObjectOptions { for_update: true, dont_error_on_empty: true }).await?;
                    db::upsert_object(tx, &tenant, &bucket, &name, version, &new).await
                })
            })
            .await?;
        if let Some(prior_version) = prior {
            if prior_version != version {
                self.schedule_orphan_delete(tenant.to_string(), bucket.to_string(), name.to_string(), prior_version.to_string());
            }
        }
        Ok(ObjectDescriptor {
            tenant: tenant.to_string(),
            bucket: bucket.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            size: attributes.size,
            mime_type: attributes.mime_type.clone(),
            etag: attributes.etag.clone(),
        })
    }

    pub async fn copy(&self, request: CopyRequest) -> anyhow::Result<ObjectDescriptor> {
        let timer = metrics::copy_timer();
        if !validate::is_valid_key(&request.dst_name) {
            anyhow::bail!(ErrorMetadata::invalid_key(format!("'{}' is not a valid object key", request.dst_name)));
        }
        // Confirms the destination bucket exists before anything else runs.
        self.find_bucket(&request.tenant, &request.dst_bucket).await?;
        self.can_write(request.tenant.clone(), request.dst_bucket.clone(), request.dst_name.clone()).await?;

        let dst_version = self.runtime.new_uuid_v4();
        let src_namespace = Self::blob_namespace(&request.tenant, &request.src_bucket);
        let dst_namespace = Self::blob_namespace(&request.tenant, &request.dst_bucket);
        let conditions = CopyObjectConditions { if_match: request.if_match.clone(), if_none_match: request.if_none_match.clone() };

        let attributes = if src_namespace == dst_namespace {
            self.storage
                .copy_object(&src_namespace, &request.src_name, &request.src_version, &request.dst_name, &dst_version.to_string(), None, conditions)
                .await?;
            // CopyObject's response doesn't carry the final size; head_object
            // learns the real attributes of what just landed at dst_version.
            self.storage
                .head_object(&dst_namespace, &request.dst_name, &dst_version.to_string())
                .await?
                .ok_or_else(|| anyhow::anyhow!("copied object {}/{} vanished before head_object", request.dst_bucket, request.dst_name))?
        } else {
            // `copy_object` addresses both sides under one namespace, so a
            // copy across buckets falls back to a streamed read and
            // re-upload rather than a server-side copy.
            let source = self
                .storage
                .get_object(&src_namespace, &request.src_name, &request.src_version, storage::GetObjectConditions {
                    if_none_match: conditions.if_none_match.clone(),
                    ..Default::default()
                }, &tokio_util::sync::CancellationToken::new())
                .await?
                .ok_or_else(|| anyhow::Error::new(errors::ErrorMetadata::no_such_key(format!("{}/{} does not exist", request.src_bucket, request.src_name))))?;
            self.storage
                .upload_object(
                    &dst_namespace,
                    &request.dst_name,
                    &dst_version.to_string(),
                    PutObjectBody { content_length: source.content_length, stream: source.stream },
                    source.attributes.mime_type.as_deref(),
                    source.attributes.cache_control.as_deref(),
                )
                .await?
        };

        let write_result = self.finish_write(&request.tenant, &request.dst_bucket, &request.dst_name, dst_version, &attributes, request.user_metadata.clone(), request.owner.clone()).await;
        let descriptor = match write_result {
            Ok(d) => d,
            Err(e) => {
                self.schedule_orphan_delete(request.tenant.clone(), request.dst_bucket.clone(), request.dst_name.clone(), dst_version.to_string());
                return Err(e);
            },
        };
        self.dispatch_event(&request.tenant, "ObjectCreatedCopy", &descriptor, request.req_id, None).await;
        timer.finish();
        Ok(descriptor)
    }

    pub async fn move_object(&self, request: MoveRequest) -> anyhow::Result<ObjectDescriptor> {
        let timer = metrics::move_timer();
        // Source and destination share identity iff their blob keys coincide.
        if request.src_name == request.dst_name {
            let tenant = request.tenant.clone();
            let bucket = request.bucket.clone();
            let name = request.src_name.clone();
            let row = self
                .db
                .with_transaction(move |tx| {
                    Box::pin(async move {
                        db::find_object(tx, &tenant, &bucket, &name, db::ObjectColumns::ALL, db::FindObjectOptions {
                            for_update: false,
                            dont_error_on_empty: false,
                        })
                        .await
                    })
                })
                .await?
                .expect("find_object did not error, so a row was present");
            timer.finish();
            return Ok(ObjectDescriptor::from(row));
        }
        if !validate::is_valid_key(&request.dst_name) {
            anyhow::bail!(ErrorMetadata::invalid_key(format!("'{}' is not a valid object key", request.dst_name)));
        }
        self.can_write(request.tenant.clone(), request.bucket.clone(), request.dst_name.clone()).await?;

        let new_version = self.runtime.new_uuid_v4();
        let namespace = Self::blob_namespace(&request.tenant, &request.bucket);
        self.storage
            .copy_object(&namespace, &request.src_name, &request.src_version, &request.dst_name, &new_version.to_string(), None, CopyObjectConditions::default())
            .await?;
        // CopyObject's response doesn't carry the final size; head_object
        // learns the real attributes of what just landed at new_version.
        let attributes = self
            .storage
            .head_object(&namespace, &request.dst_name, &new_version.to_string())
            .await?
            .ok_or_else(|| anyhow::anyhow!("moved object {}/{} vanished before head_object", request.bucket, request.dst_name))?;

        let tenant = request.tenant.clone();
        let bucket = request.bucket.clone();
        let old_name = request.src_name.clone();
        let new_name = request.dst_name.clone();
        let rename_result = self
            .db
            .with_transaction(move |tx| {
                let tenant = tenant.clone();
                let bucket = bucket.clone();
                let old_name = old_name.clone();
                let new_name = new_name.clone();
                Box::pin(async move { db::update_object_name(tx, &tenant, &bucket, &old_name, &new_name, new_version).await })
            })
            .await;
        if let Err(e) = rename_result {
            self.schedule_orphan_delete(request.tenant.clone(), request.bucket.clone(), request.dst_name.clone(), new_version.to_string());
            return Err(e);
        }
        self.schedule_orphan_delete(request.tenant.clone(), request.bucket.clone(), request.src_name.clone(), request.src_version.clone());

        let descriptor = ObjectDescriptor {
            tenant: request.tenant.clone(),
            bucket: request.bucket.clone(),
            name: request.dst_name.clone(),
            version: new_version.to_string(),
            size: attributes.size,
            mime_type: attributes.mime_type.clone(),
            etag: attributes.etag.clone(),
        };
        let src_descriptor = ObjectDescriptor {
            tenant: request.tenant.clone(),
            bucket: request.bucket.clone(),
            name: request.src_name.clone(),
            version: request.src_version.clone(),
            size: 0,
            mime_type: None,
            etag: String::new(),
        };
        self.dispatch_event(&request.tenant, "ObjectRemovedMove", &src_descriptor, request.req_id.clone(), None).await;
        self.dispatch_event(&request.tenant, "ObjectCreatedMove", &descriptor, request.req_id, None).await;
        timer.finish();
        Ok(descriptor)
    }

    pub async fn delete(&self, tenant: &str, bucket: &str, name: &str) -> anyhow::Result<()> {
        let tenant_owned = tenant.to_string();
        let bucket_owned = bucket.to_string();
        let name_owned = name.to_string();
        let row = self
            .db
            .with_transaction(move |tx| {
                let tenant = tenant_owned.clone();
                let bucket = bucket_owned.clone();
                let name = name_owned.clone();
                Box::pin(async move {
                    let row = db::find_object(tx, &tenant, &bucket, &name, db::ObjectColumns::VERSION, db::FindObjectOptions { for_update: true, dont_error_on_empty: false }).await?;
                    db::delete_object(tx, &tenant, &bucket, &name).await?;
                    Ok(row.expect("find_object did not error, so a row was present"))
                })
            })
            .await?;

        let namespace = Self::blob_namespace(tenant, bucket);
        self.storage.delete_object(&namespace, name, &row.version.to_string()).await?;

        let descriptor = ObjectDescriptor::from(row);
        self.dispatch_event(tenant, "ObjectRemoved", &descriptor, None, None).await;
        Ok(())
    }

    /// Splits `names` into batches whose cumulative
    /// `encodeURIComponent(name).len() + 9` never exceeds the configured
    /// URL length limit, then deletes each batch transactionally.
    pub async fn delete_many(&self, tenant: &str, bucket: &str, names: &[String]) -> anyhow::Result<Vec<ObjectDescriptor>> {
        let timer = metrics::delete_many_timer();
        let mut deleted = Vec::new();
        for batch in batch_by_url_length(names, self.config.url_length_limit) {
            let tenant_owned = tenant.to_string();
            let bucket_owned = bucket.to_string();
            let batch_owned = batch.clone();
            let rows = self
                .db
                .with_transaction(move |tx| {
                    let tenant = tenant_owned.clone();
                    let bucket = bucket_owned.clone();
                    let batch = batch_owned.clone();
                    Box::pin(async move { db::delete_objects(tx, &tenant, &bucket, &batch).await })
                })
                .await?;

            let namespace = Self::blob_namespace(tenant, bucket);
            let mut blob_keys: Vec<(String, String)> = Vec::with_capacity(rows.len() * 2);
            for row in &rows {
                blob_keys.push((row.name.clone(), row.version.to_string()));
                // TUS sidecar metadata file, if this object was ever a resumable upload target.
                blob_keys.push((format!("{}.info", row.name), row.version.to_string()));
            }
            self.storage.delete_objects(&namespace, &blob_keys).await?;

            for row in rows {
                let descriptor = ObjectDescriptor::from(row);
                self.dispatch_event(tenant, "ObjectRemoved", &descriptor, None, None).await;
                deleted.push(descriptor);
            }
        }
        timer.finish();
        Ok(deleted)
    }

    /// Invoked by the multipart state machine's Complete step once the blob
    /// bytes are assembled - finishes the write the same way `upload` does.
    pub async fn complete_multipart(&self, request: CompleteMultipartRequest) -> anyhow::Result<ObjectDescriptor> {
        let write_result = self
            .finish_write(&request.tenant, &request.bucket, &request.name, request.version, &request.attributes, request.user_metadata.clone(), request.owner.clone())
            .await;
        let descriptor = match write_result {
            Ok(d) => d,
            Err(e) => {
                self.schedule_orphan_delete(request.tenant.clone(), request.bucket.clone(), request.name.clone(), request.version.to_string());
                return Err(e);
            },
        };
        self.dispatch_event(&request.tenant, "ObjectCreatedPut", &descriptor, request.req_id, None).await;
        Ok(descriptor)
    }

    pub async fn list_objects_v2(
        &self,
        tenant: &str,
        bucket: &str,
        request: db::ListObjectsV2Request,
        continuation_token: Option<&str>,
    ) -> anyhow::Result<db::ListObjectsV2Page> {
        let tenant = tenant.to_string();
        let bucket = bucket.to_string();
        let continuation_token = continuation_token.map(str::to_string);
        self.db
            .with_transaction(move |tx| {
                let tenant = tenant.clone();
                let bucket = bucket.clone();
                let continuation_token = continuation_token.clone();
                Box::pin(async move { db::list_objects_v2(tx, &tenant, &bucket, &request, continuation_token.as_deref()).await })
            })
            .await
    }
}

fn encoded_len(name: &str) -> usize {
    utf8_percent_encode(name, URI_COMPONENT_ENCODE_SET).map(str::len).sum()
}

fn batch_by_url_length(names: &[String], limit: usize) -> Vec<Vec<String>> {
    let mut batches = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0usize;
    for name in names {
        let cost = encoded_len(name) + 9;
        if !current.is_empty() && current_len + cost > limit {
            batches.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current_len += cost;
        current.push(name.clone());
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn batches_split_once_cumulative_cost_would_exceed_the_limit() {
        let names: Vec<String> = (0..5).map(|i| format!("file-{i}.png")).collect();
        // Each name costs encoded_len + 9; pick a limit that fits two per batch.
        let per_item = encoded_len(&names[0]) + 9;
        let batches = batch_by_url_length(&names, per_item * 2);
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
    }

    #[test]
    fn a_single_oversized_name_still_forms_its_own_batch() {
        let names = vec!["x".repeat(10_000)];
        let batches = batch_by_url_length(&names, 100);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }
}
