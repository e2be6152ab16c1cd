use chrono::{
    DateTime,
    Utc,
};
use errors::ErrorMetadata;
use tokio_postgres::Transaction;
use uuid::Uuid;

use crate::types::{
    MultipartUploadRow,
    UploadPartRow,
};

#[allow(clippy::too_many_arguments)]
pub async fn create_multipart_upload(
    tx: &Transaction<'_>,
    upload_id: &str,
    tenant: &str,
    bucket: &str,
    key: &str,
    version: Uuid,
    upload_signature: &str,
    owner: Option<&str>,
    user_metadata: Option<&serde_json::Value>,
) -> anyhow::Result<()> {
    tx.execute(
        "INSERT INTO multipart_uploads \
         (upload_id, tenant, bucket, key, version, in_progress_size, upload_signature, owner, \
          user_metadata, created_at) \
         VALUES ($1,$2,$3,$4,$5,0,$6,$7,$8, now())",
        &[&upload_id, &tenant, &bucket, &key, &version, &upload_signature, &owner, &user_metadata],
    )
    .await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FindMultipartOptions {
    pub for_update: bool,
}

pub async fn find_multipart_upload(
    tx: &Transaction<'_>,
    upload_id: &str,
    opts: FindMultipartOptions,
) -> anyhow::Result<MultipartUploadRow> {
    let lock_clause = if opts.for_update { " FOR UPDATE" } else { "" };
    let row = tx
        .query_opt(
            &format!(
                "SELECT upload_id, tenant, bucket, key, version, in_progress_size, upload_signature, \
                 owner, user_metadata, created_at FROM multipart_uploads WHERE upload_id = $1{lock_clause}"
            ),
            &[&upload_id],
        )
        .await?
        .ok_or_else(|| ErrorMetadata::no_such_upload(format!("upload '{upload_id}' does not exist")))?;
    Ok(MultipartUploadRow {
        upload_id: row.get("upload_id"),
        tenant: row.get("tenant"),
        bucket: row.get("bucket"),
        key: row.get("key"),
        version: row.get("version"),
        in_progress_size: row.get("in_progress_size"),
        upload_signature: row.get("upload_signature"),
        owner: row.get("owner"),
        user_metadata: row.get("user_metadata"),
        created_at: row.get("created_at"),
    })
}

/// Advance `in_progress_size` and re-sign it. Callers must already hold the
/// row `FOR UPDATE` via [`find_multipart_upload`] in the same transaction.
pub async fn update_multipart_upload_progress(
    tx: &Transaction<'_>,
    upload_id: &str,
    new_in_progress_size: i64,
    new_signature: &str,
) -> anyhow::Result<()> {
    tx.execute(
        "UPDATE multipart_uploads SET in_progress_size = $1, upload_signature = $2 WHERE upload_id = $3",
        &[&new_in_progress_size, &new_signature, &upload_id],
    )
    .await?;
    Ok(())
}

pub async fn insert_upload_part(
    tx: &Transaction<'_>,
    upload_id: &str,
    part_number: i32,
    etag: &str,
    version: Uuid,
) -> anyhow::Result<()> {
    tx.execute(
        "INSERT INTO upload_parts (upload_id, part_number, etag, version, created_at) \
         VALUES ($1,$2,$3,$4, now()) \
         ON CONFLICT (upload_id, part_number) DO UPDATE SET etag = EXCLUDED.etag, version = EXCLUDED.version",
        &[&upload_id, &part_number, &etag, &version],
    )
    .await?;
    Ok(())
}

/// List parts, capped at the S3 10,000-part ceiling (§4.J Complete).
pub async fn list_parts(tx: &Transaction<'_>, upload_id: &str) -> anyhow::Result<Vec<UploadPartRow>> {
    const MAX_PARTS: i64 = 10_000;
    let rows = tx
        .query(
            "SELECT upload_id, part_number, etag, version, created_at FROM upload_parts \
             WHERE upload_id = $1 ORDER BY part_number ASC LIMIT $2",
            &[&upload_id, &MAX_PARTS],
        )
        .await?;
    Ok(rows
        .iter()
        .map(|row| UploadPartRow {
            upload_id: row.get("upload_id"),
            part_number: row.get("part_number"),
            etag: row.get("etag"),
            version: row.get("version"),
            created_at: row.get("created_at"),
        })
        .collect())
}

pub async fn delete_multipart_upload(tx: &Transaction<'_>, upload_id: &str) -> anyhow::Result<()> {
    tx.execute("DELETE FROM multipart_uploads WHERE upload_id = $1", &[&upload_id]).await?;
    tx.execute("DELETE FROM upload_parts WHERE upload_id = $1", &[&upload_id]).await?;
    Ok(())
}

pub async fn list_multipart_uploads(
    tx: &Transaction<'_>,
    tenant: &str,
    bucket: &str,
    after: Option<DateTime<Utc>>,
    limit: u32,
) -> anyhow::Result<Vec<MultipartUploadRow>> {
    let rows = tx
        .query(
            "SELECT upload_id, tenant, bucket, key, version, in_progress_size, upload_signature, \
             owner, user_metadata, created_at FROM multipart_uploads \
             WHERE tenant = $1 AND bucket = $2 AND ($3::timestamptz IS NULL OR created_at > $3) \
             ORDER BY created_at ASC LIMIT $4",
            &[&tenant, &bucket, &after, &(limit as i64)],
        )
        .await?;
    Ok(rows
        .iter()
        .map(|row| MultipartUploadRow {
            upload_id: row.get("upload_id"),
            tenant: row.get("tenant"),
            bucket: row.get("bucket"),
            key: row.get("key"),
            version: row.get("version"),
            in_progress_size: row.get("in_progress_size"),
            upload_signature: row.get("upload_signature"),
            owner: row.get("owner"),
            user_metadata: row.get("user_metadata"),
            created_at: row.get("created_at"),
        })
        .collect())
}
