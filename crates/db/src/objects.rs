use chrono::{
    DateTime,
    Utc,
};
use errors::ErrorMetadata;
use tokio_postgres::{
    Row,
    Transaction,
};
use uuid::Uuid;

use crate::types::{
    Bucket,
    Cursor,
    CursorColumn,
    CursorOrder,
    NewObject,
    ObjectColumns,
    ObjectMetadata,
    ObjectRow,
    SortColumn,
    SortOrder,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct FindObjectOptions {
    pub for_update: bool,
    pub dont_error_on_empty: bool,
}

pub async fn find_object(
    tx: &Transaction<'_>,
    tenant: &str,
    bucket: &str,
    name: &str,
    cols: ObjectColumns,
    opts: FindObjectOptions,
) -> anyhow::Result<Option<ObjectRow>> {
    let lock_clause = if opts.for_update { " FOR UPDATE" } else { "" };
    let query = format!(
        "SELECT {} FROM objects WHERE tenant = $1 AND bucket = $2 AND name = $3{lock_clause}",
        select_list(cols)
    );
    let row = tx.query_opt(&query, &[&tenant, &bucket, &name]).await?;
    match row {
        Some(row) => Ok(Some(object_row_from_row(tenant, bucket, name, &row, cols))),
        None if opts.dont_error_on_empty => Ok(None),
        None => anyhow::bail!(ErrorMetadata::no_such_key(format!("{bucket}/{name} does not exist"))),
    }
}

/// Insert a brand-new `(tenant, bucket, name)` row. Fails with
/// `KeyAlreadyExists` if a row is already current.
pub async fn create_object(
    tx: &Transaction<'_>,
    tenant: &str,
    bucket: &str,
    name: &str,
    version: Uuid,
    new: &NewObject,
) -> anyhow::Result<()> {
    let inserted = tx
        .execute(
            "INSERT INTO objects \
             (tenant, bucket, name, version, size, mime_type, cache_control, etag, last_modified, \
              user_metadata, owner, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11, now()) \
             ON CONFLICT (tenant, bucket, name) DO NOTHING",
            &[
                &tenant,
                &bucket,
                &name,
                &version,
                &new.metadata.size,
                &new.metadata.mime_type,
                &new.metadata.cache_control,
                &new.metadata.etag,
                &new.metadata.last_modified,
                &new.user_metadata,
                &new.owner,
            ],
        )
        .await?;
    if inserted == 0 {
        anyhow::bail!(ErrorMetadata::key_already_exists(format!("{bucket}/{name} already exists")));
    }
    Ok(())
}

/// Replace the current row for `(tenant, bucket, name)` with a new version,
/// inserting it if absent. Returns the version it replaced, if any - the
/// caller schedules that version for orphan deletion.
pub async fn upsert_object(
    tx: &Transaction<'_>,
    tenant: &str,
    bucket: &str,
    name: &str,
    version: Uuid,
    new: &NewObject,
) -> anyhow::Result<Option<Uuid>> {
    let prior = tx
        .query_opt("SELECT version FROM objects WHERE tenant = $1 AND bucket = $2 AND name = $3 FOR UPDATE", &[
            &tenant, &bucket, &name,
        ])
        .await?
        .map(|row| row.get::<_, Uuid>("version"));

    tx.execute(
        "INSERT INTO objects \
         (tenant, bucket, name, version, size, mime_type, cache_control, etag, last_modified, \
          user_metadata, owner, created_at) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11, now()) \
         ON CONFLICT (tenant, bucket, name) DO UPDATE SET \
         version = EXCLUDED.version, size = EXCLUDED.size, mime_type = EXCLUDED.mime_type, \
         cache_control = EXCLUDED.cache_control, etag = EXCLUDED.etag, \
         last_modified = EXCLUDED.last_modified, user_metadata = EXCLUDED.user_metadata, \
         owner = EXCLUDED.owner",
        &[
            &tenant,
            &bucket,
            &name,
            &version,
            &new.metadata.size,
            &new.metadata.mime_type,
            &new.metadata.cache_control,
            &new.metadata.etag,
            &new.metadata.last_modified,
            &new.user_metadata,
            &new.owner,
        ],
    )
    .await?;
    Ok(prior)
}

pub async fn update_object_name(
    tx: &Transaction<'_>,
    tenant: &str,
    bucket: &str,
    old_name: &str,
    new_name: &str,
    version: Uuid,
) -> anyhow::Result<()> {
    tx.execute(
        "UPDATE objects SET name = $1, version = $2 WHERE tenant = $3 AND bucket = $4 AND name = $5",
        &[&new_name, &version, &tenant, &bucket, &old_name],
    )
    .await?;
    Ok(())
}

pub async fn delete_object(tx: &Transaction<'_>, tenant: &str, bucket: &str, name: &str) -> anyhow::Result<()> {
    let deleted = tx
        .execute("DELETE FROM objects WHERE tenant = $1 AND bucket = $2 AND name = $3", &[&tenant, &bucket, &name])
        .await?;
    if deleted == 0 {
        anyhow::bail!(ErrorMetadata::no_such_key(format!("{bucket}/{name} does not exist")));
    }
    Ok(())
}

/// Delete every row named in `names`, returning the ones actually deleted
/// (with their final version, so the caller can schedule blob cleanup).
pub async fn delete_objects(
    tx: &Transaction<'_>,
    tenant: &str,
    bucket: &str,
    names: &[String],
) -> anyhow::Result<Vec<ObjectRow>> {
    let rows = tx
        .query(
            "DELETE FROM objects WHERE tenant = $1 AND bucket = $2 AND name = ANY($3) \
             RETURNING name, version, size, mime_type, cache_control, etag, last_modified, \
             user_metadata, owner, created_at",
            &[&tenant, &bucket, &names],
        )
        .await?;
    Ok(rows
        .iter()
        .map(|row| object_row_from_row(tenant, bucket, &row.get::<_, String>("name"), row, ObjectColumns::ALL))
        .collect())
}

#[derive(Debug, Clone)]
pub struct ListObjectsV2Request {
    pub prefix: String,
    pub delimiter: Option<String>,
    pub max_keys: u32,
    pub start_after: Option<String>,
    pub sort_column: SortColumn,
    pub order: SortOrder,
}

#[derive(Debug, Clone)]
pub struct ListObjectsV2Page {
    pub objects: Vec<ObjectRow>,
    pub common_prefixes: Vec<String>,
    pub next_continuation_token: Option<String>,
}

/// Page through objects under `prefix`, collapsing names on `delimiter` into
/// "folders" the way S3 `ListObjectsV2` does. `KeyCount = folders + files`
/// once collapsed (§9 open question 3).
pub async fn list_objects_v2(
    tx: &Transaction<'_>,
    tenant: &str,
    bucket: &str,
    request: &ListObjectsV2Request,
    continuation_token: Option<&str>,
) -> anyhow::Result<ListObjectsV2Page> {
    let cursor = continuation_token.map(Cursor::decode).transpose()?;
    let start_after = cursor.as_ref().map(|c| c.last_name.clone()).or_else(|| request.start_after.clone());

    let order_sql = match request.order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    let column_sql = match request.sort_column {
        SortColumn::Name => "name",
        SortColumn::CreatedAt => "created_at",
    };
    // Over-fetch so we can collapse names into common prefixes and still
    // satisfy `max_keys` distinct entries after collapsing.
    let fetch_limit = (request.max_keys as i64).saturating_mul(4).max(request.max_keys as i64) + 1;

    let rows: Vec<Row> = match &start_after {
        Some(after) => {
            tx.query(
                &format!(
                    "SELECT name, version, size, mime_type, cache_control, etag, last_modified, \
                     user_metadata, owner, created_at FROM objects \
                     WHERE tenant = $1 AND bucket = $2 AND name LIKE $3 AND name > $4 \
                     ORDER BY {column_sql} {order_sql} LIMIT $5"
                ),
                &[&tenant, &bucket, &like_prefix(&request.prefix), after, &fetch_limit],
            )
            .await?
        },
        None => {
            tx.query(
                &format!(
                    "SELECT name, version, size, mime_type, cache_control, etag, last_modified, \
                     user_metadata, owner, created_at FROM objects \
                     WHERE tenant = $1 AND bucket = $2 AND name LIKE $3 \
                     ORDER BY {column_sql} {order_sql} LIMIT $4"
                ),
                &[&tenant, &bucket, &like_prefix(&request.prefix), &fetch_limit],
            )
            .await?
        },
    };

    let mut objects = Vec::new();
    let mut common_prefixes = Vec::new();
    let mut seen_prefixes = std::collections::HashSet::new();
    let mut last_name = None;

    for row in &rows {
        let name: String = row.get("name");
        if objects.len() + common_prefixes.len() >= request.max_keys as usize {
            break;
        }
        last_name = Some(name.clone());
        if let Some(delimiter) = &request.delimiter {
            let rest = name.strip_prefix(&request.prefix).unwrap_or(&name);
            if let Some(idx) = rest.find(delimiter.as_str()) {
                let folder = format!("{}{}{}", request.prefix, &rest[..idx], delimiter);
                if seen_prefixes.insert(folder.clone()) {
                    common_prefixes.push(folder);
                }
                continue;
            }
        }
        objects.push(object_row_from_row(tenant, bucket, &name, row, ObjectColumns::ALL));
    }

    let truncated = rows.len() as i64 == fetch_limit || (objects.len() + common_prefixes.len()) < rows.len();
    let next_continuation_token = if truncated {
        last_name.map(|name| {
            Cursor {
                last_name: name,
                order: CursorOrder::from(request.order),
                sort_column: CursorColumn::from(request.sort_column),
                after_ts_millis: None,
            }
            .encode()
        })
        .transpose()?
    } else {
        None
    };

    Ok(ListObjectsV2Page { objects, common_prefixes, next_continuation_token })
}

#[derive(Debug, Clone)]
pub struct SearchObjectsRequest {
    pub prefix: String,
    pub owner: Option<String>,
    pub after_ts_millis: Option<i64>,
    pub limit: u32,
}

pub async fn search_objects(
    tx: &Transaction<'_>,
    tenant: &str,
    bucket: &str,
    request: &SearchObjectsRequest,
) -> anyhow::Result<Vec<ObjectRow>> {
    let after: Option<DateTime<Utc>> =
        request.after_ts_millis.and_then(|ms| DateTime::from_timestamp_millis(ms));
    let rows = tx
        .query(
            "SELECT name, version, size, mime_type, cache_control, etag, last_modified, \
             user_metadata, owner, created_at FROM objects \
             WHERE tenant = $1 AND bucket = $2 AND name LIKE $3 \
             AND ($4::text IS NULL OR owner = $4) \
             AND ($5::timestamptz IS NULL OR created_at > $5) \
             ORDER BY name ASC LIMIT $6",
            &[&tenant, &bucket, &like_prefix(&request.prefix), &request.owner, &after, &(request.limit as i64)],
        )
        .await?;
    Ok(rows
        .iter()
        .map(|row| object_row_from_row(tenant, bucket, &row.get::<_, String>("name"), row, ObjectColumns::ALL))
        .collect())
}

pub async fn find_bucket(tx: &Transaction<'_>, tenant: &str, bucket_id: &str) -> anyhow::Result<Option<Bucket>> {
    let row = tx
        .query_opt(
            "SELECT id, display_name, public, file_size_limit, allowed_mime_types, created_at \
             FROM buckets WHERE tenant = $1 AND id = $2",
            &[&tenant, &bucket_id],
        )
        .await?;
    Ok(row.map(|row| Bucket {
        tenant: tenant.to_string(),
        id: row.get("id"),
        display_name: row.get("display_name"),
        public: row.get("public"),
        file_size_limit: row.get("file_size_limit"),
        allowed_mime_types: row.get("allowed_mime_types"),
        created_at: row.get("created_at"),
    }))
}

fn like_prefix(prefix: &str) -> String {
    format!("{}%", prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_"))
}

fn select_list(cols: ObjectColumns) -> String {
    let mut parts = vec!["name".to_string()];
    if cols.contains(ObjectColumns::VERSION) {
        parts.push("version".to_string());
    }
    if cols.contains(ObjectColumns::SIZE) {
        parts.push("size".to_string());
    }
    if cols.contains(ObjectColumns::MIME_TYPE) {
        parts.push("mime_type".to_string());
    }
    if cols.contains(ObjectColumns::CACHE_CONTROL) {
        parts.push("cache_control".to_string());
    }
    if cols.contains(ObjectColumns::ETAG) {
        parts.push("etag".to_string());
    }
    if cols.contains(ObjectColumns::LAST_MODIFIED) {
        parts.push("last_modified".to_string());
    }
    if cols.contains(ObjectColumns::USER_METADATA) {
        parts.push("user_metadata".to_string());
    }
    if cols.contains(ObjectColumns::OWNER) {
        parts.push("owner".to_string());
    }
    if cols.contains(ObjectColumns::CREATED_AT) {
        parts.push("created_at".to_string());
    }
    parts.join(", ")
}

fn object_row_from_row(tenant: &str, bucket: &str, name: &str, row: &Row, cols: ObjectColumns) -> ObjectRow {
    let get_opt = |c: ObjectColumns, col: &str| -> bool { cols.contains(c) && row.columns().iter().any(|x| x.name() == col) };

    ObjectRow {
        tenant: tenant.to_string(),
        bucket: bucket.to_string(),
        name: name.to_string(),
        version: if get_opt(ObjectColumns::VERSION, "version") { row.get("version") } else { Uuid::nil() },
        metadata: ObjectMetadata {
            size: if get_opt(ObjectColumns::SIZE, "size") { row.get("size") } else { 0 },
            mime_type: if get_opt(ObjectColumns::MIME_TYPE, "mime_type") { row.get("mime_type") } else { None },
            cache_control: if get_opt(ObjectColumns::CACHE_CONTROL, "cache_control") {
                row.get("cache_control")
            } else {
                None
            },
            etag: if get_opt(ObjectColumns::ETAG, "etag") { row.get("etag") } else { String::new() },
            last_modified: if get_opt(ObjectColumns::LAST_MODIFIED, "last_modified") {
                row.get("last_modified")
            } else {
                DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is representable")
            },
        },
        user_metadata: if get_opt(ObjectColumns::USER_METADATA, "user_metadata") {
            row.get("user_metadata")
        } else {
            None
        },
        owner: if get_opt(ObjectColumns::OWNER, "owner") { row.get("owner") } else { None },
        created_at: if get_opt(ObjectColumns::CREATED_AT, "created_at") {
            row.get("created_at")
        } else {
            DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is representable")
        },
    }
}
