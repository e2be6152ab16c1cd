use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use uuid::Uuid;

bitflags::bitflags! {
    /// Which `Object` columns a caller needs back from `findObject` and
    /// friends. Replaces the source's dynamic "give me these column names"
    /// projection with a closed, compile-time-checked set (§9 redesign
    /// note on runtime reflection over rows).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectColumns: u16 {
        const VERSION        = 1 << 0;
        const SIZE           = 1 << 1;
        const MIME_TYPE      = 1 << 2;
        const CACHE_CONTROL  = 1 << 3;
        const ETAG           = 1 << 4;
        const LAST_MODIFIED  = 1 << 5;
        const USER_METADATA  = 1 << 6;
        const OWNER          = 1 << 7;
        const CREATED_AT     = 1 << 8;
        const ALL = Self::VERSION.bits() | Self::SIZE.bits() | Self::MIME_TYPE.bits()
            | Self::CACHE_CONTROL.bits() | Self::ETAG.bits() | Self::LAST_MODIFIED.bits()
            | Self::USER_METADATA.bits() | Self::OWNER.bits() | Self::CREATED_AT.bits();
    }
}

#[derive(Debug, Clone)]
pub struct Bucket {
    pub tenant: String,
    pub id: String,
    pub display_name: String,
    pub public: bool,
    pub file_size_limit: Option<i64>,
    pub allowed_mime_types: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    pub size: i64,
    pub mime_type: Option<String>,
    pub cache_control: Option<String>,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ObjectRow {
    pub tenant: String,
    pub bucket: String,
    pub name: String,
    pub version: Uuid,
    pub metadata: ObjectMetadata,
    pub user_metadata: Option<serde_json::Value>,
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewObject {
    pub metadata: ObjectMetadata,
    pub user_metadata: Option<serde_json::Value>,
    pub owner: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MultipartUploadRow {
    pub upload_id: String,
    pub tenant: String,
    pub bucket: String,
    pub key: String,
    pub version: Uuid,
    pub in_progress_size: i64,
    pub upload_signature: String,
    pub user_metadata: Option<serde_json::Value>,
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UploadPartRow {
    pub upload_id: String,
    pub part_number: i32,
    pub etag: String,
    pub version: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Name,
    CreatedAt,
}

/// The opaque pagination cursor threaded through `listObjectsV2`/`searchObjects`:
/// base64 of `l:<name>\no:<order>\nc:<col>\na:<afterTs>` (§4.H).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cursor {
    pub last_name: String,
    pub order: CursorOrder,
    pub sort_column: CursorColumn,
    pub after_ts_millis: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorOrder {
    Asc,
    Desc,
}

impl From<SortOrder> for CursorOrder {
    fn from(o: SortOrder) -> Self {
        match o {
            SortOrder::Asc => CursorOrder::Asc,
            SortOrder::Desc => CursorOrder::Desc,
        }
    }
}

impl From<CursorOrder> for SortOrder {
    fn from(o: CursorOrder) -> Self {
        match o {
            CursorOrder::Asc => SortOrder::Asc,
            CursorOrder::Desc => SortOrder::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorColumn {
    Name,
    CreatedAt,
}

impl From<SortColumn> for CursorColumn {
    fn from(c: SortColumn) -> Self {
        match c {
            SortColumn::Name => CursorColumn::Name,
            SortColumn::CreatedAt => CursorColumn::CreatedAt,
        }
    }
}

impl From<CursorColumn> for SortColumn {
    fn from(c: CursorColumn) -> Self {
        match c {
            CursorColumn::Name => SortColumn::Name,
            CursorColumn::CreatedAt => SortColumn::CreatedAt,
        }
    }
}

impl Cursor {
    pub fn encode(&self) -> anyhow::Result<String> {
        let after = self.after_ts_millis.map(|v| v.to_string()).unwrap_or_default();
        let order = match self.order {
            CursorOrder::Asc => "asc",
            CursorOrder::Desc => "desc",
        };
        let col = match self.sort_column {
            CursorColumn::Name => "name",
            CursorColumn::CreatedAt => "created_at",
        };
        let raw = format!("l:{}\no:{order}\nc:{col}\na:{after}", self.last_name);
        Ok(base64_encode(raw.as_bytes()))
    }

    pub fn decode(token: &str) -> anyhow::Result<Self> {
        let raw = base64_decode(token)?;
        let raw = String::from_utf8(raw)?;
        let mut last_name = None;
        let mut order = None;
        let mut sort_column = None;
        let mut after_ts_millis = None;
        for line in raw.lines() {
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("malformed continuation token"))?;
            match key {
                "l" => last_name = Some(value.to_string()),
                "o" => {
                    order = Some(match value {
                        "asc" => CursorOrder::Asc,
                        "desc" => CursorOrder::Desc,
                        other => anyhow::bail!("unknown cursor order '{other}'"),
                    })
                },
                "c" => {
                    sort_column = Some(match value {
                        "name" => CursorColumn::Name,
                        "created_at" => CursorColumn::CreatedAt,
                        other => anyhow::bail!("unknown cursor column '{other}'"),
                    })
                },
                "a" => {
                    after_ts_millis = if value.is_empty() { None } else { Some(value.parse()?) }
                },
                _ => {},
            }
        }
        Ok(Self {
            last_name: last_name.ok_or_else(|| anyhow::anyhow!("continuation token missing last name"))?,
            order: order.ok_or_else(|| anyhow::anyhow!("continuation token missing order"))?,
            sort_column: sort_column.ok_or_else(|| anyhow::anyhow!("continuation token missing sort column"))?,
            after_ts_millis,
        })
    }
}

fn base64_encode(data: &[u8]) -> String {
    use base64::{
        engine::general_purpose::STANDARD,
        Engine as _,
    };
    STANDARD.encode(data)
}

fn base64_decode(data: &str) -> anyhow::Result<Vec<u8>> {
    use base64::{
        engine::general_purpose::STANDARD,
        Engine as _,
    };
    Ok(STANDARD.decode(data)?)
}
