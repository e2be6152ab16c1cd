//! Read-only queries against the DuckLake catalog tables the Avro manifest
//! generator (§4.M) needs: table columns, the data/delete files belonging
//! to a snapshot, and their per-column statistics.
//!
//! DuckLake itself stores this metadata in ordinary relational tables (this
//! gateway uses the same Postgres instance as its catalog backend), so this
//! module is a thin typed reader over them - no writes, since snapshot
//! creation is DuckLake's own concern, out of scope here.

use tokio_postgres::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuckLakeType {
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Date,
    Timestamp,
    String,
    Binary,
}

impl DuckLakeType {
    fn from_catalog_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "boolean" => Ok(Self::Boolean),
            "int" => Ok(Self::Int),
            "long" => Ok(Self::Long),
            "float" => Ok(Self::Float),
            "double" => Ok(Self::Double),
            "date" => Ok(Self::Date),
            "timestamp" => Ok(Self::Timestamp),
            "string" => Ok(Self::String),
            "binary" => Ok(Self::Binary),
            other => anyhow::bail!("unrecognized DuckLake column type '{other}'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DuckLakeColumn {
    pub field_id: i32,
    pub name: String,
    pub column_type: DuckLakeType,
}

#[derive(Debug, Clone)]
pub struct DuckLakeSnapshot {
    pub snapshot_id: i64,
    pub sequence_number: i64,
}

#[derive(Debug, Clone)]
pub struct ColumnStat {
    pub field_id: i32,
    pub column_size: Option<i64>,
    pub value_count: Option<i64>,
    pub null_count: Option<i64>,
    pub lower_bound: Option<serde_json::Value>,
    pub upper_bound: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct DuckLakeDataFile {
    pub path: String,
    pub record_count: i64,
    pub file_size_bytes: i64,
    pub stats: Vec<ColumnStat>,
}

#[derive(Debug, Clone)]
pub struct DuckLakeDeleteFile {
    pub path: String,
    pub record_count: i64,
    pub file_size_bytes: i64,
    /// `content=1` (position deletes) unless this file targets specific
    /// equality field-ids, in which case `content=2`.
    pub equality_field_ids: Vec<i32>,
}

pub async fn find_snapshot(tx: &Transaction<'_>, table_id: i64, snapshot_id: i64) -> anyhow::Result<DuckLakeSnapshot> {
    let row = tx
        .query_one(
            "SELECT sequence_number FROM ducklake_snapshot WHERE table_id = $1 AND snapshot_id = $2",
            &[&table_id, &snapshot_id],
        )
        .await?;
    Ok(DuckLakeSnapshot { snapshot_id, sequence_number: row.get("sequence_number") })
}

pub async fn find_columns(tx: &Transaction<'_>, table_id: i64) -> anyhow::Result<Vec<DuckLakeColumn>> {
    let rows = tx
        .query(
            "SELECT field_id, column_name, column_type FROM ducklake_column \
             WHERE table_id = $1 ORDER BY field_id",
            &[&table_id],
        )
        .await?;
    rows.into_iter()
        .map(|row| {
            let column_type: String = row.get("column_type");
            Ok(DuckLakeColumn { field_id: row.get("field_id"), name: row.get("column_name"), column_type: DuckLakeType::from_catalog_str(&column_type)? })
        })
        .collect()
}

pub async fn find_data_files(tx: &Transaction<'_>, table_id: i64, snapshot_id: i64) -> anyhow::Result<Vec<DuckLakeDataFile>> {
    let rows = tx
        .query(
            "SELECT data_file_id, path, record_count, file_size_bytes FROM ducklake_data_file \
             WHERE table_id = $1 AND snapshot_id = $2 ORDER BY data_file_id",
            &[&table_id, &snapshot_id],
        )
        .await?;
    let mut files = Vec::with_capacity(rows.len());
    for row in rows {
        let data_file_id: i64 = row.get("data_file_id");
        let stats = find_column_stats(tx, data_file_id).await?;
        files.push(DuckLakeDataFile {
            path: row.get("path"),
            record_count: row.get("record_count"),
            file_size_bytes: row.get("file_size_bytes"),
            stats,
        });
    }
    Ok(files)
}

pub async fn find_delete_files(tx: &Transaction<'_>, table_id: i64, snapshot_id: i64) -> anyhow::Result<Vec<DuckLakeDeleteFile>> {
    let rows = tx
        .query(
            "SELECT delete_file_id, path, record_count, file_size_bytes, equality_field_ids \
             FROM ducklake_delete_file WHERE table_id = $1 AND snapshot_id = $2 ORDER BY delete_file_id",
            &[&table_id, &snapshot_id],
        )
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| DuckLakeDeleteFile {
            path: row.get("path"),
            record_count: row.get("record_count"),
            file_size_bytes: row.get("file_size_bytes"),
            equality_field_ids: row.get("equality_field_ids"),
        })
        .collect())
}

async fn find_column_stats(tx: &Transaction<'_>, data_file_id: i64) -> anyhow::Result<Vec<ColumnStat>> {
    let rows = tx
        .query(
            "SELECT field_id, column_size, value_count, null_count, lower_bound, upper_bound \
             FROM ducklake_file_column_stats WHERE data_file_id = $1 ORDER BY field_id",
            &[&data_file_id],
        )
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| ColumnStat {
            field_id: row.get("field_id"),
            column_size: row.get("column_size"),
            value_count: row.get("value_count"),
            null_count: row.get("null_count"),
            lower_bound: row.get("lower_bound"),
            upper_bound: row.get("upper_bound"),
        })
        .collect())
}
