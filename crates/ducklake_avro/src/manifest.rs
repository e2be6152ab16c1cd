//! Builds the Iceberg v2 Avro OCF bytes for one snapshot (§4.M): a data
//! manifest, an optional delete manifest, and the manifest list tying them
//! together.

use apache_avro::{
    types::Value,
    Schema,
    Writer,
};
use db::ducklake::{
    ColumnStat,
    DuckLakeColumn,
    DuckLakeDataFile,
    DuckLakeDeleteFile,
    DuckLakeType,
};

use crate::{
    bounds::encode_bound,
    schema,
    types::ManifestSet,
};

const STATUS_ADDED: i32 = 1;
const CONTENT_DATA: i32 = 0;
const CONTENT_POSITION_DELETES: i32 = 1;
const CONTENT_EQUALITY_DELETES: i32 = 2;

fn int_map(entries: Vec<(i32, Value)>) -> Value {
    Value::Array(
        entries
            .into_iter()
            .map(|(key, value)| Value::Record(vec![("key".to_string(), Value::Int(key)), ("value".to_string(), value)]))
            .collect(),
    )
}

fn stat_map<F>(stats: &[ColumnStat], pick: F) -> Value
where
    F: Fn(&ColumnStat) -> Option<Value>,
{
    int_map(stats.iter().filter_map(|stat| pick(stat).map(|v| (stat.field_id, v))).collect())
}

fn column_type(columns: &[DuckLakeColumn], field_id: i32) -> Option<DuckLakeType> {
    columns.iter().find(|c| c.field_id == field_id).map(|c| c.column_type)
}

fn bounds_map(stats: &[ColumnStat], columns: &[DuckLakeColumn], pick: impl Fn(&ColumnStat) -> &Option<serde_json::Value>) -> Value {
    stat_map(stats, |stat| {
        let bound = pick(stat).as_ref()?;
        let column_type = column_type(columns, stat.field_id)?;
        let encoded = encode_bound(column_type, bound)?;
        Some(Value::Bytes(encoded))
    })
}

fn data_file_record(columns: &[DuckLakeColumn], file: &DuckLakeDataFile, content: i32, equality_ids: Option<Vec<i32>>) -> Value {
    Value::Record(vec![
        ("content".to_string(), Value::Int(content)),
        ("file_path".to_string(), Value::String(file.path.clone())),
        ("file_format".to_string(), Value::String("PARQUET".to_string())),
        ("partition".to_string(), Value::Record(vec![])),
        ("record_count".to_string(), Value::Long(file.record_count)),
        ("file_size_in_bytes".to_string(), Value::Long(file.file_size_bytes)),
        ("column_sizes".to_string(), stat_map(&file.stats, |s| s.column_size.map(Value::Long))),
        ("value_counts".to_string(), stat_map(&file.stats, |s| s.value_count.map(Value::Long))),
        ("null_value_counts".to_string(), stat_map(&file.stats, |s| s.null_count.map(Value::Long))),
        ("lower_bounds".to_string(), bounds_map(&file.stats, columns, |s| &s.lower_bound)),
        ("upper_bounds".to_string(), bounds_map(&file.stats, columns, |s| &s.upper_bound)),
        (
            "equality_ids".to_string(),
            match equality_ids {
                Some(ids) if !ids.is_empty() => Value::Union(1, Box::new(Value::Array(ids.into_iter().map(Value::Int).collect()))),
                _ => Value::Union(0, Box::new(Value::Null)),
            },
        ),
    ])
}

fn manifest_entry(data_file: Value, snapshot_id: i64, sequence_number: i64) -> Value {
    Value::Record(vec![
        ("status".to_string(), Value::Int(STATUS_ADDED)),
        ("snapshot_id".to_string(), Value::Union(1, Box::new(Value::Long(snapshot_id)))),
        ("sequence_number".to_string(), Value::Union(1, Box::new(Value::Long(sequence_number)))),
        ("file_sequence_number".to_string(), Value::Union(1, Box::new(Value::Long(sequence_number)))),
        ("data_file".to_string(), data_file),
    ])
}

fn write_ocf(schema_json: &str, records: Vec<Value>) -> anyhow::Result<Vec<u8>> {
    let schema = Schema::parse_str(schema_json)?;
    let mut writer = Writer::new(&schema, Vec::new());
    for record in records {
        writer.append(record)?;
    }
    Ok(writer.into_inner()?)
}

/// Builds `<snap>-m0.avro`: one `manifest_entry` per data file.
pub fn build_data_manifest(columns: &[DuckLakeColumn], data_files: &[DuckLakeDataFile], snapshot_id: i64, sequence_number: i64) -> anyhow::Result<Vec<u8>> {
    let entries = data_files
        .iter()
        .map(|file| manifest_entry(data_file_record(columns, file, CONTENT_DATA, None), snapshot_id, sequence_number))
        .collect();
    write_ocf(&schema::manifest_entry_schema(), entries)
}

/// Builds `<snap>-m1.avro`: one `manifest_entry` per delete file, only
/// called when at least one exists.
pub fn build_delete_manifest(delete_files: &[DuckLakeDeleteFile], snapshot_id: i64, sequence_number: i64) -> anyhow::Result<Vec<u8>> {
    let entries = delete_files
        .iter()
        .map(|file| {
            let content = if file.equality_field_ids.is_empty() { CONTENT_POSITION_DELETES } else { CONTENT_EQUALITY_DELETES };
            let data_file = Value::Record(vec![
                ("content".to_string(), Value::Int(content)),
                ("file_path".to_string(), Value::String(file.path.clone())),
                ("file_format".to_string(), Value::String("PARQUET".to_string())),
                ("partition".to_string(), Value::Record(vec![])),
                ("record_count".to_string(), Value::Long(file.record_count)),
                ("file_size_in_bytes".to_string(), Value::Long(file.file_size_bytes)),
                ("column_sizes".to_string(), int_map(vec![])),
                ("value_counts".to_string(), int_map(vec![])),
                ("null_value_counts".to_string(), int_map(vec![])),
                ("lower_bounds".to_string(), int_map(vec![])),
                ("upper_bounds".to_string(), int_map(vec![])),
                (
                    "equality_ids".to_string(),
                    if file.equality_field_ids.is_empty() {
                        Value::Union(0, Box::new(Value::Null))
                    } else {
                        Value::Union(1, Box::new(Value::Array(file.equality_field_ids.iter().map(|id| Value::Int(*id)).collect())))
                    },
                ),
            ]);
            manifest_entry(data_file, snapshot_id, sequence_number)
        })
        .collect();
    write_ocf(&schema::manifest_entry_schema(), entries)
}

struct ManifestSummary {
    path: String,
    content: i32,
    added_files_count: i32,
    added_rows_count: i64,
}

fn manifest_file_record(summary: &ManifestSummary, bytes_len: usize, snapshot_id: i64, sequence_number: i64) -> Value {
    Value::Record(vec![
        ("manifest_path".to_string(), Value::String(summary.path.clone())),
        ("manifest_length".to_string(), Value::Long(bytes_len as i64)),
        ("partition_spec_id".to_string(), Value::Int(0)),
        ("content".to_string(), Value::Int(summary.content)),
        ("sequence_number".to_string(), Value::Long(sequence_number)),
        ("min_sequence_number".to_string(), Value::Long(sequence_number)),
        ("added_snapshot_id".to_string(), Value::Long(snapshot_id)),
        ("added_files_count".to_string(), Value::Int(summary.added_files_count)),
        ("existing_files_count".to_string(), Value::Int(0)),
        ("deleted_files_count".to_string(), Value::Int(0)),
        ("added_rows_count".to_string(), Value::Long(summary.added_rows_count)),
        ("existing_rows_count".to_string(), Value::Long(0)),
        ("deleted_rows_count".to_string(), Value::Long(0)),
    ])
}

/// Builds `snap-<id>.avro`, the manifest list for the snapshot, and returns
/// it alongside every manifest it references.
pub fn build_manifest_set(
    virtual_dir: &str,
    columns: &[DuckLakeColumn],
    data_files: &[DuckLakeDataFile],
    delete_files: &[DuckLakeDeleteFile],
    snapshot_id: i64,
    sequence_number: i64,
) -> anyhow::Result<ManifestSet> {
    let data_manifest_name = format!("{snapshot_id}-m0.avro");
    let data_manifest = build_data_manifest(columns, data_files, snapshot_id, sequence_number)?;
    let mut manifests = vec![(data_manifest_name.clone(), data_manifest.clone())];
    let mut entries = vec![manifest_file_record(
        &ManifestSummary {
            path: format!("{virtual_dir}/{data_manifest_name}"),
            content: CONTENT_DATA,
            added_files_count: data_files.len() as i32,
            added_rows_count: data_files.iter().map(|f| f.record_count).sum(),
        },
        data_manifest.len(),
        snapshot_id,
        sequence_number,
    )];

    if !delete_files.is_empty() {
        let delete_manifest_name = format!("{snapshot_id}-m1.avro");
        let delete_manifest = build_delete_manifest(delete_files, snapshot_id, sequence_number)?;
        entries.push(manifest_file_record(
            &ManifestSummary {
                path: format!("{virtual_dir}/{delete_manifest_name}"),
                content: CONTENT_POSITION_DELETES,
                added_files_count: delete_files.len() as i32,
                added_rows_count: delete_files.iter().map(|f| f.record_count).sum(),
            },
            delete_manifest.len(),
            snapshot_id,
            sequence_number,
        ));
        manifests.push((delete_manifest_name, delete_manifest));
    }

    let manifest_list = write_ocf(&schema::manifest_file_schema(), entries)?;
    Ok(ManifestSet { manifest_list, manifests })
}
