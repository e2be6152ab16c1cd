//! Iceberg v2 Avro schemas, field-ids included in the JSON exactly as the
//! Iceberg spec assigns them. `apache_avro`'s parser keeps unrecognized
//! field properties (like `field-id`) around as metadata but never feeds
//! them to the encoder, which is the behavior §4.M relies on.

/// `map<int, long>` and `map<int, binary>` fields: Iceberg forbids
/// string-keyed Avro maps, so these are modeled as an array of `k_v`
/// records instead, per the Iceberg spec's `map` logical type.
fn int_keyed_map_schema(record_name: &str, value_type: &str, key_field_id: u32, value_field_id: u32) -> String {
    format!(
        r#"{{"type":"array","items":{{"type":"record","name":"{record_name}","fields":[
            {{"name":"key","type":"int","field-id":{key_field_id}}},
            {{"name":"value","type":"{value_type}","field-id":{value_field_id}}}
        ]}},"logicalType":"map"}}"#
    )
}

fn nullable(schema: &str) -> String {
    format!(r#"["null",{schema}]"#)
}

/// The nested `data_file` struct embedded in every `manifest_entry`.
fn data_file_schema() -> String {
    let column_sizes = int_keyed_map_schema("k117_v118", "long", 117, 118);
    let value_counts = int_keyed_map_schema("k119_v120", "long", 119, 120);
    let null_value_counts = int_keyed_map_schema("k121_v122", "long", 121, 122);
    let lower_bounds = int_keyed_map_schema("k126_v127", "bytes", 126, 127);
    let upper_bounds = int_keyed_map_schema("k129_v130", "bytes", 129, 130);
    format!(
        r#"{{"type":"record","name":"data_file","fields":[
            {{"name":"content","type":"int","field-id":134}},
            {{"name":"file_path","type":"string","field-id":100}},
            {{"name":"file_format","type":"string","field-id":101}},
            {{"name":"partition","type":{{"type":"record","name":"partition","fields":[]}},"field-id":102}},
            {{"name":"record_count","type":"long","field-id":103}},
            {{"name":"file_size_in_bytes","type":"long","field-id":104}},
            {{"name":"column_sizes","type":{},"field-id":108}},
            {{"name":"value_counts","type":{},"field-id":109}},
            {{"name":"null_value_counts","type":{},"field-id":110}},
            {{"name":"lower_bounds","type":{},"field-id":125}},
            {{"name":"upper_bounds","type":{},"field-id":128}},
            {{"name":"equality_ids","type":{},"field-id":135}}
        ]}}"#,
        column_sizes,
        value_counts,
        null_value_counts,
        lower_bounds,
        upper_bounds,
        nullable(r#"{"type":"array","items":"int"}"#),
    )
}

/// `manifest_entry`: one per data or delete file, written into the data
/// manifest (`m0`) or delete manifest (`m1`).
pub fn manifest_entry_schema() -> String {
    format!(
        r#"{{"type":"record","name":"manifest_entry","fields":[
            {{"name":"status","type":"int","field-id":0}},
            {{"name":"snapshot_id","type":{},"field-id":1}},
            {{"name":"sequence_number","type":{},"field-id":3}},
            {{"name":"file_sequence_number","type":{},"field-id":4}},
            {{"name":"data_file","type":{},"field-id":2}}
        ]}}"#,
        nullable("\"long\""),
        nullable("\"long\""),
        nullable("\"long\""),
        data_file_schema(),
    )
}

/// `manifest_file`: one per manifest, written into the manifest list
/// (`snap-<id>.avro`).
pub fn manifest_file_schema() -> String {
    r#"{"type":"record","name":"manifest_file","fields":[
        {"name":"manifest_path","type":"string","field-id":500},
        {"name":"manifest_length","type":"long","field-id":501},
        {"name":"partition_spec_id","type":"int","field-id":502},
        {"name":"content","type":"int","field-id":517},
        {"name":"sequence_number","type":"long","field-id":515},
        {"name":"min_sequence_number","type":"long","field-id":516},
        {"name":"added_snapshot_id","type":"long","field-id":503},
        {"name":"added_files_count","type":"int","field-id":504},
        {"name":"existing_files_count","type":"int","field-id":505},
        {"name":"deleted_files_count","type":"int","field-id":506},
        {"name":"added_rows_count","type":"long","field-id":507},
        {"name":"existing_rows_count","type":"long","field-id":508},
        {"name":"deleted_rows_count","type":"long","field-id":509}
    ]}"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_file_schema_carries_the_iceberg_v2_field_ids() {
        let schema = manifest_file_schema();
        assert!(schema.contains(r#""name":"manifest_path","type":"string","field-id":500"#));
        assert!(schema.contains(r#""name":"content","type":"int","field-id":517"#));
    }

    #[test]
    fn schemas_parse_as_valid_avro() {
        apache_avro::Schema::parse_str(&manifest_entry_schema()).unwrap();
        apache_avro::Schema::parse_str(&manifest_file_schema()).unwrap();
    }
}
