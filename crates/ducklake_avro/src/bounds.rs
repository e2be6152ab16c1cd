//! Binary encoding of column lower/upper bounds, per the Iceberg v2 spec's
//! single-value serialization: little-endian fixed-width for numerics,
//! UTF-8 bytes for strings, days-since-epoch for dates, microseconds-since-
//! epoch for timestamps. This is a different encoding from Avro's own wire
//! format - these bytes are the *payload* of an Iceberg `binary` field,
//! opaque to Avro itself.

use db::ducklake::DuckLakeType;

/// Encodes one bound value for `column_type`. Returns `None` if the stored
/// JSON value doesn't match the column's declared type - a malformed stat
/// is dropped from the manifest rather than corrupting the file.
pub fn encode_bound(column_type: DuckLakeType, value: &serde_json::Value) -> Option<Vec<u8>> {
    match column_type {
        DuckLakeType::Boolean => value.as_bool().map(|b| vec![b as u8]),
        DuckLakeType::Int | DuckLakeType::Date => value.as_i64().map(|v| (v as i32).to_le_bytes().to_vec()),
        DuckLakeType::Long | DuckLakeType::Timestamp => value.as_i64().map(|v| v.to_le_bytes().to_vec()),
        DuckLakeType::Float => value.as_f64().map(|v| (v as f32).to_le_bytes().to_vec()),
        DuckLakeType::Double => value.as_f64().map(|v| v.to_le_bytes().to_vec()),
        DuckLakeType::String => value.as_str().map(|s| s.as_bytes().to_vec()),
        DuckLakeType::Binary => value.as_array().map(|bytes| bytes.iter().filter_map(|b| b.as_u64()).map(|b| b as u8).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_numerics_little_endian() {
        assert_eq!(encode_bound(DuckLakeType::Long, &serde_json::json!(1)), Some(1i64.to_le_bytes().to_vec()));
        assert_eq!(encode_bound(DuckLakeType::Int, &serde_json::json!(-5)), Some((-5i32).to_le_bytes().to_vec()));
    }

    #[test]
    fn encodes_dates_as_days_since_epoch() {
        assert_eq!(encode_bound(DuckLakeType::Date, &serde_json::json!(19723)), Some(19723i32.to_le_bytes().to_vec()));
    }

    #[test]
    fn encodes_timestamps_as_microseconds_since_epoch() {
        assert_eq!(encode_bound(DuckLakeType::Timestamp, &serde_json::json!(1_700_000_000_000_000i64)), Some(1_700_000_000_000_000i64.to_le_bytes().to_vec()));
    }

    #[test]
    fn encodes_strings_as_utf8() {
        assert_eq!(encode_bound(DuckLakeType::String, &serde_json::json!("abc")), Some(b"abc".to_vec()));
    }

    #[test]
    fn mismatched_json_shape_drops_the_bound() {
        assert_eq!(encode_bound(DuckLakeType::Long, &serde_json::json!("not a number")), None);
    }
}
