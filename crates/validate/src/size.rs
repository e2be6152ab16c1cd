use errors::ErrorMetadata;

const UNITS: &[(&str, u64)] = &[
    ("B", 1),
    ("KB", 1_000),
    ("MB", 1_000_000),
    ("GB", 1_000_000_000),
];

/// Parses `20MB`-style limits (case-insensitive), rejecting any unit other
/// than B/KB/MB/GB.
pub fn parse_file_size_to_bytes(input: &str) -> anyhow::Result<u64> {
    let trimmed = input.trim();
    let split_at = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .ok_or_else(|| {
            ErrorMetadata::invalid_request("InvalidFileSizeLimit", format!("missing unit in '{input}'"))
        })?;
    let (number_part, unit_part) = trimmed.split_at(split_at);
    let number: f64 = number_part.parse().map_err(|_| {
        ErrorMetadata::invalid_request(
            "InvalidFileSizeLimit",
            format!("'{number_part}' is not a valid number"),
        )
    })?;
    let unit = unit_part.trim();
    let (_, multiplier) = UNITS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(unit))
        .ok_or_else(|| {
            ErrorMetadata::invalid_request("InvalidFileSizeLimit", format!("unknown unit '{unit}' in '{input}'"))
        })?;
    if number < 0.0 {
        anyhow::bail!(ErrorMetadata::invalid_request(
            "InvalidFileSizeLimit",
            "size must be non-negative",
        ));
    }
    Ok((number * *multiplier as f64).round() as u64)
}

/// Formats a byte count back into the largest whole unit with precision 3,
/// the inverse of [`parse_file_size_to_bytes`].
pub fn format_bytes(bytes: u64) -> String {
    for (name, multiplier) in UNITS.iter().rev() {
        if bytes as f64 / *multiplier as f64 >= 1.0 || *multiplier == 1 {
            let value = bytes as f64 / *multiplier as f64;
            return format!("{}{name}", round_to_precision(value, 3));
        }
    }
    unreachable!("UNITS always contains B")
}

fn round_to_precision(value: f64, precision: u32) -> String {
    let factor = 10f64.powi(precision as i32);
    let rounded = (value * factor).round() / factor;
    // Trim trailing zeros so "5.000MB" prints as "5MB".
    let s = format!("{rounded:.*}", precision as usize);
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_units_case_insensitively() {
        assert_eq!(parse_file_size_to_bytes("10B").unwrap(), 10);
        assert_eq!(parse_file_size_to_bytes("10kb").unwrap(), 10_000);
        assert_eq!(parse_file_size_to_bytes("20MB").unwrap(), 20_000_000);
        assert_eq!(parse_file_size_to_bytes("1GB").unwrap(), 1_000_000_000);
        assert_eq!(parse_file_size_to_bytes("1.5MB").unwrap(), 1_500_000);
    }

    #[test]
    fn rejects_unknown_units() {
        assert!(parse_file_size_to_bytes("10TB").is_err());
        assert!(parse_file_size_to_bytes("10").is_err());
    }

    #[test]
    fn roundtrips_within_precision() {
        for input in ["20MB", "1GB", "512KB", "7B"] {
            let bytes = parse_file_size_to_bytes(input).unwrap();
            let formatted = format_bytes(bytes);
            let roundtrip = parse_file_size_to_bytes(&formatted).unwrap();
            assert_eq!(bytes, roundtrip, "roundtrip failed for {input} -> {formatted}");
        }
    }
}
