/// Bucket suffixes reserved for namespace creation (Iceberg/S3-table facades
/// live under these). Configured per-tenant because the Iceberg suffix is
/// deployment-specific.
#[derive(Debug, Clone)]
pub struct ReservedSuffixes {
    pub iceberg_suffix: String,
}

impl Default for ReservedSuffixes {
    fn default() -> Self {
        Self {
            iceberg_suffix: "--iceberg".to_string(),
        }
    }
}

const BUILTIN_RESERVED_SUFFIXES: &[&str] = &["--iceberg", "--s3-table"];

pub fn is_reserved_bucket_suffix(name: &str, reserved: &ReservedSuffixes) -> bool {
    BUILTIN_RESERVED_SUFFIXES
        .iter()
        .any(|suffix| name.ends_with(suffix))
        || name.ends_with(&reserved.iceberg_suffix)
}

/// 1-100 chars, ASCII subset `[\w!-.*'()&$@=;:+,? ]`.
pub fn is_valid_bucket_name(name: &str) -> bool {
    if name.is_empty() || name.chars().count() > 100 {
        return false;
    }
    name.chars().all(is_allowed_bucket_char)
}

fn is_allowed_bucket_char(c: char) -> bool {
    if c.is_ascii_alphanumeric() || c == '_' {
        return true;
    }
    matches!(
        c,
        '!' | '-' | '.' | '*' | '\'' | '(' | ')' | '&' | '$' | '@' | '=' | ';' | ':' | '+' | ',' | '?' | ' '
    )
}

/// Non-empty; accepts all Unicode except ASCII control chars (other than
/// `\t \n \r`), the non-characters U+FFFE/U+FFFF, and unpaired surrogates.
///
/// Rust's `char` can never hold an unpaired surrogate, so that case can only
/// arise from a caller handing us raw UTF-16/WTF-8; `is_valid_key` takes a
/// `&str` and so that class is unrepresentable here by construction. We keep
/// the check anyway for documentation and in case the input type changes.
pub fn is_valid_key(key: &str) -> bool {
    if key.is_empty() {
        return false;
    }
    key.chars().all(is_allowed_key_char)
}

fn is_allowed_key_char(c: char) -> bool {
    if c.is_ascii_control() {
        return matches!(c, '\t' | '\n' | '\r');
    }
    !matches!(c as u32, 0xFFFE | 0xFFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_names() {
        assert!(is_valid_bucket_name("my-bucket_1"));
        assert!(!is_valid_bucket_name(""));
        assert!(!is_valid_bucket_name(&"a".repeat(101)));
        assert!(!is_valid_bucket_name("bucket/with/slash"));
    }

    #[test]
    fn keys_reject_control_chars_but_allow_whitespace() {
        assert!(is_valid_key("a/b/c.txt"));
        assert!(is_valid_key("tab\there"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("null\u{0000}byte"));
        assert!(!is_valid_key("noncharacter\u{FFFE}"));
    }

    #[test]
    fn keys_accept_unicode() {
        assert!(is_valid_key("日本語/ファイル.png"));
    }

    #[test]
    fn reserved_suffixes_are_rejected() {
        let reserved = ReservedSuffixes::default();
        assert!(is_reserved_bucket_suffix("tenant--iceberg", &reserved));
        assert!(is_reserved_bucket_suffix("tenant--s3-table", &reserved));
        assert!(!is_reserved_bucket_suffix("tenant-main", &reserved));
    }
}
