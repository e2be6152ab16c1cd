//! Tenant-facing resource-name policy and the tenant→internal namespace
//! mapping (§4.L), kept separate from the gateway's bucket/key policy
//! (`validate::is_valid_bucket_name`/`is_valid_key`) because Iceberg
//! identifiers are a stricter, lowercase-only subset shared by both
//! namespaces and tables.

use uuid::Uuid;
use validate::ReservedSuffixes;

/// Lowercase `[a-z0-9][a-z0-9_]*[a-z0-9]`, 1-255 chars, no `aws` prefix, no
/// reserved suffix.
pub fn is_valid_resource_name(name: &str, reserved: &ReservedSuffixes) -> bool {
    if name.is_empty() || name.chars().count() > 255 {
        return false;
    }
    if name.to_ascii_lowercase().starts_with("aws") {
        return false;
    }
    if validate::is_reserved_bucket_suffix(name, reserved) {
        return false;
    }
    let chars: Vec<char> = name.chars().collect();
    let is_edge = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    if !is_edge(chars[0]) || !is_edge(*chars.last().unwrap()) {
        return false;
    }
    chars[1..chars.len() - 1].iter().all(|&c| is_edge(c) || c == '_')
}

/// Maps a tenant-facing namespace to the internal name the upstream REST
/// catalog sees: `<tenantId>_<uuid_underscored>`. A fresh UUID is minted on
/// every call, so this is only stable once persisted in the metastore row -
/// callers look up the stored `internal_namespace` on every call after
/// creation rather than recomputing it.
pub fn internal_namespace(tenant: &str, fresh_id: Uuid) -> String {
    format!("{tenant}_{}", fresh_id.to_string().replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reserved() -> ReservedSuffixes {
        ReservedSuffixes::default()
    }

    #[test]
    fn accepts_well_formed_names() {
        assert!(is_valid_resource_name("orders", &reserved()));
        assert!(is_valid_resource_name("orders_2024", &reserved()));
        assert!(is_valid_resource_name("a", &reserved()));
        assert!(is_valid_resource_name("a1", &reserved()));
    }

    #[test]
    fn rejects_uppercase_and_punctuation() {
        assert!(!is_valid_resource_name("Orders", &reserved()));
        assert!(!is_valid_resource_name("orders-2024", &reserved()));
        assert!(!is_valid_resource_name("orders.v2", &reserved()));
    }

    #[test]
    fn rejects_edges_that_are_not_alphanumeric() {
        assert!(!is_valid_resource_name("_orders", &reserved()));
        assert!(!is_valid_resource_name("orders_", &reserved()));
    }

    #[test]
    fn rejects_aws_prefix_and_reserved_suffixes() {
        assert!(!is_valid_resource_name("aws_orders", &reserved()));
        assert!(!is_valid_resource_name("AWS_orders", &reserved()));
        assert!(!is_valid_resource_name("orders--iceberg", &reserved()));
    }

    #[test]
    fn internal_namespace_is_scoped_by_tenant_and_underscored() {
        let id = Uuid::parse_str("a1b2c3d4-e5f6-4789-a012-3456789abcde").unwrap();
        let internal = internal_namespace("tenant_a", id);
        assert!(internal.starts_with("tenant_a_"));
        assert!(!internal.contains('-'));
    }
}
