use errors::ErrorMetadata;
use percent_encoding::{
    utf8_percent_encode,
    AsciiSet,
    NON_ALPHANUMERIC,
};
use sha2::Digest;

use crate::{
    host,
    parse::{
        AuthLocation,
        ParsedAuth,
    },
    SigV4Request,
    NEVER_SIGNED_HEADERS,
};

const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');
const PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// How the signed payload hash was derived, matching §4.A's precedence:
/// an explicit `x-amz-content-sha256` header wins, then `UNSIGNED-PAYLOAD`
/// for presigned GETs, then the hash of an empty or present body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadHash {
    ContentSha256(String),
    UnsignedPayload,
    EmptyBody,
    Body,
}

pub(crate) fn build_canonical_request(req: &SigV4Request, auth: &ParsedAuth) -> anyhow::Result<String> {
    let canonical_method = req.method.to_uppercase();
    let canonical_uri = encode_path(req.canonical_uri);
    let canonical_query = canonical_query_string(&req.query_pairs);
    let (headers_block, signed_headers_str) = canonical_headers(req, auth)?;
    let payload_hash = payload_hash_hex(&classify_payload(req, auth), req);

    Ok(format!(
        "{canonical_method}\n{canonical_uri}\n{canonical_query}\n{headers_block}\n{signed_headers_str}\n{payload_hash}"
    ))
}

fn encode_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    utf8_percent_encode(path, PATH_ENCODE_SET).to_string()
}

fn canonical_query_string(pairs: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = pairs
        .iter()
        .filter(|(k, _)| k != "X-Amz-Signature")
        .map(|(k, v)| {
            (
                utf8_percent_encode(k, QUERY_ENCODE_SET).to_string(),
                utf8_percent_encode(v, QUERY_ENCODE_SET).to_string(),
            )
        })
        .collect();
    encoded.sort();
    encoded
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn canonical_headers(req: &SigV4Request, auth: &ParsedAuth) -> anyhow::Result<(String, String)> {
    let mut entries = Vec::new();
    for name in &auth.signed_headers {
        let name = name.to_lowercase();
        if NEVER_SIGNED_HEADERS.contains(&name.as_str()) {
            continue;
        }
        let value = if name == "host" {
            host::resolve_host(req)
                .ok_or_else(|| ErrorMetadata::invalid_signature("missing Host header"))?
        } else {
            req.headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(&name))
                .map(|h| h.value.clone())
                .ok_or_else(|| ErrorMetadata::invalid_signature(format!("signed header '{name}' is missing")))?
        };
        entries.push((name, collapse_whitespace(&value)));
    }
    entries.sort();

    let signed_headers_str = entries
        .iter()
        .map(|(name, _)| name.clone())
        .collect::<Vec<_>>()
        .join(";");
    let headers_block = entries
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect::<String>();
    // The AWS canonical request format embeds a blank line between the
    // headers block (which itself ends in \n) and the SignedHeaders line.
    Ok((headers_block.trim_end_matches('\n').to_string() + "\n", signed_headers_str))
}

fn collapse_whitespace(value: &str) -> String {
    value.trim().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn classify_payload(req: &SigV4Request, auth: &ParsedAuth) -> PayloadHash {
    if let Some(header) = req
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("x-amz-content-sha256"))
    {
        return PayloadHash::ContentSha256(header.value.clone());
    }
    if matches!(auth.location, AuthLocation::PresignedQuery { .. }) && req.method.eq_ignore_ascii_case("GET") {
        return PayloadHash::UnsignedPayload;
    }
    match req.body {
        None => PayloadHash::EmptyBody,
        Some(body) if body.is_empty() => PayloadHash::EmptyBody,
        Some(_) => PayloadHash::Body,
    }
}

fn payload_hash_hex(payload: &PayloadHash, req: &SigV4Request) -> String {
    match payload {
        PayloadHash::ContentSha256(hash) => hash.clone(),
        PayloadHash::UnsignedPayload => "UNSIGNED-PAYLOAD".to_string(),
        PayloadHash::EmptyBody => hex::encode(sha256(b"")),
        PayloadHash::Body => hex::encode(sha256(req.body.unwrap_or_default())),
    }
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = sha2::Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Header;

    #[test]
    fn path_is_percent_encoded_but_preserves_slashes() {
        assert_eq!(encode_path("/a b/c"), "/a%20b/c");
        assert_eq!(encode_path(""), "/");
    }

    #[test]
    fn query_string_is_sorted_and_excludes_signature() {
        let pairs = vec![
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
            ("X-Amz-Signature".to_string(), "deadbeef".to_string()),
        ];
        assert_eq!(canonical_query_string(&pairs), "a=1&b=2");
    }

    #[test]
    fn never_signed_headers_are_excluded_even_if_listed() {
        let req = SigV4Request {
            method: "GET",
            canonical_uri: "/b/k",
            query_pairs: vec![],
            headers: vec![
                Header { name: "Host".to_string(), value: "example.com".to_string() },
                Header { name: "User-Agent".to_string(), value: "test-agent".to_string() },
            ],
            body: None,
            host_precedence: crate::HostPrecedence::default(),
        };
        let auth = ParsedAuth {
            access_key_id: "A".to_string(),
            date_stamp: "20240101".to_string(),
            region: "us-east-1".to_string(),
            service: "s3".to_string(),
            signed_headers: vec!["host".to_string(), "user-agent".to_string()],
            signature: String::new(),
            long_date: "20240101T000000Z".to_string(),
            location: AuthLocation::Header,
        };
        let (_, signed) = canonical_headers(&req, &auth).unwrap();
        assert_eq!(signed, "host");
    }
}
