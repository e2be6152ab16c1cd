//! Maps an inbound S3-compatible request (verb + path + querystring) to the
//! internal operation it names (§4.N). This is a dispatch table only - HTTP
//! parsing, header canonicalization, and XML/JSON rendering are framework
//! glue the caller owns; `route` just decides *which* of J/H's operations a
//! request is asking for and pulls out the handful of parameters that
//! selection depends on.

#[cfg(test)]
mod tests;

use errors::ErrorMetadata;

/// One HTTP header as the caller observed it on the wire. Only the handful
/// of headers routing itself depends on (`x-amz-copy-source`, `range`,
/// `x-amz-acl`) need to be passed in; header canonicalization for signing
/// happens upstream in `A`.
#[derive(Debug, Clone)]
pub struct Header {
    pub name: String,
    pub value: String,
}

fn header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers.iter().find(|h| h.name.eq_ignore_ascii_case(name)).map(|h| h.value.as_str())
}

fn query<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
}

fn has_query(pairs: &[(String, String)], name: &str) -> bool {
    pairs.iter().any(|(k, _)| k == name)
}

/// The bucket/key the request's path decomposes into. `s3_router` only
/// splits the path on `/` - name validity (§4.C) is the caller's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketKey {
    pub bucket: Option<String>,
    pub key: Option<String>,
}

pub fn split_path(path: &str) -> BucketKey {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return BucketKey { bucket: None, key: None };
    }
    match trimmed.split_once('/') {
        Some((bucket, rest)) if !rest.is_empty() => BucketKey { bucket: Some(bucket.to_string()), key: Some(rest.to_string()) },
        Some((bucket, _)) => BucketKey { bucket: Some(bucket.to_string()), key: None },
        None => BucketKey { bucket: Some(trimmed.to_string()), key: None },
    }
}

/// Parameters accepted by `ListObjectsV2`, left unparsed beyond their own
/// query keys - numeric/enum validation belongs to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsV2Params {
    pub prefix: Option<String>,
    pub continuation_token: Option<String>,
    pub start_after: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: Option<String>,
    pub encoding_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S3Operation {
    ListBuckets,
    ListObjectsV2 { bucket: String, params: ListObjectsV2Params },
    CreateBucket { bucket: String, public_read: bool },
    DeleteBucket { bucket: String },
    HeadBucket { bucket: String },
    DeleteObjects { bucket: String },
    GetObject { bucket: String, key: String, range: Option<String> },
    HeadObject { bucket: String, key: String },
    PutObject { bucket: String, key: String },
    CopyObject { bucket: String, key: String, copy_source: String },
    UploadPart { bucket: String, key: String, part_number: String, upload_id: String },
    UploadPartCopy { bucket: String, key: String, part_number: String, upload_id: String, copy_source: String },
    CreateMultipartUpload { bucket: String, key: String },
    CompleteMultipartUpload { bucket: String, key: String, upload_id: String },
    AbortMultipartUpload { bucket: String, key: String, upload_id: String },
}

fn unsupported(method: &str, path: &str) -> anyhow::Result<S3Operation> {
    anyhow::bail!(ErrorMetadata::invalid_request("InvalidRequest", format!("no S3 operation matches {method} {path}")))
}

/// Routes one request. `method` is matched case-insensitively; `query_pairs`
/// preserves the order and duplicates query parameters arrived in, since a
/// flag parameter (`?uploads`, `?delete`) has no value to compare against.
pub fn route(method: &str, path: &str, query_pairs: &[(String, String)], headers: &[Header]) -> anyhow::Result<S3Operation> {
    let BucketKey { bucket, key } = split_path(path);
    let method = method.to_ascii_uppercase();
    let copy_source = header(headers, "x-amz-copy-source").map(|s| s.to_string());

    match (bucket, key) {
        (None, None) if method == "GET" => Ok(S3Operation::ListBuckets),

        (Some(bucket), None) => match method.as_str() {
            "GET" => Ok(S3Operation::ListObjectsV2 {
                bucket,
                params: ListObjectsV2Params {
                    prefix: query(query_pairs, "prefix").map(str::to_string),
                    continuation_token: query(query_pairs, "continuation-token").map(str::to_string),
                    start_after: query(query_pairs, "start-after").map(str::to_string),
                    delimiter: query(query_pairs, "delimiter").map(str::to_string),
                    max_keys: query(query_pairs, "max-keys").map(str::to_string),
                    encoding_type: query(query_pairs, "encoding-type").map(str::to_string),
                },
            }),
            "PUT" => Ok(S3Operation::CreateBucket { bucket, public_read: header(headers, "x-amz-acl") == Some("public-read") }),
            "DELETE" => Ok(S3Operation::DeleteBucket { bucket }),
            "HEAD" => Ok(S3Operation::HeadBucket { bucket }),
            "POST" if has_query(query_pairs, "delete") => Ok(S3Operation::DeleteObjects { bucket }),
            _ => unsupported(&method, path),
        },

        (Some(bucket), Some(key)) => {
            let upload_id = query(query_pairs, "uploadId").map(str::to_string);
            let part_number = query(query_pairs, "partNumber").map(str::to_string);

            match (method.as_str(), part_number, upload_id) {
                ("PUT", Some(part_number), Some(upload_id)) => match copy_source {
                    Some(copy_source) => Ok(S3Operation::UploadPartCopy { bucket, key, part_number, upload_id, copy_source }),
                    None => Ok(S3Operation::UploadPart { bucket, key, part_number, upload_id }),
                },
                ("POST", None, None) if has_query(query_pairs, "uploads") => Ok(S3Operation::CreateMultipartUpload { bucket, key }),
                ("POST", None, Some(upload_id)) => Ok(S3Operation::CompleteMultipartUpload { bucket, key, upload_id }),
                ("DELETE", None, Some(upload_id)) => Ok(S3Operation::AbortMultipartUpload { bucket, key, upload_id }),
                ("GET", None, None) => Ok(S3Operation::GetObject { bucket, key, range: header(headers, "range").map(str::to_string) }),
                ("HEAD", None, None) => Ok(S3Operation::HeadObject { bucket, key }),
                ("PUT", None, None) => match copy_source {
                    Some(copy_source) => Ok(S3Operation::CopyObject { bucket, key, copy_source }),
                    None => Ok(S3Operation::PutObject { bucket, key }),
                },
                _ => unsupported(&method, path),
            }
        },

        _ => unsupported(&method, path),
    }
}
