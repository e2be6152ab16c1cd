use crate::{
    route,
    Header,
    S3Operation,
};

fn route_simple(method: &str, path: &str) -> S3Operation {
    route(method, path, &[], &[]).unwrap()
}

#[test]
fn root_get_lists_buckets() {
    assert_eq!(route_simple("GET", "/"), S3Operation::ListBuckets);
}

#[test]
fn bucket_get_lists_objects_with_its_query_params() {
    let pairs = vec![("prefix".to_string(), "images/".to_string()), ("max-keys".to_string(), "100".to_string())];
    let op = route("GET", "/my-bucket", &pairs, &[]).unwrap();
    match op {
        S3Operation::ListObjectsV2 { bucket, params } => {
            assert_eq!(bucket, "my-bucket");
            assert_eq!(params.prefix.as_deref(), Some("images/"));
            assert_eq!(params.max_keys.as_deref(), Some("100"));
        },
        other => panic!("expected ListObjectsV2, got {other:?}"),
    }
}

#[test]
fn bucket_put_creates_a_bucket_and_reads_the_acl_header() {
    let headers = vec![Header { name: "x-amz-acl".to_string(), value: "public-read".to_string() }];
    let op = route("PUT", "/my-bucket", &[], &headers).unwrap();
    assert_eq!(op, S3Operation::CreateBucket { bucket: "my-bucket".to_string(), public_read: true });

    let op = route("PUT", "/my-bucket", &[], &[]).unwrap();
    assert_eq!(op, S3Operation::CreateBucket { bucket: "my-bucket".to_string(), public_read: false });
}

#[test]
fn bucket_delete_and_head() {
    assert_eq!(route_simple("DELETE", "/my-bucket"), S3Operation::DeleteBucket { bucket: "my-bucket".to_string() });
    assert_eq!(route_simple("HEAD", "/my-bucket"), S3Operation::HeadBucket { bucket: "my-bucket".to_string() });
}

#[test]
fn bucket_post_delete_flag_batches_delete_objects() {
    let pairs = vec![("delete".to_string(), String::new())];
    let op = route("POST", "/my-bucket", &pairs, &[]).unwrap();
    assert_eq!(op, S3Operation::DeleteObjects { bucket: "my-bucket".to_string() });
}

#[test]
fn object_get_carries_the_range_header() {
    let headers = vec![Header { name: "Range".to_string(), value: "bytes=0-0".to_string() }];
    let op = route("GET", "/my-bucket/my/key.png", &[], &headers).unwrap();
    assert_eq!(
        op,
        S3Operation::GetObject { bucket: "my-bucket".to_string(), key: "my/key.png".to_string(), range: Some("bytes=0-0".to_string()) }
    );
}

#[test]
fn object_head() {
    let op = route_simple("HEAD", "/my-bucket/key");
    assert_eq!(op, S3Operation::HeadObject { bucket: "my-bucket".to_string(), key: "key".to_string() });
}

#[test]
fn plain_put_is_put_object_but_with_copy_source_header_becomes_copy_object() {
    let op = route_simple("PUT", "/my-bucket/key");
    assert_eq!(op, S3Operation::PutObject { bucket: "my-bucket".to_string(), key: "key".to_string() });

    let headers = vec![Header { name: "x-amz-copy-source".to_string(), value: "/src-bucket/src-key".to_string() }];
    let op = route("PUT", "/my-bucket/key", &[], &headers).unwrap();
    assert_eq!(
        op,
        S3Operation::CopyObject { bucket: "my-bucket".to_string(), key: "key".to_string(), copy_source: "/src-bucket/src-key".to_string() }
    );
}

#[test]
fn put_with_part_number_and_upload_id_is_upload_part_unless_a_copy_source_is_present() {
    let pairs = vec![("partNumber".to_string(), "1".to_string()), ("uploadId".to_string(), "U".to_string())];
    let op = route("PUT", "/my-bucket/key", &pairs, &[]).unwrap();
    assert_eq!(op, S3Operation::UploadPart { bucket: "my-bucket".to_string(), key: "key".to_string(), part_number: "1".to_string(), upload_id: "U".to_string() });

    let headers = vec![Header { name: "x-amz-copy-source".to_string(), value: "/src-bucket/src-key".to_string() }];
    let op = route("PUT", "/my-bucket/key", &pairs, &headers).unwrap();
    assert_eq!(
        op,
        S3Operation::UploadPartCopy {
            bucket: "my-bucket".to_string(),
            key: "key".to_string(),
            part_number: "1".to_string(),
            upload_id: "U".to_string(),
            copy_source: "/src-bucket/src-key".to_string(),
        }
    );
}

#[test]
fn multipart_lifecycle_verbs() {
    let pairs = vec![("uploads".to_string(), String::new())];
    let op = route("POST", "/my-bucket/key", &pairs, &[]).unwrap();
    assert_eq!(op, S3Operation::CreateMultipartUpload { bucket: "my-bucket".to_string(), key: "key".to_string() });

    let pairs = vec![("uploadId".to_string(), "U".to_string())];
    let op = route("POST", "/my-bucket/key", &pairs, &[]).unwrap();
    assert_eq!(op, S3Operation::CompleteMultipartUpload { bucket: "my-bucket".to_string(), key: "key".to_string(), upload_id: "U".to_string() });

    let op = route("DELETE", "/my-bucket/key", &pairs, &[]).unwrap();
    assert_eq!(op, S3Operation::AbortMultipartUpload { bucket: "my-bucket".to_string(), key: "key".to_string(), upload_id: "U".to_string() });
}

#[test]
fn unroutable_requests_are_rejected_as_invalid() {
    let err = route("PATCH", "/my-bucket/key", &[], &[]).unwrap_err();
    let err = err.downcast::<errors::ErrorMetadata>().unwrap();
    assert!(err.is_code(errors::ErrorCode::InvalidRequest));
}

#[test]
fn keys_with_embedded_slashes_are_not_split() {
    let op = route_simple("HEAD", "/my-bucket/a/b/c.png");
    assert_eq!(op, S3Operation::HeadObject { bucket: "my-bucket".to_string(), key: "a/b/c.png".to_string() });
}
