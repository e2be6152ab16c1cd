//! Shared error taxonomy for the storage gateway.
//!
//! Every internal error is classified into one of [`ErrorCode`]'s variants.
//! Classification happens by enum, never by matching on human-readable text.
//! `ErrorMetadata` is attached to an `anyhow::Error` chain via `.context(..)`
//! and carries everything the wire layer needs to `render()` a response,
//! while the original cause stays available for logs via
//! `anyhow::Error::chain()`.

use std::borrow::Cow;

use http::StatusCode;

/// `ErrorMetadata` tags an `anyhow` error chain with the information needed
/// to classify it for the wire. The `msg` is shown to the caller; `short_msg`
/// is a stable ScreamingCamelCase tag usable in tests and metrics.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub code: ErrorCode,
    pub short_msg: Cow<'static, str>,
    pub msg: Cow<'static, str>,
}

/// The wire error taxonomy from the storage gateway's external interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoSuchBucket,
    NoSuchKey,
    NoSuchUpload,
    InvalidJwt,
    InvalidRequest,
    TenantNotFound,
    EntityTooLarge,
    InternalError,
    ResourceAlreadyExists,
    InvalidBucketName,
    InvalidKey,
    KeyAlreadyExists,
    BucketAlreadyExists,
    DatabaseTimeout,
    InvalidSignature,
    ExpiredSignature,
    AccessDenied,
    ResourceLocked,
    MissingContentLength,
    InvalidUploadSignature,
    LockTimeout,
    SlowDown,
}

impl ErrorMetadata {
    fn new(
        code: ErrorCode,
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn no_such_bucket(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::NoSuchBucket, "NoSuchBucket", msg)
    }

    pub fn no_such_key(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::NoSuchKey, "NoSuchKey", msg)
    }

    pub fn no_such_upload(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::NoSuchUpload, "NoSuchUpload", msg)
    }

    pub fn invalid_jwt(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidJwt, "InvalidJWT", msg)
    }

    pub fn invalid_request(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::new(ErrorCode::InvalidRequest, short_msg, msg)
    }

    pub fn tenant_not_found(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::TenantNotFound, "TenantNotFound", msg)
    }

    pub fn entity_too_large(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::EntityTooLarge, "EntityTooLarge", msg)
    }

    pub fn internal_error(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InternalError, "InternalError", msg)
    }

    pub fn resource_already_exists(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ResourceAlreadyExists, "ResourceAlreadyExists", msg)
    }

    pub fn invalid_bucket_name(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidBucketName, "InvalidBucketName", msg)
    }

    pub fn invalid_key(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidKey, "InvalidKey", msg)
    }

    pub fn key_already_exists(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::KeyAlreadyExists, "KeyAlreadyExists", msg)
    }

    pub fn bucket_already_exists(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::BucketAlreadyExists, "BucketAlreadyExists", msg)
    }

    pub fn database_timeout(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::DatabaseTimeout, "DatabaseTimeout", msg)
    }

    pub fn invalid_signature(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidSignature, "InvalidSignature", msg)
    }

    pub fn expired_signature(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ExpiredSignature, "ExpiredSignature", msg)
    }

    pub fn access_denied(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::AccessDenied, "AccessDenied", msg)
    }

    pub fn resource_locked(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ResourceLocked, "ResourceLocked", msg)
    }

    pub fn missing_content_length() -> Self {
        Self::new(
            ErrorCode::MissingContentLength,
            "MissingContentLength",
            "Content-Length header is required",
        )
    }

    pub fn invalid_upload_signature() -> Self {
        Self::new(
            ErrorCode::InvalidUploadSignature,
            "InvalidUploadSignature",
            "Upload progress signature does not match the in-progress size",
        )
    }

    pub fn lock_timeout(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::LockTimeout, "LockTimeout", msg)
    }

    pub fn slow_down(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::SlowDown, "SlowDown", msg)
    }

    pub fn is_code(&self, code: ErrorCode) -> bool {
        self.code == code
    }

    /// Render the wire shape: `(status, short_msg, msg)`.
    pub fn render(&self) -> (StatusCode, &str, &str) {
        (self.code.http_status_code(), &self.short_msg, &self.msg)
    }
}

impl ErrorCode {
    pub fn http_status_code(&self) -> StatusCode {
        match self {
            ErrorCode::NoSuchBucket | ErrorCode::NoSuchKey | ErrorCode::NoSuchUpload => {
                StatusCode::NOT_FOUND
            },
            ErrorCode::InvalidJwt
            | ErrorCode::InvalidRequest
            | ErrorCode::TenantNotFound
            | ErrorCode::InvalidBucketName
            | ErrorCode::InvalidKey
            | ErrorCode::InvalidSignature
            | ErrorCode::ExpiredSignature
            | ErrorCode::InvalidUploadSignature => StatusCode::BAD_REQUEST,
            ErrorCode::EntityTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::ResourceAlreadyExists
            | ErrorCode::KeyAlreadyExists
            | ErrorCode::BucketAlreadyExists => StatusCode::CONFLICT,
            ErrorCode::DatabaseTimeout => StatusCode::from_u16(544).expect("valid status code"),
            ErrorCode::AccessDenied => StatusCode::FORBIDDEN,
            ErrorCode::ResourceLocked => StatusCode::from_u16(423).expect("valid status code"),
            ErrorCode::MissingContentLength => StatusCode::LENGTH_REQUIRED,
            ErrorCode::LockTimeout | ErrorCode::SlowDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Extension methods to classify an opaque `anyhow::Error`, mirroring how the
/// HTTP layer and the orphan-cleanup job runner make retry/render decisions
/// without needing to downcast themselves.
pub trait ErrorMetadataAnyhowExt {
    fn error_metadata(&self) -> Option<&ErrorMetadata>;
    fn is_code(&self, code: ErrorCode) -> bool;
    fn short_msg(&self) -> &str;
    fn user_facing_message(&self) -> String;
    fn http_status(&self) -> StatusCode;
    /// Original, unclassified cause for logging.
    fn original_error(&self) -> &(dyn std::error::Error + 'static);
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn error_metadata(&self) -> Option<&ErrorMetadata> {
        self.downcast_ref::<ErrorMetadata>()
    }

    fn is_code(&self, code: ErrorCode) -> bool {
        self.error_metadata().map(|e| e.is_code(code)).unwrap_or(false)
    }

    fn short_msg(&self) -> &str {
        self.error_metadata()
            .map(|e| e.short_msg.as_ref())
            .unwrap_or(INTERNAL_SERVER_ERROR)
    }

    fn user_facing_message(&self) -> String {
        self.error_metadata()
            .map(|e| e.msg.to_string())
            .unwrap_or_else(|| INTERNAL_SERVER_ERROR_MSG.to_string())
    }

    fn http_status(&self) -> StatusCode {
        self.error_metadata()
            .map(|e| e.code.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn original_error(&self) -> &(dyn std::error::Error + 'static) {
        self.root_cause()
    }
}

pub const INTERNAL_SERVER_ERROR_MSG: &str = "Your request couldn't be completed. Try again later.";
pub const INTERNAL_SERVER_ERROR: &str = "InternalError";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_errors_become_internal_error() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(err.short_msg(), INTERNAL_SERVER_ERROR);
        assert_eq!(err.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn classified_errors_propagate_unchanged() {
        let err = anyhow::Error::new(ErrorMetadata::resource_locked("object is locked"));
        assert!(err.is_code(ErrorCode::ResourceLocked));
        assert_eq!(err.http_status(), StatusCode::from_u16(423).unwrap());
    }

    #[test]
    fn database_timeout_uses_nonstandard_status() {
        assert_eq!(ErrorCode::DatabaseTimeout.http_status_code().as_u16(), 544);
    }
}
