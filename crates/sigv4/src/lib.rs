//! AWS Signature Version 4 verification (§4.A).
//!
//! Parses authentication from either the `Authorization` header or the
//! canonical `X-Amz-*` query parameters used by presigned URLs, canonicalizes
//! the request per the AWS spec, and compares the computed signature to the
//! one supplied by the client in constant time.

mod canonical;
mod host;
mod parse;

use std::time::Duration;

use chrono::{
    DateTime,
    NaiveDateTime,
    Utc,
};
use errors::ErrorMetadata;
use hmac::{
    Hmac,
    Mac,
};
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub use crate::{
    canonical::PayloadHash,
    host::HostPrecedence,
    parse::{
        AuthLocation,
        ParsedAuth,
    },
};

type HmacSha256 = Hmac<Sha256>;

pub const LONG_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Headers AWS never includes in the signature even when the client lists
/// them in `SignedHeaders` - they are hop-by-hop or mutated in flight.
pub const NEVER_SIGNED_HEADERS: &[&str] = &[
    "authorization",
    "connection",
    "expect",
    "from",
    "keep-alive",
    "max-forwards",
    "pragma",
    "referer",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "user-agent",
    "x-amzn-trace-id",
];

/// A single HTTP header as seen on the wire: original-case name, raw value.
#[derive(Debug, Clone)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Request data the caller (HTTP framework glue, out of scope here) extracts
/// for us to canonicalize and verify.
pub struct SigV4Request<'a> {
    pub method: &'a str,
    /// Decoded request path, e.g. `/my-bucket/my/key with spaces.png`.
    pub canonical_uri: &'a str,
    /// Raw (not yet percent-encoded) query parameters, in the order received.
    pub query_pairs: Vec<(String, String)>,
    pub headers: Vec<Header>,
    pub body: Option<&'a [u8]>,
    pub host_precedence: HostPrecedence,
}

#[derive(Debug, Clone)]
pub struct VerifyPolicy {
    pub enforce_region: bool,
    pub configured_region: String,
    pub service: String,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            enforce_region: false,
            configured_region: "us-east-1".to_string(),
            service: "s3".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub access_key_id: String,
    pub region: String,
    pub service: String,
}

/// Verify `req`'s SigV4 signature was produced with `secret_access_key`.
///
/// Fails with `AccessDenied` for credential/region/service mismatch,
/// `InvalidSignature` for malformed signing metadata, and `ExpiredSignature`
/// for a stale presigned URL.
pub fn verify(
    req: &SigV4Request,
    secret_access_key: &str,
    policy: &VerifyPolicy,
    now: DateTime<Utc>,
) -> anyhow::Result<VerifiedIdentity> {
    let auth = parse::parse_auth(req)?;

    if let AuthLocation::PresignedQuery { expires_in } = auth.location {
        check_not_expired(&auth.long_date, expires_in, now)?;
    }

    check_region_and_service(&auth, policy)?;

    let canonical_request = canonical::build_canonical_request(req, &auth)?;
    let string_to_sign = string_to_sign(&auth, &canonical_request);
    let signing_key = derive_signing_key(secret_access_key, &auth.date_stamp, &auth.region, &auth.service);
    let expected_signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    if !bool::from(expected_signature.as_bytes().ct_eq(auth.signature.as_bytes())) {
        anyhow::bail!(ErrorMetadata::invalid_signature(
            "computed signature does not match the request signature",
        ));
    }

    Ok(VerifiedIdentity {
        access_key_id: auth.access_key_id,
        region: auth.region,
        service: auth.service,
    })
}

/// Produce the signature a client would send, for use in tests that want to
/// assert `verify(sign(req, creds)) == Ok(..)` and its negation.
pub fn sign(
    req: &SigV4Request,
    secret_access_key: &str,
    auth: &ParsedAuth,
) -> anyhow::Result<String> {
    let canonical_request = canonical::build_canonical_request(req, auth)?;
    let string_to_sign = string_to_sign(auth, &canonical_request);
    let signing_key = derive_signing_key(secret_access_key, &auth.date_stamp, &auth.region, &auth.service);
    Ok(hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())))
}

fn string_to_sign(auth: &ParsedAuth, canonical_request: &str) -> String {
    let hashed_canonical_request = hex::encode(sha256(canonical_request.as_bytes()));
    format!(
        "AWS4-HMAC-SHA256\n{}\n{}/{}/{}/aws4_request\n{}",
        auth.long_date, auth.date_stamp, auth.region, auth.service, hashed_canonical_request
    )
}

fn derive_signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts a key of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn check_not_expired(long_date: &str, expires_in: Duration, now: DateTime<Utc>) -> anyhow::Result<()> {
    let signed_at = parse_long_date(long_date)?;
    let expires_at = signed_at + chrono::Duration::from_std(expires_in).unwrap_or(chrono::Duration::zero());
    if now > expires_at {
        anyhow::bail!(ErrorMetadata::expired_signature(format!(
            "presigned URL expired at {expires_at}",
        )));
    }
    Ok(())
}

pub fn parse_long_date(long_date: &str) -> anyhow::Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(long_date, LONG_DATE_FORMAT)
        .map_err(|_| ErrorMetadata::invalid_signature(format!("invalid X-Amz-Date '{long_date}'")))?;
    Ok(naive.and_utc())
}

fn check_region_and_service(auth: &ParsedAuth, policy: &VerifyPolicy) -> anyhow::Result<()> {
    if auth.service != policy.service {
        anyhow::bail!(ErrorMetadata::access_denied(format!(
            "service '{}' does not match '{}'",
            auth.service, policy.service
        )));
    }
    let region_ok = if policy.enforce_region {
        auth.region == policy.configured_region
    } else {
        matches!(auth.region.as_str(), "auto" | "us-east-1" | "")
            || auth.region == policy.configured_region
    };
    if !region_ok {
        anyhow::bail!(ErrorMetadata::access_denied(format!(
            "region '{}' is not accepted",
            auth.region
        )));
    }
    Ok(())
}

fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::Digest;
    let mut hasher = sha2::Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::AuthLocation;

    fn base_request<'a>(headers: Vec<Header>) -> SigV4Request<'a> {
        SigV4Request {
            method: "GET",
            canonical_uri: "/examplebucket/test.txt",
            query_pairs: vec![],
            headers,
            body: None,
            host_precedence: HostPrecedence::default(),
        }
    }

    #[test]
    fn header_auth_roundtrip_signs_and_verifies() {
        let auth = ParsedAuth {
            access_key_id: "AKIDEXAMPLE".to_string(),
            date_stamp: "20130524".to_string(),
            region: "us-east-1".to_string(),
            service: "s3".to_string(),
            signed_headers: vec!["host".to_string(), "x-amz-date".to_string()],
            signature: String::new(),
            long_date: "20130524T000000Z".to_string(),
            location: AuthLocation::Header,
        };
        let req = base_request(vec![
            Header {
                name: "Host".to_string(),
                value: "examplebucket.s3.amazonaws.com".to_string(),
            },
            Header {
                name: "x-amz-date".to_string(),
                value: "20130524T000000Z".to_string(),
            },
        ]);
        let signature = sign(&req, "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY", &auth).unwrap();

        let policy = VerifyPolicy::default();
        let header_value = format!(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/{}/{}/{}/aws4_request, SignedHeaders=host;x-amz-date, Signature={}",
            auth.date_stamp, auth.region, auth.service, signature
        );
        let mut req2 = base_request(vec![
            Header {
                name: "Host".to_string(),
                value: "examplebucket.s3.amazonaws.com".to_string(),
            },
            Header {
                name: "x-amz-date".to_string(),
                value: "20130524T000000Z".to_string(),
            },
            Header {
                name: "Authorization".to_string(),
                value: header_value,
            },
        ]);
        req2.method = "GET";
        let now: DateTime<Utc> = parse_long_date("20130524T000000Z").unwrap();
        let result = verify(&req2, "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY", &policy, now).unwrap();
        assert_eq!(result.access_key_id, "AKIDEXAMPLE");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let auth = ParsedAuth {
            access_key_id: "AKIDEXAMPLE".to_string(),
            date_stamp: "20130524".to_string(),
            region: "us-east-1".to_string(),
            service: "s3".to_string(),
            signed_headers: vec!["host".to_string()],
            signature: String::new(),
            long_date: "20130524T000000Z".to_string(),
            location: AuthLocation::Header,
        };
        let req = base_request(vec![Header {
            name: "Host".to_string(),
            value: "examplebucket.s3.amazonaws.com".to_string(),
        }]);
        let signature = sign(&req, "correct-secret", &auth).unwrap();
        let header_value = format!(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20130524/us-east-1/s3/aws4_request, SignedHeaders=host, Signature={signature}",
        );
        let req2 = base_request(vec![
            Header {
                name: "Host".to_string(),
                value: "examplebucket.s3.amazonaws.com".to_string(),
            },
            Header {
                name: "Authorization".to_string(),
                value: header_value,
            },
        ]);
        let policy = VerifyPolicy::default();
        let now = parse_long_date("20130524T000000Z").unwrap();
        let err = verify(&req2, "wrong-secret", &policy, now).unwrap_err();
        assert!(err.downcast_ref::<ErrorMetadata>().unwrap().is_code(errors::ErrorCode::InvalidSignature));
    }
}
