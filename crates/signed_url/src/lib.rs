//! HMAC-signed, JWT-like bearer tokens for time-limited object access (§4.B).
//!
//! A token is a JWS in compact serialization (`header.payload.signature`,
//! each segment base64url without padding), signed HS256 over a per-tenant
//! key. Keys are looked up through [`TenantKeyLookup`], which may return a
//! rotated key set: minting always uses the tenant's current key, but
//! verification accepts a signature produced by any key still considered
//! valid, so an in-flight token survives a key rotation.

mod payload;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{
    DateTime,
    Utc,
};
use errors::ErrorMetadata;
use hmac::{
    Hmac,
    Mac,
};
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub use crate::payload::Payload;

type HmacSha256 = Hmac<Sha256>;

/// A named HMAC secret. `key_id` travels in the JWS header so verification
/// can pick the right key out of a tenant's rotated set without trying all
/// of them.
#[derive(Debug, Clone)]
pub struct TenantKey {
    pub key_id: String,
    pub secret: Vec<u8>,
}

#[async_trait]
pub trait TenantKeyLookup: Send + Sync {
    /// The key new tokens are minted with.
    async fn signing_key(&self, tenant: &str) -> anyhow::Result<TenantKey>;
    /// Every key still accepted for verification, current and rotated-out.
    async fn verification_keys(&self, tenant: &str) -> anyhow::Result<Vec<TenantKey>>;
}

#[derive(serde::Serialize, serde::Deserialize)]
struct JwsHeader {
    alg: &'static str,
    kid: String,
}

/// Mint a token for `payload`, valid until `payload.exp`.
///
/// `role`, if present in the raw claims a caller assembled upstream, is
/// stripped before signing: a token must never let whoever constructs the
/// claims request their own elevated role, since that would turn the
/// signer into a privilege-escalation oracle. Callers that need a role
/// claim must set it through [`Payload`] fields the type exposes, not by
/// smuggling it through arbitrary JSON.
pub fn mint(key: &TenantKey, payload: &Payload) -> anyhow::Result<String> {
    let mut claims = serde_json::to_value(payload)?;
    if let Some(object) = claims.as_object_mut() {
        object.remove("role");
    }
    let header = JwsHeader { alg: "HS256", kid: key.key_id.clone() };
    let signing_input = format!("{}.{}", encode_segment(&header)?, encode_segment(&claims)?);
    let signature = hmac_sha256(&key.secret, signing_input.as_bytes());
    Ok(format!("{signing_input}.{}", base64_url::encode(&signature)))
}

/// Verify `token` against any of `keys`, rejecting it once `now` is past
/// the embedded `exp`.
pub fn verify(keys: &[TenantKey], token: &str, now: DateTime<Utc>) -> anyhow::Result<Payload> {
    let malformed = || ErrorMetadata::invalid_jwt("malformed signed URL token");

    let mut parts = token.split('.');
    let header_segment = parts.next().ok_or_else(malformed)?;
    let payload_segment = parts.next().ok_or_else(malformed)?;
    let signature_segment = parts.next().ok_or_else(malformed)?;
    if parts.next().is_some() {
        anyhow::bail!(malformed());
    }

    let header: JwsHeader = decode_segment(header_segment).map_err(|_| malformed())?;
    if header.alg != "HS256" {
        anyhow::bail!(ErrorMetadata::invalid_jwt(format!("unsupported algorithm '{}'", header.alg)));
    }
    let key = keys
        .iter()
        .find(|k| k.key_id == header.kid)
        .ok_or_else(|| ErrorMetadata::invalid_jwt("token was signed with an unrecognized key"))?;

    let signing_input = format!("{header_segment}.{payload_segment}");
    let expected = hmac_sha256(&key.secret, signing_input.as_bytes());
    let provided = base64_url::decode(signature_segment).map_err(|_| malformed())?;
    if !bool::from(expected.ct_eq(&provided)) {
        anyhow::bail!(ErrorMetadata::invalid_jwt("signature does not match"));
    }

    let payload: Payload = decode_segment(payload_segment).map_err(|_| malformed())?;
    if now.timestamp() > payload.exp {
        anyhow::bail!(ErrorMetadata::expired_signature("signed URL token has expired"));
    }
    Ok(payload)
}

pub fn expires_at(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero())
}

fn encode_segment<T: serde::Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(base64_url::encode(&serde_json::to_vec(value)?))
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> anyhow::Result<T> {
    let bytes = base64_url::decode(segment)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts a key of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Minimal base64url (no padding) codec, matching the JWS compact
/// serialization alphabet without pulling in the `base64` crate's full
/// config surface for two call sites.
mod base64_url {
    use base64::{
        engine::general_purpose::URL_SAFE_NO_PAD,
        Engine as _,
    };

    pub fn encode(data: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(data)
    }

    pub fn decode(data: &str) -> anyhow::Result<Vec<u8>> {
        Ok(URL_SAFE_NO_PAD.decode(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TenantKey {
        TenantKey { key_id: "k1".to_string(), secret: b"tenant-secret".to_vec() }
    }

    #[test]
    fn roundtrip_mint_and_verify() {
        let now = Utc::now();
        let payload = Payload {
            url: "/b/k".to_string(),
            owner: Some("user_1".to_string()),
            upsert: Some(true),
            transformations: None,
            exp: expires_at(now, Duration::from_secs(60)).timestamp(),
        };
        let token = mint(&key(), &payload).unwrap();
        let verified = verify(&[key()], &token, now).unwrap();
        assert_eq!(verified.url, "/b/k");
        assert_eq!(verified.owner.as_deref(), Some("user_1"));
    }

    #[test]
    fn role_is_stripped_from_the_signed_payload() {
        let now = Utc::now();
        let payload = Payload {
            url: "/b/k".to_string(),
            owner: None,
            upsert: None,
            transformations: None,
            exp: expires_at(now, Duration::from_secs(60)).timestamp(),
        };
        let token = mint(&key(), &payload).unwrap();
        let payload_segment = token.split('.').nth(1).unwrap();
        let decoded = base64_url::decode(payload_segment).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert!(json.as_object().unwrap().get("role").is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now();
        let payload = Payload {
            url: "/b/k".to_string(),
            owner: None,
            upsert: None,
            transformations: None,
            exp: expires_at(now, Duration::from_secs(1)).timestamp(),
        };
        let token = mint(&key(), &payload).unwrap();
        let later = now + chrono::Duration::seconds(2);
        let err = verify(&[key()], &token, later).unwrap_err();
        assert!(err
            .downcast_ref::<ErrorMetadata>()
            .unwrap()
            .is_code(errors::ErrorCode::ExpiredSignature));
    }

    #[test]
    fn verification_tolerates_a_rotated_out_key() {
        let now = Utc::now();
        let old_key = key();
        let new_key = TenantKey { key_id: "k2".to_string(), secret: b"new-secret".to_vec() };
        let payload = Payload {
            url: "/b/k".to_string(),
            owner: None,
            upsert: None,
            transformations: None,
            exp: expires_at(now, Duration::from_secs(60)).timestamp(),
        };
        let token = mint(&old_key, &payload).unwrap();
        let verified = verify(&[new_key, old_key], &token, now).unwrap();
        assert_eq!(verified.url, "/b/k");
    }
}
