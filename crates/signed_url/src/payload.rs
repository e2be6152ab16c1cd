use serde::{
    Deserialize,
    Serialize,
};

/// The claims carried by a signed URL token (§4.B, §6).
///
/// `url` pins the token to a specific request path so it cannot be replayed
/// against a different object; `owner`/`upsert`/`transformations` are
/// optional hints the issuing endpoint threads through (upload ownership,
/// allow-overwrite, image transform parameters for `/render/image/sign/…`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub upsert: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transformations: Option<serde_json::Value>,
    pub exp: i64,
}
