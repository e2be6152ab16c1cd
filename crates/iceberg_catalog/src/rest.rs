//! The upstream Iceberg REST catalog this component proxies to. Routing
//! incorporates the shard key chosen at table-creation time (§4.L) so the
//! upstream can distribute warehouses across its own backing stores; this
//! gateway never interprets shard keys beyond passing them through.

use async_trait::async_trait;
use errors::ErrorMetadata;
use serde::Deserialize;

#[async_trait]
pub trait CatalogClient: Send + Sync + std::fmt::Debug {
    /// Idempotent from this crate's perspective: a 409 response means the
    /// namespace already exists upstream and is treated as success.
    async fn create_namespace(&self, shard_key: i64, namespace: &str) -> anyhow::Result<()>;

    async fn drop_namespace(&self, shard_key: i64, namespace: &str) -> anyhow::Result<()>;

    async fn create_table(&self, shard_key: i64, namespace: &str, table: &str, request: serde_json::Value) -> anyhow::Result<serde_json::Value>;

    async fn drop_table(&self, shard_key: i64, namespace: &str, table: &str) -> anyhow::Result<()>;

    async fn rename_table(&self, shard_key: i64, namespace: &str, table: &str, dst_namespace: &str, dst_table: &str) -> anyhow::Result<()>;
}

/// The `{message, type, code}` error body the Iceberg REST spec mandates
/// (§6).
#[derive(Debug, Deserialize)]
struct IcebergErrorBody {
    error: IcebergErrorDetail,
}

#[derive(Debug, Deserialize)]
struct IcebergErrorDetail {
    message: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone)]
pub struct ReqwestCatalogClient {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestCatalogClient {
    pub fn new(base_url: String) -> Self {
        Self { client: reqwest::Client::new(), base_url }
    }

    fn warehouse_url(&self, shard_key: i64, path: &str) -> String {
        format!("{}/v1/shard-{shard_key}{path}", self.base_url.trim_end_matches('/'))
    }

    async fn error_from_response(resp: reqwest::Response) -> anyhow::Error {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<IcebergErrorBody>(&body).ok().map(|b| b.error);
        let message = detail.as_ref().map(|d| d.message.clone()).unwrap_or(body);
        let kind = detail.map(|d| d.kind).unwrap_or_default();
        match status.as_u16() {
            404 => ErrorMetadata::no_such_key(message).into(),
            409 => ErrorMetadata::resource_already_exists(message).into(),
            _ => ErrorMetadata::internal_error(format!("upstream Iceberg catalog error ({kind}): {message}")).into(),
        }
    }
}

#[async_trait]
impl CatalogClient for ReqwestCatalogClient {
    async fn create_namespace(&self, shard_key: i64, namespace: &str) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(self.warehouse_url(shard_key, "/namespaces"))
            .json(&serde_json::json!({ "namespace": [namespace] }))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::CONFLICT {
            return Ok(());
        }
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(())
    }

    async fn drop_namespace(&self, shard_key: i64, namespace: &str) -> anyhow::Result<()> {
        let resp = self.client.delete(self.warehouse_url(shard_key, &format!("/namespaces/{namespace}"))).send().await?;
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(())
    }

    async fn create_table(&self, shard_key: i64, namespace: &str, table: &str, request: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let mut body = request;
        if let Some(obj) = body.as_object_mut() {
            obj.entry("name").or_insert_with(|| serde_json::Value::String(table.to_string()));
        }
        let resp = self
            .client
            .post(self.warehouse_url(shard_key, &format!("/namespaces/{namespace}/tables")))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn drop_table(&self, shard_key: i64, namespace: &str, table: &str) -> anyhow::Result<()> {
        let resp = self.client.delete(self.warehouse_url(shard_key, &format!("/namespaces/{namespace}/tables/{table}"))).send().await?;
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(())
    }

    async fn rename_table(&self, shard_key: i64, namespace: &str, table: &str, dst_namespace: &str, dst_table: &str) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(self.warehouse_url(shard_key, "/tables/rename"))
            .json(&serde_json::json!({
                "source": { "namespace": [namespace], "name": table },
                "destination": { "namespace": [dst_namespace], "name": dst_table },
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(())
    }
}
