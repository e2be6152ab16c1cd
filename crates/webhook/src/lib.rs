//! Fan-out webhook dispatcher (§4.I).
//!
//! Delivery is best-effort: each configured endpoint for a tenant is sent
//! the event independently, with a bounded per-request timeout, and a slow
//! or failing endpoint never blocks or fails the others (§9 open question 1
//! - ordering across endpoints, and across events for the same endpoint, is
//! not guaranteed).

mod metrics;

use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Serialize;

/// Per-request delivery timeout (§5).
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Serialize)]
pub struct TenantRef {
    #[serde(rename = "ref")]
    pub reference: String,
    pub host: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventPayload {
    pub tenant: TenantRef,
    #[serde(rename = "bucketId")]
    pub bucket_id: String,
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(rename = "reqId", skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "$version")]
    pub version: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: EventPayload,
    #[serde(rename = "applyTime")]
    pub apply_time_millis: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookBody {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub event: Event,
    #[serde(rename = "sentAt")]
    pub sent_at_millis: i64,
    pub tenant: TenantRef,
}

impl WebhookBody {
    pub fn new(event: Event, tenant: TenantRef, sent_at_millis: i64) -> Self {
        Self { kind: "Webhook", event, sent_at_millis, tenant }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookTarget {
    pub url: String,
    /// Shared secret used to sign the delivery, if the tenant configured one.
    pub secret: Option<String>,
}

#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered { status: u16 },
    TimedOut,
    Failed(anyhow::Error),
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    client: Client,
}

impl Default for WebhookDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookDispatcher {
    pub fn new() -> Self {
        // A single keep-alive client is reused across every delivery so
        // repeated deliveries to the same tenant endpoint pool connections.
        Self { client: Client::builder().build().expect("reqwest client with default TLS backend") }
    }

    /// Send `body` to every target concurrently, waiting for all of them to
    /// settle. A failing or slow target is reported in its own outcome slot
    /// and never affects the others.
    pub async fn dispatch(&self, targets: &[WebhookTarget], body: &WebhookBody) -> Vec<DeliveryOutcome> {
        let sends = targets.iter().map(|target| self.deliver_one(target, body));
        futures::future::join_all(sends).await
    }

    async fn deliver_one(&self, target: &WebhookTarget, body: &WebhookBody) -> DeliveryOutcome {
        let timer = metrics::delivery_timer();
        let mut request = self.client.post(&target.url).json(body);
        if let Some(secret) = &target.secret {
            request = request.header("X-Webhook-Signature", sign(secret, body));
        }
        let result = tokio::time::timeout(DELIVERY_TIMEOUT, request.send()).await;
        let outcome = match result {
            Ok(Ok(response)) => DeliveryOutcome::Delivered { status: response.status().as_u16() },
            Ok(Err(e)) => DeliveryOutcome::Failed(e.into()),
            Err(_) => DeliveryOutcome::TimedOut,
        };
        match &outcome {
            DeliveryOutcome::Delivered { status } if (200..300).contains(status) => {
                timer.finish();
            },
            // Dropping the timer without calling `finish()` logs it under the
            // error label - the default `StatusTimer` sets on construction.
            DeliveryOutcome::Delivered { status } => {
                tracing::warn!(url = %target.url, status, "webhook endpoint returned non-2xx");
            },
            DeliveryOutcome::TimedOut => {
                tracing::warn!(url = %target.url, "webhook delivery timed out");
            },
            DeliveryOutcome::Failed(e) => {
                tracing::warn!(url = %target.url, error = %e, "webhook delivery failed");
            },
        }
        outcome
    }
}

fn sign(secret: &str, body: &WebhookBody) -> String {
    use hmac::{
        Hmac,
        Mac,
    };
    use sha2::Sha256;
    let payload = serde_json::to_vec(body).unwrap_or_default();
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(&payload);
    hex::encode(mac.finalize().into_bytes())
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_body() -> WebhookBody {
        let tenant = TenantRef { reference: "tenant_1".to_string(), host: "tenant1.example.com".to_string() };
        let event = Event {
            version: "1".to_string(),
            event_type: "object.created".to_string(),
            payload: EventPayload {
                tenant: tenant.clone(),
                bucket_id: "avatars".to_string(),
                name: "a.png".to_string(),
                version: "v1".to_string(),
                metadata: None,
                req_id: None,
            },
            apply_time_millis: 1_700_000_000_000,
        };
        WebhookBody::new(event, tenant, 1_700_000_000_001)
    }

    #[test]
    fn body_serializes_with_the_documented_field_names() {
        let body = sample_body();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "Webhook");
        assert_eq!(json["event"]["$version"], "1");
        assert_eq!(json["event"]["payload"]["bucketId"], "avatars");
        assert_eq!(json["tenant"]["ref"], "tenant_1");
    }

    #[tokio::test]
    async fn dispatch_to_an_unreachable_target_reports_failed_without_panicking() {
        let dispatcher = WebhookDispatcher::new();
        let targets = vec![WebhookTarget { url: "http://127.0.0.1:1/does-not-exist".to_string(), secret: None }];
        let outcomes = dispatcher.dispatch(&targets, &sample_body()).await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], DeliveryOutcome::Failed(_) | DeliveryOutcome::TimedOut));
    }
}
