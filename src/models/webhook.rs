use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// Keyed by the full ingress path `"/api/webhooks/wh_{workflow_id}_{node_id}"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRegistryEntry {
    pub workflow_id: String,
    pub node_id: String,
    pub webhook_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub registered_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub data: Value,
    pub headers: Value,
    pub method: String,
    pub query_params: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}
