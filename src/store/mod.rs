pub mod file_store;

use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Run, Workflow, WebhookPayload, WebhookRegistryEntry};

pub use file_store::FileStore;

/// In-memory maps (workflows, webhook registry, webhook payload buffers,
/// historical runs) with atomic file-replace durability (spec.md §2, §3, §6).
#[async_trait]
pub trait Store: Send + Sync {
    async fn list_workflows(&self) -> Vec<Workflow>;
    async fn get_workflow(&self, id: &str) -> Option<Workflow>;
    /// Upserts `workflow`, clearing `tested`/`is_active` if the graph changed
    /// relative to the previously stored version (spec.md §3, §8 invariant 4).
    async fn save_workflow(&self, workflow: Workflow) -> Result<Workflow, StoreError>;
    async fn delete_workflow(&self, id: &str) -> Result<bool, StoreError>;

    /// Sets `tested`/`last_tested`, clearing `is_active` on failure
    /// (spec.md §4.1 "test-run side effects").
    async fn set_tested(&self, workflow_id: &str, success: bool) -> Result<(), StoreError>;
    async fn set_active(&self, workflow_id: &str, active: bool) -> Result<bool, StoreError>;

    /// Promotes a test run's webhook payload into the saved node's `data`
    /// (`last_payload`/`dataLoaded`), replacing any previous value (DESIGN.md
    /// Open Question 2).
    async fn record_webhook_payload_on_node(
        &self,
        workflow_id: &str,
        node_id: &str,
        payload: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Prepends `run` to the workflow's historical run list, bounded to the
    /// newest 10 kept in memory (spec.md §3, §4.1).
    async fn append_run(&self, run: Run) -> Result<(), StoreError>;
    async fn list_runs(&self, workflow_id: &str, limit: usize) -> Vec<Run>;
    async fn get_run(&self, workflow_id: &str, run_id: Uuid) -> Option<Run>;

    async fn register_webhook(
        &self,
        workflow_id: &str,
        node_id: &str,
    ) -> Result<WebhookRegistryEntry, StoreError>;
    async fn lookup_webhook(&self, path: &str) -> Option<WebhookRegistryEntry>;
    async fn list_webhook_registry(&self) -> HashMap<String, WebhookRegistryEntry>;

    /// Appends to the bounded (≤100) per-path ring (spec.md §4.4, §5).
    async fn append_webhook_payload(&self, path: &str, payload: WebhookPayload);
    async fn list_webhook_payloads(&self, path: &str) -> Vec<WebhookPayload>;
    async fn clear_webhook_payloads(&self, path: &str);
}

pub const MAX_PAYLOAD_RING: usize = 100;
pub const MAX_IN_MEMORY_RUNS: usize = 10;
