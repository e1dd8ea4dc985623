use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Run, Workflow, WebhookPayload, WebhookRegistryEntry};

use super::{Store, MAX_IN_MEMORY_RUNS, MAX_PAYLOAD_RING};

/// Writes `bytes` to `{path}.tmp` then renames over `path`, so readers always
/// observe either the previous or the new content (spec.md §8 invariant 8).
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// File-backed `Store`: in-memory `DashMap`s for concurrent reads, with writes
/// serialized through a single mutex and persisted via [`atomic_write`]
/// (spec.md §5 "workflows_db").
pub struct FileStore {
    data_dir: PathBuf,
    workflows: DashMap<String, Workflow>,
    runs: DashMap<String, Vec<Run>>,
    webhook_registry: DashMap<String, WebhookRegistryEntry>,
    webhook_payloads: DashMap<String, Vec<WebhookPayload>>,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        std::fs::create_dir_all(data_dir.join("runs"))?;

        let workflows = load_map(&data_dir.join("workflows.json")).unwrap_or_default();
        let runs = load_map(&data_dir.join("runs.json")).unwrap_or_default();
        let webhook_registry = load_map(&data_dir.join("webhook_registry.json")).unwrap_or_default();
        let webhook_payloads = load_map(&data_dir.join("webhook_payloads.json")).unwrap_or_default();

        Ok(FileStore {
            data_dir,
            workflows: DashMap::from_iter(workflows),
            runs: DashMap::from_iter(runs),
            webhook_registry: DashMap::from_iter(webhook_registry),
            webhook_payloads: DashMap::from_iter(webhook_payloads),
            write_lock: Mutex::new(()),
        })
    }

    async fn persist_workflows(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let snapshot: HashMap<String, Workflow> = self
            .workflows
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        atomic_write(&self.data_dir.join("workflows.json"), &bytes)
    }

    async fn persist_runs(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let snapshot: HashMap<String, Vec<Run>> = self
            .runs
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        atomic_write(&self.data_dir.join("runs.json"), &bytes)
    }

    async fn persist_webhook_registry(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let snapshot: HashMap<String, WebhookRegistryEntry> = self
            .webhook_registry
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        atomic_write(&self.data_dir.join("webhook_registry.json"), &bytes)
    }

    async fn persist_webhook_payloads(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let snapshot: HashMap<String, Vec<WebhookPayload>> = self
            .webhook_payloads
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        atomic_write(&self.data_dir.join("webhook_payloads.json"), &bytes)
    }

    /// Writes the optional per-run archive file described in spec.md §6.
    fn archive_run(&self, run: &Run) {
        let dir = self.data_dir.join("runs").join(&run.workflow_id);
        if let Err(err) = std::fs::create_dir_all(&dir) {
            warn!(?err, "failed to create run archive directory");
            return;
        }
        let started = run.started_at;
        let stamp = started
            .format(&time::format_description::well_known::Iso8601::DEFAULT)
            .unwrap_or_else(|_| run.run_id.to_string())
            .replace([':', '-'], "")
            .replace('.', "_");
        let path = dir.join(format!("{}_{}.json", stamp, run.run_id));
        let archived = serde_json::json!({
            "run_id": run.run_id,
            "workflow_id": run.workflow_id,
            "start_time": run.started_at,
            "end_time": run.ended_at,
            "duration": run.ended_at.map(|end| (end - run.started_at).as_seconds_f64()),
            "status": run.status,
            "is_test": run.is_test,
            "log_count": run.logs.len(),
            "archived_at": OffsetDateTime::now_utc(),
            "logs": run.logs,
        });
        match serde_json::to_vec_pretty(&archived) {
            Ok(bytes) => {
                if let Err(err) = atomic_write(&path, &bytes) {
                    warn!(?err, path = %path.display(), "failed to archive run");
                }
            }
            Err(err) => warn!(?err, "failed to serialize run archive"),
        }
    }
}

fn load_map<T: serde::de::DeserializeOwned>(path: &Path) -> Option<HashMap<String, T>> {
    let bytes = std::fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(map) => Some(map),
        Err(err) => {
            warn!(?err, path = %path.display(), "failed to parse persisted state; starting empty");
            None
        }
    }
}

#[async_trait]
impl Store for FileStore {
    async fn list_workflows(&self) -> Vec<Workflow> {
        self.workflows.iter().map(|e| e.value().clone()).collect()
    }

    async fn get_workflow(&self, id: &str) -> Option<Workflow> {
        self.workflows.get(id).map(|e| e.value().clone())
    }

    async fn save_workflow(&self, mut workflow: Workflow) -> Result<Workflow, StoreError> {
        if let Some(existing) = self.workflows.get(&workflow.id) {
            if workflow.graph_differs_from(&existing) {
                workflow.tested = false;
                workflow.is_active = false;
                workflow.last_tested = None;
            }
        }
        self.workflows.insert(workflow.id.clone(), workflow.clone());
        self.persist_workflows().await?;
        debug!(workflow_id = %workflow.id, "saved workflow");
        Ok(workflow)
    }

    async fn delete_workflow(&self, id: &str) -> Result<bool, StoreError> {
        let existed = self.workflows.remove(id).is_some();
        if existed {
            self.persist_workflows().await?;
        }
        Ok(existed)
    }

    async fn set_tested(&self, workflow_id: &str, success: bool) -> Result<(), StoreError> {
        {
            let mut entry = self
                .workflows
                .get_mut(workflow_id)
                .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))?;
            entry.tested = success;
            entry.last_tested = Some(OffsetDateTime::now_utc());
            if !success {
                entry.is_active = false;
            }
        }
        self.persist_workflows().await
    }

    async fn set_active(&self, workflow_id: &str, active: bool) -> Result<bool, StoreError> {
        {
            let mut entry = self
                .workflows
                .get_mut(workflow_id)
                .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))?;
            if active && !entry.tested {
                return Ok(false);
            }
            entry.is_active = active;
        }
        self.persist_workflows().await?;
        Ok(true)
    }

    async fn record_webhook_payload_on_node(
        &self,
        workflow_id: &str,
        node_id: &str,
        payload: Value,
    ) -> Result<(), StoreError> {
        {
            let mut entry = self
                .workflows
                .get_mut(workflow_id)
                .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))?;
            if let Some(node) = entry.nodes.iter_mut().find(|n| n.id == node_id) {
                if let Some(map) = node.data.as_object_mut() {
                    map.insert("last_payload".to_string(), payload);
                    map.insert("dataLoaded".to_string(), Value::Bool(true));
                }
            }
        }
        self.persist_workflows().await
    }

    async fn append_run(&self, run: Run) -> Result<(), StoreError> {
        self.archive_run(&run);
        {
            let mut list = self.runs.entry(run.workflow_id.clone()).or_default();
            list.insert(0, run);
            list.truncate(MAX_IN_MEMORY_RUNS);
        }
        self.persist_runs().await
    }

    async fn list_runs(&self, workflow_id: &str, limit: usize) -> Vec<Run> {
        self.runs
            .get(workflow_id)
            .map(|list| list.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    async fn get_run(&self, workflow_id: &str, run_id: Uuid) -> Option<Run> {
        self.runs
            .get(workflow_id)
            .and_then(|list| list.iter().find(|r| r.run_id == run_id).cloned())
    }

    async fn register_webhook(
        &self,
        workflow_id: &str,
        node_id: &str,
    ) -> Result<WebhookRegistryEntry, StoreError> {
        let path = webhook_path(workflow_id, node_id);
        let entry = WebhookRegistryEntry {
            workflow_id: workflow_id.to_string(),
            node_id: node_id.to_string(),
            webhook_id: Uuid::new_v4(),
            registered_at: OffsetDateTime::now_utc(),
        };
        self.webhook_registry.insert(path, entry.clone());
        self.persist_webhook_registry().await?;
        Ok(entry)
    }

    async fn lookup_webhook(&self, path: &str) -> Option<WebhookRegistryEntry> {
        self.webhook_registry.get(path).map(|e| e.value().clone())
    }

    async fn list_webhook_registry(&self) -> HashMap<String, WebhookRegistryEntry> {
        self.webhook_registry
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    async fn append_webhook_payload(&self, path: &str, payload: WebhookPayload) {
        {
            let mut list = self.webhook_payloads.entry(path.to_string()).or_default();
            list.push(payload);
            if list.len() > MAX_PAYLOAD_RING {
                let excess = list.len() - MAX_PAYLOAD_RING;
                list.drain(0..excess);
            }
        }
        if let Err(err) = self.persist_webhook_payloads().await {
            warn!(?err, path, "failed to persist webhook payload ring");
        }
    }

    async fn list_webhook_payloads(&self, path: &str) -> Vec<WebhookPayload> {
        self.webhook_payloads
            .get(path)
            .map(|l| l.clone())
            .unwrap_or_default()
    }

    async fn clear_webhook_payloads(&self, path: &str) {
        self.webhook_payloads.remove(path);
        let _ = self.persist_webhook_payloads().await;
    }
}

pub fn webhook_path(workflow_id: &str, node_id: &str) -> String {
    format!("/api/webhooks/wh_{workflow_id}_{node_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edge, Node};
    use serde_json::json;

    fn sample_workflow(id: &str) -> Workflow {
        Workflow {
            id: id.to_string(),
            name: "wf".into(),
            nodes: vec![Node {
                id: "a".into(),
                node_type: "input".into(),
                position: Value::Null,
                data: json!({}),
            }],
            edges: vec![],
            metadata: Value::Null,
            is_active: false,
            tested: false,
            last_tested: None,
        }
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("wf-store-test-{}", Uuid::new_v4()));
        dir
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();
        store.save_workflow(sample_workflow("wf1")).await.unwrap();

        let reloaded = FileStore::new(&dir).unwrap();
        let wf = reloaded.get_workflow("wf1").await.unwrap();
        assert_eq!(wf.id, "wf1");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn saving_changed_graph_clears_tested_and_active() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();
        let mut wf = sample_workflow("wf2");
        wf.tested = true;
        wf.is_active = true;
        store.save_workflow(wf.clone()).await.unwrap();

        let mut changed = wf.clone();
        changed.nodes[0].node_type = "trigger".into();
        let saved = store.save_workflow(changed).await.unwrap();
        assert!(!saved.tested);
        assert!(!saved.is_active);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn activation_requires_tested() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();
        store.save_workflow(sample_workflow("wf3")).await.unwrap();
        assert!(!store.set_active("wf3", true).await.unwrap());
        store.set_tested("wf3", true).await.unwrap();
        assert!(store.set_active("wf3", true).await.unwrap());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn payload_ring_is_bounded_per_path() {
        let dir = temp_dir();
        let store = FileStore::new(&dir).unwrap();
        for i in 0..110 {
            store
                .append_webhook_payload(
                    "/api/webhooks/wh_x_y",
                    WebhookPayload {
                        data: json!({"i": i}),
                        headers: json!({}),
                        method: "POST".into(),
                        query_params: json!({}),
                        timestamp: OffsetDateTime::now_utc(),
                    },
                )
                .await;
        }
        let list = store.list_webhook_payloads("/api/webhooks/wh_x_y").await;
        assert_eq!(list.len(), MAX_PAYLOAD_RING);
        assert_eq!(list.last().unwrap().data, json!({"i": 109}));
        std::fs::remove_dir_all(&dir).ok();
    }
}
