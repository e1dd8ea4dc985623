use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

/// One-shot signal + data slot per `(run_id, node_id)`, used to pause a test run
/// at a webhook node until a matching inbound request arrives (spec.md §3
/// "RendezvousTable", §4.1 step 3).
#[derive(Default)]
pub struct RendezvousTable {
    /// `path -> run_id`, published so WebhookIngress can find the waiting run.
    active_waiters: DashMap<String, Uuid>,
    /// `(run_id, node_id) -> sender half of the one-shot signal`.
    pending: DashMap<(Uuid, String), oneshot::Sender<Value>>,
}

pub const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(300);

impl RendezvousTable {
    pub fn new() -> Self {
        RendezvousTable {
            active_waiters: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    /// Installs a waiter slot and publishes `path` into `active_waiters`.
    /// Returns the receiver half the scheduler awaits with a timeout.
    pub fn install(&self, path: String, run_id: Uuid, node_id: String) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert((run_id, node_id), tx);
        self.active_waiters.insert(path, run_id);
        rx
    }

    /// Removes the waiter unconditionally. The scheduler calls this after the
    /// wait resolves (by signal or timeout) so re-entry cannot re-trigger
    /// (spec.md §3 invariant, §8 invariant 6).
    pub fn remove(&self, path: &str, run_id: Uuid, node_id: &str) {
        self.active_waiters.remove(path);
        self.pending.remove(&(run_id, node_id.to_string()));
    }

    pub fn run_id_for_path(&self, path: &str) -> Option<Uuid> {
        self.active_waiters.get(path).map(|e| *e.value())
    }

    /// Signals the waiter for `(run_id, node_id)` with `payload`, removing the
    /// `active_waiters` entry for `path` first (the "unregister-before-signal"
    /// invariant — spec.md §3, §5, §8 invariant 6). Returns `true` if a waiter
    /// was actually signaled.
    pub fn signal(&self, path: &str, run_id: Uuid, node_id: &str, payload: Value) -> bool {
        self.active_waiters.remove(path);
        match self.pending.remove(&(run_id, node_id.to_string())) {
            Some((_, tx)) => tx.send(payload).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn signal_delivers_payload_and_clears_waiter() {
        let table = RendezvousTable::new();
        let run_id = Uuid::new_v4();
        let path = "/api/webhooks/wh_w_n".to_string();
        let rx = table.install(path.clone(), run_id, "n".to_string());

        assert_eq!(table.run_id_for_path(&path), Some(run_id));
        assert!(table.signal(&path, run_id, "n", json!({"k": "v"})));
        assert_eq!(table.run_id_for_path(&path), None);

        let payload = rx.await.unwrap();
        assert_eq!(payload, json!({"k": "v"}));
    }

    #[tokio::test]
    async fn second_signal_to_same_path_is_a_no_op() {
        let table = RendezvousTable::new();
        let run_id = Uuid::new_v4();
        let path = "/api/webhooks/wh_w_n".to_string();
        let _rx = table.install(path.clone(), run_id, "n".to_string());
        assert!(table.signal(&path, run_id, "n", json!(1)));
        assert!(!table.signal(&path, run_id, "n", json!(2)));
    }
}
