use std::sync::Arc;

use reqwest::Client;

use crate::config::Config;
use crate::rendezvous::RendezvousTable;
use crate::store::Store;
use crate::streaming::StreamHub;

/// Single application context carrying the engine's explicit, lock-guarded
/// components — no process-global mutable singletons (spec.md §9 Design Notes).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub stream_hub: Arc<StreamHub>,
    pub rendezvous: Arc<RendezvousTable>,
    pub http_client: Arc<Client>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        AppState {
            store,
            stream_hub: Arc::new(StreamHub::new()),
            rendezvous: Arc::new(RendezvousTable::new()),
            http_client: Arc::new(Client::new()),
            config: Arc::new(config),
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::store::FileStore;
    use uuid::Uuid;

    pub fn build_test_state() -> AppState {
        let dir = std::env::temp_dir().join(format!("wf-state-test-{}", Uuid::new_v4()));
        let store: Arc<dyn Store> = Arc::new(FileStore::new(dir).expect("temp store"));
        AppState::new(
            store,
            Config {
                data_dir: "./data".into(),
                default_code_model: "javascript".into(),
                default_llm_model: "gpt-4o-mini".into(),
                default_llm_api_base: "https://api.openai.com/v1".into(),
                llm_api_key: None,
            },
        )
    }
}
