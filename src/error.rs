use thiserror::Error;

/// Raised by a `NodeExecutor`; caught at the scheduler's per-step boundary and
/// converted into a Failed `LogEvent` (spec.md §7). Never escapes the run task.
#[derive(Debug, Error, Clone)]
pub enum ExecutorError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("authentication error: {0}")]
    Authentication(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("sandbox error: {0}")]
    Sandbox(String),
}

impl ExecutorError {
    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no eligible start node in workflow graph")]
    NoStartNode,
    #[error("workflow graph is invalid: {0}")]
    InvalidGraph(String),
    #[error("execution exceeded the {0}-step cap")]
    StepCapExceeded(usize),
    #[error("timed out waiting for test webhook at {0}")]
    RendezvousTimeout(String),
    #[error("client disconnected")]
    Aborted,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("workflow not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("unknown webhook segment: {0}")]
    UnknownSegment(String),
    #[error("no matching webhook node for workflow {workflow_id} node {node_id}")]
    NoMatchingNode { workflow_id: String, node_id: String },
}
