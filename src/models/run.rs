use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Success,
    #[serde(rename = "Finished with Errors")]
    FinishedWithErrors,
    #[serde(rename = "Aborted (Client Disconnected)")]
    Aborted,
    Failed,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Success)
    }

    /// Matches the `serde` rename strings, used to build the terminal
    /// `End <status>` log step name (spec.md §4.1 "Terminal logging").
    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Success => "Success",
            RunStatus::FinishedWithErrors => "Finished with Errors",
            RunStatus::Aborted => "Aborted (Client Disconnected)",
            RunStatus::Failed => "Failed",
        }
    }

    /// The `LogStatus` counterpart used on the terminal event.
    pub fn log_status(&self) -> LogStatus {
        match self {
            RunStatus::Success => LogStatus::Success,
            RunStatus::FinishedWithErrors => LogStatus::Failed,
            RunStatus::Aborted => LogStatus::Aborted,
            RunStatus::Failed => LogStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStatus {
    Pending,
    Waiting,
    Triggered,
    Success,
    Failed,
    Aborted,
    Unknown,
    Configured,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub step: String,
    pub run_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    pub status: LogStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub is_test_log: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_summary: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_summary: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LogEvent {
    pub fn new(run_id: Uuid, step: impl Into<String>, status: LogStatus, is_test_log: bool) -> Self {
        LogEvent {
            step: step.into(),
            run_id,
            node_id: None,
            node_type: None,
            status,
            timestamp: OffsetDateTime::now_utc(),
            is_test_log,
            input_summary: None,
            output_summary: None,
            error: None,
            message: None,
        }
    }

    pub fn for_node(mut self, node_id: impl Into<String>, node_type: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self.node_type = Some(node_type.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_input_summary(mut self, value: Value) -> Self {
        self.input_summary = Some(value);
        self
    }

    pub fn with_output_summary(mut self, value: Value) -> Self {
        self.output_summary = Some(value);
        self
    }

    /// Sentinel marking the strict final event of a run (spec.md §4.5, §8 invariant 1).
    pub fn end_sentinel(run_id: Uuid, is_test_log: bool) -> Self {
        LogEvent::new(run_id, "__END__", LogStatus::Unknown, is_test_log)
    }

    pub fn is_end(&self) -> bool {
        self.step == "__END__"
    }
}

/// A completed or in-flight run's historical record, as kept by the Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub is_test: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    pub logs: Vec<LogEvent>,
    #[serde(default)]
    pub status: Option<RunStatus>,
}

impl Run {
    pub fn new(workflow_id: impl Into<String>, is_test: bool) -> Self {
        Run {
            run_id: Uuid::new_v4(),
            workflow_id: workflow_id.into(),
            is_test,
            started_at: OffsetDateTime::now_utc(),
            ended_at: None,
            logs: Vec::new(),
            status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_sentinel_is_recognized() {
        let run_id = Uuid::new_v4();
        let ev = LogEvent::end_sentinel(run_id, false);
        assert!(ev.is_end());
        assert_eq!(ev.run_id, run_id);
    }
}
