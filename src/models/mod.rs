pub mod run;
pub mod webhook;
pub mod workflow;

pub use run::{LogEvent, LogStatus, Run, RunStatus};
pub use webhook::{WebhookPayload, WebhookRegistryEntry};
pub use workflow::{Edge, Node, Workflow};
