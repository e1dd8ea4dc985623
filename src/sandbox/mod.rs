use std::time::Duration;

use boa_engine::context::Context as JsContext;
use boa_engine::Source;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

/// Wall-clock default for a `code` node invocation (spec.md §4.2, §5).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// `{status, result?, error?, error_type?}` — the Sandbox's only output shape.
/// Construction never panics; every failure mode collapses into `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxResult {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl SandboxResult {
    pub fn ok(result: Value) -> Self {
        SandboxResult {
            status: "success".into(),
            result: Some(result),
            error: None,
            error_type: None,
        }
    }

    pub fn err(error: impl Into<String>, error_type: impl Into<String>) -> Self {
        SandboxResult {
            status: "error".into(),
            result: None,
            error: Some(error.into()),
            error_type: Some(error_type.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Executes `source`'s `execute(input)` entry point inside an isolated
/// `boa_engine` realm, bounded by `timeout` (spec.md §4.3).
///
/// The realm runs on a dedicated blocking thread so the timeout can be
/// enforced with `tokio::time::timeout` without starving the runtime —
/// substituting an isolated JS realm per invocation for the reference
/// design's per-invocation OS process (spec.md §4.3 allows an equivalent
/// design). A timed-out evaluation is abandoned on its thread; boa has no
/// cooperative interrupt hook to stop it early.
pub async fn execute(source: String, input: Value, timeout: Duration) -> SandboxResult {
    let (tx, rx) = oneshot::channel();
    tokio::task::spawn_blocking(move || {
        let result = run_in_realm(&source, &input);
        let _ = tx.send(result);
    });

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => SandboxResult::err("sandbox thread panicked", "SandboxError"),
        Err(_) => SandboxResult::err(
            format!("execution exceeded the {}s timeout", timeout.as_secs()),
            "TimeoutError",
        ),
    }
}

fn run_in_realm(source: &str, input: &Value) -> SandboxResult {
    let input_literal = match serde_json::to_string(input) {
        Ok(s) => s,
        Err(e) => return SandboxResult::err(format!("failed to serialize input: {e}"), "ValidationError"),
    };

    let wrapped = wrap_source(source);
    let script = format!(
        "{wrapped}\n(function() {{\n  try {{\n    const __input = JSON.parse({input_literal});\n    const __result = execute(__input);\n    return JSON.stringify({{status: \"success\", result: __result}});\n  }} catch (e) {{\n    return JSON.stringify({{status: \"error\", error: (e && e.message) ? e.message : String(e), error_type: (e && e.name) ? e.name : \"RuntimeError\"}});\n  }}\n}})();",
    );

    let mut ctx = JsContext::default();
    let evaluated = match ctx.eval(Source::from_bytes(script.as_bytes())) {
        Ok(v) => v,
        Err(e) => return SandboxResult::err(format_js_error(e), "SandboxError"),
    };

    let envelope_json = match evaluated.to_string(&mut ctx) {
        Ok(s) => match s.to_std_string() {
            Ok(s) => s,
            Err(_) => return SandboxResult::err("sandbox produced non-UTF8 output", "SandboxError"),
        },
        Err(e) => return SandboxResult::err(format_js_error(e), "SandboxError"),
    };

    match serde_json::from_str::<SandboxResult>(&envelope_json) {
        Ok(result) => result,
        Err(e) => SandboxResult::err(format!("malformed sandbox output: {e}"), "SandboxError"),
    }
}

/// Wraps bare snippets in `function execute(input) { ... }`; source that
/// already defines `execute` at the top level is used unchanged.
fn wrap_source(source: &str) -> String {
    let trimmed = source.trim();
    if defines_execute(trimmed) {
        trimmed.to_string()
    } else {
        format!("function execute(input) {{\n{trimmed}\n}}")
    }
}

fn defines_execute(source: &str) -> bool {
    source.contains("function execute")
        || source.contains("execute =")
        || source.contains("execute=")
        || source.contains("const execute")
        || source.contains("let execute")
}

fn format_js_error(err: boa_engine::JsError) -> String {
    let message = err.to_string();
    if message.trim().is_empty() {
        "JavaScript execution error".to_string()
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn bare_snippet_is_wrapped_and_returns_result() {
        let result = execute(
            "return {sum: input.a + input.b};".into(),
            json!({"a": 5, "b": 10}),
            Duration::from_secs(5),
        )
        .await;
        assert!(result.is_success());
        assert_eq!(result.result, Some(json!({"sum": 15})));
    }

    #[tokio::test]
    async fn explicit_execute_function_is_used_as_is() {
        let result = execute(
            "function execute(input) { return input.x * 2; }".into(),
            json!({"x": 21}),
            Duration::from_secs(5),
        )
        .await;
        assert!(result.is_success());
        assert_eq!(result.result, Some(json!(42)));
    }

    #[tokio::test]
    async fn runtime_error_is_captured_not_propagated() {
        let result = execute(
            "return input.a.nonexistent.deeper;".into(),
            json!({"a": {}}),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(result.status, "error");
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn snippet_with_no_explicit_return_yields_null_result() {
        let result = execute("const x = 1;".into(), json!({}), Duration::from_secs(5)).await;
        assert!(result.is_success());
        assert_eq!(result.result, None);
    }
}
