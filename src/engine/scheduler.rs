use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::engine::executors::{self, ExecCtx};
use crate::engine::graph::Graph;
use crate::models::{LogEvent, LogStatus, Run, RunStatus, Workflow};
use crate::rendezvous::RENDEZVOUS_TIMEOUT;
use crate::state::AppState;

/// Last-resort guard against a cycle slipping past `processed` (spec.md §4.1,
/// §8 invariant 7).
const MAX_STEPS: usize = 100;

/// Starts a run as a detached task and returns its `run_id` immediately
/// (spec.md §4.1, §2 "Scheduler.Start"). The caller does not await completion;
/// progress is observed via the StreamHub channel or `Store.list_runs`.
pub fn start(state: Arc<AppState>, workflow: Workflow, is_test: bool, input_data: Value) -> Uuid {
    let run = Run::new(workflow.id.clone(), is_test);
    let run_id = run.run_id;
    state.stream_hub.create(run_id);

    tokio::spawn(async move {
        run_to_completion(state, workflow, run, input_data).await;
    });

    run_id
}

async fn run_to_completion(state: Arc<AppState>, workflow: Workflow, mut run: Run, input_data: Value) {
    emit(
        &state,
        &mut run,
        LogEvent::new(run.run_id, "Start", LogStatus::Success, run.is_test),
    );

    let status = execute(&state, &workflow, &mut run, input_data).await;
    run.status = Some(status);
    run.ended_at = Some(time::OffsetDateTime::now_utc());

    emit(
        &state,
        &mut run,
        LogEvent::new(
            run.run_id,
            format!("End {}", status.label()),
            status.log_status(),
            run.is_test,
        ),
    );
    emit(&state, &mut run, LogEvent::end_sentinel(run.run_id, run.is_test));
    // The channel itself is removed by the SSE endpoint once it drains
    // `__END__` or by disconnect, not by the scheduler (spec.md §4.5).

    if run.is_test {
        let _ = state.store.set_tested(&workflow.id, status.is_success()).await;
    }
    let _ = state.store.append_run(run).await;
}

async fn execute(state: &AppState, workflow: &Workflow, run: &mut Run, input_data: Value) -> RunStatus {
    let graph = Graph::from_workflow(workflow);
    let Some(start_id) = graph.select_start_node().map(str::to_string) else {
        emit(
            state,
            run,
            LogEvent::new(run.run_id, "Initialization Error", LogStatus::Failed, run.is_test)
                .with_error("no eligible start node in workflow graph"),
        );
        return RunStatus::Failed;
    };

    let mut queue: VecDeque<(String, Value)> = VecDeque::new();
    queue.push_back((start_id.clone(), input_data));

    let mut processed: HashSet<String> = HashSet::new();
    let mut start_visited = false;
    let mut run_outputs: HashMap<String, Value> = HashMap::new();
    let mut steps = 0usize;
    let mut had_failure = false;

    while let Some((node_id, input)) = queue.pop_front() {
        if node_id == start_id {
            if start_visited {
                log_cycle_skip(state, run, &node_id);
                continue;
            }
            start_visited = true;
        } else if processed.contains(&node_id) {
            log_cycle_skip(state, run, &node_id);
            continue;
        }
        processed.insert(node_id.clone());

        steps += 1;
        if steps > MAX_STEPS {
            emit(
                state,
                run,
                LogEvent::new(run.run_id, "Step Cap Exceeded", LogStatus::Failed, run.is_test)
                    .with_error(format!("execution exceeded the {MAX_STEPS}-step cap")),
            );
            return RunStatus::FinishedWithErrors;
        }

        if !state.stream_hub.exists(run.run_id) {
            run.logs.push(
                LogEvent::new(run.run_id, "Run Aborted", LogStatus::Aborted, run.is_test)
                    .for_node(node_id.clone(), ""),
            );
            return RunStatus::Aborted;
        }

        let Some(node) = graph.nodes.get(&node_id) else {
            continue;
        };

        emit(
            state,
            run,
            LogEvent::new(run.run_id, "Executing Node", LogStatus::Pending, run.is_test)
                .for_node(node.id.clone(), node.node_type.clone()),
        );

        let effective_input = match webhook_gate(state, run, workflow, node, input).await {
            Ok(input) => input,
            Err(status) => return status,
        };

        let ctx = ExecCtx {
            workflow,
            run_outputs: &run_outputs,
            state,
        };
        match executors::dispatch(node, effective_input.clone(), &ctx).await {
            Ok(output) => {
                run_outputs.insert(node.id.clone(), output.clone());
                emit(
                    state,
                    run,
                    LogEvent::new(run.run_id, "Finished Node", LogStatus::Success, run.is_test)
                        .for_node(node.id.clone(), node.node_type.clone())
                        .with_input_summary(effective_input)
                        .with_output_summary(output.clone()),
                );

                for edge in graph.outgoing(&node.id) {
                    queue.push_back((edge.target.clone(), output.clone()));
                }
            }
            Err(err) => {
                had_failure = true;
                emit(
                    state,
                    run,
                    LogEvent::new(run.run_id, "Finished Node", LogStatus::Failed, run.is_test)
                        .for_node(node.id.clone(), node.node_type.clone())
                        .with_input_summary(effective_input)
                        .with_error(err.message()),
                );
                break;
            }
        }
    }

    if had_failure {
        RunStatus::FinishedWithErrors
    } else {
        RunStatus::Success
    }
}

/// Test-mode webhook rendezvous (spec.md §4.1 step 3). Returns the payload to
/// use as the node's effective input, or the terminal status if the wait
/// times out.
async fn webhook_gate(
    state: &AppState,
    run: &mut Run,
    workflow: &Workflow,
    node: &crate::models::Node,
    fallback_input: Value,
) -> Result<Value, RunStatus> {
    if !(run.is_test && node.is_webhook_wait()) {
        return Ok(fallback_input);
    }

    let path = format!("/api/webhooks/wh_{}_{}", workflow.id, node.id);
    let rx = state.rendezvous.install(path.clone(), run.run_id, node.id.clone());
    emit(
        state,
        run,
        LogEvent::new(run.run_id, "Waiting for Webhook", LogStatus::Waiting, run.is_test)
            .for_node(node.id.clone(), node.node_type.clone())
            .with_message(format!("waiting for inbound request at {path}")),
    );

    match tokio::time::timeout(RENDEZVOUS_TIMEOUT, rx).await {
        Ok(Ok(payload)) => {
            state.rendezvous.remove(&path, run.run_id, &node.id);
            emit(
                state,
                run,
                LogEvent::new(run.run_id, "Webhook Triggered", LogStatus::Triggered, run.is_test)
                    .for_node(node.id.clone(), node.node_type.clone()),
            );
            Ok(payload)
        }
        Ok(Err(_)) | Err(_) => {
            state.rendezvous.remove(&path, run.run_id, &node.id);
            emit(
                state,
                run,
                LogEvent::new(run.run_id, "Test Webhook Timeout", LogStatus::Failed, run.is_test)
                    .for_node(node.id.clone(), node.node_type.clone())
                    .with_error(format!("timed out waiting for {path}")),
            );
            Err(RunStatus::FinishedWithErrors)
        }
    }
}

fn log_cycle_skip(state: &AppState, run: &mut Run, node_id: &str) {
    emit(
        state,
        run,
        LogEvent::new(run.run_id, "Cycle Skipped", LogStatus::Unknown, run.is_test)
            .for_node(node_id.to_string(), "")
            .with_message(format!("node {node_id} already processed in this run, skipping")),
    );
}

fn emit(state: &AppState, run: &mut Run, event: LogEvent) {
    state.stream_hub.publish(run.run_id, event.clone());
    run.logs.push(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edge, Node};
    use serde_json::json;
    use std::time::Duration;

    fn node(id: &str, ty: &str) -> Node {
        Node {
            id: id.into(),
            node_type: ty.into(),
            position: Value::Null,
            data: json!({}),
        }
    }

    fn edge(source: &str, target: &str) -> Edge {
        Edge {
            id: format!("{source}-{target}"),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
        }
    }

    /// Polls the store until the run task has appended its result, then
    /// returns the recorded log step names in order.
    async fn drain(state: &AppState, _run_id: Uuid) -> Vec<String> {
        for _ in 0..200 {
            let runs = state.store.list_runs("w", 10).await;
            if let Some(run) = runs.first() {
                if run.ended_at.is_some() {
                    return run.logs.iter().map(|l| l.step.clone()).collect();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run did not complete in time");
    }

    #[tokio::test]
    async fn linear_run_emits_expected_sequence_and_succeeds() {
        let state = Arc::new(crate::state::tests::build_test_state());
        let workflow = Workflow {
            id: "w".into(),
            name: "w".into(),
            nodes: vec![node("a", "input"), node("b", "default")],
            edges: vec![edge("a", "b")],
            metadata: Value::Null,
            is_active: false,
            tested: false,
            last_tested: None,
        };

        let run_id = start(state.clone(), workflow, false, json!({"x": 1}));
        let steps = drain(&state, run_id).await;

        assert_eq!(steps.first(), Some(&"Start".to_string()));
        assert!(steps.contains(&"Executing Node".to_string()));
        assert!(steps.contains(&"Finished Node".to_string()));
        assert_eq!(steps[steps.len() - 2], "End Success");
        assert_eq!(steps.last(), Some(&"__END__".to_string()));
    }

    #[tokio::test]
    async fn fail_fast_stops_before_successor() {
        let state = Arc::new(crate::state::tests::build_test_state());
        let workflow = Workflow {
            id: "w".into(),
            name: "w".into(),
            nodes: vec![
                node("a", "input"),
                node("b", "code"),
                node("c", "default"),
            ],
            edges: vec![edge("a", "b"), edge("b", "c")],
            metadata: Value::Null,
            is_active: false,
            tested: false,
            last_tested: None,
        };
        // "b" has no `code` param, so the executor returns a validation error.
        let run_id = start(state.clone(), workflow, false, Value::Null);
        drain(&state, run_id).await;

        let runs = state.store.list_runs("w", 10).await;
        let run = runs.first().unwrap();
        assert_eq!(run.status, Some(RunStatus::FinishedWithErrors));
        let node_ids: Vec<_> = run
            .logs
            .iter()
            .filter_map(|l| l.node_id.clone())
            .collect();
        assert!(!node_ids.contains(&"c".to_string()));
    }
}
