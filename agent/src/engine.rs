//! Workflow engine: drives a runbook's ordered steps against the cluster.
//!
//! Control flow is owned entirely by the runbook. Gates are pure lookups over
//! earlier results, the adjudicator only contributes arguments, and a failed
//! step never aborts the workflow — later diagnostics may still be useful.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::cluster::ClusterOps;
use crate::error::AgentError;
use crate::llm::Llm;
use crate::metrics;
use crate::models::{
    AgentMode, Alert, ExecutionState, LlmCall, LlmCallKind, StepTrace,
};
use crate::runbook::{Runbook, Step};
use crate::tools::{self, StepContext, ToolName};

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

/// Returns the first failing gate, rendered for the step trace. A missing
/// alias evaluates to false.
fn gate_block_reason(step: &Step, state: &ExecutionState) -> Option<String> {
    for gate in &step.gates {
        let pass = state
            .tool_results
            .get(&gate.alias)
            .and_then(|r| r.field(&gate.field))
            .map(truthy)
            .unwrap_or(false);
        if !pass {
            return Some(format!("gate false: {}", gate));
        }
    }
    None
}

/// Adjudicated arguments overlay the label-derived defaults; empty or null
/// values never shadow a default.
fn merge_args(defaults: Value, provided: Value) -> Value {
    let Value::Object(mut base) = defaults else {
        return provided;
    };
    if let Value::Object(overlay) = provided {
        for (key, value) in overlay {
            match &value {
                Value::Null => {}
                Value::String(s) if s.is_empty() => {}
                _ => {
                    base.insert(key, value);
                }
            }
        }
    }
    Value::Object(base)
}

/// Asks the adjudicator for the step's arguments, enforcing tool identity.
/// Any deviation or failure falls back to label-derived defaults.
async fn adjudicated_args(
    llm: &dyn Llm,
    state: &mut ExecutionState,
    tool: ToolName,
) -> Value {
    let defaults = tools::default_args(tool, &state.alert);
    match llm.adjudicate(&state.alert, &state.tool_results, tool).await {
        Ok(call) if call.name == tool.wire_name() => {
            state.llm_trace.push(LlmCall {
                kind: LlmCallKind::Adjudicate,
                expected_tool: Some(tool.wire_name().to_string()),
                returned_tool: Some(call.name),
                detail: None,
            });
            merge_args(defaults, call.arguments)
        }
        Ok(call) => {
            let rejected = AgentError::ToolNotAllowed {
                expected: tool.wire_name().to_string(),
                got: call.name.clone(),
            };
            tracing::warn!(
                expected = tool.wire_name(),
                returned = call.name.as_str(),
                "adjudicator returned a different tool; substituting direct call"
            );
            metrics::llm_override();
            state.llm_trace.push(LlmCall {
                kind: LlmCallKind::LlmOverride,
                expected_tool: Some(tool.wire_name().to_string()),
                returned_tool: Some(call.name),
                detail: Some(rejected.to_string()),
            });
            defaults
        }
        Err(e) => {
            tracing::warn!(
                expected = tool.wire_name(),
                error = %e,
                "adjudicator failed; invoking tool directly"
            );
            metrics::llm_error();
            state.llm_trace.push(LlmCall {
                kind: LlmCallKind::LlmError,
                expected_tool: Some(tool.wire_name().to_string()),
                returned_tool: None,
                detail: Some(e.to_string()),
            });
            defaults
        }
    }
}

/// Runs one runbook workflow to completion and returns the final state.
/// Never fails: every tool-level problem is folded into the state.
pub async fn run_workflow(
    cluster: &dyn ClusterOps,
    llm: &dyn Llm,
    runbook: &Runbook,
    alert: Alert,
    mode: AgentMode,
    cancel: &CancellationToken,
) -> ExecutionState {
    let mut state = ExecutionState::new(alert, mode);

    for step in &runbook.workflow {
        // In-flight tool calls are allowed to finish; new steps are not
        // started once the request scope is gone.
        if cancel.is_cancelled() {
            state.action_error = Some(AgentError::Cancelled.to_string());
            break;
        }

        if let Some(reason) = gate_block_reason(step, &state) {
            tracing::debug!(
                runbook = runbook.id.as_str(),
                action = step.action_id.as_str(),
                reason = reason.as_str(),
                "step gated out"
            );
            state.rb_steps.push(StepTrace {
                action_id: step.action_id.clone(),
                tool_name: step.tool.wire_name().to_string(),
                inputs: Value::Null,
                result: None,
                gated_out: true,
                reason: Some(reason),
            });
            continue;
        }

        let tool = step.tool;
        let inputs = adjudicated_args(llm, &mut state, tool).await;
        let ctx = StepContext {
            alert: &state.alert,
            mode,
            runbook,
        };
        let outcome = tools::execute(tool, cluster, &ctx, &inputs).await;
        metrics::tool_executed(tool.wire_name(), outcome.record.ok);

        state.rb_steps.push(StepTrace {
            action_id: step.action_id.clone(),
            tool_name: tool.wire_name().to_string(),
            inputs,
            result: Some(outcome.record.clone()),
            gated_out: false,
            reason: None,
        });
        state
            .tool_results
            .insert(tool.alias().to_string(), outcome.record.clone());

        if outcome.record.ok {
            if tool.is_mutating()
                && let Some(action) = outcome.action
            {
                match mode {
                    AgentMode::Auto => state.action_taken = Some(action),
                    AgentMode::Recommend => state.action_recommended = Some(action),
                }
            }
        } else if let Some(error) = &outcome.record.error {
            state.action_error = Some(error.clone());
        }
    }

    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RunbookId;
    use crate::runbook::Runbook;
    use crate::test_support::{
        MockCluster, MockLlm, deployment_with, node_with_conditions, owned_by, plain_alert,
        pod_waiting, pod_with_oom_exit,
    };

    const FALLBACK: &str = "us-docker.pkg.dev/google-samples/containers/gke/hello-app:1.0";

    fn imagepull_runbook() -> Runbook {
        Runbook::parse(&format!(
            r#"---
runbook_id: RB_IMAGEPULL
alertname: KubePodImagePullBackOff
fallback_image: {}
workflow:
  - action_id: get_pod_events
  - action_id: check_imagepullbackoff
  - action_id: get_runbook
  - action_id: patch_image
    when: imagepull.imagepull_detected
---
"#,
            FALLBACK
        ))
        .unwrap()
    }

    fn oom_runbook() -> Runbook {
        Runbook::parse(
            r#"---
runbook_id: RB_OOM
alertname: KubePodOOMKilled
workflow:
  - action_id: get_pod_events
  - action_id: check_oom
  - action_id: increase_memory_limit
    when: oom.oom_detected
---
"#,
        )
        .unwrap()
    }

    fn node_unschedulable_runbook() -> Runbook {
        Runbook::parse(
            r#"---
runbook_id: RB_NODE_UNSCHEDULABLE
alertname: KubeNodeUnschedulable
workflow:
  - action_id: get_node_ready
  - action_id: get_node_conditions
  - action_id: uncordon_node
    when_all:
      - node_ready.unschedulable
      - node_conditions.healthy
---
"#,
        )
        .unwrap()
    }

    fn imagepull_cluster() -> MockCluster {
        let pod = owned_by(
            pod_waiting("demo", "app-x", "app", "ImagePullBackOff", "pull failed"),
            "ReplicaSet",
            "app-deployment-7d9f",
        );
        MockCluster::new()
            .with_pod(pod)
            .with_replicaset("demo", "app-deployment-7d9f", Some("app-deployment"))
            .with_deployment(deployment_with(
                "demo",
                "app-deployment",
                &[("app", None, "bad:tag")],
            ))
    }

    fn pod_alert(alertname: &str) -> Alert {
        plain_alert(
            alertname,
            &[
                ("namespace", "demo"),
                ("pod", "app-x"),
                ("container", "app"),
            ],
        )
    }

    #[tokio::test]
    async fn imagepull_auto_patches_the_deployment_once() {
        let cluster = imagepull_cluster();
        let llm = MockLlm::echo();
        let state = run_workflow(
            &cluster,
            &llm,
            &imagepull_runbook(),
            pod_alert("KubePodImagePullBackOff"),
            AgentMode::Auto,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(
            state.action_taken.as_deref(),
            Some("patch_image:demo/app-deployment/app:us-docker.pkg.dev/google-samples/containers/gke/hello-app:1.0")
        );
        assert!(state.action_recommended.is_none());
        assert!(state.action_error.is_none());
        assert_eq!(state.rb_steps.len(), 4);
        assert_eq!(
            cluster.mutations(),
            vec![format!("patch_image:demo/app-deployment/app:{}", FALLBACK)]
        );
        assert!(state.tool_results.contains_key("imagepull"));
        assert!(state.tool_results.contains_key("patch_image"));
    }

    #[tokio::test]
    async fn recommend_mode_issues_no_mutations() {
        let cluster = imagepull_cluster();
        let llm = MockLlm::echo();
        let state = run_workflow(
            &cluster,
            &llm,
            &imagepull_runbook(),
            pod_alert("KubePodImagePullBackOff"),
            AgentMode::Recommend,
            &CancellationToken::new(),
        )
        .await;

        assert!(state.action_taken.is_none());
        assert_eq!(
            state.action_recommended.as_deref(),
            Some("patch_image:demo/app-deployment/app:us-docker.pkg.dev/google-samples/containers/gke/hello-app:1.0")
        );
        assert!(cluster.mutations().is_empty());
    }

    #[tokio::test]
    async fn oom_workflow_doubles_the_memory_limit() {
        let pod = owned_by(
            pod_with_oom_exit("demo", "app-x", "app", 137),
            "ReplicaSet",
            "app-deployment-7d9f",
        );
        let cluster = MockCluster::new()
            .with_pod(pod)
            .with_replicaset("demo", "app-deployment-7d9f", Some("app-deployment"))
            .with_deployment(deployment_with(
                "demo",
                "app-deployment",
                &[("app", Some("128Mi"), "img")],
            ));
        let llm = MockLlm::echo();
        let state = run_workflow(
            &cluster,
            &llm,
            &oom_runbook(),
            pod_alert("KubePodOOMKilled"),
            AgentMode::Auto,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(
            state.action_taken.as_deref(),
            Some("patch_memory_limit:demo/app-deployment/app:128Mi→256Mi")
        );
        assert_eq!(
            cluster.mutations(),
            vec!["patch_memory:demo/app-deployment/app:256Mi"]
        );
    }

    #[tokio::test]
    async fn pressured_node_gates_out_uncordon() {
        let cluster = MockCluster::new().with_node(node_with_conditions(
            "node-a",
            true,
            true,
            &[("MemoryPressure", "True")],
        ));
        let llm = MockLlm::echo();
        let alert = plain_alert("KubeNodeUnschedulable", &[("node", "node-a")]);
        let state = run_workflow(
            &cluster,
            &llm,
            &node_unschedulable_runbook(),
            alert,
            AgentMode::Auto,
            &CancellationToken::new(),
        )
        .await;

        assert!(state.action_taken.is_none());
        assert!(state.action_recommended.is_none());
        assert!(cluster.mutations().is_empty());
        let gated = &state.rb_steps[2];
        assert!(gated.gated_out);
        assert_eq!(
            gated.reason.as_deref(),
            Some("gate false: node_conditions.healthy")
        );
    }

    #[tokio::test]
    async fn healthy_cordoned_node_is_uncordoned() {
        let cluster = MockCluster::new().with_node(node_with_conditions(
            "node-a",
            true,
            true,
            &[("MemoryPressure", "False")],
        ));
        let llm = MockLlm::echo();
        let alert = plain_alert("KubeNodeUnschedulable", &[("node", "node-a")]);
        let state = run_workflow(
            &cluster,
            &llm,
            &node_unschedulable_runbook(),
            alert,
            AgentMode::Auto,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(state.action_taken.as_deref(), Some("uncordon_node:node-a"));
        assert_eq!(cluster.mutations(), vec!["uncordon:node-a"]);
    }

    #[tokio::test]
    async fn wrong_tool_from_llm_is_overridden() {
        let cluster = imagepull_cluster();
        let llm = MockLlm::wrong_tool("delete_pod");
        let state = run_workflow(
            &cluster,
            &llm,
            &imagepull_runbook(),
            pod_alert("KubePodImagePullBackOff"),
            AgentMode::Auto,
            &CancellationToken::new(),
        )
        .await;

        // The expected tool still ran; nothing was deleted.
        assert_eq!(
            cluster.mutations(),
            vec![format!("patch_image:demo/app-deployment/app:{}", FALLBACK)]
        );
        assert!(
            state
                .llm_trace
                .iter()
                .any(|c| c.kind == LlmCallKind::LlmOverride)
        );
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_label_arguments() {
        let cluster = imagepull_cluster();
        let llm = MockLlm::failing();
        let state = run_workflow(
            &cluster,
            &llm,
            &imagepull_runbook(),
            pod_alert("KubePodImagePullBackOff"),
            AgentMode::Auto,
            &CancellationToken::new(),
        )
        .await;

        assert!(state.action_taken.is_some());
        assert!(
            state
                .llm_trace
                .iter()
                .all(|c| c.kind == LlmCallKind::LlmError)
        );
    }

    #[tokio::test]
    async fn missing_alias_gates_a_step_out() {
        let runbook = Runbook::parse(
            r#"---
runbook_id: RB_IMAGEPULL
fallback_image: good:1.0
workflow:
  - action_id: patch_image
    when: imagepull.imagepull_detected
---
"#,
        )
        .unwrap();
        let cluster = imagepull_cluster();
        let llm = MockLlm::echo();
        let state = run_workflow(
            &cluster,
            &llm,
            &runbook,
            pod_alert("KubePodImagePullBackOff"),
            AgentMode::Auto,
            &CancellationToken::new(),
        )
        .await;

        assert!(state.rb_steps[0].gated_out);
        assert!(cluster.mutations().is_empty());
    }

    #[tokio::test]
    async fn failed_diagnostic_does_not_abort_the_workflow() {
        let pod = owned_by(
            pod_with_oom_exit("demo", "app-x", "app", 137),
            "ReplicaSet",
            "app-deployment-7d9f",
        );
        let cluster = MockCluster::new()
            .with_pod(pod)
            .with_failing_events("demo", "app-x")
            .with_replicaset("demo", "app-deployment-7d9f", Some("app-deployment"))
            .with_deployment(deployment_with(
                "demo",
                "app-deployment",
                &[("app", Some("128Mi"), "img")],
            ));
        let llm = MockLlm::echo();
        let state = run_workflow(
            &cluster,
            &llm,
            &oom_runbook(),
            pod_alert("KubePodOOMKilled"),
            AgentMode::Auto,
            &CancellationToken::new(),
        )
        .await;

        let first = state.rb_steps[0].result.as_ref().unwrap();
        assert!(!first.ok);
        // Later steps still ran and the remediation still landed.
        assert_eq!(
            state.action_taken.as_deref(),
            Some("patch_memory_limit:demo/app-deployment/app:128Mi→256Mi")
        );
    }

    #[tokio::test]
    async fn request_drop_mid_workflow_finishes_the_step_but_starts_no_more() {
        let cluster = imagepull_cluster();
        let cancel = CancellationToken::new();
        // The scope is cancelled while step 1 is adjudicating, the way a
        // dropped webhook request fires its guard mid-workflow.
        let llm = MockLlm::cancelling_during(1, cancel.clone());
        let state = run_workflow(
            &cluster,
            &llm,
            &imagepull_runbook(),
            pod_alert("KubePodImagePullBackOff"),
            AgentMode::Auto,
            &cancel,
        )
        .await;

        // The in-flight step ran to completion; nothing after it started.
        assert_eq!(state.rb_steps.len(), 1);
        assert!(!state.rb_steps[0].gated_out);
        assert_eq!(state.action_error.as_deref(), Some("cancelled"));
        assert!(cluster.mutations().is_empty());
    }

    #[tokio::test]
    async fn cancelled_scope_stops_before_the_first_step() {
        let cluster = imagepull_cluster();
        let llm = MockLlm::echo();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let state = run_workflow(
            &cluster,
            &llm,
            &imagepull_runbook(),
            pod_alert("KubePodImagePullBackOff"),
            AgentMode::Auto,
            &cancel,
        )
        .await;

        assert!(state.rb_steps.is_empty());
        assert_eq!(state.action_error.as_deref(), Some("cancelled"));
        assert!(cluster.mutations().is_empty());
    }

    #[test]
    fn truthiness_table() {
        use serde_json::json;
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(false)));
        assert!(truthy(&json!(true)));
        assert!(!truthy(&json!(0)));
        assert!(truthy(&json!(2)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!("x")));
        assert!(!truthy(&json!([])));
        assert!(truthy(&json!([1])));
        assert!(truthy(&json!({})));
    }

    #[test]
    fn merge_prefers_non_empty_overrides() {
        use serde_json::json;
        let merged = merge_args(
            json!({"namespace": "demo", "pod": "app-x"}),
            json!({"pod": "other", "container": "", "extra": null}),
        );
        assert_eq!(merged, json!({"namespace": "demo", "pod": "other"}));
    }
}
