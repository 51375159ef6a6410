//! Read-only diagnostic tools. Safe to run in either agent mode.

use k8s_openapi::api::core::v1::Pod;
use serde_json::json;

use crate::cluster::{ClusterOps, PodEvent};
use crate::tools::{StepContext, ToolOutcome};
use crate::models::ResultRecord;

const IMAGEPULL_WAIT_REASONS: &[&str] = &["ImagePullBackOff", "ErrImagePull"];
const OOM_EXIT_CODE: i32 = 137;

fn event_hints_imagepull(e: &PodEvent) -> bool {
    IMAGEPULL_WAIT_REASONS.contains(&e.reason.as_str())
        || (matches!(e.reason.as_str(), "Failed" | "BackOff")
            && (e.message.contains("pull") || e.message.contains("image")))
}

fn event_hints_oom(e: &PodEvent) -> bool {
    e.reason.contains("OOMKill") || e.message.contains("OOMKilled")
}

fn event_hints_sandbox(e: &PodEvent) -> bool {
    e.reason == "FailedCreatePodSandBox" || e.message.to_lowercase().contains("sandbox")
}

pub async fn get_pod_events(cluster: &dyn ClusterOps, namespace: &str, pod: &str) -> ToolOutcome {
    let events = match cluster.pod_events(namespace, pod).await {
        Ok(events) => events,
        Err(e) => return ToolOutcome::failed(e.to_string()),
    };
    let oom_detected = events.iter().any(event_hints_oom);
    let sandbox_failure_detected = events.iter().any(event_hints_sandbox);
    let imagepull_hint = events.iter().any(event_hints_imagepull);
    ToolOutcome::diagnostic(ResultRecord::success(json!({
        "events": events,
        "oom_detected": oom_detected,
        "sandbox_failure_detected": sandbox_failure_detected,
        "imagepull_hint": imagepull_hint,
    })))
}

fn waiting_reasons(pod: &Pod) -> Vec<(String, String, String)> {
    let mut out = Vec::new();
    if let Some(status) = &pod.status
        && let Some(statuses) = &status.container_statuses
    {
        for cs in statuses {
            if let Some(state) = &cs.state
                && let Some(waiting) = &state.waiting
            {
                out.push((
                    cs.name.clone(),
                    waiting.reason.clone().unwrap_or_default(),
                    waiting.message.clone().unwrap_or_default(),
                ));
            }
        }
    }
    out
}

pub async fn check_imagepullbackoff(
    cluster: &dyn ClusterOps,
    namespace: &str,
    pod: &str,
) -> ToolOutcome {
    let pod_obj = match cluster.get_pod(namespace, pod).await {
        Ok(p) => p,
        Err(e) => return ToolOutcome::failed(e.to_string()),
    };
    let mut reasons = Vec::new();
    for (container, reason, message) in waiting_reasons(&pod_obj) {
        if IMAGEPULL_WAIT_REASONS.contains(&reason.as_str()) {
            reasons.push(format!("container {} waiting: {}: {}", container, reason, message));
        }
    }
    // The event stream catches pulls that already backed off out of waiting.
    if let Ok(events) = cluster.pod_events(namespace, pod).await {
        for e in events.iter().filter(|e| event_hints_imagepull(e)) {
            reasons.push(format!("event {}: {}", e.reason, e.message));
        }
    }
    ToolOutcome::diagnostic(ResultRecord::success(json!({
        "imagepull_detected": !reasons.is_empty(),
        "reasons": reasons,
    })))
}

pub async fn check_oom(cluster: &dyn ClusterOps, namespace: &str, pod: &str) -> ToolOutcome {
    let pod_obj = match cluster.get_pod(namespace, pod).await {
        Ok(p) => p,
        Err(e) => return ToolOutcome::failed(e.to_string()),
    };
    let mut reasons = Vec::new();
    if let Some(status) = &pod_obj.status
        && let Some(statuses) = &status.container_statuses
    {
        for cs in statuses {
            if let Some(last) = &cs.last_state
                && let Some(term) = &last.terminated
            {
                let reason = term.reason.clone().unwrap_or_default();
                if reason == "OOMKilled" || term.exit_code == OOM_EXIT_CODE {
                    reasons.push(format!(
                        "container {} last terminated: {} (exit {})",
                        cs.name, reason, term.exit_code
                    ));
                }
            }
        }
    }
    if let Ok(events) = cluster.pod_events(namespace, pod).await {
        for e in events.iter().filter(|e| event_hints_oom(e)) {
            reasons.push(format!("event {}: {}", e.reason, e.message));
        }
    }
    ToolOutcome::diagnostic(ResultRecord::success(json!({
        "oom_detected": !reasons.is_empty(),
        "reasons": reasons,
    })))
}

pub async fn get_node_ready(cluster: &dyn ClusterOps, node: &str) -> ToolOutcome {
    let node_obj = match cluster.get_node(node).await {
        Ok(n) => n,
        Err(e) => return ToolOutcome::failed(e.to_string()),
    };
    let ready = node_obj
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false);
    let unschedulable = node_obj
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false);
    ToolOutcome::diagnostic(ResultRecord::success(json!({
        "ready": ready,
        "not_ready": !ready,
        "unschedulable": unschedulable,
    })))
}

/// Pressure and availability conditions are benign at "False"; everything
/// else on a non-Ready condition counts as a problem.
pub async fn get_node_conditions(cluster: &dyn ClusterOps, node: &str) -> ToolOutcome {
    let node_obj = match cluster.get_node(node).await {
        Ok(n) => n,
        Err(e) => return ToolOutcome::failed(e.to_string()),
    };
    let conds = node_obj
        .status
        .as_ref()
        .and_then(|s| s.conditions.clone())
        .unwrap_or_default();
    let mut problems = Vec::new();
    let mut listed = Vec::new();
    for c in &conds {
        listed.push(json!({
            "type": c.type_,
            "status": c.status,
            "reason": c.reason,
            "message": c.message,
        }));
        if c.type_ == "Ready" {
            continue;
        }
        if c.status != "False" {
            problems.push(format!("{}={}", c.type_, c.status));
        }
    }
    ToolOutcome::diagnostic(ResultRecord::success(json!({
        "healthy": problems.is_empty(),
        "problems": problems,
        "conditions": listed,
    })))
}

pub fn get_runbook(ctx: &StepContext<'_>) -> ToolOutcome {
    ToolOutcome::diagnostic(ResultRecord::success(json!({
        "runbook_id": ctx.runbook.id.as_str(),
        "alertname": ctx.runbook.alert_name,
        "title": ctx.runbook.title,
        "fallback_image": ctx.runbook.fallback_image,
    })))
}
