//! Mutating tools. Each one computes the canonical change string first, then
//! applies the mutation only in auto mode; recommend mode records the same
//! string without touching the cluster.

use k8s_openapi::api::core::v1::Pod;
use serde_json::json;

use crate::cluster::ClusterOps;
use crate::models::{AgentMode, ResultRecord};
use crate::quantity;
use crate::tools::{StepContext, ToolOutcome, owner};

const SYSTEM_NAMESPACES: &[&str] = &["kube-system", "kube-public", "kube-node-lease"];
const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

pub async fn fix_imagepullbackoff(
    cluster: &dyn ClusterOps,
    ctx: &StepContext<'_>,
    namespace: &str,
    pod: &str,
    container_hint: Option<&str>,
) -> ToolOutcome {
    let Some(image) = ctx.runbook.fallback_image.clone() else {
        return ToolOutcome::failed(format!(
            "runbook {} declares no fallback_image",
            ctx.runbook.id
        ));
    };
    let target =
        match owner::resolve_deployment_target(cluster, namespace, pod, container_hint).await {
            Ok(t) => t,
            Err(e) => return ToolOutcome::failed(e.to_string()),
        };
    let action = format!(
        "patch_image:{}/{}/{}:{}",
        namespace, target.name, target.container, image
    );
    if ctx.mode == AgentMode::Auto
        && let Err(e) = cluster
            .patch_deployment_image(namespace, &target.name, &target.container, &image)
            .await
    {
        return ToolOutcome::failed(e.to_string());
    }
    ToolOutcome::acted(
        ResultRecord::success(json!({
            "deployment": target.name,
            "container": target.container,
            "image": image,
            "applied": ctx.mode == AgentMode::Auto,
        })),
        action,
    )
}

pub async fn increase_memory_limit(
    cluster: &dyn ClusterOps,
    ctx: &StepContext<'_>,
    namespace: &str,
    pod: &str,
    container_hint: Option<&str>,
) -> ToolOutcome {
    let target =
        match owner::resolve_deployment_target(cluster, namespace, pod, container_hint).await {
            Ok(t) => t,
            Err(e) => return ToolOutcome::failed(e.to_string()),
        };
    let current_raw = owner::memory_limit_of(&target.deployment, &target.container);
    let current = current_raw.as_deref().and_then(quantity::parse_memory);
    let new = quantity::next_limit(current);
    let old_str = current
        .map(quantity::format_memory)
        .unwrap_or_else(|| "unknown".to_string());
    let new_str = quantity::format_memory(new);
    let action = format!(
        "patch_memory_limit:{}/{}/{}:{}→{}",
        namespace, target.name, target.container, old_str, new_str
    );
    let needs_patch = current != Some(new);
    if ctx.mode == AgentMode::Auto
        && needs_patch
        && let Err(e) = cluster
            .patch_deployment_memory_limit(namespace, &target.name, &target.container, &new_str)
            .await
    {
        return ToolOutcome::failed(e.to_string());
    }
    ToolOutcome::acted(
        ResultRecord::success(json!({
            "deployment": target.name,
            "container": target.container,
            "old_limit": old_str,
            "new_limit": new_str,
            "applied": ctx.mode == AgentMode::Auto && needs_patch,
        })),
        action,
    )
}

pub async fn delete_pod(
    cluster: &dyn ClusterOps,
    ctx: &StepContext<'_>,
    namespace: &str,
    pod: &str,
) -> ToolOutcome {
    let pod_obj = match cluster.get_pod(namespace, pod).await {
        Ok(p) => p,
        Err(e) => return ToolOutcome::failed(e.to_string()),
    };
    let has_controller = pod_obj
        .metadata
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|o| o.controller == Some(true));
    if !has_controller {
        return ToolOutcome::failed(format!(
            "pod {}/{} has no controller owner and would not be recreated",
            namespace, pod
        ));
    }
    let action = format!("delete_pod:{}/{}", namespace, pod);
    if ctx.mode == AgentMode::Auto
        && let Err(e) = cluster.delete_pod(namespace, pod).await
    {
        return ToolOutcome::failed(e.to_string());
    }
    ToolOutcome::acted(
        ResultRecord::success(json!({
            "pod": pod,
            "applied": ctx.mode == AgentMode::Auto,
        })),
        action,
    )
}

pub async fn cordon_node(
    cluster: &dyn ClusterOps,
    ctx: &StepContext<'_>,
    node: &str,
) -> ToolOutcome {
    set_schedulable(cluster, ctx, node, true).await
}

pub async fn uncordon_node(
    cluster: &dyn ClusterOps,
    ctx: &StepContext<'_>,
    node: &str,
) -> ToolOutcome {
    set_schedulable(cluster, ctx, node, false).await
}

async fn set_schedulable(
    cluster: &dyn ClusterOps,
    ctx: &StepContext<'_>,
    node: &str,
    unschedulable: bool,
) -> ToolOutcome {
    let verb = if unschedulable { "cordon_node" } else { "uncordon_node" };
    let action = format!("{}:{}", verb, node);
    if ctx.mode == AgentMode::Auto
        && let Err(e) = cluster.set_node_unschedulable(node, unschedulable).await
    {
        return ToolOutcome::failed(e.to_string());
    }
    ToolOutcome::acted(
        ResultRecord::success(json!({
            "node": node,
            "unschedulable": unschedulable,
            "applied": ctx.mode == AgentMode::Auto,
        })),
        action,
    )
}

fn drain_skips(pod: &Pod) -> bool {
    let namespace = pod.metadata.namespace.as_deref().unwrap_or("");
    if SYSTEM_NAMESPACES.contains(&namespace) {
        return true;
    }
    if pod
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(MIRROR_POD_ANNOTATION))
    {
        return true;
    }
    pod.metadata
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|o| o.kind == "DaemonSet")
}

/// Best-effort drain: per-pod eviction failures are counted, never fatal.
pub async fn drain_node(
    cluster: &dyn ClusterOps,
    ctx: &StepContext<'_>,
    node: &str,
) -> ToolOutcome {
    let pods = match cluster.pods_on_node(node).await {
        Ok(p) => p,
        Err(e) => return ToolOutcome::failed(e.to_string()),
    };
    let mut attempted = 0u32;
    let mut evicted = 0u32;
    let mut skipped = 0u32;
    let mut failed = 0u32;
    for pod in &pods {
        if drain_skips(pod) {
            skipped += 1;
            continue;
        }
        attempted += 1;
        if ctx.mode != AgentMode::Auto {
            continue;
        }
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("");
        let name = pod.metadata.name.as_deref().unwrap_or("");
        match cluster.evict_pod(namespace, name).await {
            Ok(()) => evicted += 1,
            Err(e) => {
                tracing::warn!(node, pod = name, error = %e, "eviction failed during drain");
                failed += 1;
            }
        }
    }
    let action = format!("drain_node:{}", node);
    ToolOutcome::acted(
        ResultRecord::success(json!({
            "attempted": attempted,
            "evicted": evicted,
            "skipped": skipped,
            "failed": failed,
            "applied": ctx.mode == AgentMode::Auto,
        })),
        action,
    )
}
