//! Closed tool set and the name-keyed registry the workflow engine dispatches
//! through. Adding a tool means adding a variant; every dispatch site is then
//! checked by the compiler.

pub mod diagnose;
pub mod owner;
pub mod remediate;

use serde::Serialize;
use serde_json::{Value, json};

use crate::cluster::ClusterOps;
use crate::models::{Alert, AgentMode, ResultRecord};
use crate::runbook::Runbook;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    GetPodEvents,
    CheckImagePullBackoff,
    CheckOom,
    GetNodeReady,
    GetNodeConditions,
    GetRunbook,
    FixImagePullBackoff,
    IncreaseMemoryLimit,
    DeletePod,
    CordonNode,
    UncordonNode,
    DrainNode,
}

pub const ALL_TOOLS: &[ToolName] = &[
    ToolName::GetPodEvents,
    ToolName::CheckImagePullBackoff,
    ToolName::CheckOom,
    ToolName::GetNodeReady,
    ToolName::GetNodeConditions,
    ToolName::GetRunbook,
    ToolName::FixImagePullBackoff,
    ToolName::IncreaseMemoryLimit,
    ToolName::DeletePod,
    ToolName::CordonNode,
    ToolName::UncordonNode,
    ToolName::DrainNode,
];

impl ToolName {
    /// Wire name used in runbooks, LLM tool definitions and traces.
    pub fn wire_name(&self) -> &'static str {
        match self {
            ToolName::GetPodEvents => "get_pod_events",
            ToolName::CheckImagePullBackoff => "check_imagepullbackoff",
            ToolName::CheckOom => "check_oom",
            ToolName::GetNodeReady => "get_node_ready",
            ToolName::GetNodeConditions => "get_node_conditions",
            ToolName::GetRunbook => "get_runbook",
            ToolName::FixImagePullBackoff => "fix_imagepullbackoff",
            ToolName::IncreaseMemoryLimit => "increase_memory_limit",
            ToolName::DeletePod => "delete_pod",
            ToolName::CordonNode => "cordon_node",
            ToolName::UncordonNode => "uncordon_node",
            ToolName::DrainNode => "drain_node",
        }
    }

    /// Stable short name gates reference results under.
    pub fn alias(&self) -> &'static str {
        match self {
            ToolName::GetPodEvents => "events",
            ToolName::CheckImagePullBackoff => "imagepull",
            ToolName::CheckOom => "oom",
            ToolName::GetNodeReady => "node_ready",
            ToolName::GetNodeConditions => "node_conditions",
            ToolName::GetRunbook => "runbook",
            ToolName::FixImagePullBackoff => "patch_image",
            ToolName::IncreaseMemoryLimit => "patch_memory",
            ToolName::DeletePod => "restart",
            ToolName::CordonNode => "cordon",
            ToolName::UncordonNode => "uncordon",
            ToolName::DrainNode => "drain",
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            ToolName::FixImagePullBackoff
                | ToolName::IncreaseMemoryLimit
                | ToolName::DeletePod
                | ToolName::CordonNode
                | ToolName::UncordonNode
                | ToolName::DrainNode
        )
    }

    pub fn from_wire(name: &str) -> Option<ToolName> {
        ALL_TOOLS.iter().copied().find(|t| t.wire_name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolName::GetPodEvents => "List cluster events for a pod and classify failure reasons",
            ToolName::CheckImagePullBackoff => {
                "Check whether a pod is failing to pull its container image"
            }
            ToolName::CheckOom => "Check whether a pod was OOM-killed",
            ToolName::GetNodeReady => "Read a node's Ready and schedulable state",
            ToolName::GetNodeConditions => "Read a node's condition list and overall health",
            ToolName::GetRunbook => "Read the loaded runbook metadata",
            ToolName::FixImagePullBackoff => {
                "Patch the owning Deployment's container image to the runbook fallback"
            }
            ToolName::IncreaseMemoryLimit => {
                "Double the owning Deployment's container memory limit (256Mi floor, 4Gi cap)"
            }
            ToolName::DeletePod => "Delete a controller-owned pod so it is recreated",
            ToolName::CordonNode => "Mark a node unschedulable",
            ToolName::UncordonNode => "Mark a node schedulable again",
            ToolName::DrainNode => "Evict workload pods from a node, best-effort",
        }
    }

    /// JSON schema of the tool's arguments, handed to the adjudicator as the
    /// function definition.
    pub fn parameters_schema(&self) -> Value {
        match self {
            ToolName::GetPodEvents
            | ToolName::CheckImagePullBackoff
            | ToolName::CheckOom
            | ToolName::DeletePod => json!({
                "type": "object",
                "properties": {
                    "namespace": { "type": "string" },
                    "pod": { "type": "string" }
                },
                "required": ["namespace", "pod"]
            }),
            ToolName::FixImagePullBackoff | ToolName::IncreaseMemoryLimit => json!({
                "type": "object",
                "properties": {
                    "namespace": { "type": "string" },
                    "pod": { "type": "string" },
                    "container": { "type": "string" }
                },
                "required": ["namespace", "pod"]
            }),
            ToolName::GetNodeReady
            | ToolName::GetNodeConditions
            | ToolName::CordonNode
            | ToolName::UncordonNode
            | ToolName::DrainNode => json!({
                "type": "object",
                "properties": {
                    "node": { "type": "string" }
                },
                "required": ["node"]
            }),
            ToolName::GetRunbook => json!({
                "type": "object",
                "properties": {
                    "runbook_id": { "type": "string" }
                },
                "required": []
            }),
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Maps a runbook `action_id` to the tool the engine expects. Unknown ids
/// fail runbook loading.
pub fn expected_tool(action_id: &str) -> Option<ToolName> {
    match action_id {
        "get_pod_events" => Some(ToolName::GetPodEvents),
        "check_imagepullbackoff" => Some(ToolName::CheckImagePullBackoff),
        "check_oom" => Some(ToolName::CheckOom),
        "get_node_ready" => Some(ToolName::GetNodeReady),
        "get_node_conditions" => Some(ToolName::GetNodeConditions),
        "get_runbook" => Some(ToolName::GetRunbook),
        "patch_image" | "fix_imagepullbackoff" => Some(ToolName::FixImagePullBackoff),
        "increase_memory_limit" => Some(ToolName::IncreaseMemoryLimit),
        "restart_pod" | "delete_pod" => Some(ToolName::DeletePod),
        "cordon_node" => Some(ToolName::CordonNode),
        "uncordon_node" => Some(ToolName::UncordonNode),
        "drain_node" => Some(ToolName::DrainNode),
        _ => None,
    }
}

pub fn known_alias(alias: &str) -> bool {
    ALL_TOOLS.iter().any(|t| t.alias() == alias)
}

/// Arguments derived from alert labels, used when the adjudicator is bypassed
/// and as defaults for missing adjudicated arguments.
pub fn default_args(tool: ToolName, alert: &Alert) -> Value {
    match tool {
        ToolName::GetPodEvents
        | ToolName::CheckImagePullBackoff
        | ToolName::CheckOom
        | ToolName::DeletePod => json!({
            "namespace": alert.namespace(),
            "pod": alert.pod(),
        }),
        ToolName::FixImagePullBackoff | ToolName::IncreaseMemoryLimit => json!({
            "namespace": alert.namespace(),
            "pod": alert.pod(),
            "container": alert.container(),
        }),
        ToolName::GetNodeReady
        | ToolName::GetNodeConditions
        | ToolName::CordonNode
        | ToolName::UncordonNode
        | ToolName::DrainNode => json!({
            "node": alert.node(),
        }),
        ToolName::GetRunbook => json!({
            "runbook_id": alert.label("runbook_id"),
        }),
    }
}

/// Context a tool executes under: the triggering alert, the agent mode and
/// the runbook that scheduled it.
pub struct StepContext<'a> {
    pub alert: &'a Alert,
    pub mode: AgentMode,
    pub runbook: &'a Runbook,
}

/// Result of one tool invocation: the structured record plus, for mutating
/// tools, the canonical change string.
pub struct ToolOutcome {
    pub record: ResultRecord,
    pub action: Option<String>,
}

impl ToolOutcome {
    pub fn diagnostic(record: ResultRecord) -> Self {
        ToolOutcome {
            record,
            action: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        ToolOutcome {
            record: ResultRecord::failure(error),
            action: None,
        }
    }

    pub fn acted(record: ResultRecord, action: String) -> Self {
        ToolOutcome {
            record,
            action: Some(action),
        }
    }
}

fn arg_or<'a>(args: &'a Value, key: &str, fallback: &'a str) -> &'a str {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
}

/// Executes a tool through the registry. Never errors outward; failures are
/// folded into the returned record.
pub async fn execute(
    tool: ToolName,
    cluster: &dyn ClusterOps,
    ctx: &StepContext<'_>,
    args: &Value,
) -> ToolOutcome {
    let namespace = arg_or(args, "namespace", ctx.alert.namespace()).to_string();
    let pod = arg_or(args, "pod", ctx.alert.pod()).to_string();
    let node = arg_or(args, "node", ctx.alert.node()).to_string();
    let container = {
        let c = arg_or(args, "container", ctx.alert.container());
        (!c.is_empty()).then(|| c.to_string())
    };

    match tool {
        ToolName::GetPodEvents => diagnose::get_pod_events(cluster, &namespace, &pod).await,
        ToolName::CheckImagePullBackoff => {
            diagnose::check_imagepullbackoff(cluster, &namespace, &pod).await
        }
        ToolName::CheckOom => diagnose::check_oom(cluster, &namespace, &pod).await,
        ToolName::GetNodeReady => diagnose::get_node_ready(cluster, &node).await,
        ToolName::GetNodeConditions => diagnose::get_node_conditions(cluster, &node).await,
        ToolName::GetRunbook => diagnose::get_runbook(ctx),
        ToolName::FixImagePullBackoff => {
            remediate::fix_imagepullbackoff(cluster, ctx, &namespace, &pod, container.as_deref())
                .await
        }
        ToolName::IncreaseMemoryLimit => {
            remediate::increase_memory_limit(cluster, ctx, &namespace, &pod, container.as_deref())
                .await
        }
        ToolName::DeletePod => remediate::delete_pod(cluster, ctx, &namespace, &pod).await,
        ToolName::CordonNode => remediate::cordon_node(cluster, ctx, &node).await,
        ToolName::UncordonNode => remediate::uncordon_node(cluster, ctx, &node).await,
        ToolName::DrainNode => remediate::drain_node(cluster, ctx, &node).await,
    }
}
