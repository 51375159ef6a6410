use serde::{Deserialize, Serialize};

use crate::models::Alert;

/// Closed set of runbook identifiers. `Unknown` terminates processing with a
/// `final` event but no workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunbookId {
    #[serde(rename = "RB_IMAGEPULL")]
    ImagePull,
    #[serde(rename = "RB_OOM")]
    Oom,
    #[serde(rename = "RB_CONTAINERCREATING")]
    ContainerCreating,
    #[serde(rename = "RB_CRASHLOOP")]
    CrashLoop,
    #[serde(rename = "RB_NODE_UNSCHEDULABLE")]
    NodeUnschedulable,
    #[serde(rename = "RB_NODE_NOTREADY")]
    NodeNotReady,
    #[serde(rename = "RB_UNKNOWN")]
    Unknown,
}

impl RunbookId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunbookId::ImagePull => "RB_IMAGEPULL",
            RunbookId::Oom => "RB_OOM",
            RunbookId::ContainerCreating => "RB_CONTAINERCREATING",
            RunbookId::CrashLoop => "RB_CRASHLOOP",
            RunbookId::NodeUnschedulable => "RB_NODE_UNSCHEDULABLE",
            RunbookId::NodeNotReady => "RB_NODE_NOTREADY",
            RunbookId::Unknown => "RB_UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<RunbookId> {
        match s {
            "RB_IMAGEPULL" => Some(RunbookId::ImagePull),
            "RB_OOM" => Some(RunbookId::Oom),
            "RB_CONTAINERCREATING" => Some(RunbookId::ContainerCreating),
            "RB_CRASHLOOP" => Some(RunbookId::CrashLoop),
            "RB_NODE_UNSCHEDULABLE" => Some(RunbookId::NodeUnschedulable),
            "RB_NODE_NOTREADY" => Some(RunbookId::NodeNotReady),
            "RB_UNKNOWN" => Some(RunbookId::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunbookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps an alert to a runbook. An explicit, recognized `runbook_id` label
/// takes precedence; otherwise the alertname table decides.
pub fn route(alert: &Alert) -> RunbookId {
    let explicit = alert.label("runbook_id");
    if !explicit.is_empty()
        && let Some(id) = RunbookId::parse(explicit)
    {
        return id;
    }
    match alert.alertname.as_str() {
        "KubePodImagePullBackOff" => RunbookId::ImagePull,
        "KubePodOOMKilled" | "KubePodMemoryNearLimit" => RunbookId::Oom,
        "KubePodContainerCreatingStuck" => RunbookId::ContainerCreating,
        "KubePodCrashLoopBackOff" => RunbookId::CrashLoop,
        "KubeNodeUnschedulable" => RunbookId::NodeUnschedulable,
        "KubeNodeNotReady" => RunbookId::NodeNotReady,
        _ => RunbookId::Unknown,
    }
}
