use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Alertmanager wire format
// =============================================================================

/// Alertmanager webhook payload.
///
/// Reference: <https://prometheus.io/docs/alerting/latest/configuration/#webhook_config>
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerPayload {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub group_key: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub receiver: String,
    pub alerts: Vec<WireAlert>,
}

/// Individual alert inside an Alertmanager batch.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAlert {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

// =============================================================================
// Normalized alert
// =============================================================================

/// Normalized alert as seen by the dedup controller and the engine.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub alertname: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub fingerprint: Option<String>,
    pub group_key: Option<String>,
    pub status: String,
}

impl Alert {
    pub fn from_wire(wire: WireAlert, group_key: Option<String>) -> Self {
        let alertname = wire
            .labels
            .get("alertname")
            .cloned()
            .unwrap_or_default();
        let fingerprint = wire.fingerprint.filter(|f| !f.is_empty());
        Alert {
            alertname,
            labels: wire.labels,
            annotations: wire.annotations,
            starts_at: wire.starts_at,
            fingerprint,
            group_key: group_key.filter(|g| !g.is_empty()),
            status: wire.status,
        }
    }

    pub fn label(&self, key: &str) -> &str {
        self.labels.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn namespace(&self) -> &str {
        self.label("namespace")
    }

    pub fn pod(&self) -> &str {
        self.label("pod")
    }

    pub fn container(&self) -> &str {
        self.label("container")
    }

    pub fn node(&self) -> &str {
        self.label("node")
    }

    pub fn severity(&self) -> &str {
        self.label("severity")
    }
}

// =============================================================================
// Modes and lifecycle enums
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    Auto,
    Recommend,
}

impl AgentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Auto => "auto",
            AgentMode::Recommend => "recommend",
        }
    }
}

impl std::str::FromStr for AgentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(AgentMode::Auto),
            "recommend" => Ok(AgentMode::Recommend),
            other => Err(format!("unknown agent mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WebhookReceived,
    Suppressed,
    Final,
    Analysis,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::WebhookReceived => "webhook_received",
            EventType::Suppressed => "suppressed",
            EventType::Final => "final",
            EventType::Analysis => "analysis",
        }
    }
}

// =============================================================================
// Persisted rows
// =============================================================================

/// Incident row, keyed by fingerprint. Never deleted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    /// Unix epoch timestamp in milliseconds.
    pub created_at: i64,
    /// Unix epoch timestamp in milliseconds.
    pub updated_at: i64,
    pub fingerprint: String,
    pub alertname: String,
    pub namespace: String,
    pub pod: String,
    pub node: String,
    pub severity: String,
    pub runbook_id: String,
    pub status: String,
    pub agent_mode: String,
    pub summary: String,
}

/// Append-only audit event attached to an incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentEvent {
    pub id: Uuid,
    pub incident_id: Uuid,
    /// Unix epoch timestamp in milliseconds.
    pub ts: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Projection of a similar past incident fed to the analysis composer.
#[derive(Debug, Clone, Serialize)]
pub struct PastIncident {
    pub id: Uuid,
    pub alertname: String,
    pub namespace: String,
    pub pod: String,
    pub runbook_id: String,
    pub action_taken: Option<String>,
    pub action_recommended: Option<String>,
    pub action_error: Option<String>,
    pub created_at: i64,
}

// =============================================================================
// Per-incident execution state
// =============================================================================

/// Structured result of a single tool invocation. Tools never propagate
/// errors outward; failures land in `error` with `ok=false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub ok: bool,
    pub fields: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultRecord {
    pub fn success(fields: serde_json::Value) -> Self {
        ResultRecord {
            ok: true,
            fields,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ResultRecord {
            ok: false,
            fields: serde_json::json!({}),
            error: Some(error.into()),
        }
    }

    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }
}

/// Trace of one workflow step, gated or executed.
#[derive(Debug, Clone, Serialize)]
pub struct StepTrace {
    pub action_id: String,
    pub tool_name: String,
    pub inputs: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultRecord>,
    pub gated_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmCallKind {
    Adjudicate,
    LlmOverride,
    LlmError,
    Analysis,
}

/// Audit record of one interaction with the adjudicator.
#[derive(Debug, Clone, Serialize)]
pub struct LlmCall {
    pub kind: LlmCallKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returned_tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Ephemeral per-incident state mutated by the workflow engine and flushed
/// into the `final` event. Only the audit fields are serialized.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionState {
    #[serde(skip)]
    pub alert: Alert,
    #[serde(skip)]
    pub mode: AgentMode,
    #[serde(skip)]
    pub tool_results: HashMap<String, ResultRecord>,
    pub rb_steps: Vec<StepTrace>,
    pub llm_trace: Vec<LlmCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_taken: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_recommended: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_error: Option<String>,
}

impl ExecutionState {
    pub fn new(alert: Alert, mode: AgentMode) -> Self {
        ExecutionState {
            alert,
            mode,
            tool_results: HashMap::new(),
            rb_steps: Vec::new(),
            llm_trace: Vec::new(),
            action_taken: None,
            action_recommended: None,
            action_error: None,
        }
    }
}

pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
