//! Prometheus metrics for the remediation agent.

use metrics::counter;

/// Record one alert accepted by the ingress.
pub fn alert_received(alertname: &str) {
    counter!("remedy_alerts_received_total", "alertname" => alertname.to_string()).increment(1);
}

/// Record a workflow suppressed by the advisory lock.
pub fn incident_suppressed() {
    counter!("remedy_incidents_suppressed_total").increment(1);
}

/// Record a completed workflow.
pub fn workflow_completed(runbook_id: &str) {
    counter!("remedy_workflows_completed_total", "runbook_id" => runbook_id.to_string())
        .increment(1);
}

/// Record an alert that terminated without a workflow.
pub fn workflow_skipped(runbook_id: &str) {
    counter!("remedy_workflows_skipped_total", "runbook_id" => runbook_id.to_string()).increment(1);
}

/// Record one tool execution.
pub fn tool_executed(tool: &str, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    counter!("remedy_tool_executions_total", "tool" => tool.to_string(), "status" => status)
        .increment(1);
}

/// Record an adjudicator tool-identity override.
pub fn llm_override() {
    counter!("remedy_llm_overrides_total").increment(1);
}

/// Record an LLM call failure.
pub fn llm_error() {
    counter!("remedy_llm_errors_total").increment(1);
}

/// Record a database error.
pub fn db_error(operation: &str) {
    counter!("remedy_db_errors_total", "operation" => operation.to_string()).increment(1);
}

/// Record an analysis event append.
pub fn analysis_generated(regenerated: bool) {
    let kind = if regenerated { "regenerated" } else { "initial" };
    counter!("remedy_analyses_total", "kind" => kind).increment(1);
}
