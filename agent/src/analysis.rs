//! History-aware post-incident analysis.
//!
//! After a workflow completes (and on demand), similar past incidents are
//! pulled from the store and the LLM writes a structured narrative. The
//! result is always persisted as a new `analysis` event — prior analyses are
//! never touched, and an LLM failure degrades to a stub document rather than
//! losing the event.

use deadpool_postgres::Pool;
use serde_json::json;
use uuid::Uuid;

use crate::db;
use crate::error::AgentError;
use crate::llm::Llm;
use crate::metrics;
use crate::models::{EventType, Incident};

const ANALYSIS_SYSTEM: &str = "You are the post-incident analyst of a Kubernetes \
remediation agent. Write a concise markdown document with exactly these \
sections: Summary, What Happened, Root Cause Hypothesis, Action Taken / \
Recommended, Why That Action, Historical Pattern & SRE Recommendation, \
Follow-ups. Ground every claim in the provided evidence; in What Happened, \
cite the tool results you rely on. If past incidents show a repeating \
pattern, say so explicitly.";

/// Composes an analysis for the incident's final state and appends it as an
/// `analysis` event. Returns the new event id.
pub async fn run(
    pool: &Pool,
    llm: &dyn Llm,
    incident: &Incident,
    final_state: &serde_json::Value,
    cluster_name: &str,
    regenerated: bool,
) -> Result<Uuid, AgentError> {
    let past = db::query_similar(pool, incident).await?;
    let user = format!(
        "Cluster: {}\n\nIncident:\n{}\n\nFinal workflow state:\n{}\n\nSimilar past incidents ({}):\n{}",
        cluster_name,
        serde_json::to_string_pretty(incident).unwrap_or_default(),
        serde_json::to_string_pretty(final_state).unwrap_or_default(),
        past.len(),
        serde_json::to_string_pretty(&past).unwrap_or_default(),
    );

    let markdown = match llm.complete(ANALYSIS_SYSTEM, &user).await {
        Ok(md) => md,
        Err(e) => {
            tracing::warn!(incident_id = %incident.id, error = %e, "analysis generation failed");
            metrics::llm_error();
            format!(
                "## Summary\n\n_Analysis unavailable: {}._\n\nThe incident record \
                 and workflow trace above remain authoritative.",
                e
            )
        }
    };

    let event_id = db::append_event(
        pool,
        incident.id,
        EventType::Analysis,
        json!({
            "analysis_markdown": markdown,
            "runbook_id": incident.runbook_id,
            "regenerated": regenerated,
        }),
    )
    .await?;
    metrics::analysis_generated(regenerated);
    Ok(event_id)
}
