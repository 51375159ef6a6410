//! Relational store: two tables and the advisory-lock facility.
//!
//! `incidents` is keyed by the fingerprint unique constraint — the sole dedup
//! primitive. `incident_events` is append-only; nothing here updates or
//! deletes a row once written. Advisory locks are session-scoped, so they
//! must be taken and released on the same held connection.

use anyhow::{Context, Result};
use deadpool_postgres::{Object, Pool};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::AgentError;
use crate::models::{
    Alert, AgentMode, EventType, Incident, IncidentEvent, PastIncident, now_ms,
};
use crate::router::RunbookId;

/// Initialize the database schema, creating tables if they don't exist.
pub async fn init_schema(pool: &Pool) -> Result<()> {
    let client = pool.get().await.context("failed to get db connection")?;

    client
        .execute(
            r#"
            CREATE TABLE IF NOT EXISTS incidents (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                fingerprint TEXT NOT NULL UNIQUE,
                alertname TEXT NOT NULL,
                namespace TEXT NOT NULL DEFAULT '',
                pod TEXT NOT NULL DEFAULT '',
                node TEXT NOT NULL DEFAULT '',
                severity TEXT NOT NULL DEFAULT '',
                runbook_id TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'open',
                agent_mode TEXT NOT NULL DEFAULT 'recommend',
                summary TEXT NOT NULL DEFAULT '',
                summary_embedding BYTEA
            )
            "#,
            &[],
        )
        .await
        .context("failed to create incidents table")?;

    client
        .execute(
            r#"
            CREATE TABLE IF NOT EXISTS incident_events (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                incident_id UUID NOT NULL REFERENCES incidents(id) ON DELETE CASCADE,
                ts BIGINT NOT NULL,
                event_type TEXT NOT NULL,
                payload JSONB NOT NULL
            )
            "#,
            &[],
        )
        .await
        .context("failed to create incident_events table")?;

    client
        .execute(
            r#"
            CREATE INDEX IF NOT EXISTS idx_incident_events_incident_ts
            ON incident_events (incident_id, ts DESC)
            "#,
            &[],
        )
        .await
        .context("failed to create event index")?;

    tracing::info!("database schema initialized");
    Ok(())
}

fn incident_from_row(row: &Row) -> Incident {
    Incident {
        id: row.get("id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        fingerprint: row.get("fingerprint"),
        alertname: row.get("alertname"),
        namespace: row.get("namespace"),
        pod: row.get("pod"),
        node: row.get("node"),
        severity: row.get("severity"),
        runbook_id: row.get("runbook_id"),
        status: row.get("status"),
        agent_mode: row.get("agent_mode"),
        summary: row.get("summary"),
    }
}

/// Upsert an incident keyed by fingerprint. Repeated fires refresh the
/// label-derived columns and `updated_at`; `created_at` and `status` are
/// write-once.
pub async fn upsert_incident(
    pool: &Pool,
    alert: &Alert,
    fingerprint: &str,
    runbook_id: RunbookId,
    mode: AgentMode,
) -> Result<Uuid, AgentError> {
    let client = pool.get().await?;
    let now = now_ms();
    let row = client
        .query_one(
            r#"
            INSERT INTO incidents
                (created_at, updated_at, fingerprint, alertname, namespace, pod, node,
                 severity, runbook_id, agent_mode)
            VALUES ($1, $1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (fingerprint) DO UPDATE SET
                updated_at = EXCLUDED.updated_at,
                alertname = EXCLUDED.alertname,
                namespace = EXCLUDED.namespace,
                pod = EXCLUDED.pod,
                node = EXCLUDED.node,
                severity = EXCLUDED.severity,
                runbook_id = EXCLUDED.runbook_id
            RETURNING id
            "#,
            &[
                &now,
                &fingerprint,
                &alert.alertname,
                &alert.namespace(),
                &alert.pod(),
                &alert.node(),
                &alert.severity(),
                &runbook_id.as_str(),
                &mode.as_str(),
            ],
        )
        .await?;
    Ok(row.get("id"))
}

/// Append one audit event and return its id. Events are never mutated.
pub async fn append_event(
    pool: &Pool,
    incident_id: Uuid,
    event_type: EventType,
    payload: serde_json::Value,
) -> Result<Uuid, AgentError> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            INSERT INTO incident_events (incident_id, ts, event_type, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
            &[&incident_id, &now_ms(), &event_type.as_str(), &payload],
        )
        .await?;
    Ok(row.get("id"))
}

/// List incidents newest-first with a window-function total.
pub async fn list_incidents(
    pool: &Pool,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Incident>, i64), AgentError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            r#"
            SELECT *, COUNT(*) OVER() AS full_count
            FROM incidents
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            OFFSET $2
            "#,
            &[&limit, &offset],
        )
        .await?;
    let total: i64 = rows.first().map(|r| r.get("full_count")).unwrap_or(0);
    Ok((rows.iter().map(incident_from_row).collect(), total))
}

pub async fn get_incident(pool: &Pool, id: Uuid) -> Result<Option<Incident>, AgentError> {
    let client = pool.get().await?;
    let row = client
        .query_opt("SELECT * FROM incidents WHERE id = $1", &[&id])
        .await?;
    Ok(row.as_ref().map(incident_from_row))
}

/// All events of one incident, totally ordered by `(ts, id)`.
pub async fn get_events(pool: &Pool, incident_id: Uuid) -> Result<Vec<IncidentEvent>, AgentError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            r#"
            SELECT id, incident_id, ts, event_type, payload
            FROM incident_events
            WHERE incident_id = $1
            ORDER BY ts ASC, id ASC
            "#,
            &[&incident_id],
        )
        .await?;
    Ok(rows
        .iter()
        .map(|r| IncidentEvent {
            id: r.get("id"),
            incident_id: r.get("incident_id"),
            ts: r.get("ts"),
            event_type: r.get("event_type"),
            payload: r.get("payload"),
        })
        .collect())
}

async fn latest_event_payload(
    pool: &Pool,
    incident_id: Uuid,
    event_type: &str,
) -> Result<Option<serde_json::Value>, AgentError> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            SELECT payload
            FROM incident_events
            WHERE incident_id = $1 AND event_type = $2
            ORDER BY ts DESC, id DESC
            LIMIT 1
            "#,
            &[&incident_id, &event_type],
        )
        .await?;
    Ok(row.map(|r| r.get("payload")))
}

/// Markdown of the most recent analysis event, if any.
pub async fn latest_analysis(
    pool: &Pool,
    incident_id: Uuid,
) -> Result<Option<String>, AgentError> {
    let payload = latest_event_payload(pool, incident_id, EventType::Analysis.as_str()).await?;
    Ok(payload
        .and_then(|p| p.get("analysis_markdown").cloned())
        .and_then(|v| v.as_str().map(String::from)))
}

/// The most recent `final` event payload, used for analysis regeneration.
pub async fn latest_final_payload(
    pool: &Pool,
    incident_id: Uuid,
) -> Result<Option<serde_json::Value>, AgentError> {
    latest_event_payload(pool, incident_id, EventType::Final.as_str()).await
}

fn state_string(payload: Option<&serde_json::Value>, key: &str) -> Option<String> {
    payload?
        .get("state")?
        .get(key)?
        .as_str()
        .map(String::from)
}

/// Most recent 50 incidents similar to the given one: same alertname, same
/// namespace+pod, or same node; the current incident is excluded. Action
/// fields are read out of each match's latest `final` event.
pub async fn query_similar(
    pool: &Pool,
    incident: &Incident,
) -> Result<Vec<PastIncident>, AgentError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            r#"
            SELECT i.id, i.alertname, i.namespace, i.pod, i.runbook_id, i.created_at,
                   f.payload AS final_payload
            FROM incidents i
            LEFT JOIN LATERAL (
                SELECT payload
                FROM incident_events
                WHERE incident_id = i.id AND event_type = 'final'
                ORDER BY ts DESC, id DESC
                LIMIT 1
            ) f ON true
            WHERE i.id <> $1
              AND (i.alertname = $2
                   OR (i.pod <> '' AND i.namespace = $3 AND i.pod = $4)
                   OR (i.node <> '' AND i.node = $5))
            ORDER BY i.created_at DESC
            LIMIT 50
            "#,
            &[
                &incident.id,
                &incident.alertname,
                &incident.namespace,
                &incident.pod,
                &incident.node,
            ],
        )
        .await?;
    Ok(rows
        .iter()
        .map(|r| {
            let final_payload: Option<serde_json::Value> = r.get("final_payload");
            PastIncident {
                id: r.get("id"),
                alertname: r.get("alertname"),
                namespace: r.get("namespace"),
                pod: r.get("pod"),
                runbook_id: r.get("runbook_id"),
                action_taken: state_string(final_payload.as_ref(), "action_taken"),
                action_recommended: state_string(final_payload.as_ref(), "action_recommended"),
                action_error: state_string(final_payload.as_ref(), "action_error"),
                created_at: r.get("created_at"),
            }
        })
        .collect())
}

/// Non-blocking advisory lock on the given session. The caller must hold the
/// same connection until release.
pub async fn try_advisory_lock(client: &Object, key: i64) -> Result<bool, AgentError> {
    let row = client
        .query_one("SELECT pg_try_advisory_lock($1)", &[&key])
        .await?;
    Ok(row.get(0))
}

pub async fn release_advisory_lock(client: &Object, key: i64) -> Result<bool, AgentError> {
    let row = client
        .query_one("SELECT pg_advisory_unlock($1)", &[&key])
        .await?;
    Ok(row.get(0))
}

/// Cheap liveness probe used by /healthz.
pub async fn ping(pool: &Pool) -> Result<(), AgentError> {
    let client = pool.get().await?;
    client.query_one("SELECT 1", &[]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_string_reads_nested_action_fields() {
        let payload = serde_json::json!({
            "runbook_id": "RB_OOM",
            "state": { "action_taken": "patch_memory_limit:demo/d/app:128Mi→256Mi" }
        });
        assert_eq!(
            state_string(Some(&payload), "action_taken").as_deref(),
            Some("patch_memory_limit:demo/d/app:128Mi→256Mi")
        );
        assert_eq!(state_string(Some(&payload), "action_error"), None);
        assert_eq!(state_string(None, "action_taken"), None);
    }
}
