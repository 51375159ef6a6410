//! Dedup controller: the path from a normalized alert to a finished incident.
//!
//! Serializes concurrent processing of the same fingerprint with a Postgres
//! advisory lock held on a dedicated pooled connection. The lock is released
//! on every exit path after all events are flushed; if the process dies, the
//! session dies and Postgres releases the lock itself.

use std::sync::Arc;

use deadpool_postgres::Pool;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::analysis;
use crate::cluster::ClusterOps;
use crate::db;
use crate::engine;
use crate::error::AgentError;
use crate::fingerprint::{fingerprint, lock_key};
use crate::llm::Llm;
use crate::metrics;
use crate::models::{Alert, AgentMode, EventType};
use crate::router::{self, RunbookId};
use crate::runbook::RunbookTable;

/// How the controller disposed of one alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Workflow ran; `final` and `analysis` events written.
    Completed,
    /// Another holder owns the fingerprint; `suppressed` event written.
    Suppressed,
    /// No workflow to run (unknown runbook / invalid alert); `final` event
    /// records the reason.
    Skipped,
}

pub struct Controller {
    pool: Pool,
    cluster: Arc<dyn ClusterOps>,
    llm: Arc<dyn Llm>,
    runbooks: Arc<RunbookTable>,
    mode: AgentMode,
    cluster_name: String,
    cancel: CancellationToken,
}

impl Controller {
    pub fn new(
        pool: Pool,
        cluster: Arc<dyn ClusterOps>,
        llm: Arc<dyn Llm>,
        runbooks: Arc<RunbookTable>,
        mode: AgentMode,
        cluster_name: String,
        cancel: CancellationToken,
    ) -> Self {
        Controller {
            pool,
            cluster,
            llm,
            runbooks,
            mode,
            cluster_name,
            cancel,
        }
    }

    pub fn runbooks(&self) -> &RunbookTable {
        &self.runbooks
    }

    /// Cancellation scope for one webhook request: a child of the process
    /// shutdown token, so a caller disconnect and a SIGTERM stop further
    /// steps the same way.
    pub fn request_scope(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Processes one alert end to end under the given cancellation scope.
    /// Pool saturation surfaces as `Backpressure` before anything is written.
    pub async fn process_alert(
        &self,
        alert: Alert,
        cancel: &CancellationToken,
    ) -> Result<Disposition, AgentError> {
        let fp = fingerprint(&alert);
        let runbook_id = router::route(&alert);
        let incident_id =
            db::upsert_incident(&self.pool, &alert, &fp, runbook_id, self.mode).await?;
        metrics::alert_received(&alert.alertname);
        tracing::info!(
            incident_id = %incident_id,
            fingerprint = fp.as_str(),
            runbook_id = runbook_id.as_str(),
            "alert ingested"
        );

        db::append_event(
            &self.pool,
            incident_id,
            EventType::WebhookReceived,
            json!({
                "labels": alert.labels,
                "annotations": alert.annotations,
                "status": alert.status,
                "starts_at": alert.starts_at,
                "fingerprint": fp,
            }),
        )
        .await?;

        // The lock must live on one session for the whole workflow.
        let holder = self.pool.get().await?;
        let key = lock_key(&fp);
        if !db::try_advisory_lock(&holder, key).await? {
            tracing::info!(
                incident_id = %incident_id,
                fingerprint = fp.as_str(),
                "fingerprint locked elsewhere; suppressing"
            );
            db::append_event(
                &self.pool,
                incident_id,
                EventType::Suppressed,
                json!({ "reason": "lock_busy" }),
            )
            .await?;
            metrics::incident_suppressed();
            return Ok(Disposition::Suppressed);
        }

        let result = self.run_locked(incident_id, &alert, runbook_id, cancel).await;

        if let Err(e) = db::release_advisory_lock(&holder, key).await {
            // The session releases the lock when the connection drops anyway.
            tracing::warn!(fingerprint = fp.as_str(), error = %e, "advisory unlock failed");
            metrics::db_error("release_advisory_lock");
        }
        result
    }

    async fn run_locked(
        &self,
        incident_id: Uuid,
        alert: &Alert,
        runbook_id: RunbookId,
        cancel: &CancellationToken,
    ) -> Result<Disposition, AgentError> {
        let skip_reason = if alert.alertname.is_empty() {
            Some(AgentError::InvalidAlert("missing alertname label".into()).to_string())
        } else if runbook_id == RunbookId::Unknown {
            Some(AgentError::UnknownRunbook(alert.alertname.clone()).to_string())
        } else if self.runbooks.get(runbook_id).is_none() {
            Some(format!("no runbook document loaded for {}", runbook_id))
        } else {
            None
        };

        if let Some(reason) = skip_reason {
            tracing::warn!(incident_id = %incident_id, reason = reason.as_str(), "workflow skipped");
            db::append_event(
                &self.pool,
                incident_id,
                EventType::Final,
                json!({ "runbook_id": runbook_id.as_str(), "reason": reason }),
            )
            .await?;
            metrics::workflow_skipped(runbook_id.as_str());
            return Ok(Disposition::Skipped);
        }

        let runbook = self
            .runbooks
            .get(runbook_id)
            .ok_or_else(|| AgentError::UnknownRunbook(runbook_id.as_str().to_string()))?;

        let state = engine::run_workflow(
            self.cluster.as_ref(),
            self.llm.as_ref(),
            runbook,
            alert.clone(),
            self.mode,
            cancel,
        )
        .await;

        let state_json = serde_json::to_value(&state)
            .map_err(|e| AgentError::Db(format!("unserializable state: {}", e)))?;
        db::append_event(
            &self.pool,
            incident_id,
            EventType::Final,
            json!({ "runbook_id": runbook_id.as_str(), "state": state_json }),
        )
        .await?;
        metrics::workflow_completed(runbook_id.as_str());

        let incident = db::get_incident(&self.pool, incident_id)
            .await?
            .ok_or_else(|| AgentError::Db(format!("incident {} vanished", incident_id)))?;
        analysis::run(
            &self.pool,
            self.llm.as_ref(),
            &incident,
            &state_json,
            &self.cluster_name,
            false,
        )
        .await?;

        Ok(Disposition::Completed)
    }

    /// On-demand analysis regeneration against the current database state.
    /// Returns None when the incident does not exist.
    pub async fn regenerate_analysis(
        &self,
        incident_id: Uuid,
    ) -> Result<Option<Uuid>, AgentError> {
        let Some(incident) = db::get_incident(&self.pool, incident_id).await? else {
            return Ok(None);
        };
        let final_state = db::latest_final_payload(&self.pool, incident_id)
            .await?
            .and_then(|p| p.get("state").cloned())
            .unwrap_or_else(|| json!({}));
        let event_id = analysis::run(
            &self.pool,
            self.llm.as_ref(),
            &incident,
            &final_state,
            &self.cluster_name,
            true,
        )
        .await?;
        Ok(Some(event_id))
    }
}
