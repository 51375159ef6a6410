//! HTTP surface: the Alertmanager webhook and the incident API.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use deadpool_postgres::Pool;
use owo_colors::OwoColorize;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::args::ServerArgs;
use crate::cluster::{ClusterOps, KubeCluster};
use crate::controller::Controller;
use crate::db;
use crate::error::AgentError;
use crate::llm::{Llm, OpenAiClient};
use crate::metrics;
use crate::models::{AgentMode, Alert, AlertmanagerPayload};
use crate::runbook::RunbookTable;

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub controller: Arc<Controller>,
}

pub async fn run_server(args: ServerArgs) -> Result<()> {
    let mode: AgentMode = args.agent_mode.parse().map_err(|e: String| anyhow!(e))?;

    let pool = remedy_common::postgres::create_pool(&args.postgres)?;
    db::init_schema(&pool).await?;

    let runbooks = Arc::new(
        RunbookTable::load_dir(&args.runbook_dir).context("failed to load runbooks")?,
    );
    println!(
        "{}{}{}{}",
        "📚 Loaded runbooks • count=".green(),
        format!("{}", runbooks.len()).green().dimmed(),
        " • mode=".green(),
        mode.as_str().green().dimmed(),
    );

    let cluster: Arc<dyn ClusterOps> = Arc::new(KubeCluster::connect().await?);
    let llm: Arc<dyn Llm> = Arc::new(OpenAiClient::new(&args.openai)?);
    tracing::info!(llm = args.openai.redacted(), "LLM client ready");

    let cancel = CancellationToken::new();
    remedy_common::shutdown::cancel_on_signal(cancel.clone());

    let controller = Arc::new(Controller::new(
        pool.clone(),
        cluster,
        llm,
        runbooks,
        mode,
        args.cluster_name.clone(),
        cancel.clone(),
    ));
    let state = AppState { pool, controller };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/alertmanager", post(webhook))
        .route("/api/incidents", get(list_incidents))
        .route("/api/incidents/{id}", get(get_incident))
        .route(
            "/api/incidents/{id}/regenerate-analysis",
            post(regenerate_analysis),
        )
        .route("/healthz", get(healthz))
        .layer(axum::middleware::from_fn(
            remedy_common::metrics::track_http,
        ))
        .layer(cors)
        .with_state(state);

    let addr = format!("0.0.0.0:{}", args.http_port);
    let listener = TcpListener::bind(&addr)
        .await
        .context("failed to bind HTTP server")?;
    tracing::info!(%addr, "starting remediation agent HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .context("HTTP server failed")?;

    tracing::info!("HTTP server stopped gracefully");
    Ok(())
}

// =============================================================================
// Webhook
// =============================================================================

/// Accepts an Alertmanager batch and fans each alert out into its own task.
/// Tasks are detached so in-flight tool calls finish even when the caller
/// goes away; the drop guard cancels the request scope in that case, so no
/// further steps start and the `final` event records the cancellation.
async fn webhook(
    State(state): State<AppState>,
    Json(payload): Json<AlertmanagerPayload>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let cancel = state.controller.request_scope();
    let guard = cancel.clone().drop_guard();

    let group_key = (!payload.group_key.is_empty()).then(|| payload.group_key.clone());
    let mut handles = Vec::with_capacity(payload.alerts.len());
    for wire in payload.alerts {
        let alert = Alert::from_wire(wire, group_key.clone());
        let controller = state.controller.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            controller.process_alert(alert, &cancel).await
        }));
    }

    let mut processed = 0usize;
    let mut saturated = false;
    let mut failure: Option<String> = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(_)) => processed += 1,
            Ok(Err(AgentError::Backpressure)) => saturated = true,
            Ok(Err(e)) => {
                tracing::error!("alert processing failed: {:?}", e);
                metrics::db_error("process_alert");
                failure = Some(e.to_string());
            }
            Err(e) => {
                tracing::error!("alert task panicked: {:?}", e);
                failure = Some(e.to_string());
            }
        }
    }

    // Every task ran to completion; the scope must outlive the handler
    // without firing.
    let _ = guard.disarm();

    if saturated {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "database pool saturated; retry".to_string(),
        ));
    }
    if let Some(message) = failure {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to process alerts: {}", message),
        ));
    }
    Ok(Json(json!({ "processed": processed })))
}

// =============================================================================
// Incident API
// =============================================================================

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    offset: i64,
    #[serde(default = "default_limit")]
    limit: i64,
}

async fn list_incidents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if query.limit <= 0 {
        return Err((StatusCode::BAD_REQUEST, "limit must be positive".into()));
    }
    if query.offset < 0 {
        return Err((StatusCode::BAD_REQUEST, "offset must be non-negative".into()));
    }
    let limit = query.limit.min(500);

    let (incidents, total) = db::list_incidents(&state.pool, limit, query.offset)
        .await
        .map_err(|e| {
            metrics::db_error("list_incidents");
            tracing::error!("failed to list incidents: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to list incidents: {}", e),
            )
        })?;

    Ok(Json(json!({ "incidents": incidents, "total": total })))
}

async fn get_incident(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let incident = db::get_incident(&state.pool, id).await.map_err(|e| {
        metrics::db_error("get_incident");
        tracing::error!("failed to get incident: {:?}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to get incident: {}", e),
        )
    })?;
    let Some(incident) = incident else {
        return Err((StatusCode::NOT_FOUND, format!("incident {} not found", id)));
    };

    let events = db::get_events(&state.pool, id).await.map_err(internal)?;
    let analysis_markdown = db::latest_analysis(&state.pool, id).await.map_err(internal)?;
    let past_incidents = db::query_similar(&state.pool, &incident)
        .await
        .map_err(internal)?;

    Ok(Json(json!({
        "incident": incident,
        "events": events,
        "analysis_markdown": analysis_markdown,
        "past_incidents": past_incidents,
    })))
}

async fn regenerate_analysis(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let event_id = state
        .controller
        .regenerate_analysis(id)
        .await
        .map_err(|e| {
            tracing::error!("failed to regenerate analysis: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to regenerate analysis: {}", e),
            )
        })?;
    match event_id {
        Some(event_id) => Ok(Json(json!({ "analysis_event_id": event_id }))),
        None => Err((StatusCode::NOT_FOUND, format!("incident {} not found", id))),
    }
}

/// 200 once the database answers and the runbook table is loaded.
async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    if state.controller.runbooks().is_empty() {
        return (StatusCode::SERVICE_UNAVAILABLE, "no runbooks loaded");
    }
    match db::ping(&state.pool).await {
        Ok(()) => (StatusCode::OK, "OK"),
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "database unreachable")
        }
    }
}

fn internal(e: AgentError) -> (StatusCode, String) {
    tracing::error!("request failed: {:?}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
