//! Webhook server
//!
//! `POST /fix_build` takes a [`FixRequest`] and answers with the outcome of a
//! full pipeline run. The run happens on its own task, so a caller hanging up
//! does not stop a clone or agent invocation halfway.

use crate::error::PipelineError;
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::request::FixRequest;
use anyhow::Result;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    permits: Arc<Semaphore>,
}

impl AppState {
    /// `max_concurrent` pipelines run at once; further requests wait for a slot.
    pub fn new(pipeline: Arc<Pipeline>, max_concurrent: usize) -> Self {
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }
}

/// JSON body of every `/fix_build` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixBuildResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_changes: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl FixBuildResponse {
    pub fn from_outcome(outcome: &PipelineOutcome) -> (StatusCode, Self) {
        match outcome {
            Ok(report) => (
                StatusCode::OK,
                Self {
                    ok: true,
                    commit_sha: report.commit_sha.clone(),
                    no_changes: Some(report.no_changes),
                    ..Self::default()
                },
            ),
            Err(err) => (err.status(), Self::from_error(err)),
        }
    }

    fn from_error(err: &PipelineError) -> Self {
        Self {
            ok: false,
            error: Some(err.to_string()),
            code: Some(err.code().to_string()),
            output: err.output().map(str::to_string),
            ..Self::default()
        }
    }

    fn invalid_json() -> Self {
        Self {
            ok: false,
            error: Some("invalid JSON".to_string()),
            code: Some("validation".to_string()),
            ..Self::default()
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/fix_build", post(fix_build))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn fix_build(
    State(state): State<AppState>,
    body: Bytes,
) -> (StatusCode, Json<FixBuildResponse>) {
    let request: FixRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            tracing::warn!(error = %err, "rejecting malformed payload");
            return (StatusCode::BAD_REQUEST, Json(FixBuildResponse::invalid_json()));
        }
    };

    if let Err(err) = request.validate() {
        tracing::warn!(error = %err, "rejecting incomplete payload");
        return (err.status(), Json(FixBuildResponse::from_error(&err)));
    }

    let outcome = run_detached(&state, request).await;
    let (status, response) = FixBuildResponse::from_outcome(&outcome);
    (status, Json(response))
}

/// Run the pipeline on its own task and wait for it.
async fn run_detached(state: &AppState, request: FixRequest) -> PipelineOutcome {
    let pipeline = Arc::clone(&state.pipeline);
    let permits = Arc::clone(&state.permits);

    let task = tokio::spawn(async move {
        let _permit = permits
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::Internal("fix queue closed".to_string()))?;
        pipeline.run(&request).await
    });

    match task.await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(error = %err, "fix pipeline task aborted");
            Err(PipelineError::Internal(
                "fix pipeline terminated unexpectedly".to_string(),
            ))
        }
    }
}

/// Serve until Ctrl-C or SIGTERM, letting in-flight requests finish.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested; draining in-flight fixes");
}
