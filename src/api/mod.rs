//! HTTP contracts the core exposes to the API layer.
//!
//! Auth and rate limiting live in the outer collaborator; these handlers
//! assume an already-authorized caller.

pub mod routes;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;

use crate::config::Settings;

#[derive(Clone)]
pub struct ApiState {
    pub pool: PgPool,
    pub settings: Arc<Settings>,
    pub prometheus: Option<PrometheusHandle>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(routes::healthz))
        .route("/metrics", get(routes::metrics_scrape))
        .route("/trends", get(routes::list_trends))
        .route(
            "/trends/:id",
            get(routes::get_trend)
                .put(routes::put_trend)
                .delete(routes::deactivate_trend),
        )
        .route("/trends/:id/evidence", get(routes::trend_evidence))
        .route("/trends/:id/history", get(routes::trend_history))
        .route("/trends/:id/retrospective", get(routes::trend_retrospective))
        .route("/trends/:id/simulate", post(routes::simulate_trend))
        .route(
            "/trends/:id/outcomes",
            get(routes::trend_outcomes).post(routes::record_trend_outcome),
        )
        .route("/trends/:id/definition-history", get(routes::trend_definition_history))
        .route("/events", get(routes::list_events))
        .route("/budget", get(routes::budget_today))
        .route("/review-queue", get(routes::review_queue))
        .route("/taxonomy-gaps", get(routes::list_taxonomy_gaps))
        .route("/taxonomy-gaps/:id", post(routes::triage_taxonomy_gap))
        .route("/feedback", post(routes::submit_feedback))
        .route("/replay", post(routes::run_replay))
        .route("/reports/calibration", get(routes::calibration_report))
        .with_state(state)
}
