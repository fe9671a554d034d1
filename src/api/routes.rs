//! API route handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::calibration::{self, drift, CalibrationReport};
use crate::config::TrendDefinition;
use crate::counterfactual::{simulate, SimulationMode, SimulationResult};
use crate::engine::{
    confidence_rating, direction_label, logodds_to_prob, probability_band, risk_level,
};
use crate::feedback::{self, FeedbackRequest};
use crate::models::{ApiUsage, Event, FeedbackAction, OutcomeKind, TaxonomyGap, TrendEvidence};
use crate::replay::{self, ReplayReport, ReplayVariant};
use crate::storage::{events, evidence, gaps, outcomes, snapshots, trends, usage};

use super::ApiState;

type ApiResult<T> = Result<Json<T>, StatusCode>;

fn internal(err: impl std::fmt::Display) -> StatusCode {
    error!("request failed: {err}");
    StatusCode::INTERNAL_SERVER_ERROR
}

pub async fn healthz(State(state): State<ApiState>) -> ApiResult<serde_json::Value> {
    sqlx::query("SELECT 1")
        .execute(&state.pool)
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

pub async fn metrics_scrape(State(state): State<ApiState>) -> Result<String, StatusCode> {
    match &state.prometheus {
        Some(handle) => Ok(handle.render()),
        None => Err(StatusCode::NOT_FOUND),
    }
}

// --- trends ---------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct TrendView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub probability: f64,
    pub log_odds: f64,
    pub baseline_log_odds: f64,
    pub risk_level: &'static str,
    pub probability_band: String,
    pub direction: crate::engine::DirectionLabel,
    pub confidence_rating: &'static str,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

async fn trend_view(state: &ApiState, trend: crate::models::Trend) -> anyhow::Result<TrendView> {
    let probability = logodds_to_prob(trend.current_log_odds);

    let week_ago = Utc::now() - Duration::days(7);
    let prob_then = snapshots::at_or_before(&state.pool, &trend.id, week_ago)
        .await?
        .map(|s| logodds_to_prob(s.log_odds))
        .unwrap_or(logodds_to_prob(trend.baseline_log_odds));

    let (count, mean_corroboration) = evidence::active_stats(&state.pool, &trend.id, 90).await?;

    Ok(TrendView {
        probability,
        log_odds: trend.current_log_odds,
        baseline_log_odds: trend.baseline_log_odds,
        risk_level: risk_level(probability).as_str(),
        probability_band: probability_band(probability),
        direction: direction_label(probability, prob_then),
        confidence_rating: confidence_rating(count, mean_corroboration).as_str(),
        id: trend.id,
        name: trend.name,
        description: trend.description,
        is_active: trend.is_active,
        updated_at: trend.updated_at,
    })
}

pub async fn list_trends(State(state): State<ApiState>) -> ApiResult<Vec<TrendView>> {
    let all = trends::all(&state.pool, false).await.map_err(internal)?;
    let mut views = Vec::with_capacity(all.len());
    for trend in all {
        views.push(trend_view(&state, trend).await.map_err(internal)?);
    }
    Ok(Json(views))
}

pub async fn get_trend(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> ApiResult<TrendView> {
    let trend = trends::by_id(&state.pool, &id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(trend_view(&state, trend).await.map_err(internal)?))
}

/// Upsert a trend definition through the same hash-gated path the YAML
/// sync uses.
pub async fn put_trend(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    Json(definition): Json<TrendDefinition>,
) -> ApiResult<serde_json::Value> {
    if definition.id != id {
        return Err(StatusCode::BAD_REQUEST);
    }
    definition.validate().map_err(|_| StatusCode::BAD_REQUEST)?;
    let changed = trends::sync_single(&state.pool, &definition, "api")
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::json!({ "id": id, "changed": changed })))
}

pub async fn deactivate_trend(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> ApiResult<serde_json::Value> {
    let result = sqlx::query("UPDATE trends SET is_active = FALSE, updated_at = now() WHERE id = $1")
        .bind(&id)
        .execute(&state.pool)
        .await
        .map_err(internal)?;
    if result.rows_affected() == 0 {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(serde_json::json!({ "id": id, "is_active": false })))
}

#[derive(Debug, Deserialize)]
pub struct EvidenceQuery {
    #[serde(default)]
    pub include_invalidated: bool,
    pub limit: Option<i64>,
}

pub async fn trend_evidence(
    Path(id): Path<String>,
    Query(params): Query<EvidenceQuery>,
    State(state): State<ApiState>,
) -> ApiResult<Vec<TrendEvidence>> {
    let rows = evidence::for_trend(
        &state.pool,
        &id,
        params.include_invalidated,
        params.limit.unwrap_or(100).clamp(1, 1000),
    )
    .await
    .map_err(internal)?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub days: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn trend_history(
    Path(id): Path<String>,
    Query(params): Query<HistoryQuery>,
    State(state): State<ApiState>,
) -> ApiResult<Vec<crate::models::TrendSnapshot>> {
    let rows = snapshots::history(
        &state.pool,
        &id,
        params.days.unwrap_or(30),
        params.limit.unwrap_or(1000),
    )
    .await
    .map_err(internal)?;
    Ok(Json(rows))
}

#[derive(Debug, Serialize)]
pub struct Retrospective {
    pub trend: TrendView,
    pub history: Vec<crate::models::TrendSnapshot>,
    pub recent_evidence: Vec<TrendEvidence>,
    pub outcomes: Vec<crate::models::TrendOutcome>,
}

pub async fn trend_retrospective(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> ApiResult<Retrospective> {
    let trend = trends::by_id(&state.pool, &id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    let view = trend_view(&state, trend).await.map_err(internal)?;
    let history = snapshots::history(&state.pool, &id, 90, 2000)
        .await
        .map_err(internal)?;
    let recent_evidence = evidence::for_trend(&state.pool, &id, false, 50)
        .await
        .map_err(internal)?;
    let trend_outcomes = outcomes::for_trend(&state.pool, &id).await.map_err(internal)?;
    Ok(Json(Retrospective {
        trend: view,
        history,
        recent_evidence,
        outcomes: trend_outcomes,
    }))
}

pub async fn simulate_trend(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    Json(mode): Json<SimulationMode>,
) -> ApiResult<SimulationResult> {
    let result = simulate(&state.pool, &state.settings, &id, mode)
        .await
        .map_err(|e| {
            error!("simulation failed: {e:#}");
            StatusCode::BAD_REQUEST
        })?;
    Ok(Json(result))
}

pub async fn trend_outcomes(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> ApiResult<Vec<crate::models::TrendOutcome>> {
    Ok(Json(outcomes::for_trend(&state.pool, &id).await.map_err(internal)?))
}

#[derive(Debug, Deserialize)]
pub struct OutcomeRequest {
    pub outcome: String,
    pub outcome_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

pub async fn record_trend_outcome(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    Json(request): Json<OutcomeRequest>,
) -> ApiResult<serde_json::Value> {
    let kind = OutcomeKind::parse(&request.outcome).ok_or(StatusCode::BAD_REQUEST)?;
    let outcome_id = calibration::record_outcome(
        &state.pool,
        &id,
        kind,
        request.outcome_date.unwrap_or_else(Utc::now),
        request.notes.as_deref(),
    )
    .await
    .map_err(internal)?;
    Ok(Json(serde_json::json!({ "id": outcome_id })))
}

pub async fn trend_definition_history(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> ApiResult<Vec<crate::models::TrendDefinitionVersion>> {
    Ok(Json(
        trends::definition_history(&state.pool, &id).await.map_err(internal)?,
    ))
}

// --- events, budget, review queue ----------------------------------------

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub category: Option<String>,
    pub trend_id: Option<String>,
    pub lifecycle: Option<String>,
    pub contradicted: Option<bool>,
    pub days: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list_events(
    Query(params): Query<EventsQuery>,
    State(state): State<ApiState>,
) -> ApiResult<Vec<Event>> {
    let filter = events::EventFilter {
        category: params.category,
        trend_id: params.trend_id,
        lifecycle: params.lifecycle,
        contradicted: params.contradicted,
        days: params.days,
        limit: params.limit,
    };
    Ok(Json(events::list(&state.pool, &filter).await.map_err(internal)?))
}

#[derive(Debug, Serialize)]
pub struct BudgetView {
    pub usage: Vec<ApiUsage>,
    pub tier1_max_daily_calls: i64,
    pub tier2_max_daily_calls: i64,
    pub embedding_max_daily_calls: i64,
    pub max_daily_tokens: i64,
    pub max_daily_cost_usd: f64,
}

pub async fn budget_today(State(state): State<ApiState>) -> ApiResult<BudgetView> {
    Ok(Json(BudgetView {
        usage: usage::today(&state.pool).await.map_err(internal)?,
        tier1_max_daily_calls: state.settings.tier1_max_daily_calls,
        tier2_max_daily_calls: state.settings.tier2_max_daily_calls,
        embedding_max_daily_calls: state.settings.embedding_max_daily_calls,
        max_daily_tokens: state.settings.max_daily_tokens,
        max_daily_cost_usd: state.settings.max_daily_cost_usd,
    }))
}

pub async fn review_queue(State(state): State<ApiState>) -> ApiResult<Vec<Event>> {
    Ok(Json(events::review_queue(&state.pool, 100).await.map_err(internal)?))
}

// --- taxonomy gaps --------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct GapsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_taxonomy_gaps(
    Query(params): Query<GapsQuery>,
    State(state): State<ApiState>,
) -> ApiResult<Vec<TaxonomyGap>> {
    Ok(Json(
        gaps::list(
            &state.pool,
            params.status.as_deref(),
            params.limit.unwrap_or(100).clamp(1, 500),
        )
        .await
        .map_err(internal)?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct GapTriageRequest {
    pub status: String,
}

pub async fn triage_taxonomy_gap(
    Path(id): Path<Uuid>,
    State(state): State<ApiState>,
    Json(request): Json<GapTriageRequest>,
) -> ApiResult<serde_json::Value> {
    let updated = gaps::set_status(&state.pool, id, &request.status)
        .await
        .map_err(internal)?;
    if !updated {
        return Err(StatusCode::CONFLICT);
    }
    Ok(Json(serde_json::json!({ "id": id, "status": request.status })))
}

// --- feedback -------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FeedbackBody {
    pub action: String,
    pub event_id: Option<Uuid>,
    pub trend_id: Option<String>,
    pub signal_type: Option<String>,
    pub corrected_delta: Option<f64>,
    pub categories: Option<Vec<String>>,
    pub actor: String,
    pub note: Option<String>,
}

pub async fn submit_feedback(
    State(state): State<ApiState>,
    Json(body): Json<FeedbackBody>,
) -> ApiResult<feedback::FeedbackOutcome> {
    let action = FeedbackAction::parse(&body.action).ok_or(StatusCode::BAD_REQUEST)?;
    let request = FeedbackRequest {
        action,
        event_id: body.event_id,
        trend_id: body.trend_id,
        signal_type: body.signal_type,
        corrected_delta: body.corrected_delta,
        categories: body.categories,
        actor: body.actor,
        note: body.note,
    };
    let outcome = feedback::apply(&state.pool, &request).await.map_err(|e| {
        error!("feedback failed: {e:#}");
        StatusCode::BAD_REQUEST
    })?;
    Ok(Json(outcome))
}

// --- replay & calibration -------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ReplayRequest {
    pub name: Option<String>,
    pub max_delta_per_event: Option<f64>,
    pub decay_half_life_override_days: Option<f64>,
    pub cost_per_evidence_usd: Option<f64>,
    pub latency_per_evidence_ms: Option<f64>,
    pub window_days: Option<i64>,
}

pub async fn run_replay(
    State(state): State<ApiState>,
    Json(request): Json<ReplayRequest>,
) -> ApiResult<ReplayReport> {
    let champion = ReplayVariant::champion(&state.settings);
    let challenger = ReplayVariant {
        name: request.name.unwrap_or_else(|| "challenger".into()),
        max_delta_per_event: request
            .max_delta_per_event
            .unwrap_or(champion.max_delta_per_event),
        decay_half_life_override_days: request.decay_half_life_override_days,
        cost_per_evidence_usd: request
            .cost_per_evidence_usd
            .unwrap_or(champion.cost_per_evidence_usd),
        latency_per_evidence_ms: request
            .latency_per_evidence_ms
            .unwrap_or(champion.latency_per_evidence_ms),
    };
    let report = replay::run(
        &state.pool,
        &state.settings,
        challenger,
        request.window_days.unwrap_or(30).clamp(1, 365),
    )
    .await
    .map_err(internal)?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
pub struct CalibrationView {
    pub report: CalibrationReport,
    pub drift: drift::DriftAssessment,
    pub source_reliability: Vec<calibration::SourceReliability>,
}

pub async fn calibration_report(State(state): State<ApiState>) -> ApiResult<CalibrationView> {
    let report = calibration::report(&state.pool).await.map_err(internal)?;
    let thresholds = drift::DriftThresholds {
        brier_warn: state.settings.brier_warn_threshold,
        brier_critical: state.settings.brier_critical_threshold,
        bucket_error_warn: state.settings.bucket_error_warn_threshold,
        bucket_error_critical: state.settings.bucket_error_critical_threshold,
        min_samples: state.settings.calibration_min_samples,
    };
    let assessment = drift::evaluate(&report, &thresholds);
    let reliability = calibration::source_reliability(&state.pool, 10)
        .await
        .map_err(internal)?;
    Ok(Json(CalibrationView {
        report,
        drift: assessment,
        source_reliability: reliability,
    }))
}
