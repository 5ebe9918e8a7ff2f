//! HTTP surface for team listing, submission intake, results, the
//! leaderboard, and the admin dispatch/status endpoints.

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::Value;

use crate::db;
use crate::dispatcher;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::{AdminPrincipal, Principal};
use crate::models::{LeaderboardRow, Team};
use crate::state::AppState;

pub async fn teams(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let teams: Vec<Team> = db::list_teams(&state.pool).await?;
    Ok(Json(serde_json::json!({ "teams": teams })))
}

#[derive(Debug, serde::Deserialize)]
pub struct SubmitRequest {
    pub predict: Value,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    #[serde(rename = "predictionId")]
    pub prediction_id: uuid::Uuid,
}

/// Accepts a prediction payload as-is; the nested wrapper-array quirk
/// documented for this format is tolerated, not validated, at intake.
pub async fn submit(
    State(state): State<AppState>,
    principal: Principal,
    Json(req): Json<SubmitRequest>,
) -> AppResult<(axum::http::StatusCode, Json<SubmitResponse>)> {
    if !req.predict.is_object() {
        return Err(AppError::InvalidPredictionFormat);
    }

    let submission = db::insert_submission(&state.pool, principal.user_id, req.predict).await?;
    Ok((
        axum::http::StatusCode::CREATED,
        Json(SubmitResponse {
            prediction_id: submission.id,
        }),
    ))
}

pub async fn results(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<Value>> {
    let rows = db::results_for_user(&state.pool, principal.user_id).await?;
    let views: Vec<ResultView> = rows.iter().map(ResultView::from).collect();
    Ok(Json(serde_json::json!({ "results": views })))
}

#[derive(Debug, Serialize)]
pub struct ResultView {
    #[serde(rename = "submissionId")]
    pub submission_id: uuid::Uuid,
    #[serde(rename = "totalScore")]
    pub total_score: i32,
    pub details: Value,
    #[serde(rename = "processedAt")]
    pub processed_at: chrono::DateTime<chrono::Utc>,
}

impl From<&crate::models::PredictionResult> for ResultView {
    fn from(r: &crate::models::PredictionResult) -> Self {
        Self {
            submission_id: r.submission_id,
            total_score: r.total_score,
            details: r.details.clone(),
            processed_at: r.processed_at,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default = "default_leaderboard_limit")]
    pub limit: i64,
}

fn default_leaderboard_limit() -> i64 {
    100
}

pub async fn leaderboard(
    State(state): State<AppState>,
    axum::extract::Query(query): axum::extract::Query<LeaderboardQuery>,
) -> AppResult<Json<Value>> {
    let rows = db::leaderboard(&state.pool, query.limit).await?;
    let ranked: Vec<LeaderboardRow> = rows
        .into_iter()
        .enumerate()
        .map(|(i, r)| LeaderboardRow {
            rank: i as i64 + 1,
            user_id: r.user_id,
            total_score: r.total_score,
            processed_at: r.processed_at,
        })
        .collect();
    Ok(Json(serde_json::json!({ "leaderboard": ranked })))
}

/// Manually trigger one dispatch pass. Scoring itself always happens
/// asynchronously in the worker; this only forces the dispatcher to
/// re-scan immediately rather than waiting for its schedule.
pub async fn trigger_processing(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
) -> AppResult<Json<dispatcher::DispatchReport>> {
    let report = dispatcher::dispatch_once(
        &state.pool,
        &state.cache,
        &state.broker,
        &state.config.broker.queue,
        &state.config.dispatch,
    )
    .await?;
    Ok(Json(report))
}

pub async fn processing_status(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
) -> AppResult<Json<dispatcher::ProcessingStatus>> {
    Ok(Json(
        dispatcher::processing_status(&state.pool, &state.cache, &state.broker, &state.config.broker.queue).await?,
    ))
}
