//! Remediation guidance routes

use crate::{auth::AuthUser, error::ApiError, models::RecommendationResponse, AppState};
use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;
use sieve_core::{ContentHash, Report};
use std::sync::Arc;

/// Summarize a report supplied in the request body
pub async fn recommend(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Json(body): Json<Value>,
) -> Result<Json<RecommendationResponse>, ApiError> {
    if !body.is_object() {
        return Err(ApiError::BadRequest("expected a report object".to_string()));
    }

    let recommendation = state.recommender.summarize(&Report::new(body)).await?;
    Ok(Json(RecommendationResponse { recommendation }))
}

/// Summarize the report stored, or fetchable, for a content hash
pub async fn recommend_for_hash(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(hash): Path<String>,
) -> Result<Json<RecommendationResponse>, ApiError> {
    let hash = ContentHash::parse(&hash)?;
    let report = state.orchestrator.report_by_hash(&hash).await??;
    if !report.is_usable() {
        return Err(ApiError::NotReady(format!("no engine verdicts for {} yet", hash)));
    }

    let recommendation = state.recommender.summarize(&report).await?;
    Ok(Json(RecommendationResponse { recommendation }))
}
