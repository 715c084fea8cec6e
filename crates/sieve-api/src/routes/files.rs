//! File submission and analysis routes

use crate::{
    auth::AuthUser,
    error::ApiError,
    models::{AnalysisQuery, AnalysisResponse, UploadResponse},
    AppState,
};
use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use serde_json::Value;
use sieve_core::{AnalysisId, ContentHash};
use std::sync::Arc;
use tracing::info;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or("upload.bin").to_string();
            let content_type = field.content_type().unwrap_or(DEFAULT_CONTENT_TYPE).to_string();
            let data = field.bytes().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
            upload = Some((file_name, content_type, data));
        }
    }

    let Some((file_name, content_type, data)) = upload else {
        return Err(ApiError::BadRequest("missing multipart field 'file'".to_string()));
    };
    if data.is_empty() {
        return Err(ApiError::BadRequest("uploaded file is empty".to_string()));
    }

    info!(
        "User {} <{}> uploading {} ({} bytes)",
        user.id,
        user.email.as_deref().unwrap_or("no email"),
        file_name,
        data.len()
    );

    let result = state.orchestrator.submit(&file_name, &data, &content_type).await?;
    Ok(Json(UploadResponse::try_from(result)?))
}

pub async fn get_analysis(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<AnalysisQuery>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let analysis_id = AnalysisId::parse(&id)?;
    let hash = query.file_hash.as_deref().map(ContentHash::parse).transpose()?;

    let result = state.orchestrator.resolve(&analysis_id, hash.as_ref()).await?;
    Ok(Json(AnalysisResponse::try_from(result)?))
}

pub async fn get_report(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(hash): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let hash = ContentHash::parse(&hash)?;
    let report = state.orchestrator.report_by_hash(&hash).await??;
    Ok(Json(report.into_value()))
}
