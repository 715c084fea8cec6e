use serde::{Deserialize, Serialize};
use serde_json::Value;
use sieve_core::{ResolveResult, SubmitResult, TransportFailure};

/// Body of `POST /api/files/upload`
#[derive(Debug, Serialize, PartialEq)]
pub struct UploadResponse {
    pub cached: bool,
    pub file_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<bool>,
}

impl TryFrom<SubmitResult> for UploadResponse {
    type Error = TransportFailure;

    fn try_from(result: SubmitResult) -> Result<Self, Self::Error> {
        match result {
            SubmitResult::CacheHit { hash, report } => Ok(Self {
                cached: true,
                file_hash: hash.to_string(),
                analysis_id: None,
                analysis_result: Some(report.into_value()),
                pending: None,
            }),
            SubmitResult::Submitted { analysis_id, hash } => Ok(Self {
                cached: false,
                file_hash: hash.to_string(),
                analysis_id: Some(analysis_id.to_string()),
                analysis_result: None,
                pending: None,
            }),
            SubmitResult::AwaitingReport { hash } => Ok(Self {
                cached: false,
                file_hash: hash.to_string(),
                analysis_id: None,
                analysis_result: None,
                pending: Some(true),
            }),
            SubmitResult::Failed(failure) => Err(failure),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalysisQuery {
    pub file_hash: Option<String>,
}

/// Body of `GET /api/files/analyses/:id`
#[derive(Debug, Serialize, PartialEq)]
pub struct AnalysisResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Value>,
}

impl TryFrom<ResolveResult> for AnalysisResponse {
    type Error = TransportFailure;

    fn try_from(result: ResolveResult) -> Result<Self, Self::Error> {
        match result {
            ResolveResult::Pending => Ok(Self {
                status: "pending",
                file_hash: None,
                report: None,
            }),
            ResolveResult::Completed { hash, report } => Ok(Self {
                status: "completed",
                file_hash: hash.map(|h| h.to_string()),
                report: report.map(|r| r.into_value()),
            }),
            ResolveResult::Failed(failure) => Err(failure),
        }
    }
}
