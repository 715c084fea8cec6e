//! VirusTotal v3 HTTP adapter

use super::{AnalysisStatus, ScanGateway, SubmitOutcome};
use crate::{AnalysisId, ContentHash, CoreResult, Report, TransportFailure};
use async_trait::async_trait;
use reqwest::{multipart, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Scanning provider connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,

    /// Sent as `x-apikey`
    pub api_key: String,

    /// Request timeout (seconds)
    pub timeout_secs: u64,

    pub user_agent: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: crate::env_or("VIRUSTOTAL_BASE_URL", "https://www.virustotal.com/api/v3"),
            api_key: std::env::var("VIRUSTOTAL_API_KEY").unwrap_or_default(),
            timeout_secs: std::env::var("SIEVE_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            user_agent: format!("sieve/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Gateway to the VirusTotal v3 REST API
pub struct VirusTotalGateway {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl VirusTotalGateway {
    pub fn new(config: GatewayConfig) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(self.url(path))
            .header("accept", "application/json")
            .header("x-apikey", &self.config.api_key)
    }

    /// Send a request and read the whole body, folding every failure into
    /// a `TransportFailure`.
    async fn exchange(request: reqwest::RequestBuilder) -> Result<(StatusCode, String), TransportFailure> {
        let response = request
            .send()
            .await
            .map_err(|e| TransportFailure::unreachable(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportFailure::new(status.as_u16(), format!("unreadable body: {}", e)))?;
        Ok((status, body))
    }
}

#[async_trait]
impl ScanGateway for VirusTotalGateway {
    async fn submit(&self, filename: &str, bytes: &[u8], content_type: &str) -> SubmitOutcome {
        let part = match multipart::Part::bytes(bytes.to_vec())
            .file_name(filename.to_string())
            .mime_str(content_type)
        {
            Ok(part) => part,
            // Unparseable client-supplied content type; let the provider sniff it
            Err(_) => multipart::Part::bytes(bytes.to_vec()).file_name(filename.to_string()),
        };
        let form = multipart::Form::new().part("file", part);

        let request = self
            .client
            .post(self.url("files"))
            .header("accept", "application/json")
            .header("x-apikey", &self.config.api_key)
            .multipart(form);

        debug!("Uploading {} ({} bytes)", filename, bytes.len());
        match Self::exchange(request).await {
            Ok((status, body)) => parse_submit_response(status, &body),
            Err(failure) => SubmitOutcome::Failed(failure),
        }
    }

    async fn fetch_analysis(&self, analysis_id: &AnalysisId) -> AnalysisStatus {
        let request = self.get(&format!("analyses/{}", analysis_id));
        match Self::exchange(request).await {
            Ok((status, body)) => parse_analysis_response(status, &body),
            Err(failure) => AnalysisStatus::Failed(failure),
        }
    }

    async fn fetch_report_by_hash(&self, hash: &ContentHash) -> Result<Report, TransportFailure> {
        let (status, body) = Self::exchange(self.get(&format!("files/{}", hash))).await?;
        parse_report_response(status, &body)
    }
}

fn parse_submit_response(status: StatusCode, body: &str) -> SubmitOutcome {
    if status == StatusCode::CONFLICT {
        return SubmitOutcome::AlreadyKnown;
    }
    if !status.is_success() {
        warn!("Upload rejected: {} - {}", status.as_u16(), body);
        return SubmitOutcome::Failed(TransportFailure::new(status.as_u16(), body));
    }

    let id = serde_json::from_str::<Value>(body).ok().and_then(|json| {
        json.pointer("/data/id")
            .and_then(Value::as_str)
            .and_then(|id| AnalysisId::parse(id).ok())
    });

    match id {
        Some(id) => SubmitOutcome::Accepted(id),
        None => SubmitOutcome::Failed(TransportFailure::new(status.as_u16(), "missing analysis id")),
    }
}

fn parse_analysis_response(status: StatusCode, body: &str) -> AnalysisStatus {
    if !status.is_success() {
        return AnalysisStatus::Failed(TransportFailure::new(status.as_u16(), body));
    }

    let json: Value = match serde_json::from_str(body) {
        Ok(json) => json,
        Err(e) => {
            return AnalysisStatus::Failed(TransportFailure::new(
                status.as_u16(),
                format!("malformed analysis body: {}", e),
            ))
        }
    };

    match json.pointer("/data/attributes/status").and_then(Value::as_str) {
        Some("completed") => {
            let sha256 = json
                .pointer("/meta/file_info/sha256")
                .and_then(Value::as_str)
                .and_then(|h| ContentHash::parse(h).ok());
            AnalysisStatus::Completed(sha256)
        }
        other => {
            debug!("Analysis status {:?}", other);
            AnalysisStatus::Pending
        }
    }
}

fn parse_report_response(status: StatusCode, body: &str) -> Result<Report, TransportFailure> {
    if !status.is_success() {
        return Err(TransportFailure::new(status.as_u16(), body));
    }
    serde_json::from_str(body)
        .map(Report::new)
        .map_err(|e| TransportFailure::new(status.as_u16(), format!("malformed report body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_submit_accepted() {
        let body = r#"{"data": {"type": "analysis", "id": "OGJhODJlZWUxZDNi==",
            "links": {"self": "https://www.virustotal.com/api/v3/analyses/OGJhODJlZWUxZDNi=="}}}"#;
        let outcome = parse_submit_response(StatusCode::OK, body);
        assert_eq!(
            outcome,
            SubmitOutcome::Accepted(AnalysisId::parse("OGJhODJlZWUxZDNi==").unwrap())
        );
    }

    #[test]
    fn test_submit_conflict_is_already_known() {
        let outcome = parse_submit_response(StatusCode::CONFLICT, r#"{"error": {"code": "AlreadyExistsError"}}"#);
        assert_eq!(outcome, SubmitOutcome::AlreadyKnown);
    }

    #[test]
    fn test_submit_failure_keeps_status_and_body() {
        let outcome = parse_submit_response(StatusCode::UNAUTHORIZED, "WrongCredentialsError");
        assert_eq!(
            outcome,
            SubmitOutcome::Failed(TransportFailure::new(401, "WrongCredentialsError"))
        );
    }

    #[test]
    fn test_submit_success_without_id() {
        let outcome = parse_submit_response(StatusCode::OK, r#"{"data": {}}"#);
        assert!(matches!(outcome, SubmitOutcome::Failed(ref f) if f.status == Some(200)));
    }

    #[test]
    fn test_analysis_queued_is_pending() {
        let body = r#"{"data": {"attributes": {"status": "queued", "stats": {}}}}"#;
        assert_eq!(parse_analysis_response(StatusCode::OK, body), AnalysisStatus::Pending);

        let body = r#"{"data": {"attributes": {"status": "in-progress"}}}"#;
        assert_eq!(parse_analysis_response(StatusCode::OK, body), AnalysisStatus::Pending);
    }

    #[test]
    fn test_analysis_completed_carries_sha256() {
        let body = format!(
            r#"{{"data": {{"attributes": {{"status": "completed"}}}}, "meta": {{"file_info": {{"sha256": "{}"}}}}}}"#,
            HASH
        );
        assert_eq!(
            parse_analysis_response(StatusCode::OK, &body),
            AnalysisStatus::Completed(Some(ContentHash::parse(HASH).unwrap()))
        );

        let body = r#"{"data": {"attributes": {"status": "completed"}}}"#;
        assert_eq!(
            parse_analysis_response(StatusCode::OK, body),
            AnalysisStatus::Completed(None)
        );
    }

    #[test]
    fn test_analysis_not_found() {
        let status = parse_analysis_response(StatusCode::NOT_FOUND, "NotFoundError");
        assert_eq!(status, AnalysisStatus::Failed(TransportFailure::new(404, "NotFoundError")));
    }

    #[test]
    fn test_report_parsing() {
        let report = parse_report_response(
            StatusCode::OK,
            r#"{"data": {"attributes": {"last_analysis_stats": {"undetected": 60}}}}"#,
        )
        .unwrap();
        assert_eq!(report.total_engines(), 60);

        let err = parse_report_response(StatusCode::OK, "<html>").unwrap_err();
        assert_eq!(err.status, Some(200));

        let err = parse_report_response(StatusCode::NOT_FOUND, "NotFoundError").unwrap_err();
        assert_eq!(err, TransportFailure::new(404, "NotFoundError"));
    }

    #[test]
    fn test_url_joining() {
        let gateway = VirusTotalGateway::new(GatewayConfig {
            base_url: "https://example.test/api/v3/".into(),
            api_key: "k".into(),
            timeout_secs: 5,
            user_agent: "test".into(),
        })
        .unwrap();
        assert_eq!(gateway.url("files"), "https://example.test/api/v3/files");
    }
}
