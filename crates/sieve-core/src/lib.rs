//! Sieve Core - scan-result acquisition and caching
//!
//! This crate drives uploaded files through an external malware-scanning
//! provider, caches the verdicts by content hash, and turns a stored report
//! into a short remediation summary through a text-completion service.

pub mod gateway;
pub mod hashing;
pub mod orchestrator;
pub mod recommend;
pub mod report;
pub mod sniff;
pub mod store;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use gateway::{AnalysisStatus, GatewayConfig, ScanGateway, SubmitOutcome, VirusTotalGateway};
pub use hashing::{hash_bytes, AnalysisId, ContentHash};
pub use orchestrator::{OrchestratorConfig, ResolveResult, ScanOrchestrator, SubmitResult};
pub use recommend::{ChatCompletionClient, Recommender, ReportDigest, SummarizerConfig, Summarizer};
pub use report::{EngineStatistics, Report};
pub use sniff::detect_type;
pub use store::{
    AnalysisRecord, MemoryResultStore, PgResultStore, RecordUpdate, ReportState, ResultStore,
};

/// A non-success exchange with an upstream provider.
///
/// `status` is `None` when no HTTP response was received at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportFailure {
    pub status: Option<u16>,
    pub body: String,
}

impl TransportFailure {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            body: body.into(),
        }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            status: None,
            body: message.into(),
        }
    }
}

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} - {}", status, self.body),
            None => write!(f, "no response - {}", self.body),
        }
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Provider request failed: {0}")]
    Transport(TransportFailure),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Summarization unavailable: {0}")]
    SummarizationUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<TransportFailure> for CoreError {
    fn from(failure: TransportFailure) -> Self {
        CoreError::Transport(failure)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Read a boolean switch from the environment, accepting the usual spellings.
pub(crate) fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

pub(crate) fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
