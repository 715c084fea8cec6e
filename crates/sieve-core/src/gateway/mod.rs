//! Wire boundary to the external scanning provider
//!
//! Gateways perform exactly one HTTP exchange per call and never retry.
//! Every non-success outcome is returned as a value, not raised.

mod virustotal;

pub use virustotal::{GatewayConfig, VirusTotalGateway};

use crate::{AnalysisId, ContentHash, Report, TransportFailure};
use async_trait::async_trait;

/// Result of uploading a file
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Accepted(AnalysisId),
    /// The provider already has this content (HTTP 409)
    AlreadyKnown,
    Failed(TransportFailure),
}

/// Progress of an analysis by id
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisStatus {
    Pending,
    /// Finished; carries the analysed file's digest when the provider sent one
    Completed(Option<ContentHash>),
    Failed(TransportFailure),
}

#[async_trait]
pub trait ScanGateway: Send + Sync {
    async fn submit(&self, filename: &str, bytes: &[u8], content_type: &str) -> SubmitOutcome;

    async fn fetch_analysis(&self, analysis_id: &AnalysisId) -> AnalysisStatus;

    async fn fetch_report_by_hash(&self, hash: &ContentHash) -> Result<Report, TransportFailure>;
}
