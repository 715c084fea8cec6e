//! Scan orchestration
//!
//! Decides between cache hit, provider shortcut, upload and polling for a
//! single file. Polling itself is left to the caller: `resolve` performs one
//! round of checks and returns.

use crate::gateway::{AnalysisStatus, ScanGateway, SubmitOutcome};
use crate::store::{RecordUpdate, ResultStore};
use crate::{hash_bytes, sniff, AnalysisId, ContentHash, CoreResult, Report, TransportFailure};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Ask the provider for an existing report before uploading
    pub prefetch_by_hash: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            prefetch_by_hash: crate::env_flag("SIEVE_PREFETCH_BY_HASH", true),
        }
    }
}

/// Outcome of `submit`
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitResult {
    /// A usable report, from the local cache or fetched in this call
    CacheHit { hash: ContentHash, report: Report },
    /// Uploaded; poll `resolve` with the analysis id
    Submitted { analysis_id: AnalysisId, hash: ContentHash },
    /// The provider knows the content but has no verdict yet; poll the
    /// report by hash
    AwaitingReport { hash: ContentHash },
    Failed(TransportFailure),
}

/// Outcome of `resolve`
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveResult {
    Pending,
    /// The analysis finished. `report` is `None` when the follow-up report
    /// fetch failed or returned no verdicts yet.
    Completed {
        hash: Option<ContentHash>,
        report: Option<Report>,
    },
    Failed(TransportFailure),
}

/// Drives files through the scanning provider and the result cache
pub struct ScanOrchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn ResultStore>,
    gateway: Arc<dyn ScanGateway>,
}

impl ScanOrchestrator {
    pub fn new(store: Arc<dyn ResultStore>, gateway: Arc<dyn ScanGateway>) -> Self {
        Self::with_config(OrchestratorConfig::default(), store, gateway)
    }

    pub fn with_config(
        config: OrchestratorConfig,
        store: Arc<dyn ResultStore>,
        gateway: Arc<dyn ScanGateway>,
    ) -> Self {
        Self {
            config,
            store,
            gateway,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Submit a file, reusing any usable cached or upstream report.
    ///
    /// At most one upload happens per distinct content while a usable report
    /// is cached.
    pub async fn submit(
        &self,
        filename: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> CoreResult<SubmitResult> {
        let hash = hash_bytes(bytes);

        if let Some(report) = self.cached_report(&hash).await? {
            debug!("Cache hit for {}", hash);
            return Ok(SubmitResult::CacheHit { hash, report });
        }

        // Captured now: the filename is gone by the time a report arrives
        let type_label = sniff::detect_type(Some(filename), Some(bytes));

        if self.config.prefetch_by_hash {
            if let Some(report) = self.fetch_usable_report(&hash).await {
                self.persist_report(&hash, report.clone(), type_label).await?;
                return Ok(SubmitResult::CacheHit { hash, report });
            }
        }

        match self.gateway.submit(filename, bytes, content_type).await {
            SubmitOutcome::Accepted(analysis_id) => {
                info!("Submitted {} as analysis {}", hash, analysis_id);
                self.store
                    .upsert(&hash, RecordUpdate::pending().with_type_label(type_label))
                    .await?;
                Ok(SubmitResult::Submitted { analysis_id, hash })
            }
            SubmitOutcome::AlreadyKnown => {
                debug!("Provider already knows {}", hash);
                match self.gateway.fetch_report_by_hash(&hash).await {
                    Ok(report) if report.is_usable() => {
                        self.persist_report(&hash, report.clone(), type_label).await?;
                        Ok(SubmitResult::CacheHit { hash, report })
                    }
                    Ok(_) => {
                        debug!("Report for {} has no verdicts yet", hash);
                        self.store
                            .upsert(&hash, RecordUpdate::pending().with_type_label(type_label))
                            .await?;
                        Ok(SubmitResult::AwaitingReport { hash })
                    }
                    Err(failure) => {
                        warn!("Report fetch for known file {} failed: {}", hash, failure);
                        Ok(SubmitResult::Failed(failure))
                    }
                }
            }
            SubmitOutcome::Failed(failure) => {
                warn!("Upload of {} failed: {}", hash, failure);
                Ok(SubmitResult::Failed(failure))
            }
        }
    }

    /// One polling round for a submitted analysis.
    pub async fn resolve(
        &self,
        analysis_id: &AnalysisId,
        hash: Option<&ContentHash>,
    ) -> CoreResult<ResolveResult> {
        match self.gateway.fetch_analysis(analysis_id).await {
            AnalysisStatus::Pending => {
                // The by-hash endpoint sometimes finishes before the analysis does
                if let Some(hash) = hash {
                    if let Some(report) = self.fetch_usable_report(hash).await {
                        info!("Report for {} ready before analysis {}", hash, analysis_id);
                        self.persist_report(hash, report.clone(), None).await?;
                        return Ok(ResolveResult::Completed {
                            hash: Some(hash.clone()),
                            report: Some(report),
                        });
                    }
                }
                debug!("Analysis {} still pending", analysis_id);
                Ok(ResolveResult::Pending)
            }
            AnalysisStatus::Completed(sha256) => {
                let Some(hash) = sha256.or_else(|| hash.cloned()) else {
                    warn!("Analysis {} completed without a file hash", analysis_id);
                    return Ok(ResolveResult::Completed {
                        hash: None,
                        report: None,
                    });
                };

                let report = match self.gateway.fetch_report_by_hash(&hash).await {
                    Ok(report) if report.is_usable() => {
                        self.persist_report(&hash, report.clone(), None).await?;
                        Some(report)
                    }
                    Ok(_) => {
                        debug!("Report for {} has no verdicts yet", hash);
                        None
                    }
                    Err(failure) => {
                        warn!("Report fetch for {} failed: {}", hash, failure);
                        None
                    }
                };

                Ok(ResolveResult::Completed {
                    hash: Some(hash),
                    report,
                })
            }
            AnalysisStatus::Failed(failure) => {
                warn!("Analysis {} lookup failed: {}", analysis_id, failure);
                Ok(ResolveResult::Failed(failure))
            }
        }
    }

    /// Report for a hash, from the cache when usable, else from the provider.
    ///
    /// Reports without verdicts are returned but never cached.
    pub async fn report_by_hash(&self, hash: &ContentHash) -> CoreResult<Result<Report, TransportFailure>> {
        if let Some(report) = self.cached_report(hash).await? {
            return Ok(Ok(report));
        }

        match self.gateway.fetch_report_by_hash(hash).await {
            Ok(report) => {
                if report.is_usable() {
                    self.persist_report(hash, report.clone(), None).await?;
                }
                Ok(Ok(report))
            }
            Err(failure) => Ok(Err(failure)),
        }
    }

    async fn cached_report(&self, hash: &ContentHash) -> CoreResult<Option<Report>> {
        let record = self.store.lookup(hash).await?;
        Ok(record.and_then(|r| r.usable_report().cloned()))
    }

    /// Provider report for `hash` if it exists and passes the staleness rule
    async fn fetch_usable_report(&self, hash: &ContentHash) -> Option<Report> {
        match self.gateway.fetch_report_by_hash(hash).await {
            Ok(report) if report.is_usable() => Some(report),
            Ok(_) => None,
            Err(failure) => {
                debug!("No upstream report for {}: {}", hash, failure);
                None
            }
        }
    }

    async fn persist_report(
        &self,
        hash: &ContentHash,
        report: Report,
        type_label: Option<String>,
    ) -> CoreResult<()> {
        self.store
            .upsert(hash, RecordUpdate::ready(report).with_type_label(type_label))
            .await?;
        info!("Stored report for {}", hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures::{report_with, stale_report};
    use crate::store::{MemoryResultStore, ReportState};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted gateway that counts every call
    #[derive(Default)]
    struct FakeGateway {
        submit_outcomes: Mutex<VecDeque<SubmitOutcome>>,
        analysis_statuses: Mutex<VecDeque<AnalysisStatus>>,
        reports: Mutex<HashMap<ContentHash, Result<Report, TransportFailure>>>,
        submits: AtomicUsize,
        analysis_fetches: AtomicUsize,
        report_fetches: AtomicUsize,
    }

    impl FakeGateway {
        fn on_submit(&self, outcome: SubmitOutcome) {
            self.submit_outcomes.lock().unwrap().push_back(outcome);
        }

        fn on_analysis(&self, status: AnalysisStatus) {
            self.analysis_statuses.lock().unwrap().push_back(status);
        }

        fn set_report(&self, hash: &ContentHash, report: Result<Report, TransportFailure>) {
            self.reports.lock().unwrap().insert(hash.clone(), report);
        }

        fn calls(&self) -> usize {
            self.submits.load(Ordering::SeqCst)
                + self.analysis_fetches.load(Ordering::SeqCst)
                + self.report_fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ScanGateway for FakeGateway {
        async fn submit(&self, _filename: &str, _bytes: &[u8], _content_type: &str) -> SubmitOutcome {
            self.submits.fetch_add(1, Ordering::SeqCst);
            self.submit_outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| SubmitOutcome::Failed(TransportFailure::new(500, "unscripted")))
        }

        async fn fetch_analysis(&self, _analysis_id: &AnalysisId) -> AnalysisStatus {
            self.analysis_fetches.fetch_add(1, Ordering::SeqCst);
            self.analysis_statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(AnalysisStatus::Pending)
        }

        async fn fetch_report_by_hash(&self, hash: &ContentHash) -> Result<Report, TransportFailure> {
            self.report_fetches.fetch_add(1, Ordering::SeqCst);
            self.reports
                .lock()
                .unwrap()
                .get(hash)
                .cloned()
                .unwrap_or_else(|| Err(TransportFailure::new(404, "NotFoundError")))
        }
    }

    fn setup(prefetch_by_hash: bool) -> (ScanOrchestrator, Arc<MemoryResultStore>, Arc<FakeGateway>) {
        let store = Arc::new(MemoryResultStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let orchestrator = ScanOrchestrator::with_config(
            OrchestratorConfig { prefetch_by_hash },
            store.clone(),
            gateway.clone(),
        );
        (orchestrator, store, gateway)
    }

    fn analysis_id(id: &str) -> AnalysisId {
        AnalysisId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn test_second_submit_hits_cache_without_gateway_calls() {
        let (orchestrator, _store, gateway) = setup(true);
        let bytes = b"known sample";
        let hash = hash_bytes(bytes);
        gateway.set_report(&hash, Ok(report_with(40, 2)));

        let first = orchestrator.submit("sample.exe", bytes, "application/octet-stream").await.unwrap();
        assert!(matches!(first, SubmitResult::CacheHit { .. }));
        let calls_after_first = gateway.calls();

        let second = orchestrator.submit("sample.exe", bytes, "application/octet-stream").await.unwrap();
        assert_eq!(
            second,
            SubmitResult::CacheHit {
                hash: hash.clone(),
                report: report_with(40, 2)
            }
        );
        assert_eq!(gateway.calls(), calls_after_first);
    }

    #[tokio::test]
    async fn test_prefetch_shortcut_skips_upload() {
        let (orchestrator, store, gateway) = setup(true);
        let bytes = b"seen elsewhere";
        let hash = hash_bytes(bytes);
        gateway.set_report(&hash, Ok(report_with(70, 0)));

        let result = orchestrator.submit("doc.pdf", bytes, "application/pdf").await.unwrap();
        assert!(matches!(result, SubmitResult::CacheHit { .. }));
        assert_eq!(gateway.submits.load(Ordering::SeqCst), 0);

        let record = store.lookup(&hash).await.unwrap().unwrap();
        assert_eq!(record.type_label.as_deref(), Some(".pdf"));
    }

    #[tokio::test]
    async fn test_stale_cached_report_is_not_a_hit() {
        let (orchestrator, store, gateway) = setup(false);
        let bytes = b"stale";
        let hash = hash_bytes(bytes);
        store.upsert(&hash, RecordUpdate::ready(stale_report())).await.unwrap();
        gateway.on_submit(SubmitOutcome::Accepted(analysis_id("A1")));

        let result = orchestrator.submit("stale.bin", bytes, "application/octet-stream").await.unwrap();
        assert_eq!(
            result,
            SubmitResult::Submitted {
                analysis_id: analysis_id("A1"),
                hash
            }
        );
        assert_eq!(gateway.submits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_upstream_report_falls_through_to_upload() {
        let (orchestrator, _store, gateway) = setup(true);
        let bytes = b"fresh upload";
        gateway.set_report(&hash_bytes(bytes), Ok(stale_report()));
        gateway.on_submit(SubmitOutcome::Accepted(analysis_id("A2")));

        let result = orchestrator.submit("fresh.txt", bytes, "text/plain").await.unwrap();
        assert!(matches!(result, SubmitResult::Submitted { .. }));
    }

    #[tokio::test]
    async fn test_accepted_persists_pending_with_type_label() {
        let (orchestrator, store, gateway) = setup(false);
        let bytes = b"\x1f\x8b\x08\x00 fake gzip";
        let hash = hash_bytes(bytes);
        gateway.on_submit(SubmitOutcome::Accepted(analysis_id("A3")));

        orchestrator.submit("logs.tar.gz", bytes, "application/gzip").await.unwrap();

        let record = store.lookup(&hash).await.unwrap().unwrap();
        assert_eq!(record.type_label.as_deref(), Some(".tar.gz"));
        assert_eq!(record.report, ReportState::Pending);
        assert!(record.usable_report().is_none());
    }

    #[tokio::test]
    async fn test_already_known_returns_hit_in_same_call() {
        let (orchestrator, store, gateway) = setup(false);
        let bytes = b"already uploaded by someone";
        let hash = hash_bytes(bytes);
        gateway.on_submit(SubmitOutcome::AlreadyKnown);
        gateway.set_report(&hash, Ok(report_with(55, 10)));

        let result = orchestrator.submit("x.dll", bytes, "application/octet-stream").await.unwrap();
        assert_eq!(
            result,
            SubmitResult::CacheHit {
                hash: hash.clone(),
                report: report_with(55, 10)
            }
        );
        assert_eq!(gateway.report_fetches.load(Ordering::SeqCst), 1);
        assert!(store.lookup(&hash).await.unwrap().unwrap().usable_report().is_some());
    }

    #[tokio::test]
    async fn test_already_known_with_stale_report_awaits() {
        let (orchestrator, store, gateway) = setup(false);
        let bytes = b"known but unscanned";
        let hash = hash_bytes(bytes);
        gateway.on_submit(SubmitOutcome::AlreadyKnown);
        gateway.set_report(&hash, Ok(stale_report()));

        let result = orchestrator.submit("y.bin", bytes, "application/octet-stream").await.unwrap();
        assert_eq!(result, SubmitResult::AwaitingReport { hash: hash.clone() });
        assert!(store.lookup(&hash).await.unwrap().unwrap().usable_report().is_none());
    }

    #[tokio::test]
    async fn test_resubmit_while_pending_keeps_marker_and_label() {
        let (orchestrator, store, gateway) = setup(false);
        let bytes = b"%PDF-1.7 still scanning";
        let hash = hash_bytes(bytes);
        gateway.on_submit(SubmitOutcome::Accepted(analysis_id("A11")));
        gateway.on_submit(SubmitOutcome::AlreadyKnown);
        gateway.set_report(&hash, Ok(stale_report()));

        orchestrator.submit("invoice.pdf", bytes, "application/pdf").await.unwrap();
        let again = orchestrator.submit("upload", bytes, "application/pdf").await.unwrap();
        assert_eq!(again, SubmitResult::AwaitingReport { hash: hash.clone() });

        let record = store.lookup(&hash).await.unwrap().unwrap();
        assert_eq!(record.report, ReportState::Pending);
        assert_eq!(record.type_label.as_deref(), Some(".pdf"));
    }

    #[tokio::test]
    async fn test_already_known_with_failed_fetch() {
        let (orchestrator, _store, gateway) = setup(false);
        gateway.on_submit(SubmitOutcome::AlreadyKnown);

        let result = orchestrator.submit("z.bin", b"z", "application/octet-stream").await.unwrap();
        assert_eq!(
            result,
            SubmitResult::Failed(TransportFailure::new(404, "NotFoundError"))
        );
    }

    #[tokio::test]
    async fn test_upload_failure_persists_nothing() {
        let (orchestrator, store, gateway) = setup(false);
        let bytes = b"rejected";
        gateway.on_submit(SubmitOutcome::Failed(TransportFailure::new(429, "QuotaExceededError")));

        let result = orchestrator.submit("r.bin", bytes, "application/octet-stream").await.unwrap();
        assert_eq!(
            result,
            SubmitResult::Failed(TransportFailure::new(429, "QuotaExceededError"))
        );
        assert!(store.lookup(&hash_bytes(bytes)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_submit_resolve_scenario() {
        let (orchestrator, store, gateway) = setup(true);
        let bytes = b"unseen file X";
        let hash = hash_bytes(bytes);

        gateway.on_submit(SubmitOutcome::Accepted(analysis_id("A1")));
        let submitted = orchestrator.submit("x.exe", bytes, "application/octet-stream").await.unwrap();
        assert_eq!(
            submitted,
            SubmitResult::Submitted {
                analysis_id: analysis_id("A1"),
                hash: hash.clone()
            }
        );

        // Provider still queued and nothing by hash yet
        gateway.on_analysis(AnalysisStatus::Pending);
        let pending = orchestrator.resolve(&analysis_id("A1"), Some(&hash)).await.unwrap();
        assert_eq!(pending, ResolveResult::Pending);

        // Provider completed
        gateway.on_analysis(AnalysisStatus::Completed(Some(hash.clone())));
        gateway.set_report(&hash, Ok(report_with(40, 0)));
        let completed = orchestrator.resolve(&analysis_id("A1"), Some(&hash)).await.unwrap();
        assert_eq!(
            completed,
            ResolveResult::Completed {
                hash: Some(hash.clone()),
                report: Some(report_with(40, 0))
            }
        );

        let record = store.lookup(&hash).await.unwrap().unwrap();
        assert_eq!(record.type_label.as_deref(), Some(".exe"));

        let calls = gateway.calls();
        let again = orchestrator.submit("x.exe", bytes, "application/octet-stream").await.unwrap();
        assert_eq!(
            again,
            SubmitResult::CacheHit {
                hash,
                report: report_with(40, 0)
            }
        );
        assert_eq!(gateway.calls(), calls);
    }

    #[tokio::test]
    async fn test_pending_falls_back_to_report_by_hash() {
        let (orchestrator, store, gateway) = setup(false);
        let hash = hash_bytes(b"fast report");
        gateway.on_analysis(AnalysisStatus::Pending);
        gateway.set_report(&hash, Ok(report_with(30, 1)));

        let result = orchestrator.resolve(&analysis_id("A4"), Some(&hash)).await.unwrap();
        assert_eq!(
            result,
            ResolveResult::Completed {
                hash: Some(hash.clone()),
                report: Some(report_with(30, 1))
            }
        );
        assert!(store.lookup(&hash).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pending_with_stale_fallback_stays_pending() {
        let (orchestrator, store, gateway) = setup(false);
        let hash = hash_bytes(b"slow report");
        gateway.on_analysis(AnalysisStatus::Pending);
        gateway.set_report(&hash, Ok(stale_report()));

        let result = orchestrator.resolve(&analysis_id("A5"), Some(&hash)).await.unwrap();
        assert_eq!(result, ResolveResult::Pending);
        assert!(store.lookup(&hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_without_hash_skips_fallback() {
        let (orchestrator, _store, gateway) = setup(false);
        gateway.on_analysis(AnalysisStatus::Pending);

        let result = orchestrator.resolve(&analysis_id("A6"), None).await.unwrap();
        assert_eq!(result, ResolveResult::Pending);
        assert_eq!(gateway.report_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_completed_with_failed_report_fetch() {
        let (orchestrator, store, gateway) = setup(false);
        let hash = hash_bytes(b"missing report");
        gateway.on_analysis(AnalysisStatus::Completed(Some(hash.clone())));

        let result = orchestrator.resolve(&analysis_id("A7"), None).await.unwrap();
        assert_eq!(
            result,
            ResolveResult::Completed {
                hash: Some(hash.clone()),
                report: None
            }
        );
        assert!(store.lookup(&hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_completed_with_stale_report_is_not_cached() {
        let (orchestrator, store, gateway) = setup(false);
        let hash = hash_bytes(b"zero engines");
        gateway.on_analysis(AnalysisStatus::Completed(None));
        gateway.set_report(&hash, Ok(stale_report()));

        let result = orchestrator.resolve(&analysis_id("A8"), Some(&hash)).await.unwrap();
        assert_eq!(
            result,
            ResolveResult::Completed {
                hash: Some(hash.clone()),
                report: None
            }
        );
        assert!(store.lookup(&hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_completed_without_any_hash() {
        let (orchestrator, _store, gateway) = setup(false);
        gateway.on_analysis(AnalysisStatus::Completed(None));

        let result = orchestrator.resolve(&analysis_id("A9"), None).await.unwrap();
        assert_eq!(
            result,
            ResolveResult::Completed {
                hash: None,
                report: None
            }
        );
        assert_eq!(gateway.report_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_analysis_propagates() {
        let (orchestrator, _store, gateway) = setup(false);
        gateway.on_analysis(AnalysisStatus::Failed(TransportFailure::new(404, "NotFoundError")));

        let result = orchestrator.resolve(&analysis_id("A10"), None).await.unwrap();
        assert_eq!(
            result,
            ResolveResult::Failed(TransportFailure::new(404, "NotFoundError"))
        );
    }

    #[tokio::test]
    async fn test_report_by_hash_prefers_cache() {
        let (orchestrator, store, gateway) = setup(false);
        let hash = hash_bytes(b"cached");
        store.upsert(&hash, RecordUpdate::ready(report_with(12, 0))).await.unwrap();

        let report = orchestrator.report_by_hash(&hash).await.unwrap().unwrap();
        assert_eq!(report.total_engines(), 12);
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_report_by_hash_returns_but_does_not_cache_stale() {
        let (orchestrator, store, gateway) = setup(false);
        let hash = hash_bytes(b"fresh upstream");
        gateway.set_report(&hash, Ok(stale_report()));

        let report = orchestrator.report_by_hash(&hash).await.unwrap().unwrap();
        assert!(!report.is_usable());
        assert!(store.lookup(&hash).await.unwrap().is_none());

        let missing = orchestrator.report_by_hash(&hash_bytes(b"nope")).await.unwrap();
        assert_eq!(missing, Err(TransportFailure::new(404, "NotFoundError")));
    }
}
