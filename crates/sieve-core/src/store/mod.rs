//! Persistence of analysis records keyed by content hash

mod memory;
mod postgres;

pub use memory::MemoryResultStore;
pub use postgres::PgResultStore;

use crate::{ContentHash, CoreResult, Report};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What is known about a hash's report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReportState {
    /// Known to the provider, no usable report yet
    Pending,
    Ready { report: Report },
}

/// Stored result for one distinct file content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub content_hash: ContentHash,
    pub report: ReportState,
    pub type_label: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisRecord {
    /// The stored report, if it passes the staleness rule
    pub fn usable_report(&self) -> Option<&Report> {
        match &self.report {
            ReportState::Ready { report } if report.is_usable() => Some(report),
            _ => None,
        }
    }
}

/// Partial update of a record. Absent fields leave the stored value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub report: Option<ReportState>,
    pub type_label: Option<String>,
}

impl RecordUpdate {
    pub fn ready(report: Report) -> Self {
        Self {
            report: Some(ReportState::Ready { report }),
            type_label: None,
        }
    }

    pub fn pending() -> Self {
        Self {
            report: Some(ReportState::Pending),
            type_label: None,
        }
    }

    pub fn with_type_label(mut self, type_label: Option<String>) -> Self {
        self.type_label = type_label;
        self
    }

    /// Merge this update into an existing record (or create one).
    ///
    /// A known type label is never replaced by `None`, and a pending marker
    /// never replaces a ready report.
    pub fn apply(
        self,
        content_hash: &ContentHash,
        existing: Option<AnalysisRecord>,
        now: DateTime<Utc>,
    ) -> AnalysisRecord {
        let (current_report, current_label) = match existing {
            Some(record) => (Some(record.report), record.type_label),
            None => (None, None),
        };

        let report = match (current_report, self.report) {
            (Some(ready @ ReportState::Ready { .. }), Some(ReportState::Pending)) => ready,
            (_, Some(new)) => new,
            (Some(current), None) => current,
            (None, None) => ReportState::Pending,
        };

        AnalysisRecord {
            content_hash: content_hash.clone(),
            report,
            type_label: self.type_label.or(current_label),
            updated_at: now,
        }
    }
}

/// Key-value persistence contract for analysis records.
///
/// `upsert` must tolerate concurrent writers for the same hash without
/// surfacing a uniqueness conflict to the caller.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn lookup(&self, hash: &ContentHash) -> CoreResult<Option<AnalysisRecord>>;

    async fn upsert(&self, hash: &ContentHash, update: RecordUpdate) -> CoreResult<()>;
}
