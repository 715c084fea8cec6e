//! Provider reports and the staleness rule
//!
//! A report is kept verbatim as JSON. The only field the pipeline inspects is
//! the per-category engine verdict count.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Engine verdict counts by category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineStatistics {
    pub malicious: u64,
    pub suspicious: u64,
    pub undetected: u64,
    pub harmless: u64,
    pub timeout: u64,
    pub confirmed_timeout: u64,
    pub type_unsupported: u64,
    pub failure: u64,
}

impl EngineStatistics {
    /// Read counts from a stats object. Anything unreadable counts as zero.
    pub fn from_value(value: Option<&Value>) -> Self {
        value
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    /// Sum of all categories, saturating at `u64::MAX`
    pub fn total(&self) -> u64 {
        [
            self.malicious,
            self.suspicious,
            self.undetected,
            self.harmless,
            self.timeout,
            self.confirmed_timeout,
            self.type_unsupported,
            self.failure,
        ]
        .iter()
        .fold(0u64, |acc, n| acc.saturating_add(*n))
    }
}

/// Full file report as returned by the scanning provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Report(Value);

impl Report {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// `data.attributes` of the report, if present
    pub fn attributes(&self) -> Option<&Value> {
        self.0.get("data").and_then(|d| d.get("attributes"))
    }

    pub fn engine_statistics(&self) -> EngineStatistics {
        EngineStatistics::from_value(self.attributes().and_then(|a| a.get("last_analysis_stats")))
    }

    pub fn total_engines(&self) -> u64 {
        self.engine_statistics().total()
    }

    /// A report is usable only once at least one engine has reported.
    /// Zero-engine reports look exactly like "not analysed yet".
    pub fn is_usable(&self) -> bool {
        self.total_engines() > 0
    }

    pub fn sha256(&self) -> Option<&str> {
        self.attributes()
            .and_then(|a| a.get("sha256"))
            .and_then(Value::as_str)
    }
}
