//! Reduced view of a report handed to the summarizer

use crate::{EngineStatistics, Report};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MAX_FLAGGED_ENGINES: usize = 30;
pub const MAX_TAGS: usize = 50;

/// Entropy above which a PE section is reported as a structural risk
const HIGH_ENTROPY: f64 = 7.0;

const SUSPICIOUS_TAGS: &[&str] = &[
    "packed",
    "obfuscated",
    "macros",
    "encrypted",
    "dropper",
    "trojan",
    "ransomware",
    "phishing",
    "shellcode",
    "keylogger",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub magic: Option<String>,
    pub size: Option<u64>,
    pub sha256: Option<String>,
    pub reputation: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    #[serde(flatten)]
    pub counts: EngineStatistics,
    pub total_engines: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detections {
    pub threat_labels: Vec<String>,
    pub flagged_engines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatContext {
    pub tags: Vec<String>,
    pub popular_threat_classification: Value,
    pub votes: Value,
    pub crowdsourced_yara_results: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralRisks {
    pub has_overlay: bool,
    pub high_entropy_sections: Vec<String>,
    pub suspicious_indicators: Vec<String>,
}

/// Bounded projection of a report: only what the summary needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDigest {
    pub file_metadata: FileMetadata,
    pub scan_summary: ScanSummary,
    pub detections: Detections,
    pub context: ThreatContext,
    pub structural_risks: StructuralRisks,
}

impl ReportDigest {
    pub fn from_report(report: &Report) -> Self {
        let empty = Value::Null;
        let attr = report.attributes().unwrap_or(&empty);
        let counts = report.engine_statistics();

        let tags: Vec<String> = attr
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| tags.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        let mut threat_labels = Vec::new();
        let mut flagged_engines = Vec::new();
        if let Some(results) = attr.get("last_analysis_results").and_then(Value::as_object) {
            for (engine, detail) in results {
                let category = detail.get("category").and_then(Value::as_str);
                let label = detail.get("result").and_then(Value::as_str);
                if let (Some("malicious" | "suspicious"), Some(label)) = (category, label) {
                    threat_labels.push(label.to_string());
                    flagged_engines.push(engine.clone());
                }
            }
        }
        threat_labels.sort();
        threat_labels.dedup();
        flagged_engines.truncate(MAX_FLAGGED_ENGINES);

        let high_entropy_sections = attr
            .pointer("/pe_info/sections")
            .and_then(Value::as_array)
            .map(|sections| {
                sections
                    .iter()
                    .filter(|s| {
                        s.get("entropy")
                            .and_then(Value::as_f64)
                            .is_some_and(|e| e > HIGH_ENTROPY)
                    })
                    .filter_map(|s| s.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let suspicious_indicators = tags
            .iter()
            .filter(|t| SUSPICIOUS_TAGS.contains(&t.as_str()))
            .cloned()
            .collect();

        Self {
            file_metadata: FileMetadata {
                magic: attr.get("magic").and_then(Value::as_str).map(str::to_string),
                size: attr.get("size").and_then(Value::as_u64),
                sha256: report.sha256().map(str::to_string),
                reputation: attr.get("reputation").and_then(Value::as_i64),
            },
            scan_summary: ScanSummary {
                total_engines: counts.total(),
                counts,
            },
            detections: Detections {
                threat_labels,
                flagged_engines,
            },
            context: ThreatContext {
                popular_threat_classification: attr
                    .get("popular_threat_classification")
                    .cloned()
                    .unwrap_or(Value::Null),
                votes: attr.get("total_votes").cloned().unwrap_or(Value::Null),
                crowdsourced_yara_results: attr
                    .get("crowdsourced_yara_results")
                    .cloned()
                    .unwrap_or(Value::Null),
                tags: tags.iter().take(MAX_TAGS).cloned().collect(),
            },
            structural_risks: StructuralRisks {
                has_overlay: tags.iter().any(|t| t == "overlay"),
                high_entropy_sections,
                suspicious_indicators,
            },
        }
    }
}
