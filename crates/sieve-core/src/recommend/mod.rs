//! Remediation summaries for stored reports
//!
//! A report is reduced to a [`ReportDigest`] before it leaves the process,
//! then handed to a text-completion service.

mod chat;
mod digest;

pub use chat::{ChatCompletionClient, SummarizerConfig};
pub use digest::{ReportDigest, MAX_FLAGGED_ENGINES, MAX_TAGS};

use crate::{CoreError, CoreResult, Report};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "You are a helpful and precise assistant for cybersecurity analysis.";

const USER_PROMPT: &str = "Act as a Cybersecurity Analyst.
You are given a sandbox JSON report.
Extract ONLY information explicitly present in the input and return the result as Markdown.
STRICT RULES:
1. Do NOT infer or add information
2. Guidance must be generic and abstract.
---
Based on the given malware or security detection report, provide basic initial guidance for handling the threat.
Requirements:
1. Keep the answer short and simple
2. Use clear bullet points
3. Write in clear English

INPUT JSON:
";

/// External text-completion call
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> CoreResult<String>;
}

pub struct Recommender {
    summarizer: Arc<dyn Summarizer>,
}

impl Recommender {
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Self {
        Self { summarizer }
    }

    /// Markdown guidance for handling the file described by `report`
    pub async fn summarize(&self, report: &Report) -> CoreResult<String> {
        let digest = ReportDigest::from_report(report);
        let prompt = format!("{}{}", USER_PROMPT, serde_json::to_string_pretty(&digest)?);
        debug!("Requesting summary ({} prompt bytes)", prompt.len());

        let text = match self.summarizer.complete(SYSTEM_PROMPT, &prompt).await {
            Ok(text) => text,
            Err(CoreError::SummarizationUnavailable(reason)) => {
                warn!("Summarizer unavailable: {}", reason);
                return Err(CoreError::SummarizationUnavailable(reason));
            }
            Err(e) => {
                warn!("Summarizer failed: {}", e);
                return Err(CoreError::SummarizationUnavailable(e.to_string()));
            }
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(CoreError::SummarizationUnavailable("empty completion".to_string()));
        }
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures::report_with;
    use std::sync::Mutex;

    struct CannedSummarizer {
        reply: CoreResult<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedSummarizer {
        fn new(reply: CoreResult<String>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Summarizer for CannedSummarizer {
        async fn complete(&self, system: &str, user: &str) -> CoreResult<String> {
            assert_eq!(system, SYSTEM_PROMPT);
            self.prompts.lock().unwrap().push(user.to_string());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(CoreError::Config(e.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_summary_is_trimmed() {
        let summarizer = CannedSummarizer::new(Ok("\n- Quarantine the file\n".into()));
        let recommender = Recommender::new(summarizer.clone());

        let text = recommender.summarize(&report_with(40, 3)).await.unwrap();
        assert_eq!(text, "- Quarantine the file");

        let prompts = summarizer.prompts.lock().unwrap();
        assert!(prompts[0].contains("\"total_engines\": 43"));
    }

    #[tokio::test]
    async fn test_failures_map_to_unavailable() {
        let recommender = Recommender::new(CannedSummarizer::new(Err(CoreError::Config("down".into()))));
        let err = recommender.summarize(&report_with(1, 0)).await.unwrap_err();
        assert!(matches!(err, CoreError::SummarizationUnavailable(_)));
    }

    #[tokio::test]
    async fn test_blank_completion_is_unavailable() {
        let recommender = Recommender::new(CannedSummarizer::new(Ok("   ".into())));
        let err = recommender.summarize(&report_with(1, 0)).await.unwrap_err();
        assert!(matches!(err, CoreError::SummarizationUnavailable(_)));
    }
}
