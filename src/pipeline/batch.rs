//! Batch question generation
//!
//! One bounded unit of phase-1 work: ask the generative API for a batch
//! of candidate questions for a tool, then normalize, deduplicate and
//! accept the survivors into the run state. Persistence stays with the
//! controller, which keeps this component testable against a stub API.

use crate::catalog::ToolSpec;
use crate::client::TextGenerator;
use crate::dataset::{extract_question_list, Parsed};
use crate::error::ApiError;
use crate::state::{fingerprint, QuestionRecord, RunState};
use tracing::{debug, info, warn};

/// How many recent fingerprint ids the anti-duplicate guidance cites.
const AVOID_WINDOW: usize = 10;

const SYSTEM_PROMPT: &str = "You write user questions for a function-calling training dataset \
covering blockchain explorer tools. Questions must sound like real users: mixed expertise \
levels, varied phrasing, concrete parameters (addresses, hashes, block numbers) where the \
tool needs them. Respond with ONLY a JSON array of question strings, no commentary.";

/// What happened to one batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub accepted: usize,
    pub duplicates: usize,
    pub invalid: usize,
}

pub struct BatchGenerator<'a> {
    api: &'a dyn TextGenerator,
}

impl<'a> BatchGenerator<'a> {
    pub fn new(api: &'a dyn TextGenerator) -> Self {
        BatchGenerator { api }
    }

    fn build_prompt(&self, tool: &ToolSpec, requested: u64, state: &RunState) -> String {
        let mut prompt = format!(
            "Generate {} distinct user questions that would be answered with the tool \
             `{}` ({}).\n",
            requested, tool.id, tool.description
        );
        let recent = state.recent_fingerprints(AVOID_WINDOW);
        if !recent.is_empty() {
            prompt.push_str(
                "\nEvery question must be genuinely new, not a rephrasing of an earlier one. \
                 Already-used question pattern ids:\n",
            );
            for (i, fp) in recent.iter().enumerate() {
                prompt.push_str(&format!("{}. {}\n", i + 1, fp));
            }
        }
        prompt.push_str(
            "\nVary the parameters: do not reuse the same address or hash across questions. \
             Return a JSON array of strings.",
        );
        prompt
    }

    /// Generates one batch for `tool` and merges the accepted questions
    /// into `state`. A malformed or empty response is a zero-yield batch;
    /// API errors propagate with their retryable/fatal classification.
    pub async fn run(
        &self,
        tool: &ToolSpec,
        requested: u64,
        state: &mut RunState,
    ) -> Result<BatchReport, ApiError> {
        let prompt = self.build_prompt(tool, requested, state);
        let response = self.api.generate(SYSTEM_PROMPT, &prompt).await?;

        let candidates = match extract_question_list(&response) {
            Parsed::Questions(questions) => questions,
            Parsed::Malformed(reason) => {
                warn!("zero-yield batch for {}: {}", tool.id, reason);
                return Ok(BatchReport::default());
            }
        };

        let mut report = BatchReport::default();
        for text in candidates {
            if report.accepted as u64 >= requested {
                break;
            }
            let Some(fp) = fingerprint::fingerprint(&text) else {
                report.invalid += 1;
                continue;
            };
            if state.contains_fingerprint(&fp) {
                debug!("duplicate candidate for {}: {}", tool.id, fp);
                report.duplicates += 1;
                continue;
            }
            if state.accept(QuestionRecord::new(&tool.id, text, fp)) {
                report.accepted += 1;
            } else {
                report.duplicates += 1;
            }
        }

        info!(
            "batch for {}: {} accepted, {} duplicates, {} invalid",
            tool.id, report.accepted, report.duplicates, report.invalid
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_catalog;
    use async_trait::async_trait;

    struct CannedGenerator {
        response: String,
    }

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        async fn generate(&self, _system: &str, _user: &str) -> Result<String, ApiError> {
            Ok(self.response.clone())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate(&self, _system: &str, _user: &str) -> Result<String, ApiError> {
            Err(ApiError::RateLimited)
        }
    }

    fn tool() -> ToolSpec {
        default_catalog().get("get_tx_by_hash").unwrap().clone()
    }

    #[tokio::test]
    async fn test_unique_plus_duplicate_candidates() {
        // Five unique questions plus two that repeat the first pattern.
        let api = CannedGenerator {
            response: serde_json::json!([
                "Did my transaction 0xaaa111 go through?",
                "Show the status of the transfer I sent yesterday",
                "Is there a fee recorded on hash 0xbbb222?",
                "How long did confirmation take for my latest payment?",
                "Which block includes my pending transaction?",
                "Did my transaction 0xccc333 go through?",
                "Did my transaction 0xddd444 go through?"
            ])
            .to_string(),
        };
        let mut state = RunState::new();
        let before = state.fingerprint_count();

        let report = BatchGenerator::new(&api)
            .run(&tool(), 7, &mut state)
            .await
            .unwrap();

        assert_eq!(report.accepted, 5);
        assert_eq!(report.duplicates, 2);
        assert_eq!(state.fingerprint_count(), before + 5);
        assert_eq!(state.produced_for("get_tx_by_hash"), 5);
        assert_eq!(state.total_produced(), state.records().len() as u64);
    }

    #[tokio::test]
    async fn test_accepts_at_most_requested() {
        let api = CannedGenerator {
            response: serde_json::json!([
                "How many holders does this token have?",
                "Who is the largest holder right now?",
                "List the whale wallets for the token",
                "What share does the top holder control?"
            ])
            .to_string(),
        };
        let mut state = RunState::new();
        let report = BatchGenerator::new(&api)
            .run(&tool(), 2, &mut state)
            .await
            .unwrap();
        assert_eq!(report.accepted, 2);
        assert_eq!(state.total_produced(), 2);
    }

    #[tokio::test]
    async fn test_malformed_response_is_zero_yield() {
        let api = CannedGenerator {
            response: "Sorry, I cannot help with that.".into(),
        };
        let mut state = RunState::new();
        let report = BatchGenerator::new(&api)
            .run(&tool(), 5, &mut state)
            .await
            .unwrap();
        assert_eq!(report, BatchReport::default());
        assert_eq!(state.total_produced(), 0);
    }

    #[tokio::test]
    async fn test_whitespace_candidates_counted_invalid() {
        // Entries that normalize to nothing must never reach the index.
        let api = CannedGenerator {
            response: r#"["!!!", "What is the supply of this token?"]"#.into(),
        };
        let mut state = RunState::new();
        let report = BatchGenerator::new(&api)
            .run(&tool(), 5, &mut state)
            .await
            .unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(report.invalid, 1);
    }

    #[tokio::test]
    async fn test_api_errors_propagate_with_classification() {
        let mut state = RunState::new();
        let err = BatchGenerator::new(&FailingGenerator)
            .run(&tool(), 5, &mut state)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(state.total_produced(), 0);
    }

    #[tokio::test]
    async fn test_prompt_carries_tool_and_avoid_guidance() {
        let api = CannedGenerator {
            response: r#"["q"]"#.into(),
        };
        let mut state = RunState::new();
        state.accept(QuestionRecord::new("other_tool", "seed".into(), "fp_seed_1".into()));

        let generator = BatchGenerator::new(&api);
        let prompt = generator.build_prompt(&tool(), 3, &state);
        assert!(prompt.contains("get_tx_by_hash"));
        assert!(prompt.contains("3 distinct user questions"));
        assert!(prompt.contains("fp_seed_1"));
    }
}
