//! Phase 2 driver: conversation completion
//!
//! Walks the question dataset from the persisted cursor, infers the tool
//! each question refers to, invokes it, asks the generative API for the
//! final reply and assembles the call/observation/reply exchange.
//! Failures are isolated per item: a skip is recorded with its reason and
//! the cursor advances, so one bad question can never abort the batch.

use crate::catalog::{inference, Catalog};
use crate::client::{with_retry, RetryPolicy, TextGenerator, ToolInvoker};
use crate::dataset::{write_completed_dataset, ConversationRecord, QuestionDataset};
use crate::error::{ApiError, Error, Result, SkipReason};
use crate::pipeline::{RunPhase, Shutdown};
use crate::state::{QuestionRecord, RunState, SkippedItem};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

const REPLY_SYSTEM_PROMPT: &str = "You are an assistant for a blockchain explorer. Given a \
user question and the raw result of the tool call that answered it, write the final reply: \
explain the data plainly, list transactions in time order, and surface the key insight. \
Reply with the answer text only.";

pub struct CompletionController<'a> {
    api: &'a dyn TextGenerator,
    tools: &'a dyn ToolInvoker,
    catalog: &'a Catalog,
    state: RunState,
    state_path: PathBuf,
    output_path: PathBuf,
    completed: Vec<ConversationRecord>,
    batch_size: usize,
    batch_delay: Duration,
    retry: RetryPolicy,
    fallback_tool: Option<String>,
    phase: RunPhase,
}

impl<'a> CompletionController<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: &'a dyn TextGenerator,
        tools: &'a dyn ToolInvoker,
        catalog: &'a Catalog,
        state: RunState,
        state_path: PathBuf,
        output_path: PathBuf,
        completed: Vec<ConversationRecord>,
        batch_size: usize,
        batch_delay: Duration,
        retry: RetryPolicy,
        fallback_tool: Option<String>,
    ) -> Self {
        CompletionController {
            api,
            tools,
            catalog,
            state,
            state_path,
            output_path,
            completed,
            batch_size,
            batch_delay,
            retry,
            fallback_tool,
            phase: RunPhase::Idle,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn completed(&self) -> &[ConversationRecord] {
        &self.completed
    }

    /// Processes every pending question. Flushes state and output on all
    /// exit paths.
    pub async fn run(
        &mut self,
        dataset: &QuestionDataset,
        shutdown: &mut Shutdown,
    ) -> Result<RunPhase> {
        self.phase = RunPhase::Running;
        let outcome = self.drive(dataset, shutdown).await;

        let flush = self.flush();
        match outcome {
            Ok(phase) => {
                self.phase = phase;
                flush?;
                Ok(phase)
            }
            Err(e) => {
                self.phase = RunPhase::Failed;
                if let Err(flush_err) = flush {
                    error!("flush after failure also failed: {}", flush_err);
                }
                Err(e)
            }
        }
    }

    async fn drive(
        &mut self,
        dataset: &QuestionDataset,
        shutdown: &mut Shutdown,
    ) -> Result<RunPhase> {
        let total = dataset.questions.len();
        if self.state.cursor() >= total {
            info!("[Completion] all {} questions already processed", total);
            return Ok(RunPhase::Completed);
        }

        while self.state.cursor() < total {
            if shutdown.is_requested() {
                info!("[Completion] interrupt received, pausing with flush");
                return Ok(RunPhase::PausedOnSignal);
            }

            let start = self.state.cursor();
            let end = (start + self.batch_size).min(total);
            info!("[Completion] items {}..{} of {}", start + 1, end, total);

            for index in start..end {
                let record = &dataset.questions[index];
                let step = tokio::select! {
                    biased;
                    _ = shutdown.requested() => None,
                    outcome = Self::complete_item(
                        self.api,
                        self.tools,
                        self.catalog,
                        &self.retry,
                        self.fallback_tool.as_deref(),
                        index,
                        record,
                    ) => Some(outcome),
                };
                let Some(outcome) = step else {
                    info!("[Completion] interrupt received mid-batch, discarding in-flight item");
                    return Ok(RunPhase::PausedOnSignal);
                };

                match outcome? {
                    Ok(conversation) => self.completed.push(conversation),
                    Err(skip) => {
                        warn!(
                            "skipping item {} (tool {:?}): {}: \"{}\"",
                            index,
                            skip.tool_id,
                            skip.reason,
                            skip.excerpt
                        );
                        self.state.record_skip(skip);
                    }
                }
                self.state.advance_cursor(index + 1);
            }

            self.flush()?;
            info!(
                "[Completion] progress: {}/{} processed, {} completed, {} skipped",
                self.state.cursor(),
                total,
                self.completed.len(),
                self.state.skipped().len()
            );

            if self.state.cursor() < total && !self.batch_delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = shutdown.requested() => {
                        return Ok(RunPhase::PausedOnSignal);
                    }
                    _ = tokio::time::sleep(self.batch_delay) => {}
                }
            }
        }

        Ok(RunPhase::Completed)
    }

    /// Completes one question. The outer `Result` is fatal (auth
    /// failures abort the run); the inner one is the per-item skip.
    async fn complete_item(
        api: &dyn TextGenerator,
        tools: &dyn ToolInvoker,
        catalog: &Catalog,
        retry: &RetryPolicy,
        fallback_tool: Option<&str>,
        index: usize,
        record: &QuestionRecord,
    ) -> Result<std::result::Result<ConversationRecord, SkippedItem>> {
        let question = record.text.trim();
        let skip = |tool_id: Option<String>, reason: SkipReason| SkippedItem {
            index,
            tool_id,
            excerpt: question.chars().take(80).collect(),
            reason,
        };

        if question.is_empty() {
            return Ok(Err(skip(None, SkipReason::EmptyQuestion)));
        }

        let inferred = match inference::infer(catalog, question) {
            Some(inferred) => inferred,
            None => match fallback_tool {
                Some(id) if catalog.contains(id) => inference::Inference {
                    tool_id: id.to_string(),
                    arguments: json!({ "query": question }),
                },
                _ => return Ok(Err(skip(None, SkipReason::NoConfidentToolMatch))),
            },
        };

        let observation = match with_retry(retry, "tool invocation", || {
            tools.invoke(&inferred.tool_id, &inferred.arguments)
        })
        .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!("tool {} failed: {}", inferred.tool_id, e);
                return Ok(Err(skip(
                    Some(inferred.tool_id),
                    SkipReason::ToolInvocationFailed,
                )));
            }
        };

        let reply_prompt = build_reply_prompt(question, &observation);
        let reply = match with_retry(retry, "reply generation", || {
            api.generate(REPLY_SYSTEM_PROMPT, &reply_prompt)
        })
        .await
        {
            Ok(reply) => reply,
            // An invalid key fails every remaining item identically
            Err(ApiError::Auth(detail)) => return Err(Error::Api(ApiError::Auth(detail))),
            Err(e) => {
                warn!("reply generation failed for item {}: {}", index, e);
                return Ok(Err(skip(
                    Some(inferred.tool_id),
                    SkipReason::GenerationFailed,
                )));
            }
        };

        let call = json!({
            "name": inferred.tool_id,
            "arguments": inferred.arguments,
        })
        .to_string();
        let observation_text = observation.to_string();

        Ok(Ok(ConversationRecord::from_exchange(
            &inferred.tool_id,
            question,
            call,
            observation_text,
            reply.trim().to_string(),
        )))
    }

    fn flush(&mut self) -> Result<()> {
        self.state.save(&self.state_path)?;
        write_completed_dataset(&self.output_path, &self.completed)
    }
}

fn build_reply_prompt(question: &str, observation: &Value) -> String {
    format!(
        "User question: {}\n\nTool call result:\n{}\n\nWrite the reply to the user.",
        question, observation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_catalog;
    use crate::dataset::{load_completed_dataset, DatasetMetadata, Role};
    use crate::error::ToolError;
    use crate::pipeline::shutdown_channel;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::PathBuf;

    const ADDR: &str = "0x1f9090aaE28b8a3dCeaDf281B0F12828e676c326";

    struct EchoGenerator;

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        async fn generate(&self, _system: &str, _user: &str) -> Result<String, ApiError> {
            Ok("Here is what I found on chain.".into())
        }
    }

    struct StubInvoker {
        fail_tools: Vec<String>,
    }

    #[async_trait]
    impl ToolInvoker for StubInvoker {
        async fn list_tools(&self) -> Result<Vec<crate::catalog::ToolSpec>, ToolError> {
            Ok(Vec::new())
        }

        async fn invoke(&self, tool_id: &str, arguments: &Value) -> Result<Value, ToolError> {
            if self.fail_tools.iter().any(|t| t == tool_id) {
                return Err(ToolError::Invocation("backend exploded".into()));
            }
            Ok(json!({ "tool": tool_id, "echo": arguments }))
        }
    }

    fn question(tool_id: &str, text: &str) -> QuestionRecord {
        QuestionRecord {
            tool_id: tool_id.to_string(),
            text: text.to_string(),
            fingerprint: format!("fp_{}", text.len()),
            generated_at: Utc::now(),
            accepted: true,
        }
    }

    fn dataset(questions: Vec<QuestionRecord>) -> QuestionDataset {
        QuestionDataset {
            metadata: DatasetMetadata {
                target: questions.len() as u64,
                total: questions.len() as u64,
                generated_at: Utc::now(),
            },
            questions,
        }
    }

    fn temp_paths(tag: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir();
        let pid = std::process::id();
        (
            dir.join(format!("dialogforge_comp_state_{}_{}.json", tag, pid)),
            dir.join(format!("dialogforge_comp_out_{}_{}.json", tag, pid)),
        )
    }

    fn controller<'a>(
        api: &'a dyn TextGenerator,
        tools: &'a dyn ToolInvoker,
        catalog: &'a Catalog,
        paths: &(PathBuf, PathBuf),
        fallback_tool: Option<String>,
    ) -> CompletionController<'a> {
        CompletionController::new(
            api,
            tools,
            catalog,
            RunState::new(),
            paths.0.clone(),
            paths.1.clone(),
            Vec::new(),
            2,
            Duration::ZERO,
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                exponential: false,
            },
            fallback_tool,
        )
    }

    #[tokio::test]
    async fn test_happy_path_assembles_four_turns() {
        let paths = temp_paths("happy");
        let _ = std::fs::remove_file(&paths.0);
        let _ = std::fs::remove_file(&paths.1);

        let catalog = default_catalog();
        let invoker = StubInvoker { fail_tools: vec![] };
        let questions = dataset(vec![question(
            "list_address_latest_txs",
            &format!("Latest transactions for {} please", ADDR),
        )]);
        let (_trigger, mut shutdown) = shutdown_channel();
        let mut ctl = controller(&EchoGenerator, &invoker, &catalog, &paths, None);

        let phase = ctl.run(&questions, &mut shutdown).await.unwrap();
        assert_eq!(phase, RunPhase::Completed);
        assert_eq!(ctl.completed().len(), 1);
        assert!(ctl.state().skipped().is_empty());

        let turns = &ctl.completed()[0].turns;
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].role, Role::AssistantCall);
        assert_eq!(turns[2].role, Role::ToolObservation);
        assert_eq!(turns[3].role, Role::AssistantReply);

        // The call turn is itself valid JSON naming the tool
        let call: Value = serde_json::from_str(&turns[1].content).unwrap();
        assert_eq!(call["name"], "list_address_latest_txs");
        assert_eq!(call["arguments"]["address"], ADDR);

        // Output file contains exactly the completed record
        let written = load_completed_dataset(&paths.1).unwrap();
        assert_eq!(written.len(), 1);

        let _ = std::fs::remove_file(&paths.0);
        let _ = std::fs::remove_file(&paths.1);
    }

    #[tokio::test]
    async fn test_unmatchable_question_is_skipped_not_fatal() {
        let paths = temp_paths("nomatch");
        let _ = std::fs::remove_file(&paths.0);
        let _ = std::fs::remove_file(&paths.1);

        let catalog = default_catalog();
        let invoker = StubInvoker { fail_tools: vec![] };
        let questions = dataset(vec![
            question("whatever", "What's the weather like today?"),
            question(
                "get_tx_by_hash",
                "Did my transaction 0x3b2060db2444eb4cfecfa8b3e44584040b4eb175b04b4a8a7ad37743c09e50dc land?",
            ),
        ]);
        let (_trigger, mut shutdown) = shutdown_channel();
        let mut ctl = controller(&EchoGenerator, &invoker, &catalog, &paths, None);

        let phase = ctl.run(&questions, &mut shutdown).await.unwrap();
        assert_eq!(phase, RunPhase::Completed);
        // One completed, one skipped, cursor past both
        assert_eq!(ctl.completed().len(), 1);
        assert_eq!(ctl.state().cursor(), 2);
        assert_eq!(ctl.state().skipped().len(), 1);
        let skip = &ctl.state().skipped()[0];
        assert_eq!(skip.index, 0);
        assert_eq!(skip.reason, SkipReason::NoConfidentToolMatch);

        // The skipped item produced no output row at all
        let written = load_completed_dataset(&paths.1).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].tool_id, "get_tx_by_hash");

        let _ = std::fs::remove_file(&paths.0);
        let _ = std::fs::remove_file(&paths.1);
    }

    #[tokio::test]
    async fn test_fallback_tool_catches_unmatched_questions() {
        let paths = temp_paths("fallback");
        let _ = std::fs::remove_file(&paths.0);
        let _ = std::fs::remove_file(&paths.1);

        let catalog = default_catalog();
        let invoker = StubInvoker { fail_tools: vec![] };
        let questions = dataset(vec![question("whatever", "Tell me something interesting")]);
        let (_trigger, mut shutdown) = shutdown_channel();
        let mut ctl = controller(
            &EchoGenerator,
            &invoker,
            &catalog,
            &paths,
            Some("search_chain_data".into()),
        );

        let phase = ctl.run(&questions, &mut shutdown).await.unwrap();
        assert_eq!(phase, RunPhase::Completed);
        assert_eq!(ctl.completed().len(), 1);
        assert_eq!(ctl.completed()[0].tool_id, "search_chain_data");
        assert!(ctl.state().skipped().is_empty());

        let _ = std::fs::remove_file(&paths.0);
        let _ = std::fs::remove_file(&paths.1);
    }

    #[tokio::test]
    async fn test_tool_failure_isolated_per_item() {
        let paths = temp_paths("toolfail");
        let _ = std::fs::remove_file(&paths.0);
        let _ = std::fs::remove_file(&paths.1);

        let catalog = default_catalog();
        let invoker = StubInvoker {
            fail_tools: vec!["list_address_latest_txs".into()],
        };
        let questions = dataset(vec![
            question(
                "list_address_latest_txs",
                &format!("Latest transactions for {} please", ADDR),
            ),
            question(
                "get_address_details_by_address",
                &format!("Tell me about {}", ADDR),
            ),
        ]);
        let (_trigger, mut shutdown) = shutdown_channel();
        let mut ctl = controller(&EchoGenerator, &invoker, &catalog, &paths, None);

        let phase = ctl.run(&questions, &mut shutdown).await.unwrap();
        assert_eq!(phase, RunPhase::Completed);
        assert_eq!(ctl.completed().len(), 1);
        assert_eq!(ctl.state().skipped().len(), 1);
        assert_eq!(
            ctl.state().skipped()[0].reason,
            SkipReason::ToolInvocationFailed
        );
        assert_eq!(
            ctl.state().skipped()[0].tool_id.as_deref(),
            Some("list_address_latest_txs")
        );

        let _ = std::fs::remove_file(&paths.0);
        let _ = std::fs::remove_file(&paths.1);
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_run() {
        struct BadAuth;
        #[async_trait]
        impl TextGenerator for BadAuth {
            async fn generate(&self, _s: &str, _u: &str) -> Result<String, ApiError> {
                Err(ApiError::Auth("revoked".into()))
            }
        }

        let paths = temp_paths("auth");
        let _ = std::fs::remove_file(&paths.0);
        let _ = std::fs::remove_file(&paths.1);

        let catalog = default_catalog();
        let invoker = StubInvoker { fail_tools: vec![] };
        let questions = dataset(vec![question(
            "get_address_details_by_address",
            &format!("Tell me about {}", ADDR),
        )]);
        let (_trigger, mut shutdown) = shutdown_channel();
        let mut ctl = controller(&BadAuth, &invoker, &catalog, &paths, None);

        let err = ctl.run(&questions, &mut shutdown).await.unwrap_err();
        assert!(matches!(err, Error::Api(ApiError::Auth(_))));
        assert_eq!(ctl.phase(), RunPhase::Failed);

        let _ = std::fs::remove_file(&paths.0);
        let _ = std::fs::remove_file(&paths.1);
    }

    #[tokio::test]
    async fn test_resume_starts_past_cursor() {
        let paths = temp_paths("cursor");
        let _ = std::fs::remove_file(&paths.0);
        let _ = std::fs::remove_file(&paths.1);

        let catalog = default_catalog();
        let invoker = StubInvoker { fail_tools: vec![] };
        let questions = dataset(vec![
            question("a", &format!("Tell me about {}", ADDR)),
            question("b", &format!("Who are the holders of {}?", ADDR)),
        ]);

        let mut state = RunState::new();
        state.advance_cursor(1);
        let (_trigger, mut shutdown) = shutdown_channel();
        let mut ctl = CompletionController::new(
            &EchoGenerator,
            &invoker,
            &catalog,
            state,
            paths.0.clone(),
            paths.1.clone(),
            Vec::new(),
            2,
            Duration::ZERO,
            RetryPolicy::default(),
            None,
        );

        let phase = ctl.run(&questions, &mut shutdown).await.unwrap();
        assert_eq!(phase, RunPhase::Completed);
        // Only the second item was processed
        assert_eq!(ctl.completed().len(), 1);
        assert_eq!(ctl.completed()[0].tool_id, "get_holders_by_address");

        let _ = std::fs::remove_file(&paths.0);
        let _ = std::fs::remove_file(&paths.1);
    }

    #[tokio::test]
    async fn test_empty_question_skipped() {
        let paths = temp_paths("empty");
        let _ = std::fs::remove_file(&paths.0);
        let _ = std::fs::remove_file(&paths.1);

        let catalog = default_catalog();
        let invoker = StubInvoker { fail_tools: vec![] };
        let questions = dataset(vec![question("a", "   ")]);
        let (_trigger, mut shutdown) = shutdown_channel();
        let mut ctl = controller(&EchoGenerator, &invoker, &catalog, &paths, None);

        let phase = ctl.run(&questions, &mut shutdown).await.unwrap();
        assert_eq!(phase, RunPhase::Completed);
        assert!(ctl.completed().is_empty());
        assert_eq!(ctl.state().skipped()[0].reason, SkipReason::EmptyQuestion);

        let _ = std::fs::remove_file(&paths.0);
        let _ = std::fs::remove_file(&paths.1);
    }
}
