//! Dataset files and response parsing
//!
//! Owns the on-disk formats (the phase-1 question dataset and the
//! phase-2 completed dataset) and the schema-validated extraction of
//! question lists out of generative API responses. Parsing yields a
//! tagged result, valid or malformed, so callers never branch on loose
//! JSON shapes.

use crate::error::Result;
use crate::state::QuestionRecord;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;

/// Who is speaking in a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    AssistantCall,
    ToolObservation,
    AssistantReply,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// One completed exchange: the user question followed by exactly one
/// call/observation/reply triplet. Immutable once appended to output.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub tool_id: String,
    pub turns: Vec<Turn>,
}

impl ConversationRecord {
    pub fn from_exchange(
        tool_id: &str,
        question: &str,
        call: String,
        observation: String,
        reply: String,
    ) -> Self {
        ConversationRecord {
            tool_id: tool_id.to_string(),
            turns: vec![
                Turn {
                    role: Role::User,
                    content: question.to_string(),
                },
                Turn {
                    role: Role::AssistantCall,
                    content: call,
                },
                Turn {
                    role: Role::ToolObservation,
                    content: observation,
                },
                Turn {
                    role: Role::AssistantReply,
                    content: reply,
                },
            ],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub target: u64,
    pub total: u64,
    pub generated_at: DateTime<Utc>,
}

/// Phase-1 output / phase-2 input.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuestionDataset {
    pub metadata: DatasetMetadata,
    pub questions: Vec<QuestionRecord>,
}

/// Writes JSON to a temp file and renames it into place.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let body = serde_json::to_vec_pretty(value)?;
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&body)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn write_question_dataset(path: &Path, target: u64, questions: &[QuestionRecord]) -> Result<()> {
    let dataset = QuestionDataset {
        metadata: DatasetMetadata {
            target,
            total: questions.len() as u64,
            generated_at: Utc::now(),
        },
        questions: questions.to_vec(),
    };
    write_json_atomic(path, &dataset)?;
    info!("wrote {} questions to {}", dataset.metadata.total, path.display());
    Ok(())
}

pub fn load_question_dataset(path: &Path) -> Result<QuestionDataset> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

pub fn write_completed_dataset(path: &Path, records: &[ConversationRecord]) -> Result<()> {
    write_json_atomic(path, &records)?;
    info!("wrote {} conversations to {}", records.len(), path.display());
    Ok(())
}

/// Loads previously completed conversations so a resumed run keeps
/// appending. A missing file is an empty dataset, not an error.
pub fn load_completed_dataset(path: &Path) -> Result<Vec<ConversationRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Outcome of parsing a generative response. Malformed is data, not an
/// error: the batch simply yields nothing.
#[derive(Clone, Debug, PartialEq)]
pub enum Parsed {
    Questions(Vec<String>),
    Malformed(String),
}

fn code_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("valid code block regex")
    })
}

fn try_question_array(raw: &str) -> Option<Vec<String>> {
    serde_json::from_str::<Vec<String>>(raw).ok()
}

/// Extracts a list of question strings from a model response.
///
/// Accepts, in order: the whole response as a JSON array of strings, a
/// fenced code block containing one, or the outermost bracketed slice.
/// Blank entries are dropped; an empty surviving list counts as
/// malformed.
pub fn extract_question_list(response: &str) -> Parsed {
    let candidates = direct_then_fenced_then_sliced(response);
    for raw in candidates {
        if let Some(questions) = try_question_array(&raw) {
            let cleaned: Vec<String> = questions
                .into_iter()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .collect();
            if cleaned.is_empty() {
                return Parsed::Malformed("response parsed to an empty question list".into());
            }
            return Parsed::Questions(cleaned);
        }
    }
    Parsed::Malformed("no JSON string array found in response".into())
}

fn direct_then_fenced_then_sliced(response: &str) -> Vec<String> {
    let mut candidates = vec![response.trim().to_string()];
    for cap in code_block_re().captures_iter(response) {
        candidates.push(cap[1].to_string());
    }
    if let (Some(start), Some(end)) = (response.find('['), response.rfind(']')) {
        if start < end {
            candidates.push(response[start..=end].to_string());
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dialogforge_ds_{}_{}.json", tag, std::process::id()))
    }

    #[test]
    fn test_extract_direct_array() {
        let parsed = extract_question_list(r#"["q one", "q two"]"#);
        assert_eq!(parsed, Parsed::Questions(vec!["q one".into(), "q two".into()]));
    }

    #[test]
    fn test_extract_from_code_block() {
        let response = "Here you go:\n```json\n[\"what is the balance?\"]\n```\nEnjoy!";
        let parsed = extract_question_list(response);
        assert_eq!(parsed, Parsed::Questions(vec!["what is the balance?".into()]));
    }

    #[test]
    fn test_extract_from_bracket_slice() {
        let response = "Sure! [\"a\", \"b\", \"c\"] hope that helps";
        let parsed = extract_question_list(response);
        assert_eq!(
            parsed,
            Parsed::Questions(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn test_blank_entries_dropped() {
        let parsed = extract_question_list(r#"["real question", "", "   "]"#);
        assert_eq!(parsed, Parsed::Questions(vec!["real question".into()]));
    }

    #[test]
    fn test_malformed_responses() {
        assert!(matches!(
            extract_question_list("I could not generate questions."),
            Parsed::Malformed(_)
        ));
        assert!(matches!(
            extract_question_list(r#"[{"not": "a string"}]"#),
            Parsed::Malformed(_)
        ));
        assert!(matches!(extract_question_list("[]"), Parsed::Malformed(_)));
        assert!(matches!(extract_question_list(""), Parsed::Malformed(_)));
    }

    #[test]
    fn test_role_tags() {
        let record = ConversationRecord::from_exchange(
            "get_tx_by_hash",
            "did my tx land?",
            r#"{"name":"get_tx_by_hash","arguments":{"hash":"0xabc"}}"#.into(),
            r#"{"status":"confirmed"}"#.into(),
            "Yes, it confirmed.".into(),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["turns"][0]["role"], "user");
        assert_eq!(json["turns"][1]["role"], "assistant-call");
        assert_eq!(json["turns"][2]["role"], "tool-observation");
        assert_eq!(json["turns"][3]["role"], "assistant-reply");
        assert_eq!(record.turns.len(), 4);
    }

    #[test]
    fn test_question_dataset_round_trip() {
        let path = temp_path("questions");
        let records = vec![QuestionRecord::new(
            "get_tx_by_hash",
            "did it land?".into(),
            "fp1".into(),
        )];
        write_question_dataset(&path, 10, &records).unwrap();
        let loaded = load_question_dataset(&path).unwrap();
        assert_eq!(loaded.metadata.target, 10);
        assert_eq!(loaded.metadata.total, 1);
        assert_eq!(loaded.questions[0].tool_id, "get_tx_by_hash");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_completed_dataset_missing_is_empty() {
        let path = temp_path("completed_missing");
        let _ = fs::remove_file(&path);
        assert!(load_completed_dataset(&path).unwrap().is_empty());
    }
}
