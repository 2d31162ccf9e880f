//! Question fingerprinting and the deduplication index
//!
//! A fingerprint is a digest of the question with its parameters masked
//! out: hex runs and digit runs collapse to placeholders, casing and
//! punctuation are stripped, and the detected intent keywords are folded
//! in as a coarse structural signature. Two questions asking the same
//! thing about different addresses therefore collide, which is the point.
//! The exact normalization is a tunable heuristic; the uniqueness
//! invariant is what the rest of the pipeline relies on.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Hex digits kept from the SHA-256 digest.
const FINGERPRINT_LEN: usize = 16;

/// Intent terms folded into the fingerprint so paraphrases that swap
/// surface wording but keep the same ask still collide.
const INTENT_KEYWORDS: &[&str] = &[
    "balance", "transaction", "transfer", "block", "token", "holder", "holding", "price",
    "value", "asset", "volume", "search", "supply", "history",
];

fn hex_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"0x[0-9a-fA-F]+").expect("valid hex run regex"))
}

fn digit_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("valid digit run regex"))
}

/// Normalizes question text down to its pattern: parameters masked,
/// lowercased, punctuation dropped, whitespace collapsed.
fn normalize(text: &str) -> String {
    let masked = hex_run_re().replace_all(text, " addr ");
    let masked = digit_run_re().replace_all(&masked, " num ");
    let lowered = masked.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn intent_signature(normalized: &str) -> String {
    INTENT_KEYWORDS
        .iter()
        .filter(|kw| normalized.contains(*kw))
        .copied()
        .collect::<Vec<_>>()
        .join("+")
}

/// Computes the fingerprint for a question, or `None` when the text
/// normalizes to nothing (empty and whitespace-only questions never enter
/// the index, so they cannot collide with each other).
pub fn fingerprint(text: &str) -> Option<String> {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return None;
    }
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update(b"|");
    hasher.update(intent_signature(&normalized).as_bytes());
    let digest = hasher.finalize();
    Some(hex::encode(digest)[..FINGERPRINT_LEN].to_string())
}

/// In-memory set of accepted fingerprints, preserving insertion order.
///
/// Serializes as the ordered list; membership is rebuilt on load and a
/// duplicate entry in the file is rejected rather than collapsed, since
/// it means the file was not written by us.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(into = "Vec<String>", try_from = "Vec<String>")]
pub struct DedupIndex {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl DedupIndex {
    pub fn new() -> Self {
        DedupIndex::default()
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.seen.contains(fingerprint)
    }

    /// Inserts a fingerprint. Returns false if it was already present.
    pub fn insert(&mut self, fingerprint: String) -> bool {
        if self.seen.contains(&fingerprint) {
            return false;
        }
        self.seen.insert(fingerprint.clone());
        self.order.push(fingerprint);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Fingerprints in insertion order.
    pub fn ordered(&self) -> &[String] {
        &self.order
    }
}

impl From<DedupIndex> for Vec<String> {
    fn from(index: DedupIndex) -> Self {
        index.order
    }
}

impl TryFrom<Vec<String>> for DedupIndex {
    type Error = String;

    fn try_from(order: Vec<String>) -> Result<Self, Self::Error> {
        let seen: HashSet<String> = order.iter().cloned().collect();
        if seen.len() != order.len() {
            return Err("duplicate fingerprints in persisted index".to_string());
        }
        Ok(DedupIndex { order, seen })
    }
}
