//! Heuristic tool inference
//!
//! Maps free-text questions onto catalog tools via a ranked rule table:
//! each rule names a tool, the keyword groups that must all hit, and the
//! argument shape to extract. Rules are evaluated top to bottom, most
//! specific first, so the first satisfied rule wins. Purely lexical and
//! deterministic; no learned components.

use crate::catalog::Catalog;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

/// A successful inference: the tool plus the arguments extracted from the
/// question text.
#[derive(Clone, Debug, PartialEq)]
pub struct Inference {
    pub tool_id: String,
    pub arguments: Value,
}

/// Argument shape a rule extracts from the text. Doubles as a match
/// requirement: a rule only fires when its arguments are present.
#[derive(Clone, Copy, Debug)]
enum ArgSpec {
    /// Exactly one 64-hex-digit hash.
    TxHash,
    /// Two or more 64-hex-digit hashes.
    TxHashes,
    /// A 40-hex-digit account address.
    Address,
    /// A standalone number (block height).
    BlockNumber,
    /// Free-text search query.
    Query,
    /// No arguments.
    None,
}

struct Rule {
    tool_id: &'static str,
    /// Conjunction of keyword groups; a group hits when any of its
    /// phrases occurs in the lowercased text. Empty slice = always hits.
    requires: &'static [&'static [&'static str]],
    arg: ArgSpec,
}

const LATEST: &[&str] = &["latest", "recent", "newest", "last"];

/// Ranked rule table. Hash-bearing rules come first (a 64-digit hash is
/// the most specific token a question can carry), then block rules, then
/// the token/portfolio family, then the generic address fallbacks.
const RULES: &[Rule] = &[
    Rule {
        tool_id: "batch_get_tx_by_hashes",
        requires: &[],
        arg: ArgSpec::TxHashes,
    },
    Rule {
        tool_id: "get_block_by_hash",
        requires: &[&["block"]],
        arg: ArgSpec::TxHash,
    },
    Rule {
        tool_id: "get_tx_by_hash",
        requires: &[],
        arg: ArgSpec::TxHash,
    },
    Rule {
        tool_id: "list_block_txs",
        requires: &[&["block"], &["transaction", "txs", "contains", "inside"]],
        arg: ArgSpec::BlockNumber,
    },
    Rule {
        tool_id: "get_block_by_number",
        requires: &[&["block"]],
        arg: ArgSpec::BlockNumber,
    },
    Rule {
        tool_id: "list_latest_blocks",
        requires: &[&["block"], LATEST],
        arg: ArgSpec::None,
    },
    Rule {
        tool_id: "get_holders_by_address",
        requires: &[&["holder", "holders", "whale"]],
        arg: ArgSpec::Address,
    },
    Rule {
        tool_id: "get_token_price_change_by_address",
        requires: &[&["price change", "up or down", "gained", "dropped", "24h", "change"]],
        arg: ArgSpec::Address,
    },
    Rule {
        tool_id: "get_token_onchain_data_by_address",
        requires: &[&["volume", "on-chain data", "onchain data", "activity"]],
        arg: ArgSpec::Address,
    },
    Rule {
        tool_id: "list_address_latest_token_transfers",
        requires: &[&["transfer", "transfers"]],
        arg: ArgSpec::Address,
    },
    Rule {
        tool_id: "query_token_holding_by_address",
        requires: &[&["holding", "holdings", "portfolio", "position", "distribution"]],
        arg: ArgSpec::Address,
    },
    Rule {
        tool_id: "query_asset_value_by_address",
        requires: &[&["asset value", "total value", "worth", "net worth", "total assets"]],
        arg: ArgSpec::Address,
    },
    Rule {
        tool_id: "list_recent_txs_num_by_address",
        requires: &[&["how many transactions", "transaction count", "number of transactions"]],
        arg: ArgSpec::Address,
    },
    Rule {
        tool_id: "get_token_info_by_address",
        requires: &[&["token"], &["info", "information", "detail", "details", "symbol", "supply", "decimals", "what is"]],
        arg: ArgSpec::Address,
    },
    Rule {
        tool_id: "list_address_latest_txs",
        requires: &[&["transaction", "txs", "history", "activity"]],
        arg: ArgSpec::Address,
    },
    Rule {
        tool_id: "get_address_details_by_address",
        requires: &[],
        arg: ArgSpec::Address,
    },
    Rule {
        tool_id: "list_latest_txs",
        requires: &[&["transaction", "txs"], LATEST],
        arg: ArgSpec::None,
    },
    Rule {
        tool_id: "get_native_price_info_by_address",
        requires: &[&["btc", "native coin", "native token"], &["price", "cost", "value"]],
        arg: ArgSpec::None,
    },
    Rule {
        tool_id: "search_chain_data",
        requires: &[&["search", "find", "look up", "lookup", "which token", "what token"]],
        arg: ArgSpec::Query,
    },
];

fn tx_hash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b0x[0-9a-fA-F]{64}\b").expect("valid tx hash regex"))
}

fn address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b0x[0-9a-fA-F]{40}\b").expect("valid address regex"))
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{1,12}\b").expect("valid number regex"))
}

fn symbol_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z]{2,6}\b").expect("valid symbol regex"))
}

/// Words the symbol extractor must not mistake for a token symbol.
const COMMON_WORDS: &[&str] = &[
    "THE", "AND", "FOR", "ARE", "NOT", "YOU", "ALL", "CAN", "HOW", "WHAT", "WHEN", "WHERE",
    "WHICH", "TOKEN", "USD", "BTC", "API",
];

fn keyword_groups_hit(text_lower: &str, requires: &[&[&str]]) -> bool {
    requires
        .iter()
        .all(|group| group.iter().any(|phrase| text_lower.contains(phrase)))
}

/// Best-effort search query: a quoted phrase, else an uppercase symbol,
/// else the trimmed text itself.
fn extract_query(text: &str) -> String {
    if let Some(start) = text.find('"') {
        if let Some(len) = text[start + 1..].find('"') {
            let quoted = &text[start + 1..start + 1 + len];
            if !quoted.is_empty() {
                return quoted.to_string();
            }
        }
    }
    for cap in symbol_re().captures_iter(text) {
        let candidate = cap[0].to_string();
        if !COMMON_WORDS.contains(&candidate.as_str()) {
            return candidate;
        }
    }
    text.trim().chars().take(80).collect()
}

fn extract_args(text: &str, spec: ArgSpec) -> Option<Value> {
    match spec {
        ArgSpec::TxHash => tx_hash_re()
            .find(text)
            .map(|m| json!({ "hash": m.as_str() })),
        ArgSpec::TxHashes => {
            let hashes: Vec<&str> = tx_hash_re().find_iter(text).map(|m| m.as_str()).collect();
            if hashes.len() >= 2 {
                Some(json!({ "hashes": hashes }))
            } else {
                None
            }
        }
        ArgSpec::Address => address_re()
            .find(text)
            .map(|m| json!({ "address": m.as_str() })),
        ArgSpec::BlockNumber => number_re()
            .find(text)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .map(|n| json!({ "number": n })),
        ArgSpec::Query => {
            let query = extract_query(text);
            if query.is_empty() {
                None
            } else {
                Some(json!({ "query": query }))
            }
        }
        ArgSpec::None => Some(json!({})),
    }
}

/// Infers the catalog tool a question most plausibly refers to.
///
/// Returns `None` when no rule is satisfied; the caller decides whether
/// to skip the item or route it to a configured fallback tool.
pub fn infer(catalog: &Catalog, text: &str) -> Option<Inference> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();

    for rule in RULES {
        if !catalog.contains(rule.tool_id) {
            continue;
        }
        if !keyword_groups_hit(&lower, rule.requires) {
            continue;
        }
        if let Some(arguments) = extract_args(trimmed, rule.arg) {
            return Some(Inference {
                tool_id: rule.tool_id.to_string(),
                arguments,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_catalog;

    const HASH_A: &str = "0x3b2060db2444eb4cfecfa8b3e44584040b4eb175b04b4a8a7ad37743c09e50dc";
    const HASH_B: &str = "0x9f1c44a8c5d2e31b07a6d9e8f3c2b1a0918273645546372819fafbecdd102938";
    const ADDR: &str = "0x1f9090aaE28b8a3dCeaDf281B0F12828e676c326";

    fn infer_default(text: &str) -> Option<Inference> {
        infer(&default_catalog(), text)
    }

    #[test]
    fn test_single_hash_routes_to_tx_lookup() {
        let got = infer_default(&format!("Did my transaction {} go through?", HASH_A))
            .expect("should match");
        assert_eq!(got.tool_id, "get_tx_by_hash");
        assert_eq!(got.arguments["hash"], HASH_A);
    }

    #[test]
    fn test_two_hashes_route_to_batch_lookup() {
        let text = format!("Check these two txs for me: {} and {}", HASH_A, HASH_B);
        let got = infer_default(&text).expect("should match");
        assert_eq!(got.tool_id, "batch_get_tx_by_hashes");
        assert_eq!(got.arguments["hashes"].as_array().map(|a| a.len()), Some(2));
    }

    #[test]
    fn test_block_keyword_beats_tx_for_long_hash() {
        let text = format!("Show me the block with hash {}", HASH_A);
        let got = infer_default(&text).expect("should match");
        assert_eq!(got.tool_id, "get_block_by_hash");
    }

    #[test]
    fn test_block_by_number() {
        let got = infer_default("What happened in block 1234567?").expect("should match");
        assert_eq!(got.tool_id, "get_block_by_number");
        assert_eq!(got.arguments["number"], 1234567);
    }

    #[test]
    fn test_address_rules() {
        let cases = [
            (format!("Who are the top holders of {}?", ADDR), "get_holders_by_address"),
            (format!("Show the token holdings of {}", ADDR), "query_token_holding_by_address"),
            (format!("What is the total value worth of {}?", ADDR), "query_asset_value_by_address"),
            (format!("Latest transactions for {} please", ADDR), "list_address_latest_txs"),
            (format!("Tell me about {}", ADDR), "get_address_details_by_address"),
        ];
        for (text, expected) in cases {
            let got = infer_default(&text).expect("should match");
            assert_eq!(got.tool_id, expected, "text: {}", text);
            assert_eq!(got.arguments["address"], ADDR);
        }
    }

    #[test]
    fn test_search_extracts_symbol() {
        let got = infer_default("Can you search for the MERL token?").expect("should match");
        assert_eq!(got.tool_id, "search_chain_data");
        assert_eq!(got.arguments["query"], "MERL");
    }

    #[test]
    fn test_no_confident_match() {
        assert!(infer_default("What's the weather like today?").is_none());
        assert!(infer_default("").is_none());
        assert!(infer_default("   ").is_none());
    }

    #[test]
    fn test_inference_is_deterministic() {
        let text = format!("Latest transfers for {}", ADDR);
        let a = infer_default(&text);
        let b = infer_default(&text);
        assert_eq!(a, b);
    }

    #[test]
    fn test_rule_skipped_when_tool_absent_from_catalog() {
        use crate::catalog::{Catalog, ToolSpec};
        // Catalog without the batch tool: two hashes fall through to the
        // single-hash rule.
        let catalog = Catalog::new(vec![ToolSpec::new(
            "get_tx_by_hash",
            "tx lookup",
            serde_json::json!({}),
            1,
        )]);
        let text = format!("Check {} and {}", HASH_A, HASH_B);
        let got = infer(&catalog, &text).expect("should match");
        assert_eq!(got.tool_id, "get_tx_by_hash");
    }
}
