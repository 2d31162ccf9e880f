//! Tool catalog
//!
//! The catalog is the fixed set of external tools questions are generated
//! for. It is normally fetched from the tool service at startup; the
//! built-in default covers the same chain-explorer tool set for offline
//! runs. Catalog order is significant: allocation and inference both use
//! it as the deterministic tie-break.

pub mod inference;
pub mod quota;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One entry in the tool catalog. Immutable once the catalog is built.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSpec {
    pub id: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: Value,
    /// Relative share of the generation target this tool receives.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl ToolSpec {
    pub fn new(id: &str, description: &str, parameters: Value, weight: u32) -> Self {
        ToolSpec {
            id: id.to_string(),
            description: description.to_string(),
            parameters,
            weight,
        }
    }
}

/// Ordered, immutable collection of [`ToolSpec`]s.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    tools: Vec<ToolSpec>,
}

impl Catalog {
    pub fn new(tools: Vec<ToolSpec>) -> Self {
        Catalog { tools }
    }

    pub fn get(&self, id: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Position in catalog order, used as the deterministic tie-break.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.tools.iter().position(|t| t.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn address_params() -> Value {
    json!({
        "type": "object",
        "properties": {
            "address": { "type": "string", "description": "Account or contract address (0x-prefixed, 40 hex digits)" }
        },
        "required": ["address"]
    })
}

fn hash_params() -> Value {
    json!({
        "type": "object",
        "properties": {
            "hash": { "type": "string", "description": "Transaction hash (0x-prefixed, 64 hex digits)" }
        },
        "required": ["hash"]
    })
}

/// The default chain-explorer catalog, mirroring the tool set the service
/// exposes. Weights are per-hundred shares of the generation target.
pub fn default_catalog() -> Catalog {
    Catalog::new(vec![
        ToolSpec::new(
            "get_address_details_by_address",
            "Look up an address: balance, transaction count and basic details",
            address_params(),
            10,
        ),
        ToolSpec::new(
            "get_token_info_by_address",
            "Fetch token metadata (name, symbol, decimals, supply) by contract address",
            address_params(),
            8,
        ),
        ToolSpec::new(
            "list_address_latest_txs",
            "List the most recent transactions sent or received by an address",
            address_params(),
            8,
        ),
        ToolSpec::new(
            "get_tx_by_hash",
            "Fetch a single transaction's details by its hash",
            hash_params(),
            7,
        ),
        ToolSpec::new(
            "search_chain_data",
            "Free-text search across on-chain data: tokens, addresses, transactions",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search keywords" }
                },
                "required": ["query"]
            }),
            7,
        ),
        ToolSpec::new(
            "query_asset_value_by_address",
            "Compute the total asset value held by an address",
            address_params(),
            5,
        ),
        ToolSpec::new(
            "query_token_holding_by_address",
            "Break down an address's holdings by token",
            address_params(),
            5,
        ),
        ToolSpec::new(
            "get_block_by_number",
            "Fetch a block's details by block number",
            json!({
                "type": "object",
                "properties": {
                    "number": { "type": "integer", "description": "Block height" }
                },
                "required": ["number"]
            }),
            5,
        ),
        ToolSpec::new(
            "list_latest_blocks",
            "List the most recently produced blocks",
            json!({ "type": "object", "properties": {} }),
            5,
        ),
        ToolSpec::new(
            "get_token_price_change_by_address",
            "Fetch a token's recent price change by contract address",
            address_params(),
            5,
        ),
        ToolSpec::new(
            "list_address_latest_token_transfers",
            "List recent token transfers involving an address",
            address_params(),
            5,
        ),
        ToolSpec::new(
            "get_holders_by_address",
            "Rank the holders of a token by balance",
            address_params(),
            5,
        ),
        ToolSpec::new(
            "batch_get_tx_by_hashes",
            "Fetch several transactions at once by their hashes",
            json!({
                "type": "object",
                "properties": {
                    "hashes": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Transaction hashes"
                    }
                },
                "required": ["hashes"]
            }),
            3,
        ),
        ToolSpec::new(
            "list_block_txs",
            "List the transactions contained in a block",
            json!({
                "type": "object",
                "properties": {
                    "number": { "type": "integer", "description": "Block height" }
                },
                "required": ["number"]
            }),
            3,
        ),
        ToolSpec::new(
            "get_native_price_info_by_address",
            "Fetch the native coin price for an address's chain",
            address_params(),
            3,
        ),
        ToolSpec::new(
            "get_token_onchain_data_by_address",
            "Fetch a token's on-chain activity data (volume, transfers) by address",
            address_params(),
            3,
        ),
        ToolSpec::new(
            "list_recent_txs_num_by_address",
            "Count an address's transactions over a recent window",
            address_params(),
            3,
        ),
        ToolSpec::new(
            "get_block_by_hash",
            "Fetch a block's details by block hash",
            hash_params(),
            3,
        ),
        ToolSpec::new(
            "list_latest_txs",
            "List the most recent transactions on the chain",
            json!({ "type": "object", "properties": {} }),
            4,
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_shape() {
        let catalog = default_catalog();
        assert_eq!(catalog.len(), 19);
        assert!(catalog.contains("get_tx_by_hash"));
        assert_eq!(catalog.index_of("get_address_details_by_address"), Some(0));
        // Every tool declares an object schema
        for tool in catalog.iter() {
            assert_eq!(tool.parameters["type"], "object");
            assert!(tool.weight > 0);
        }
    }
}
