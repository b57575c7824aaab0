use crate::errors::{WalletError, WalletResult};
use serde::{Deserialize, Serialize};

/// A selectable chain configuration
///
/// Exactly one network is active at a time. Balances, history, and token
/// caches are scoped to it and reset on switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub name: String,
    pub symbol: String,
    pub rpc_url: String,
    pub chain_id: u64,
    pub explorer_url: String,
    /// Identifier the balance/token provider uses for this chain
    pub provider_network_id: String,
}

/// Built-in network presets, first entry is the default
pub fn supported_networks() -> Vec<NetworkConfig> {
    vec![
        NetworkConfig {
            name: "Ethereum Sepolia".to_string(),
            symbol: "ETH".to_string(),
            rpc_url: "https://rpc.sepolia.org".to_string(),
            chain_id: 11155111,
            explorer_url: "https://sepolia.etherscan.io".to_string(),
            provider_network_id: "eth-sepolia".to_string(),
        },
        NetworkConfig {
            name: "Polygon Mumbai".to_string(),
            symbol: "MATIC".to_string(),
            rpc_url: "https://rpc-mumbai.maticvigil.com".to_string(),
            chain_id: 80001,
            explorer_url: "https://mumbai.polygonscan.com".to_string(),
            provider_network_id: "polygon-mumbai".to_string(),
        },
    ]
}

pub fn default_network() -> NetworkConfig {
    supported_networks()
        .into_iter()
        .next()
        .expect("preset network list is never empty")
}

/// Look up a preset by display name
pub fn find_network(name: &str) -> WalletResult<NetworkConfig> {
    supported_networks()
        .into_iter()
        .find(|n| n.name == name)
        .ok_or_else(|| WalletError::ValidationError(format!("Unknown network: {}", name)))
}
